//! The [`Blob`] struct, a thin wrapper around [`Vec<u8>`] for encoded tile data.
//!
//! Tiles travel through the caches and the HTTP layer as opaque byte buffers;
//! `Blob` gives them a small, explicit API surface instead of passing raw
//! vectors around.
//!
//! # Examples
//!
//! ```rust
//! use tilevault_core::Blob;
//!
//! let blob = Blob::from("Hello, world!");
//! assert_eq!(blob.len(), 13);
//! assert_eq!(blob.as_str(), "Hello, world!");
//! ```

use std::fmt::Debug;

/// A simple wrapper around [`Vec<u8>`] holding encoded tile bytes.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Blob(Vec<u8>);

impl Blob {
	/// Creates an empty `Blob`.
	#[must_use]
	pub fn new_empty() -> Blob {
		Blob(Vec::new())
	}

	/// Returns the underlying bytes as a slice.
	#[must_use]
	pub fn as_slice(&self) -> &[u8] {
		&self.0
	}

	/// Returns the underlying bytes as a `Vec<u8>`, cloning them.
	#[must_use]
	pub fn as_vec(&self) -> Vec<u8> {
		self.0.clone()
	}

	/// Consumes the `Blob` and returns the underlying bytes.
	#[must_use]
	pub fn into_vec(self) -> Vec<u8> {
		self.0
	}

	/// Interprets the content as UTF-8 text (lossy).
	#[must_use]
	pub fn as_str(&self) -> &str {
		std::str::from_utf8(&self.0).unwrap_or("<invalid utf-8>")
	}

	/// Number of bytes.
	#[must_use]
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` if the `Blob` contains no bytes.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

impl From<Vec<u8>> for Blob {
	fn from(value: Vec<u8>) -> Self {
		Blob(value)
	}
}

impl From<&[u8]> for Blob {
	fn from(value: &[u8]) -> Self {
		Blob(value.to_vec())
	}
}

impl<const N: usize> From<&[u8; N]> for Blob {
	fn from(value: &[u8; N]) -> Self {
		Blob(value.to_vec())
	}
}

impl From<&str> for Blob {
	fn from(value: &str) -> Self {
		Blob(value.as_bytes().to_vec())
	}
}

impl From<String> for Blob {
	fn from(value: String) -> Self {
		Blob(value.into_bytes())
	}
}

impl Debug for Blob {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_fmt(format_args!("Blob({} bytes)", self.0.len()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn conversions() {
		let blob = Blob::from(vec![1u8, 2, 3]);
		assert_eq!(blob.as_slice(), &[1, 2, 3]);
		assert_eq!(blob.clone().into_vec(), vec![1, 2, 3]);
		assert_eq!(Blob::from("abc").as_str(), "abc");
		assert_eq!(Blob::from(b"xy").len(), 2);
	}

	#[test]
	fn empty() {
		let blob = Blob::new_empty();
		assert!(blob.is_empty());
		assert_eq!(blob.len(), 0);
	}

	#[test]
	fn debug_shows_length() {
		assert_eq!(format!("{:?}", Blob::from("1234")), "Blob(4 bytes)");
	}
}
