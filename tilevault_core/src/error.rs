//! HTTP-aware error values.
//!
//! Internally everything propagates as [`anyhow::Error`]; fallible operations
//! that must surface a specific HTTP status attach an [`HttpError`] to the
//! chain. The response assembler downcasts at the boundary and falls back to
//! 500 for anything untyped.

use std::fmt::{self, Display};

/// An error carrying an HTTP status code and a message for the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpError {
	pub status: u16,
	pub message: String,
}

impl HttpError {
	pub fn new(status: u16, message: impl Into<String>) -> HttpError {
		HttpError {
			status,
			message: message.into(),
		}
	}

	/// 400: malformed parameters, unknown dimension values, bad z/x/y.
	pub fn bad_request(message: impl Into<String>) -> anyhow::Error {
		HttpError::new(400, message).into()
	}

	/// 404: unknown endpoint, tileset, grid or tile.
	pub fn not_found(message: impl Into<String>) -> anyhow::Error {
		HttpError::new(404, message).into()
	}

	/// 405: HTTP method other than GET/POST.
	pub fn method_not_allowed(message: impl Into<String>) -> anyhow::Error {
		HttpError::new(405, message).into()
	}

	/// 413: proxied POST body exceeds the configured limit.
	pub fn payload_too_large(message: impl Into<String>) -> anyhow::Error {
		HttpError::new(413, message).into()
	}

	/// 500: backend failure after retries, or an internal defect.
	pub fn backend(message: impl Into<String>) -> anyhow::Error {
		HttpError::new(500, message).into()
	}

	/// 502: the proxied upstream failed.
	pub fn upstream(message: impl Into<String>) -> anyhow::Error {
		HttpError::new(502, message).into()
	}
}

impl Display for HttpError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.status, self.message)
	}
}

impl std::error::Error for HttpError {}

/// Extracts the HTTP status from an error chain, defaulting to 500.
#[must_use]
pub fn error_status(err: &anyhow::Error) -> u16 {
	err.downcast_ref::<HttpError>().map_or(500, |e| e.status)
}

/// Extracts a client-facing message from an error chain.
#[must_use]
pub fn error_message(err: &anyhow::Error) -> String {
	err.downcast_ref::<HttpError>()
		.map_or_else(|| err.to_string(), |e| e.message.clone())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn typed_errors_carry_status() {
		let err = HttpError::not_found("no such tileset");
		assert_eq!(error_status(&err), 404);
		assert_eq!(error_message(&err), "no such tileset");
	}

	#[test]
	fn untyped_errors_default_to_500() {
		let err = anyhow::anyhow!("disk on fire");
		assert_eq!(error_status(&err), 500);
		assert_eq!(error_message(&err), "disk on fire");
	}

	#[test]
	fn status_survives_context() {
		let err = HttpError::payload_too_large("post request too big");
		assert_eq!(error_status(&err), 413);
	}
}
