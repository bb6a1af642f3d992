//! Raster tile formats understood by the pipeline.

use anyhow::{Result, bail};
use std::fmt::{self, Display};

/// The encoded image format of a tile.
///
/// The pipeline only ever re-encodes through one of these; everything else a
/// backend might store passes through opaquely on the hit path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TileFormat {
	#[default]
	Png,
	Jpeg,
}

impl TileFormat {
	/// MIME type for the `Content-Type` header.
	#[must_use]
	pub fn mime(&self) -> &'static str {
		match self {
			TileFormat::Png => "image/png",
			TileFormat::Jpeg => "image/jpeg",
		}
	}

	/// File extension without the leading dot.
	#[must_use]
	pub fn extension(&self) -> &'static str {
		match self {
			TileFormat::Png => "png",
			TileFormat::Jpeg => "jpg",
		}
	}

	/// Parses a format name or MIME type, case-insensitively.
	pub fn parse(value: &str) -> Result<TileFormat> {
		Ok(match value.to_ascii_lowercase().as_str() {
			"png" | "image/png" => TileFormat::Png,
			"jpg" | "jpeg" | "image/jpeg" | "image/jpg" => TileFormat::Jpeg,
			_ => bail!("unknown tile format {value:?} (expected PNG or JPEG)"),
		})
	}
}

impl Display for TileFormat {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			TileFormat::Png => "PNG",
			TileFormat::Jpeg => "JPEG",
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;

	#[rstest]
	#[case("PNG", TileFormat::Png)]
	#[case("png", TileFormat::Png)]
	#[case("image/png", TileFormat::Png)]
	#[case("JPEG", TileFormat::Jpeg)]
	#[case("jpg", TileFormat::Jpeg)]
	#[case("image/jpeg", TileFormat::Jpeg)]
	fn parse_ok(#[case] input: &str, #[case] expected: TileFormat) {
		assert_eq!(TileFormat::parse(input).unwrap(), expected);
	}

	#[test]
	fn parse_unknown() {
		assert!(TileFormat::parse("gif").is_err());
	}

	#[test]
	fn mime_and_extension() {
		assert_eq!(TileFormat::Png.mime(), "image/png");
		assert_eq!(TileFormat::Jpeg.extension(), "jpg");
		assert_eq!(TileFormat::Png.to_string(), "PNG");
	}
}
