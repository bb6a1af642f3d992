pub mod jpeg;
pub mod png;

use anyhow::Result;
use image::DynamicImage;
use tilevault_core::{Blob, TileFormat};

/// Encode an image in the given tile format.
pub fn encode(image: &DynamicImage, format: TileFormat) -> Result<Blob> {
	match format {
		TileFormat::Png => png::image2blob(image),
		TileFormat::Jpeg => jpeg::image2blob(image),
	}
}

/// Decode a blob of the given tile format.
pub fn decode(blob: &Blob, format: TileFormat) -> Result<DynamicImage> {
	match format {
		TileFormat::Png => png::blob2image(blob),
		TileFormat::Jpeg => jpeg::blob2image(blob),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_image;

	#[test]
	fn dispatch_matches_format() -> Result<()> {
		let img = test_image(16, 16);
		let png = encode(&img, TileFormat::Png)?;
		let jpg = encode(&img, TileFormat::Jpeg)?;
		assert_eq!(&png.as_slice()[0..4], b"\x89PNG");
		assert_eq!(&jpg.as_slice()[0..2], b"\xff\xd8");
		assert!(decode(&png, TileFormat::Png).is_ok());
		assert!(decode(&png, TileFormat::Jpeg).is_err());
		Ok(())
	}
}
