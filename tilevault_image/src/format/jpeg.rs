//! JPEG encoder/decoder bridging the [`image`] crate and [`Blob`].

use anyhow::{Result, anyhow, bail};
use image::{DynamicImage, ImageFormat, codecs::jpeg, load_from_memory_with_format};
use tilevault_core::Blob;

/// Encode a `DynamicImage` into a JPEG [`Blob`] with the given quality
/// (default 95). JPEG has no alpha channel, so the image is flattened to RGB.
pub fn encode(image: &DynamicImage, quality: Option<u8>) -> Result<Blob> {
	let quality = quality.unwrap_or(95);
	if quality > 100 {
		bail!("jpeg quality must be <= 100");
	}

	let rgb = image.to_rgb8();
	let mut buffer: Vec<u8> = Vec::new();
	jpeg::JpegEncoder::new_with_quality(&mut buffer, quality).encode_image(&rgb)?;
	Ok(Blob::from(buffer))
}

/// Convenience wrapper for [`encode`] with default quality.
pub fn image2blob(image: &DynamicImage) -> Result<Blob> {
	encode(image, None)
}

/// Decode a JPEG [`Blob`] back into a [`DynamicImage`].
pub fn blob2image(blob: &Blob) -> Result<DynamicImage> {
	load_from_memory_with_format(blob.as_slice(), ImageFormat::Jpeg)
		.map_err(|e| anyhow!("failed to decode JPEG image: {e}"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_image;

	#[test]
	fn jpeg_round_trip_keeps_dimensions() -> Result<()> {
		let img = test_image(64, 32);
		let blob = image2blob(&img)?;
		assert_eq!(&blob.as_slice()[0..2], b"\xff\xd8");
		let decoded = blob2image(&blob)?;
		assert_eq!((decoded.width(), decoded.height()), (64, 32));
		Ok(())
	}

	#[test]
	fn quality_out_of_range() {
		assert!(encode(&test_image(8, 8), Some(101)).is_err());
	}
}
