//! PNG encoder/decoder bridging the [`image`] crate and [`Blob`].
//!
//! PNG is the lossless tile format; encoding uses fast filtering since tiles
//! are encoded on the hot path of a cache miss.

use anyhow::{Result, anyhow};
use image::{DynamicImage, ImageEncoder, ImageFormat, codecs::png, load_from_memory_with_format};
use tilevault_core::Blob;

/// Encode a `DynamicImage` into a PNG [`Blob`].
pub fn image2blob(image: &DynamicImage) -> Result<Blob> {
	let mut buffer: Vec<u8> = Vec::new();
	png::PngEncoder::new_with_quality(&mut buffer, png::CompressionType::Fast, png::FilterType::Adaptive)
		.write_image(image.as_bytes(), image.width(), image.height(), image.color().into())?;
	Ok(Blob::from(buffer))
}

/// Decode a PNG [`Blob`] back into a [`DynamicImage`].
pub fn blob2image(blob: &Blob) -> Result<DynamicImage> {
	load_from_memory_with_format(blob.as_slice(), ImageFormat::Png)
		.map_err(|e| anyhow!("failed to decode PNG image: {e}"))
}
