//! Image handling for TileVault: PNG/JPEG codecs over the [`image`] crate,
//! metatile cropping and map composition.
//!
//! The cache layer never sees pixels; this crate is used by the pipeline on
//! the render path (metatile → tiles) and the GetMap path (tiles → map).

mod compose;
mod format;

pub use compose::{compose, crop_tile};
pub use format::{decode, encode, jpeg, png};

#[cfg(test)]
pub(crate) fn test_image(width: u32, height: u32) -> image::DynamicImage {
	let mut img = image::RgbaImage::new(width, height);
	for (x, y, pixel) in img.enumerate_pixels_mut() {
		*pixel = image::Rgba([(x * 4) as u8, (y * 8) as u8, ((x + y) * 2) as u8, 255]);
	}
	image::DynamicImage::ImageRgba8(img)
}
