//! Pixel assembly: cropping metatiles into tiles and compositing tiles into
//! larger maps.

use anyhow::{Result, ensure};
use image::{DynamicImage, RgbaImage, imageops};

/// Crops one tile out of a rendered metatile image.
///
/// `(ox, oy)` is the tile's top-left corner inside the metatile (buffer
/// already accounted for by the caller, see `MetaTile::crop_offset`).
pub fn crop_tile(meta: &DynamicImage, ox: u32, oy: u32, width: u32, height: u32) -> Result<DynamicImage> {
	ensure!(
		ox + width <= meta.width() && oy + height <= meta.height(),
		"crop ({ox},{oy})+{width}x{height} exceeds metatile image {}x{}",
		meta.width(),
		meta.height()
	);
	Ok(meta.crop_imm(ox, oy, width, height))
}

/// Alpha-composites decoded tiles onto a transparent canvas.
///
/// Tiles are applied in slice order, so later entries paint over earlier
/// ones where they overlap.
pub fn compose(width: u32, height: u32, tiles: &[(DynamicImage, i64, i64)]) -> DynamicImage {
	let mut canvas = RgbaImage::new(width, height);
	for (tile, ox, oy) in tiles {
		imageops::overlay(&mut canvas, &tile.to_rgba8(), *ox, *oy);
	}
	DynamicImage::ImageRgba8(canvas)
}
