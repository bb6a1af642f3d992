//! Metatiles: rectangular groups of adjacent tiles rendered as one image.
//!
//! Rendering a `w × h` block with a pixel buffer around it amortises the
//! upstream source cost across neighbouring tiles and avoids label/symbol
//! clipping at tile edges. The mapping from a tile to its metatile is a lossy
//! integer division, so every tile belongs to exactly one metatile.

use crate::{Grid, GridOrigin, Tile, TileCoord};
use anyhow::{Result, ensure};

#[derive(Clone, Debug)]
pub struct MetaTile {
	pub z: u8,
	/// Metatile column and row (tile coordinates divided by the metatile size).
	pub mx: u32,
	pub my: u32,
	/// Configured metatile size (the tile→metatile division stride).
	metasize: (u32, u32),
	/// Effective size in tiles, clipped at the grid edge.
	pub width_tiles: u32,
	pub height_tiles: u32,
	/// Pixel border rendered around the block and discarded when cropping.
	pub buffer: u32,
	pub tile_width: u32,
	pub tile_height: u32,
	origin: GridOrigin,
	/// Geographic extent including the buffer, in grid units.
	pub extent: [f64; 4],
	/// The child tiles covered by this metatile, in row-major order.
	pub tiles: Vec<Tile>,
}

impl MetaTile {
	/// Builds the metatile containing `seed`, using the tileset's
	/// `metasize`/`metabuffer` and the geometry of `grid`.
	pub fn around(seed: &Tile, grid: &Grid, metasize: (u32, u32), metabuffer: u32) -> Result<MetaTile> {
		let (msize_w, msize_h) = (metasize.0.max(1), metasize.1.max(1));
		let coord = seed.coord;
		ensure!(grid.contains(&coord), "tile {coord:?} is outside grid {:?}", grid.name);

		let (limit_x, limit_y) = grid.level_limits(coord.z)?;
		let mx = coord.x / msize_w;
		let my = coord.y / msize_h;

		// Metatiles at the right/top edge cover fewer tiles.
		let width_tiles = msize_w.min(limit_x - mx * msize_w);
		let height_tiles = msize_h.min(limit_y - my * msize_h);

		let mut tiles = Vec::with_capacity((width_tiles * height_tiles) as usize);
		for dy in 0..height_tiles {
			for dx in 0..width_tiles {
				let child = TileCoord::new(coord.z, mx * msize_w + dx, my * msize_h + dy)?;
				tiles.push(Tile {
					coord: child,
					data: None,
					mtime: None,
					..seed.clone()
				});
			}
		}

		let res = grid.resolution(coord.z)?;
		let low = grid.tile_extent(&TileCoord::new(coord.z, mx * msize_w, my * msize_h)?)?;
		let high = grid.tile_extent(&TileCoord::new(
			coord.z,
			mx * msize_w + width_tiles - 1,
			my * msize_h + height_tiles - 1,
		)?)?;
		let buf = res * f64::from(metabuffer);
		let extent = [
			low[0].min(high[0]) - buf,
			low[1].min(high[1]) - buf,
			low[2].max(high[2]) + buf,
			low[3].max(high[3]) + buf,
		];

		Ok(MetaTile {
			z: coord.z,
			mx,
			my,
			metasize: (msize_w, msize_h),
			width_tiles,
			height_tiles,
			buffer: metabuffer,
			tile_width: grid.tile_width,
			tile_height: grid.tile_height,
			origin: grid.origin,
			extent,
			tiles,
		})
	}

	/// Rendered image width in pixels, buffer included.
	#[must_use]
	pub fn width_px(&self) -> u32 {
		self.width_tiles * self.tile_width + 2 * self.buffer
	}

	/// Rendered image height in pixels, buffer included.
	#[must_use]
	pub fn height_px(&self) -> u32 {
		self.height_tiles * self.tile_height + 2 * self.buffer
	}

	/// Pixel offset of a child tile's top-left corner within the rendered
	/// metatile image.
	pub fn crop_offset(&self, coord: &TileCoord) -> Result<(u32, u32)> {
		let dx = coord
			.x
			.checked_sub(self.mx * self.metasize.0)
			.filter(|dx| *dx < self.width_tiles);
		let dy = coord
			.y
			.checked_sub(self.my * self.metasize.1)
			.filter(|dy| *dy < self.height_tiles);
		let (Some(dx), Some(dy)) = (dx, dy) else {
			anyhow::bail!("tile {coord:?} is not part of metatile ({},{})", self.mx, self.my);
		};
		let ox = self.buffer + dx * self.tile_width;
		// Image rows run top-down; bottom-left grids count tiles bottom-up.
		let oy = match self.origin {
			GridOrigin::BottomLeft => self.buffer + (self.height_tiles - 1 - dy) * self.tile_height,
			GridOrigin::TopLeft => self.buffer + dy * self.tile_height,
		};
		Ok((ox, oy))
	}

	/// Resource string for the cross-process lock serialising renders of this
	/// metatile. Per-locker character sanitisation happens in the locker.
	#[must_use]
	pub fn lock_resource(&self) -> String {
		let seed = &self.tiles[0];
		let mut resource = format!("{}/{}/{}/{}/{}", seed.tileset, seed.grid, self.z, self.mx, self.my);
		for (_, v) in &seed.dimensions {
			resource.push('/');
			resource.push_str(v);
		}
		resource
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::Grid;

	fn seed(z: u8, x: u32, y: u32) -> Tile {
		Tile::new("l1", "GoogleMapsCompatible", TileCoord::new(z, x, y).unwrap())
	}

	#[test]
	fn children_cover_the_block() {
		let grid = Grid::google_maps_compatible();
		let meta = MetaTile::around(&seed(3, 2, 5), &grid, (2, 2), 0).unwrap();
		assert_eq!((meta.mx, meta.my), (1, 2));
		assert_eq!(meta.tiles.len(), 4);
		let coords: Vec<(u32, u32)> = meta.tiles.iter().map(|t| (t.coord.x, t.coord.y)).collect();
		assert_eq!(coords, vec![(2, 4), (3, 4), (2, 5), (3, 5)]);
	}

	#[test]
	fn all_block_members_share_a_metatile() {
		let grid = Grid::google_maps_compatible();
		let a = MetaTile::around(&seed(4, 10, 10), &grid, (5, 5), 0).unwrap();
		let b = MetaTile::around(&seed(4, 14, 14), &grid, (5, 5), 0).unwrap();
		assert_eq!((a.mx, a.my), (b.mx, b.my));
		assert_eq!(a.lock_resource(), b.lock_resource());
	}

	#[test]
	fn pixel_dims_include_buffer() {
		let grid = Grid::google_maps_compatible();
		let meta = MetaTile::around(&seed(5, 9, 9), &grid, (3, 3), 10).unwrap();
		assert_eq!(meta.width_px(), 3 * 256 + 20);
		assert_eq!(meta.height_px(), 3 * 256 + 20);
	}

	#[test]
	fn clipped_at_grid_edge() {
		let grid = Grid::google_maps_compatible();
		// zoom 1 has 2x2 tiles; a 5x5 metatile covers all of them
		let meta = MetaTile::around(&seed(1, 1, 1), &grid, (5, 5), 0).unwrap();
		assert_eq!((meta.width_tiles, meta.height_tiles), (2, 2));
		assert_eq!(meta.tiles.len(), 4);
	}

	#[test]
	fn crop_offsets_flip_rows_for_bottom_left_grids() {
		let grid = Grid::google_maps_compatible();
		let meta = MetaTile::around(&seed(3, 0, 0), &grid, (2, 2), 10).unwrap();
		// y=1 is the upper row of the block, so it sits at the top of the image
		assert_eq!(meta.crop_offset(&TileCoord::new(3, 0, 1).unwrap()).unwrap(), (10, 10));
		assert_eq!(meta.crop_offset(&TileCoord::new(3, 0, 0).unwrap()).unwrap(), (10, 266));
		assert_eq!(meta.crop_offset(&TileCoord::new(3, 1, 0).unwrap()).unwrap(), (266, 266));
	}

	#[test]
	fn lock_resource_includes_dimensions() {
		let grid = Grid::google_maps_compatible();
		let tile = seed(3, 2, 5).with_dimensions(vec![("TIME".to_string(), "2024".to_string())]);
		let meta = MetaTile::around(&tile, &grid, (2, 2), 0).unwrap();
		assert_eq!(meta.lock_resource(), "l1/GoogleMapsCompatible/3/1/2/2024");
	}

	#[test]
	fn extent_matches_covered_tiles() {
		let grid = Grid::wgs84();
		let meta = MetaTile::around(&seed_on(&grid, 1, 0, 0), &grid, (2, 2), 0).unwrap();
		// zoom 1: 4x2 tiles of 90°; block (0,0)-(1,1) covers the west hemisphere
		assert_eq!(meta.extent, [-180.0, -90.0, 0.0, 90.0]);
	}

	fn seed_on(grid: &Grid, z: u8, x: u32, y: u32) -> Tile {
		Tile::new("l1", &grid.name, TileCoord::new(z, x, y).unwrap())
	}
}
