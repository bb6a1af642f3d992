//! The per-request tile entity passed between pipeline and caches.

use crate::{Blob, TileCoord, TileFormat};
use std::fmt::{self, Debug};
use std::time::SystemTime;

/// One addressable tile.
///
/// A tile is identified by `(tileset, grid, coord, dimensions)`; everything
/// else is payload filled in by a cache hit or a render. Caches traffic in the
/// encoded `data` blob only; decoding to pixels happens in the pipeline and
/// only where composition or cropping needs it.
#[derive(Clone, PartialEq)]
pub struct Tile {
	pub tileset: String,
	pub grid: String,
	pub coord: TileCoord,
	/// Ordered `key=value` pairs; order is part of the cache key.
	pub dimensions: Vec<(String, String)>,
	/// Encoded format, inherited from the tileset.
	pub format: TileFormat,
	pub data: Option<Blob>,
	pub mtime: Option<SystemTime>,
	/// Response lifetime in seconds, stamped from the tileset configuration.
	pub expires: Option<u32>,
	pub nodata: bool,
}

impl Tile {
	#[must_use]
	pub fn new(tileset: &str, grid: &str, coord: TileCoord) -> Tile {
		Tile {
			tileset: tileset.to_string(),
			grid: grid.to_string(),
			coord,
			dimensions: Vec::new(),
			format: TileFormat::Png,
			data: None,
			mtime: None,
			expires: None,
			nodata: false,
		}
	}

	#[must_use]
	pub fn with_dimensions(mut self, dimensions: Vec<(String, String)>) -> Tile {
		self.dimensions = dimensions;
		self
	}

	#[must_use]
	pub fn with_format(mut self, format: TileFormat) -> Tile {
		self.format = format;
		self
	}

	/// The `/`-joined dimension values, empty for a tileset without dimensions.
	///
	/// Used by path- and key-building backends so that distinct dimension
	/// combinations never collide.
	#[must_use]
	pub fn dimension_path(&self) -> String {
		self
			.dimensions
			.iter()
			.map(|(_, v)| v.as_str())
			.collect::<Vec<_>>()
			.join("/")
	}

	/// Canonical key `tileset/grid[/dims]/z/x/y` identifying this tile across
	/// all backends.
	#[must_use]
	pub fn cache_key(&self) -> String {
		let mut key = format!("{}/{}", self.tileset, self.grid);
		for (_, v) in &self.dimensions {
			key.push('/');
			key.push_str(v);
		}
		key.push_str(&format!("/{}/{}/{}", self.coord.z, self.coord.x, self.coord.y));
		key
	}
}

impl Debug for Tile {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Tile")
			.field("key", &self.cache_key())
			.field("data", &self.data)
			.field("mtime", &self.mtime)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn cache_key_without_dimensions() {
		let tile = Tile::new("l1", "GridA", TileCoord::new(3, 2, 5).unwrap());
		assert_eq!(tile.cache_key(), "l1/GridA/3/2/5");
		assert_eq!(tile.dimension_path(), "");
	}

	#[test]
	fn cache_key_preserves_dimension_order() {
		let tile = Tile::new("l1", "GridA", TileCoord::new(0, 0, 0).unwrap()).with_dimensions(vec![
			("TIME".to_string(), "2024".to_string()),
			("ELEVATION".to_string(), "500".to_string()),
		]);
		assert_eq!(tile.cache_key(), "l1/GridA/2024/500/0/0/0");
		assert_eq!(tile.dimension_path(), "2024/500");
	}
}
