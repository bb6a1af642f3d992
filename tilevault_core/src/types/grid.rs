//! Tile pyramids: per-level resolutions over a projected extent.
//!
//! A [`Grid`] binds a spatial reference, a tile pixel size, an extent and an
//! ordered list of resolutions (index = zoom level). All geographic math the
//! pipeline needs (tile extents, per-level limits, containment) lives here.
//!
//! Two grids every configuration can reference without declaring them are
//! pre-registered: `GoogleMapsCompatible` (EPSG:3857, 256 px, 20 levels) and
//! `WGS84` (EPSG:4326, 256 px, 18 levels).

use crate::TileCoord;
use anyhow::{Result, ensure};

/// Corner of the extent that tile (0,0) is anchored to.
///
/// Bottom-left is the TMS convention and the default; WMTS-style row numbering
/// is handled by the service parser, not the grid.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GridOrigin {
	#[default]
	BottomLeft,
	TopLeft,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Grid {
	pub name: String,
	pub srs: String,
	pub units: String,
	pub tile_width: u32,
	pub tile_height: u32,
	/// `[minx, miny, maxx, maxy]` in grid units.
	pub extent: [f64; 4],
	/// Units per pixel, one entry per zoom level, strictly decreasing.
	pub resolutions: Vec<f64>,
	pub origin: GridOrigin,
}

impl Grid {
	/// The highest zoom level this grid defines.
	#[must_use]
	pub fn max_zoom(&self) -> u8 {
		(self.resolutions.len().saturating_sub(1)) as u8
	}

	/// Units per pixel at zoom `z`.
	pub fn resolution(&self, z: u8) -> Result<f64> {
		self
			.resolutions
			.get(z as usize)
			.copied()
			.ok_or_else(|| anyhow::anyhow!("grid {:?} has no zoom level {z}", self.name))
	}

	/// Number of tiles along x and y at zoom `z`.
	pub fn level_limits(&self, z: u8) -> Result<(u32, u32)> {
		let res = self.resolution(z)?;
		let nx = ((self.extent[2] - self.extent[0]) / (res * f64::from(self.tile_width))).ceil();
		let ny = ((self.extent[3] - self.extent[1]) / (res * f64::from(self.tile_height))).ceil();
		Ok((nx.max(1.0) as u32, ny.max(1.0) as u32))
	}

	/// Whether the coordinate addresses a tile inside this grid.
	#[must_use]
	pub fn contains(&self, coord: &TileCoord) -> bool {
		match self.level_limits(coord.z) {
			Ok((nx, ny)) => coord.x < nx && coord.y < ny,
			Err(_) => false,
		}
	}

	/// Geographic extent `[minx, miny, maxx, maxy]` of a single tile.
	pub fn tile_extent(&self, coord: &TileCoord) -> Result<[f64; 4]> {
		ensure!(self.contains(coord), "tile {coord:?} is outside grid {:?}", self.name);
		let res = self.resolution(coord.z)?;
		let tile_w = res * f64::from(self.tile_width);
		let tile_h = res * f64::from(self.tile_height);
		let minx = self.extent[0] + tile_w * f64::from(coord.x);
		Ok(match self.origin {
			GridOrigin::BottomLeft => {
				let miny = self.extent[1] + tile_h * f64::from(coord.y);
				[minx, miny, minx + tile_w, miny + tile_h]
			}
			GridOrigin::TopLeft => {
				let maxy = self.extent[3] - tile_h * f64::from(coord.y);
				[minx, maxy - tile_h, minx + tile_w, maxy]
			}
		})
	}

	/// The spherical-mercator pyramid used by virtually every slippy map.
	#[must_use]
	pub fn google_maps_compatible() -> Grid {
		const HALF_WORLD: f64 = 20037508.3427892;
		Grid {
			name: "GoogleMapsCompatible".to_string(),
			srs: "EPSG:3857".to_string(),
			units: "m".to_string(),
			tile_width: 256,
			tile_height: 256,
			extent: [-HALF_WORLD, -HALF_WORLD, HALF_WORLD, HALF_WORLD],
			resolutions: (0..20).map(|z| 2.0 * HALF_WORLD / 256.0 / f64::from(1u32 << z)).collect(),
			origin: GridOrigin::BottomLeft,
		}
	}

	/// The plate-carrée pyramid (two tiles wide at zoom 0).
	#[must_use]
	pub fn wgs84() -> Grid {
		Grid {
			name: "WGS84".to_string(),
			srs: "EPSG:4326".to_string(),
			units: "dd".to_string(),
			tile_width: 256,
			tile_height: 256,
			extent: [-180.0, -90.0, 180.0, 90.0],
			resolutions: (0..18).map(|z| 180.0 / 256.0 / f64::from(1u32 << z)).collect(),
			origin: GridOrigin::BottomLeft,
		}
	}
}
