//! Tile coordinates within a pyramid: zoom level plus column and row.
//!
//! # Examples
//!
//! ```
//! use tilevault_core::TileCoord;
//!
//! let coord = TileCoord::new(5, 6, 7).unwrap();
//! assert_eq!(coord.z, 5);
//! assert_eq!(coord.x, 6);
//! assert_eq!(coord.y, 7);
//! assert_eq!(coord.scaled_down(2, 2), TileCoord::new(5, 3, 3).unwrap());
//! ```

use anyhow::{Result, ensure};
use std::fmt::{self, Debug};

#[derive(Eq, PartialEq, Clone, Hash, Copy)]
pub struct TileCoord {
	pub z: u8,
	pub x: u32,
	pub y: u32,
}

impl TileCoord {
	pub fn new(z: u8, x: u32, y: u32) -> Result<TileCoord> {
		ensure!(z <= 31, "zoom level ({z}) must be <= 31");
		Ok(TileCoord { z, x, y })
	}

	/// The coordinate divided down by a per-axis factor.
	///
	/// The division is integer and therefore lossy: all tiles belonging to the
	/// same metatile map to the same scaled-down coordinate.
	#[must_use]
	pub fn scaled_down(&self, factor_x: u32, factor_y: u32) -> TileCoord {
		TileCoord {
			z: self.z,
			x: self.x / factor_x.max(1),
			y: self.y / factor_y.max(1),
		}
	}
}

impl Debug for TileCoord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_fmt(format_args!("TileCoord({}, [{}, {}])", &self.z, &self.x, &self.y))
	}
}

impl PartialOrd for TileCoord {
	fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
		Some(self.cmp(other))
	}
}

impl Ord for TileCoord {
	fn cmp(&self, other: &Self) -> std::cmp::Ordering {
		self
			.z
			.cmp(&other.z)
			.then(self.y.cmp(&other.y))
			.then(self.x.cmp(&other.x))
	}
}
