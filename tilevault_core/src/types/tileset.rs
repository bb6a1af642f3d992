//! Tilesets: the binding of a source, a cache, a format and one or more grids.

use crate::{DimensionSchema, HttpError, TileFormat};
use anyhow::Result;

#[derive(Clone, Debug)]
pub struct Tileset {
	pub name: String,
	/// Name of the upstream source rendering misses; `None` = cache-only.
	pub source: Option<String>,
	/// Name of the cache backend; `None` = render-only (never cached).
	pub cache: Option<String>,
	/// Names of the grids this tileset is published on.
	pub grids: Vec<String>,
	pub format: TileFormat,
	/// Metatile expansion in tiles (width, height).
	pub metasize: (u32, u32),
	/// Pixel border rendered around each metatile.
	pub metabuffer: u32,
	/// `Expires`/`Cache-Control: max-age` lifetime in seconds.
	pub expires: Option<u32>,
	/// Cached tiles older than this many seconds are re-rendered.
	pub auto_expire: Option<u32>,
	/// Read-only tilesets render misses but never write back (and never lock).
	pub read_only: bool,
	pub dimensions: Vec<DimensionSchema>,
}

impl Tileset {
	/// The dimension defaults, in schema order.
	#[must_use]
	pub fn default_dimensions(&self) -> Vec<(String, String)> {
		self
			.dimensions
			.iter()
			.map(|d| (d.name.clone(), d.default.clone()))
			.collect()
	}

	/// Resolves requested dimension values against the schema.
	///
	/// Every schema dimension gets a value (requested or default), validated;
	/// requested dimensions the schema does not know are rejected with 400.
	/// The returned pairs follow schema order, which keeps cache keys stable.
	pub fn resolve_dimensions(&self, requested: &[(String, String)]) -> Result<Vec<(String, String)>> {
		for (name, _) in requested {
			if !self.dimensions.iter().any(|d| d.name.eq_ignore_ascii_case(name)) {
				return Err(HttpError::bad_request(format!(
					"tileset {:?} has no dimension {name:?}",
					self.name
				)));
			}
		}
		let mut resolved = Vec::with_capacity(self.dimensions.len());
		for schema in &self.dimensions {
			let value = requested
				.iter()
				.find(|(name, _)| name.eq_ignore_ascii_case(&schema.name))
				.map_or(schema.default.as_str(), |(_, v)| v.as_str());
			schema.validate(value)?;
			resolved.push((schema.name.clone(), value.to_string()));
		}
		Ok(resolved)
	}
}
