//! In-process memory cache backend.
//!
//! Useful as the fast tier of a multitier cache and for tests; contents do
//! not survive the process and are not shared between workers.

use crate::TileCache;
use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::SystemTime;
use tilevault_core::{Blob, Tile};

#[derive(Debug)]
pub struct MemoryCache {
	name: String,
	entries: DashMap<String, (Blob, SystemTime)>,
}

impl MemoryCache {
	pub fn new(name: &str) -> MemoryCache {
		MemoryCache {
			name: name.to_string(),
			entries: DashMap::new(),
		}
	}

	/// Number of stored tiles (test helper).
	#[must_use]
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}
}

#[async_trait]
impl TileCache for MemoryCache {
	fn name(&self) -> &str {
		&self.name
	}

	async fn tile_get(&self, tile: &mut Tile) -> Result<bool> {
		match self.entries.get(&tile.cache_key()) {
			Some(entry) => {
				let (blob, mtime) = entry.value();
				tile.data = Some(blob.clone());
				tile.mtime = Some(*mtime);
				Ok(true)
			}
			None => Ok(false),
		}
	}

	async fn tile_set(&self, tile: &Tile) -> Result<()> {
		let data = tile
			.data
			.as_ref()
			.with_context(|| format!("memory cache {:?}: tile {} has no data", self.name, tile.cache_key()))?;
		self
			.entries
			.insert(tile.cache_key(), (data.clone(), tile.mtime.unwrap_or_else(SystemTime::now)));
		Ok(())
	}

	async fn tile_exists(&self, tile: &Tile) -> Result<bool> {
		Ok(self.entries.contains_key(&tile.cache_key()))
	}

	async fn tile_delete(&self, tile: &Tile) -> Result<()> {
		self.entries.remove(&tile.cache_key());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tilevault_core::TileCoord;

	#[tokio::test]
	async fn round_trip() -> Result<()> {
		let cache = MemoryCache::new("mem");
		let mut tile = Tile::new("l1", "g", TileCoord::new(2, 1, 1)?);
		tile.data = Some(Blob::from("abc"));

		assert!(!cache.tile_get(&mut tile.clone()).await?);
		cache.tile_set(&tile).await?;
		assert!(cache.tile_exists(&tile).await?);

		let mut out = Tile::new("l1", "g", TileCoord::new(2, 1, 1)?);
		assert!(cache.tile_get(&mut out).await?);
		assert_eq!(out.data.unwrap().as_str(), "abc");
		assert!(out.mtime.is_some());

		cache.tile_delete(&tile).await?;
		cache.tile_delete(&tile).await?; // idempotent
		assert!(!cache.tile_exists(&tile).await?);
		Ok(())
	}
}
