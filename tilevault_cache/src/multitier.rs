//! Multitier composite cache.
//!
//! Reads probe the child caches in order and back-fill the tiers above a hit;
//! writes go to exactly one designated child. This lets a fast local tier
//! (memory, memcached) front a durable remote tier: a degraded upper tier can
//! never fail a request that the lower tier can serve, because every
//! back-fill error is swallowed.

use crate::TileCache;
use anyhow::{Result, ensure};
use async_trait::async_trait;
use std::sync::Arc;
use tilevault_core::Tile;

pub struct MultitierCache {
	name: String,
	tiers: Vec<Arc<dyn TileCache>>,
	write_idx: usize,
}

impl MultitierCache {
	pub fn new(name: &str, tiers: Vec<Arc<dyn TileCache>>, write_idx: usize) -> Result<MultitierCache> {
		ensure!(!tiers.is_empty(), "multitier cache {name:?} has no child caches");
		ensure!(
			write_idx < tiers.len(),
			"multitier cache {name:?}: write index {write_idx} out of range"
		);
		Ok(MultitierCache {
			name: name.to_string(),
			tiers,
			write_idx,
		})
	}
}

#[async_trait]
impl TileCache for MultitierCache {
	fn name(&self) -> &str {
		&self.name
	}

	async fn tile_get(&self, tile: &mut Tile) -> Result<bool> {
		if self.tiers[0].tile_get(tile).await? {
			return Ok(true);
		}
		for hit_idx in 1..self.tiers.len() {
			if self.tiers[hit_idx].tile_get(tile).await? {
				log::debug!(
					"got tile {} from secondary cache ({})",
					tile.cache_key(),
					self.tiers[hit_idx].name()
				);
				// back-fill the tiers above the hit, nearest-to-hit first;
				// these writes are an optimisation and must never fail the hit
				for idx in (0..hit_idx).rev() {
					let tier = &self.tiers[idx];
					if let Err(e) = tier.tile_set(tile).await {
						log::warn!(
							"failed transferring tile {} to cache ({}): {e:#}",
							tile.cache_key(),
							tier.name()
						);
					} else {
						log::debug!("transferring tile {} to cache ({})", tile.cache_key(), tier.name());
					}
				}
				return Ok(true);
			}
		}
		Ok(false)
	}

	async fn tile_set(&self, tile: &Tile) -> Result<()> {
		self.tiers[self.write_idx].tile_set(tile).await
	}

	async fn tile_multi_set(&self, tiles: &[Tile]) -> Result<()> {
		self.tiers[self.write_idx].tile_multi_set(tiles).await
	}

	async fn tile_exists(&self, tile: &Tile) -> Result<bool> {
		for tier in &self.tiers {
			if tier.tile_exists(tile).await? {
				return Ok(true);
			}
		}
		Ok(false)
	}

	async fn tile_delete(&self, tile: &Tile) -> Result<()> {
		for tier in &self.tiers {
			if let Err(e) = tier.tile_delete(tile).await {
				log::warn!(
					"multitier cache {:?}: delete on ({}) failed: {e:#}",
					self.name,
					tier.name()
				);
			}
		}
		Ok(())
	}
}

impl std::fmt::Debug for MultitierCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MultitierCache")
			.field("name", &self.name)
			.field("tiers", &self.tiers.iter().map(|t| t.name().to_string()).collect::<Vec<_>>())
			.field("write_idx", &self.write_idx)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::MemoryCache;
	use tilevault_core::{Blob, TileCoord};

	/// A cache that fails every operation, standing in for a degraded tier.
	#[derive(Debug)]
	struct BrokenCache;

	#[async_trait]
	impl TileCache for BrokenCache {
		fn name(&self) -> &str {
			"broken"
		}
		async fn tile_get(&self, _tile: &mut Tile) -> Result<bool> {
			anyhow::bail!("backend down")
		}
		async fn tile_set(&self, _tile: &Tile) -> Result<()> {
			anyhow::bail!("backend down")
		}
		async fn tile_exists(&self, _tile: &Tile) -> Result<bool> {
			anyhow::bail!("backend down")
		}
		async fn tile_delete(&self, _tile: &Tile) -> Result<()> {
			anyhow::bail!("backend down")
		}
	}

	fn tile() -> Tile {
		let mut tile = Tile::new("l1", "g", TileCoord::new(3, 2, 5).unwrap());
		tile.data = Some(Blob::from("payload"));
		tile
	}

	fn tiers() -> (Arc<MemoryCache>, Arc<MemoryCache>, Arc<MemoryCache>) {
		(
			Arc::new(MemoryCache::new("c0")),
			Arc::new(MemoryCache::new("c1")),
			Arc::new(MemoryCache::new("c2")),
		)
	}

	#[tokio::test]
	async fn hit_in_lower_tier_backfills_all_upper_tiers() -> Result<()> {
		let (c0, c1, c2) = tiers();
		c2.tile_set(&tile()).await?;

		let multi = MultitierCache::new("m", vec![c0.clone(), c1.clone(), c2.clone()], 2)?;
		let mut probe = tile();
		probe.data = None;
		assert!(multi.tile_get(&mut probe).await?);
		assert_eq!(probe.data.unwrap().as_str(), "payload");

		assert_eq!(c0.len(), 1);
		assert_eq!(c1.len(), 1);
		Ok(())
	}

	#[tokio::test]
	async fn second_read_is_served_by_the_first_tier() -> Result<()> {
		let (c0, _, c2) = tiers();
		c2.tile_set(&tile()).await?;
		let multi = MultitierCache::new("m", vec![c0.clone(), c2.clone()], 1)?;

		let mut probe = tile();
		probe.data = None;
		assert!(multi.tile_get(&mut probe).await?);

		// remove the durable tier; the back-filled tier now serves alone
		c2.tile_delete(&tile()).await?;
		let mut probe = tile();
		probe.data = None;
		assert!(multi.tile_get(&mut probe).await?);
		Ok(())
	}

	#[tokio::test]
	async fn get_errors_on_a_tier_propagate() -> Result<()> {
		let c1 = Arc::new(MemoryCache::new("c1"));
		c1.tile_set(&tile()).await?;
		let multi = MultitierCache::new("m", vec![Arc::new(BrokenCache), c1], 1)?;

		let mut probe = tile();
		probe.data = None;
		assert!(multi.tile_get(&mut probe).await.is_err());
		Ok(())
	}

	#[tokio::test]
	async fn backfill_set_errors_are_swallowed() -> Result<()> {
		// first tier misses but cannot be written; the hit must still succeed
		#[derive(Debug)]
		struct MissThenFail;
		#[async_trait]
		impl TileCache for MissThenFail {
			fn name(&self) -> &str {
				"miss-then-fail"
			}
			async fn tile_get(&self, _tile: &mut Tile) -> Result<bool> {
				Ok(false)
			}
			async fn tile_set(&self, _tile: &Tile) -> Result<()> {
				anyhow::bail!("no writes here")
			}
			async fn tile_exists(&self, _tile: &Tile) -> Result<bool> {
				Ok(false)
			}
			async fn tile_delete(&self, _tile: &Tile) -> Result<()> {
				Ok(())
			}
		}

		let c1 = Arc::new(MemoryCache::new("c1"));
		c1.tile_set(&tile()).await?;
		let multi = MultitierCache::new("m", vec![Arc::new(MissThenFail), c1], 1)?;

		let mut probe = tile();
		probe.data = None;
		assert!(multi.tile_get(&mut probe).await?);
		assert_eq!(probe.data.unwrap().as_str(), "payload");
		Ok(())
	}

	#[tokio::test]
	async fn writes_go_only_to_the_write_tier() -> Result<()> {
		let (c0, c1, c2) = tiers();
		let multi = MultitierCache::new("m", vec![c0.clone(), c1.clone(), c2.clone()], 1)?;
		multi.tile_set(&tile()).await?;
		assert_eq!(c0.len(), 0);
		assert_eq!(c1.len(), 1);
		assert_eq!(c2.len(), 0);
		Ok(())
	}

	#[tokio::test]
	async fn exists_checks_every_tier() -> Result<()> {
		let (c0, c1, c2) = tiers();
		c2.tile_set(&tile()).await?;
		let multi = MultitierCache::new("m", vec![c0, c1, c2], 2)?;
		assert!(multi.tile_exists(&tile()).await?);
		Ok(())
	}

	#[tokio::test]
	async fn delete_reaches_every_tier_and_swallows_errors() -> Result<()> {
		let (c0, _, c2) = tiers();
		c0.tile_set(&tile()).await?;
		c2.tile_set(&tile()).await?;
		let multi = MultitierCache::new("m", vec![c0.clone(), Arc::new(BrokenCache), c2.clone()], 2)?;
		multi.tile_delete(&tile()).await?;
		assert_eq!(c0.len(), 0);
		assert_eq!(c2.len(), 0);
		Ok(())
	}
}
