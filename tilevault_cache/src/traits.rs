//! The cache contract every backend implements.

use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use tilevault_core::Tile;

/// A tile cache backend.
///
/// The contract the pipeline relies on:
/// - `tile_get` returns `Ok(true)` on a hit (filling `tile.data` and, when
///   the backend knows it, `tile.mtime`), `Ok(false)` on a miss, and `Err`
///   only for real failures.
/// - `tile_set` requires `tile.data` to be present.
/// - `tile_delete` is idempotent: deleting an absent tile is not an error.
/// - `tile_multi_set` makes no atomicity or ordering promises across tiles;
///   the default implementation is a sequential loop.
#[async_trait]
pub trait TileCache: Debug + Send + Sync {
	/// The configured backend name (used for pool keys and log lines).
	fn name(&self) -> &str;

	async fn tile_get(&self, tile: &mut Tile) -> Result<bool>;

	async fn tile_set(&self, tile: &Tile) -> Result<()>;

	async fn tile_exists(&self, tile: &Tile) -> Result<bool>;

	async fn tile_delete(&self, tile: &Tile) -> Result<()>;

	async fn tile_multi_set(&self, tiles: &[Tile]) -> Result<()> {
		for tile in tiles {
			self.tile_set(tile).await?;
		}
		Ok(())
	}
}
