//! SQLite cache backend: a single-file tile store.
//!
//! One database holds every tileset/grid/dimension combination; the primary
//! key mirrors the canonical tile key. Connections come from an r2d2 pool so
//! concurrent workers do not serialise on one handle.

use crate::TileCache;
use anyhow::{Context, Result};
use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::{
	SqliteConnectionManager,
	rusqlite::{OptionalExtension, params},
};
use std::{
	path::Path,
	time::{Duration, SystemTime},
};
use tilevault_core::{Blob, Tile};

pub struct SqliteCache {
	name: String,
	pool: Pool<SqliteConnectionManager>,
}

impl SqliteCache {
	/// Opens (or creates) the database and ensures the tile table exists.
	pub fn open(name: &str, path: &Path) -> Result<SqliteCache> {
		log::trace!("open sqlite cache {path:?}");
		if let Some(parent) = path.parent() {
			std::fs::create_dir_all(parent)?;
		}

		let manager = SqliteConnectionManager::file(path);
		let pool = Pool::builder().max_size(10).build(manager)?;

		let conn = pool.get()?;
		conn.execute_batch(
			"CREATE TABLE IF NOT EXISTS tiles (
			    tileset TEXT NOT NULL,
			    grid TEXT NOT NULL,
			    dims TEXT NOT NULL,
			    z INTEGER NOT NULL,
			    x INTEGER NOT NULL,
			    y INTEGER NOT NULL,
			    data BLOB NOT NULL,
			    mtime INTEGER NOT NULL,
			    PRIMARY KEY (tileset, grid, dims, z, x, y)
			 );",
		)?;
		drop(conn);

		Ok(SqliteCache {
			name: name.to_string(),
			pool,
		})
	}

	fn dims(tile: &Tile) -> String {
		tile.dimension_path()
	}
}

#[async_trait]
impl TileCache for SqliteCache {
	fn name(&self) -> &str {
		&self.name
	}

	async fn tile_get(&self, tile: &mut Tile) -> Result<bool> {
		let conn = self.pool.get()?;
		let row: Option<(Vec<u8>, i64)> = conn
			.query_row(
				"SELECT data, mtime FROM tiles WHERE tileset=?1 AND grid=?2 AND dims=?3 AND z=?4 AND x=?5 AND y=?6",
				params![
					tile.tileset,
					tile.grid,
					Self::dims(tile),
					tile.coord.z,
					tile.coord.x,
					tile.coord.y
				],
				|row| Ok((row.get(0)?, row.get(1)?)),
			)
			.optional()
			.with_context(|| format!("sqlite cache {:?}: reading tile {}", self.name, tile.cache_key()))?;

		match row {
			Some((data, mtime)) => {
				tile.data = Some(Blob::from(data));
				tile.mtime = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(mtime.max(0) as u64));
				Ok(true)
			}
			None => Ok(false),
		}
	}

	async fn tile_set(&self, tile: &Tile) -> Result<()> {
		let data = tile
			.data
			.as_ref()
			.with_context(|| format!("sqlite cache {:?}: tile {} has no data", self.name, tile.cache_key()))?;
		let mtime = tile
			.mtime
			.unwrap_or_else(SystemTime::now)
			.duration_since(SystemTime::UNIX_EPOCH)
			.map_or(0, |d| d.as_secs() as i64);

		let conn = self.pool.get()?;
		conn
			.execute(
				"INSERT OR REPLACE INTO tiles (tileset, grid, dims, z, x, y, data, mtime)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
				params![
					tile.tileset,
					tile.grid,
					Self::dims(tile),
					tile.coord.z,
					tile.coord.x,
					tile.coord.y,
					data.as_slice(),
					mtime
				],
			)
			.with_context(|| format!("sqlite cache {:?}: writing tile {}", self.name, tile.cache_key()))?;
		Ok(())
	}

	async fn tile_exists(&self, tile: &Tile) -> Result<bool> {
		let conn = self.pool.get()?;
		let found: Option<i64> = conn
			.query_row(
				"SELECT 1 FROM tiles WHERE tileset=?1 AND grid=?2 AND dims=?3 AND z=?4 AND x=?5 AND y=?6",
				params![
					tile.tileset,
					tile.grid,
					Self::dims(tile),
					tile.coord.z,
					tile.coord.x,
					tile.coord.y
				],
				|row| row.get(0),
			)
			.optional()?;
		Ok(found.is_some())
	}

	async fn tile_delete(&self, tile: &Tile) -> Result<()> {
		let conn = self.pool.get()?;
		// affects zero rows for an absent tile, which is fine
		conn.execute(
			"DELETE FROM tiles WHERE tileset=?1 AND grid=?2 AND dims=?3 AND z=?4 AND x=?5 AND y=?6",
			params![
				tile.tileset,
				tile.grid,
				Self::dims(tile),
				tile.coord.z,
				tile.coord.x,
				tile.coord.y
			],
		)?;
		Ok(())
	}
}

impl std::fmt::Debug for SqliteCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SqliteCache").field("name", &self.name).finish()
	}
}
