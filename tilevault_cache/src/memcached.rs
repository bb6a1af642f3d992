//! memcached cache backend.
//!
//! Clients come from the keyed connection pool. Every call runs a
//! reconnect-and-retry loop: on a transport error the pooled client is
//! invalidated (so the pool destroys it) and a fresh one is tried, up to
//! three retries with a warning per attempt; the final failure surfaces as a
//! 500. Stored values carry the tile mtime as an 8-byte prefix so hits can
//! answer conditional GETs.

use crate::{BackendPools, TileCache, pool::PooledConnection};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use deadpool::managed::{Manager, Metrics, RecycleError, RecycleResult};
use std::{
	sync::Arc,
	time::{Duration, SystemTime},
};
use tilevault_core::{Blob, HttpError, Tile};

/// deadpool manager producing connected memcached clients.
pub struct MemcachedManager {
	urls: Vec<String>,
	ttl: Duration,
}

impl MemcachedManager {
	#[must_use]
	pub fn new(urls: Vec<String>, ttl: Duration) -> MemcachedManager {
		MemcachedManager { urls, ttl }
	}
}

impl Manager for MemcachedManager {
	type Type = memcache::Client;
	type Error = anyhow::Error;

	async fn create(&self) -> Result<memcache::Client, anyhow::Error> {
		let urls = self.urls.clone();
		tokio::task::spawn_blocking(move || {
			memcache::Client::connect(urls).context("failed to connect to memcached")
		})
		.await
		.map_err(|e| anyhow!("spawn_blocking failed: {e}"))?
	}

	async fn recycle(&self, _obj: &mut memcache::Client, metrics: &Metrics) -> RecycleResult<anyhow::Error> {
		if metrics.last_used() > self.ttl {
			return Err(RecycleError::message("idle connection expired"));
		}
		Ok(())
	}
}

/// Replaces characters memcached keys cannot carry with `'#'`.
#[must_use]
pub fn sanitize_key(resource: &str) -> String {
	resource
		.chars()
		.map(|c| {
			if c == ' ' || c.is_ascii_control() {
				'#'
			} else {
				c
			}
		})
		.collect()
}

/// `[8-byte BE mtime epoch seconds][tile bytes]`
fn encode_value(tile: &Tile, data: &Blob) -> Vec<u8> {
	let epoch = tile
		.mtime
		.unwrap_or_else(SystemTime::now)
		.duration_since(SystemTime::UNIX_EPOCH)
		.map_or(0, |d| d.as_secs());
	let mut value = Vec::with_capacity(8 + data.len());
	value.extend_from_slice(&epoch.to_be_bytes());
	value.extend_from_slice(data.as_slice());
	value
}

fn decode_value(value: &[u8]) -> Result<(SystemTime, Blob)> {
	anyhow::ensure!(value.len() >= 8, "memcached value too short ({} bytes)", value.len());
	let mut epoch = [0u8; 8];
	epoch.copy_from_slice(&value[0..8]);
	let mtime = SystemTime::UNIX_EPOCH + Duration::from_secs(u64::from_be_bytes(epoch));
	Ok((mtime, Blob::from(&value[8..])))
}

pub struct MemcachedCache {
	name: String,
	urls: Vec<String>,
	key_prefix: String,
	pools: Arc<BackendPools>,
}

impl MemcachedCache {
	pub fn new(name: &str, urls: Vec<String>, key_prefix: Option<String>, pools: Arc<BackendPools>) -> MemcachedCache {
		MemcachedCache {
			name: name.to_string(),
			urls,
			key_prefix: key_prefix.unwrap_or_default(),
			pools,
		}
	}

	fn key(&self, tile: &Tile) -> String {
		format!("{}{}", self.key_prefix, sanitize_key(&tile.cache_key()))
	}

	/// Runs `op` against a pooled client, reconnecting and retrying up to
	/// three times. The final failure invalidates the connection and maps to
	/// a backend error (500).
	async fn with_retry<T, F>(&self, op_name: &str, op: F) -> Result<T>
	where
		T: Send + 'static,
		F: Fn(memcache::Client) -> Result<T, memcache::MemcacheError> + Clone + Send + 'static,
	{
		let mut attempt = 0u32;
		loop {
			let manager_urls = self.urls.clone();
			let ttl = self.pools.memcached.config().ttl;
			let conn: PooledConnection<MemcachedManager> = self
				.pools
				.memcached
				.acquire(&self.name, || MemcachedManager::new(manager_urls, ttl))
				.await?;

			let client: memcache::Client = (*conn).clone();
			let call = op.clone();
			let result = tokio::task::spawn_blocking(move || call(client))
				.await
				.map_err(|e| anyhow!("spawn_blocking failed: {e}"))?;

			match result {
				Ok(value) => return Ok(value),
				Err(e) => {
					attempt += 1;
					log::warn!("retry {attempt} in {op_name} for cache {:?} due to error: {e}", self.name);
					PooledConnection::invalidate(conn);
					if attempt > 3 {
						return Err(HttpError::backend(format!(
							"memcached cache {:?}: {op_name} failed: {e}",
							self.name
						)));
					}
				}
			}
		}
	}
}

#[async_trait]
impl TileCache for MemcachedCache {
	fn name(&self) -> &str {
		&self.name
	}

	async fn tile_get(&self, tile: &mut Tile) -> Result<bool> {
		let key = self.key(tile);
		let value: Option<Vec<u8>> = self.with_retry("get", move |client| client.get(&key)).await?;
		match value {
			Some(value) => {
				let (mtime, blob) = decode_value(&value)?;
				tile.mtime = Some(mtime);
				// a stored empty payload is a blank-tile marker
				tile.nodata = blob.is_empty();
				tile.data = Some(blob);
				Ok(true)
			}
			None => Ok(false),
		}
	}

	async fn tile_set(&self, tile: &Tile) -> Result<()> {
		let data = tile
			.data
			.as_ref()
			.with_context(|| format!("memcached cache {:?}: tile {} has no data", self.name, tile.cache_key()))?;
		let key = self.key(tile);
		let value = encode_value(tile, data);
		let expires = tile.expires.unwrap_or(0);
		self
			.with_retry("set", move |client| client.set(&key, value.as_slice(), expires))
			.await
	}

	async fn tile_exists(&self, tile: &Tile) -> Result<bool> {
		let key = self.key(tile);
		let value: Option<Vec<u8>> = self.with_retry("exists", move |client| client.get(&key)).await?;
		Ok(value.is_some())
	}

	async fn tile_delete(&self, tile: &Tile) -> Result<()> {
		let key = self.key(tile);
		// absent keys are not an error: delete is idempotent
		self.with_retry("delete", move |client| client.delete(&key)).await?;
		Ok(())
	}
}

impl std::fmt::Debug for MemcachedCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemcachedCache")
			.field("name", &self.name)
			.field("urls", &self.urls)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tilevault_core::TileCoord;

	#[test]
	fn keys_are_sanitized() {
		assert_eq!(sanitize_key("a b\tc\nd"), "a#b#c#d");
		assert_eq!(sanitize_key("l1/GridA/3/2/5"), "l1/GridA/3/2/5");
	}

	#[test]
	fn value_round_trip_preserves_mtime_and_bytes() {
		let mut tile = Tile::new("l1", "g", TileCoord::new(1, 0, 0).unwrap());
		tile.mtime = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000));
		let blob = Blob::from("tile-bytes");

		let value = encode_value(&tile, &blob);
		let (mtime, decoded) = decode_value(&value).unwrap();
		assert_eq!(mtime, tile.mtime.unwrap());
		assert_eq!(decoded.as_str(), "tile-bytes");
	}

	#[test]
	fn short_values_are_rejected() {
		assert!(decode_value(&[1, 2, 3]).is_err());
	}

	#[test]
	fn empty_payload_round_trips_as_blank_marker() {
		let mut tile = Tile::new("l1", "g", TileCoord::new(1, 0, 0).unwrap());
		tile.mtime = Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1));
		let value = encode_value(&tile, &Blob::new_empty());
		assert_eq!(value.len(), 8);
		let (_, blob) = decode_value(&value).unwrap();
		assert!(blob.is_empty());
	}
}
