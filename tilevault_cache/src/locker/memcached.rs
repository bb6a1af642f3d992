//! memcached locker: `add` wins the lock, `delete` releases it, `get` pings.
//!
//! The lock key is written with an expiry equal to the locker timeout, so a
//! dead holder's lock evaporates on its own; the forced release in
//! `lock_or_wait` is only a fallback for clock-skewed clusters.

use super::{LockAttempt, LockPing, LockToken, Locker, sanitize_resource};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use memcache::{CommandError, MemcacheError};
use parking_lot::Mutex;
use std::time::Duration;

const LOCK_PREFIX: &str = "_gc_lock";

pub struct MemcachedLocker {
	urls: Vec<String>,
	key_prefix: String,
	retry_interval: Duration,
	timeout: Duration,
	/// Lazily connected, dropped again on transport errors.
	client: Mutex<Option<memcache::Client>>,
}

impl MemcachedLocker {
	#[must_use]
	pub fn new(urls: Vec<String>, key_prefix: Option<String>, retry_interval: Duration, timeout: Duration) -> MemcachedLocker {
		MemcachedLocker {
			urls,
			key_prefix: key_prefix.unwrap_or_default(),
			retry_interval,
			timeout,
			client: Mutex::new(None),
		}
	}

	fn key(&self, resource: &str) -> String {
		format!("{}{LOCK_PREFIX}{}.lck", self.key_prefix, sanitize_resource(resource))
	}

	async fn client(&self) -> Result<memcache::Client> {
		if let Some(client) = self.client.lock().clone() {
			return Ok(client);
		}
		let urls = self.urls.clone();
		let client = tokio::task::spawn_blocking(move || {
			memcache::Client::connect(urls).context("memcache locker: failed to connect")
		})
		.await
		.map_err(|e| anyhow!("spawn_blocking failed: {e}"))??;
		*self.client.lock() = Some(client.clone());
		Ok(client)
	}

	fn drop_client(&self) {
		*self.client.lock() = None;
	}

	fn token_key<'a>(&self, token: &'a LockToken) -> Result<&'a str> {
		match token {
			LockToken::Memcached(key) => Ok(key),
			other => anyhow::bail!("memcache locker used with a foreign token: {other:?}"),
		}
	}
}

#[async_trait]
impl Locker for MemcachedLocker {
	async fn acquire(&self, resource: &str) -> Result<LockAttempt> {
		let key = self.key(resource);
		let client = self.client().await?;
		let expiry = self.timeout.as_secs().max(1) as u32;

		let add_key = key.clone();
		let result = tokio::task::spawn_blocking(move || client.add(&add_key, "1", expiry))
			.await
			.map_err(|e| anyhow!("spawn_blocking failed: {e}"))?;

		match result {
			Ok(()) => Ok(LockAttempt::Acquired(LockToken::Memcached(key))),
			Err(MemcacheError::CommandError(CommandError::KeyExists)) => Ok(LockAttempt::Busy(LockToken::Memcached(key))),
			Err(e) => {
				self.drop_client();
				Err(anyhow!("failed to lock resource {resource:?} on memcache locker: {e}"))
			}
		}
	}

	async fn ping(&self, token: &LockToken) -> Result<LockPing> {
		let key = self.token_key(token)?.to_string();
		let client = self.client().await?;
		let result: Result<Option<String>, MemcacheError> =
			tokio::task::spawn_blocking(move || client.get(&key))
				.await
				.map_err(|e| anyhow!("spawn_blocking failed: {e}"))?;
		match result {
			Ok(Some(_)) => Ok(LockPing::Held),
			// not found, or the cluster went away: treat as gone and let the
			// caller fall back to re-reading the cache
			Ok(None) => Ok(LockPing::Gone),
			Err(_) => {
				self.drop_client();
				Ok(LockPing::Gone)
			}
		}
	}

	async fn release(&self, token: &LockToken) -> Result<()> {
		let key = self.token_key(token)?.to_string();
		let client = self.client().await?;
		let result = tokio::task::spawn_blocking(move || client.delete(&key))
			.await
			.map_err(|e| anyhow!("spawn_blocking failed: {e}"))?;
		match result {
			Ok(_) => Ok(()),
			Err(MemcacheError::CommandError(CommandError::KeyNotFound)) => Ok(()),
			Err(e) => {
				self.drop_client();
				Err(anyhow!("memcache locker: failed to delete key: {e}"))
			}
		}
	}

	fn retry_interval(&self) -> Duration {
		self.retry_interval
	}

	fn timeout(&self) -> Duration {
		self.timeout
	}
}

impl std::fmt::Debug for MemcachedLocker {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MemcachedLocker")
			.field("urls", &self.urls)
			.field("key_prefix", &self.key_prefix)
			.finish()
	}
}
