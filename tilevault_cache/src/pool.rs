//! Keyed, bounded, TTL'd connection pools for backend clients.
//!
//! One logical pool exists per backend name; a pool registry lives per worker
//! process and can optionally be shared across all endpoint aliases. Pools
//! are built on deadpool managers; the wrapper adds min-precreation,
//! TTL/soft-max reaping and explicit invalidation.

use anyhow::Result;
use dashmap::DashMap;
use deadpool::managed::{Manager, Object, Pool};
use std::{
	ops::Deref,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

/// Bound on how long `acquire` blocks for a free connection.
const ACQUIRE_WAIT: Duration = Duration::from_secs(30);

/// One in this many acquires runs the idle reaper. There is no background
/// task; reaping piggybacks on request traffic.
const REAP_INTERVAL: usize = 64;

/// Pool sizing, one set per registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
	/// Connections pre-created when a pool is first used.
	pub min: usize,
	/// Idle connections beyond this count are destroyed by `reap`.
	pub soft_max: usize,
	/// Absolute ceiling; `acquire` beyond it blocks (bounded) or fails.
	pub hard_max: usize,
	/// Maximum idle lifetime.
	pub ttl: Duration,
}

impl Default for PoolConfig {
	fn default() -> Self {
		PoolConfig {
			min: 1,
			soft_max: 5,
			hard_max: 200,
			ttl: Duration::from_secs(60),
		}
	}
}

/// A checked-out connection. Dropping it returns the connection to its pool;
/// [`PooledConnection::invalidate`] destroys it instead.
pub struct PooledConnection<M: Manager>(Object<M>);

impl<M: Manager> PooledConnection<M> {
	/// Marks the connection unreusable: it is detached from the pool and its
	/// destructor runs instead of a recycle.
	pub fn invalidate(pc: PooledConnection<M>) {
		drop(Object::take(pc.0));
	}
}

impl<M: Manager> Deref for PooledConnection<M> {
	type Target = M::Type;
	fn deref(&self) -> &M::Type {
		&self.0
	}
}

/// A registry of pools, keyed by backend name.
pub struct KeyedPools<M: Manager> {
	config: PoolConfig,
	pools: DashMap<String, Pool<M>>,
	acquires: AtomicUsize,
}

impl<M: Manager> KeyedPools<M>
where
	M::Error: std::fmt::Display,
{
	#[must_use]
	pub fn new(config: PoolConfig) -> KeyedPools<M> {
		KeyedPools {
			config,
			pools: DashMap::new(),
			acquires: AtomicUsize::new(0),
		}
	}

	#[must_use]
	pub fn config(&self) -> &PoolConfig {
		&self.config
	}

	/// Checks out a connection for `key`, creating the pool (and its `min`
	/// warm connections) on first use. Blocks up to a bounded wait when the
	/// pool is at its hard ceiling.
	pub async fn acquire(&self, key: &str, make_manager: impl FnOnce() -> M) -> Result<PooledConnection<M>> {
		let pool = match self.pools.get(key) {
			Some(pool) => pool.clone(),
			None => {
				let pool = Pool::builder(make_manager())
					.max_size(self.config.hard_max.max(1))
					.build()
					.map_err(|e| anyhow::anyhow!("failed to build connection pool {key:?}: {e}"))?;

				let mut warm = Vec::with_capacity(self.config.min);
				for _ in 0..self.config.min {
					match pool.get().await {
						Ok(obj) => warm.push(obj),
						Err(e) => {
							log::warn!("pool {key:?}: failed to pre-create connection: {e}");
							break;
						}
					}
				}
				drop(warm);

				// a racing creator may have inserted first; keep that one
				self.pools.entry(key.to_string()).or_insert(pool).clone()
			}
		};

		if self.acquires.fetch_add(1, Ordering::Relaxed) % REAP_INTERVAL == REAP_INTERVAL - 1 {
			self.reap();
		}

		let obj = tokio::time::timeout(ACQUIRE_WAIT, pool.get())
			.await
			.map_err(|_| anyhow::anyhow!("timed out waiting for a free connection in pool {key:?}"))?
			.map_err(|e| anyhow::anyhow!("failed to acquire connection from pool {key:?}: {e}"))?;
		Ok(PooledConnection(obj))
	}

	/// Destroys idle connections past their TTL, then trims idle counts down
	/// to `soft_max`. Called opportunistically; never blocks on I/O.
	pub fn reap(&self) {
		for entry in self.pools.iter() {
			let pool = entry.value();
			let ttl = self.config.ttl;
			pool.retain(|_, metrics| metrics.last_used() < ttl);

			let excess = pool.status().available.saturating_sub(self.config.soft_max);
			if excess > 0 {
				let mut dropped = 0;
				pool.retain(|_, _| {
					if dropped < excess {
						dropped += 1;
						false
					} else {
						true
					}
				});
			}
		}
	}
}

impl<M: Manager> std::fmt::Debug for KeyedPools<M> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("KeyedPools")
			.field("config", &self.config)
			.field("keys", &self.pools.iter().map(|e| e.key().clone()).collect::<Vec<_>>())
			.finish()
	}
}

/// All backend pools of one server scope.
///
/// With pool sharing enabled, every alias holds the same `Arc<BackendPools>`;
/// otherwise each alias gets its own.
#[derive(Debug)]
pub struct BackendPools {
	pub memcached: KeyedPools<crate::memcached::MemcachedManager>,
}

impl BackendPools {
	#[must_use]
	pub fn new(config: PoolConfig) -> Arc<BackendPools> {
		Arc::new(BackendPools {
			memcached: KeyedPools::new(config),
		})
	}
}
