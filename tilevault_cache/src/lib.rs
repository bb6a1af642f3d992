//! Cache backends, connection pooling and cross-process locking for
//! TileVault.
//!
//! The three load-bearing pieces:
//! - [`TileCache`]: the uniform get/set/exists/delete/multi_set contract,
//!   with disk, SQLite, memcached, in-memory and multitier implementations.
//! - [`KeyedPools`]: bounded, TTL'd connection pools keyed by backend name,
//!   optionally shared across endpoint aliases.
//! - [`Locker`] + [`lock_or_wait`]: named mutexes (disk, memcached, fallback
//!   chain) collapsing concurrent misses so only one renderer runs.

mod build;
mod disk;
mod locker;
mod memcached;
mod memory;
mod multitier;
mod pool;
mod sqlite;
mod traits;

pub use build::{build_caches, build_locker};
pub use disk::DiskCache;
pub use locker::{
	DiskLocker, FallbackLocker, LockAttempt, LockOutcome, LockPing, LockToken, Locker, MemcachedLocker, lock_or_wait,
	sanitize_resource,
};
pub use memcached::{MemcachedCache, MemcachedManager};
pub use memory::MemoryCache;
pub use multitier::MultitierCache;
pub use pool::{BackendPools, KeyedPools, PoolConfig, PooledConnection};
pub use sqlite::SqliteCache;
pub use traits::TileCache;
