//! Cross-process named locks used to collapse concurrent cache misses.
//!
//! A locker guarantees at-most-one concurrent render per metatile across all
//! workers sharing a lock namespace (a directory, a memcached cluster).
//! Because a wait ends in *gone* rather than *acquired*, the caller must
//! re-read the cache after waiting: the winner has populated it.

mod disk;
mod fallback;
mod memcached;

pub use disk::DiskLocker;
pub use fallback::FallbackLocker;
pub use memcached::MemcachedLocker;

use anyhow::Result;
use async_trait::async_trait;
use std::{fmt::Debug, path::PathBuf, time::Duration};
use tokio::time::Instant;

/// Opaque handle to a lock attempt; identifies the (resource, locker) pair.
/// Pinging a token with a locker other than the one that produced it is
/// undefined.
#[derive(Clone, Debug)]
pub enum LockToken {
	/// Lock file path.
	Disk(PathBuf),
	/// memcached key.
	Memcached(String),
	/// Which child locker produced the inner token.
	Fallback { index: usize, inner: Box<LockToken> },
}

/// Result of an acquire attempt.
#[derive(Debug)]
pub enum LockAttempt {
	/// We hold the lock; release it after the cache write.
	Acquired(LockToken),
	/// Someone else holds it; poll the token until it disappears.
	Busy(LockToken),
}

/// Result of a liveness probe on a busy lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockPing {
	Held,
	Gone,
}

/// Outcome of [`lock_or_wait`].
#[derive(Debug)]
pub enum LockOutcome {
	/// We won the race and must do the work, then release the token.
	Acquired(LockToken),
	/// A peer did the work (or its lock went stale); re-read the cache.
	Waited,
}

/// A named-mutex backend with retry/timeout parameters.
#[async_trait]
pub trait Locker: Debug + Send + Sync {
	async fn acquire(&self, resource: &str) -> Result<LockAttempt>;

	async fn ping(&self, token: &LockToken) -> Result<LockPing>;

	async fn release(&self, token: &LockToken) -> Result<()>;

	/// Sleep between polls of a busy lock.
	fn retry_interval(&self) -> Duration;

	/// Total wait before a busy lock is treated as stale.
	fn timeout(&self) -> Duration;
}

/// Acquires the lock for `resource` or waits for the current holder.
///
/// Poll protocol: sleep `retry_interval`, ping, repeat while the lock is
/// held. A ping answering *gone* means the holder finished; a total wait
/// beyond `timeout` means the holder died, in which case the lock is
/// forcibly released. Either way the caller gets [`LockOutcome::Waited`]
/// and must re-probe the cache.
pub async fn lock_or_wait(locker: &dyn Locker, resource: &str) -> Result<LockOutcome> {
	let token = match locker.acquire(resource).await? {
		LockAttempt::Acquired(token) => return Ok(LockOutcome::Acquired(token)),
		LockAttempt::Busy(token) => token,
	};

	let start = Instant::now();
	loop {
		if start.elapsed() > locker.timeout() {
			log::error!(
				"releasing a possibly stale lock on {resource:?} after waiting on it for {:.1} seconds",
				start.elapsed().as_secs_f64()
			);
			if let Err(e) = locker.release(&token).await {
				log::warn!("failed to force-release stale lock on {resource:?}: {e:#}");
			}
			return Ok(LockOutcome::Waited);
		}
		tokio::time::sleep(locker.retry_interval()).await;
		match locker.ping(&token).await? {
			LockPing::Held => {}
			LockPing::Gone => return Ok(LockOutcome::Waited),
		}
	}
}

/// Replaces filesystem- and key-hostile characters in a lock resource.
#[must_use]
pub fn sanitize_resource(resource: &str) -> String {
	resource
		.chars()
		.map(|c| match c {
			' ' | '/' | '~' | '.' => '#',
			other => other,
		})
		.collect()
}
