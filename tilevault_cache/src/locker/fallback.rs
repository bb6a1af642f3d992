//! Fallback locker: an ordered chain of lockers tried until one succeeds.
//!
//! Typical use pairs a memcached locker with a disk locker, so that a
//! memcached outage degrades lock scope instead of failing requests. The
//! token remembers which child produced it; ping and release delegate there.

use super::{LockAttempt, LockPing, LockToken, Locker};
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug)]
pub struct FallbackLocker {
	lockers: Vec<Box<dyn Locker>>,
	retry_interval: Duration,
	timeout: Duration,
}

impl FallbackLocker {
	pub fn new(lockers: Vec<Box<dyn Locker>>, retry_interval: Duration, timeout: Duration) -> Result<FallbackLocker> {
		anyhow::ensure!(!lockers.is_empty(), "fallback locker needs at least one child locker");
		Ok(FallbackLocker {
			lockers,
			retry_interval,
			timeout,
		})
	}

	fn child_for<'a>(&'a self, token: &'a LockToken) -> Result<(&'a dyn Locker, &'a LockToken)> {
		match token {
			LockToken::Fallback { index, inner } => {
				let child = self
					.lockers
					.get(*index)
					.map(|l| l.as_ref())
					.ok_or_else(|| anyhow::anyhow!("fallback token references unknown child locker {index}"))?;
				Ok((child, inner))
			}
			other => anyhow::bail!("fallback locker used with a foreign token: {other:?}"),
		}
	}

	fn rebind(index: usize, attempt: LockAttempt) -> LockAttempt {
		match attempt {
			LockAttempt::Acquired(inner) => LockAttempt::Acquired(LockToken::Fallback {
				index,
				inner: Box::new(inner),
			}),
			LockAttempt::Busy(inner) => LockAttempt::Busy(LockToken::Fallback {
				index,
				inner: Box::new(inner),
			}),
		}
	}
}

#[async_trait]
impl Locker for FallbackLocker {
	async fn acquire(&self, resource: &str) -> Result<LockAttempt> {
		let last = self.lockers.len() - 1;
		for (index, locker) in self.lockers.iter().enumerate() {
			match locker.acquire(resource).await {
				Ok(attempt) => return Ok(Self::rebind(index, attempt)),
				Err(e) if index < last => {
					// clear the error and fall through to the next child
					log::warn!("fallback locker: child {index} failed ({e:#}), trying next");
				}
				Err(e) => return Err(e),
			}
		}
		unreachable!("loop returns on the last child");
	}

	async fn ping(&self, token: &LockToken) -> Result<LockPing> {
		let (child, inner) = self.child_for(token)?;
		child.ping(inner).await
	}

	async fn release(&self, token: &LockToken) -> Result<()> {
		let (child, inner) = self.child_for(token)?;
		child.release(inner).await
	}

	fn retry_interval(&self) -> Duration {
		self.retry_interval
	}

	fn timeout(&self) -> Duration {
		self.timeout
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::locker::{DiskLocker, MemcachedLocker};

	fn chain(dir: &std::path::Path) -> FallbackLocker {
		// the memcached child points at a dead port and always fails
		let broken = MemcachedLocker::new(
			vec!["memcache://127.0.0.1:1".to_string()],
			None,
			Duration::from_millis(10),
			Duration::from_secs(1),
		);
		let disk = DiskLocker::new(dir, Duration::from_millis(10), Duration::from_secs(1));
		let children: Vec<Box<dyn Locker>> = vec![Box::new(broken), Box::new(disk)];
		FallbackLocker::new(children, Duration::from_millis(10), Duration::from_secs(1)).unwrap()
	}

	#[tokio::test]
	async fn falls_through_to_the_working_child() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let locker = chain(dir.path());

		let LockAttempt::Acquired(token) = locker.acquire("res").await? else {
			panic!("disk child should have acquired");
		};
		// the token is bound to the child that produced it
		assert!(matches!(token, LockToken::Fallback { index: 1, .. }));
		assert_eq!(locker.ping(&token).await?, LockPing::Held);

		locker.release(&token).await?;
		assert_eq!(locker.ping(&token).await?, LockPing::Gone);
		Ok(())
	}

	#[tokio::test]
	async fn busy_results_pass_through() -> Result<()> {
		let dir = tempfile::tempdir()?;
		let locker = chain(dir.path());

		let LockAttempt::Acquired(held) = locker.acquire("res").await? else {
			panic!();
		};
		let LockAttempt::Busy(busy) = locker.acquire("res").await? else {
			panic!("second acquire must observe the holder");
		};
		assert_eq!(locker.ping(&busy).await?, LockPing::Held);
		locker.release(&held).await?;
		Ok(())
	}

	#[tokio::test]
	async fn all_children_failing_is_an_error() {
		let broken = |port: u16| {
			MemcachedLocker::new(
				vec![format!("memcache://127.0.0.1:{port}")],
				None,
				Duration::from_millis(10),
				Duration::from_secs(1),
			)
		};
		let children: Vec<Box<dyn Locker>> = vec![Box::new(broken(1)), Box::new(broken(2))];
		let locker = FallbackLocker::new(children, Duration::from_millis(10), Duration::from_secs(1)).unwrap();
		assert!(locker.acquire("res").await.is_err());
	}
}
