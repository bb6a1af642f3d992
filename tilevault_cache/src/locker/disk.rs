//! Disk locker: exclusive-create lock files on a (possibly network-mounted)
//! directory shared by all synchronised workers.
//!
//! Layout: `<dir>/_gc_lock<sanitised-resource>.lck`, containing the ASCII
//! pid of the holder.

use super::{LockAttempt, LockPing, LockToken, Locker, sanitize_resource};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{
	fs::OpenOptions,
	io::{ErrorKind, Write},
	path::{Path, PathBuf},
	time::Duration,
};

const LOCKFILE_PREFIX: &str = "_gc_lock";

#[derive(Debug)]
pub struct DiskLocker {
	dir: PathBuf,
	retry_interval: Duration,
	timeout: Duration,
}

impl DiskLocker {
	pub fn new(dir: &Path, retry_interval: Duration, timeout: Duration) -> DiskLocker {
		DiskLocker {
			dir: dir.to_path_buf(),
			retry_interval,
			timeout,
		}
	}

	fn lock_path(&self, resource: &str) -> PathBuf {
		self
			.dir
			.join(format!("{LOCKFILE_PREFIX}{}.lck", sanitize_resource(resource)))
	}
}

#[async_trait]
impl Locker for DiskLocker {
	async fn acquire(&self, resource: &str) -> Result<LockAttempt> {
		let path = self.lock_path(resource);
		match OpenOptions::new().write(true).create_new(true).open(&path) {
			Ok(mut file) => {
				// the pid is diagnostic only; staleness is handled by timeout
				let _ = write!(file, "{}", std::process::id());
				Ok(LockAttempt::Acquired(LockToken::Disk(path)))
			}
			Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(LockAttempt::Busy(LockToken::Disk(path))),
			Err(e) => Err(e).with_context(|| format!("failed to create lockfile {path:?}")),
		}
	}

	async fn ping(&self, token: &LockToken) -> Result<LockPing> {
		let LockToken::Disk(path) = token else {
			anyhow::bail!("disk locker pinged with a foreign token: {token:?}");
		};
		match std::fs::metadata(path) {
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(LockPing::Gone),
			_ => Ok(LockPing::Held),
		}
	}

	async fn release(&self, token: &LockToken) -> Result<()> {
		let LockToken::Disk(path) = token else {
			anyhow::bail!("disk locker released with a foreign token: {token:?}");
		};
		match std::fs::remove_file(path) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e).with_context(|| format!("failed to remove lockfile {path:?}")),
		}
	}

	fn retry_interval(&self) -> Duration {
		self.retry_interval
	}

	fn timeout(&self) -> Duration {
		self.timeout
	}
}
