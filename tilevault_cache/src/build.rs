//! Construction of caches and lockers from the parsed configuration.

use crate::{
	BackendPools, DiskCache, DiskLocker, FallbackLocker, Locker, MemcachedCache, MemcachedLocker, MemoryCache,
	MultitierCache, SqliteCache, TileCache,
};
use anyhow::{Context, Result, bail, ensure};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tilevault_core::config::{CacheConf, Config, LockerConf};

/// Builds every configured cache, in declaration order so that multitier
/// caches can reference the children declared before them.
pub fn build_caches(config: &Config, pools: &Arc<BackendPools>) -> Result<HashMap<String, Arc<dyn TileCache>>> {
	let mut caches: HashMap<String, Arc<dyn TileCache>> = HashMap::new();
	for conf in &config.caches {
		let cache = build_cache(conf, &caches, pools)?;
		caches.insert(conf.name.clone(), cache);
	}
	Ok(caches)
}

fn build_cache(
	conf: &CacheConf,
	existing: &HashMap<String, Arc<dyn TileCache>>,
	pools: &Arc<BackendPools>,
) -> Result<Arc<dyn TileCache>> {
	Ok(match conf.cache_type.as_str() {
		"disk" => {
			let base = conf
				.base
				.as_ref()
				.with_context(|| format!("disk cache {:?} is missing <base>", conf.name))?;
			Arc::new(DiskCache::new(&conf.name, base, conf.template.clone()))
		}
		"sqlite" => {
			let dbfile = conf
				.dbfile
				.as_ref()
				.with_context(|| format!("sqlite cache {:?} is missing <dbfile>", conf.name))?;
			Arc::new(SqliteCache::open(&conf.name, dbfile)?)
		}
		"memcache" => {
			ensure!(
				!conf.servers.is_empty(),
				"memcache cache {:?} has no <server> entries",
				conf.name
			);
			let urls = conf
				.servers
				.iter()
				.map(|s| format!("memcache://{}", s.address()))
				.collect();
			Arc::new(MemcachedCache::new(
				&conf.name,
				urls,
				conf.key_prefix.clone(),
				pools.clone(),
			))
		}
		"memory" => Arc::new(MemoryCache::new(&conf.name)),
		"multitier" => {
			let write_idx = conf.multitier_write_index()?;
			let tiers = conf
				.tiers
				.iter()
				.map(|tier| {
					existing
						.get(&tier.name)
						.cloned()
						.with_context(|| format!("multitier cache {:?} references unknown cache {:?}", conf.name, tier.name))
				})
				.collect::<Result<Vec<_>>>()?;
			Arc::new(MultitierCache::new(&conf.name, tiers, write_idx)?)
		}
		other => bail!("cache {:?} has unknown type {other:?}", conf.name),
	})
}

/// Builds the locker, recursing for fallback chains.
pub fn build_locker(conf: &LockerConf) -> Result<Arc<dyn Locker>> {
	Ok(Arc::from(build_locker_boxed(conf)?))
}

fn build_locker_boxed(conf: &LockerConf) -> Result<Box<dyn Locker>> {
	let retry = Duration::from_secs_f64(conf.retry_or_default());
	let timeout = Duration::from_secs_f64(conf.timeout_or_default());
	ensure!(
		retry > Duration::ZERO && timeout > Duration::ZERO,
		"locker retry and timeout must be positive"
	);

	Ok(match conf.locker_type.as_deref().unwrap_or("disk") {
		"disk" => {
			let dir = conf.directory.clone().unwrap_or_else(|| "/tmp".to_string());
			Box::new(DiskLocker::new(std::path::Path::new(&dir), retry, timeout))
		}
		"memcache" => {
			ensure!(
				!conf.servers.is_empty(),
				"memcache locker: no <server> provided"
			);
			let urls = conf
				.servers
				.iter()
				.map(|s| format!("memcache://{}", s.address()))
				.collect();
			Box::new(MemcachedLocker::new(urls, conf.key_prefix.clone(), retry, timeout))
		}
		"fallback" => {
			let children = conf
				.children
				.iter()
				.map(build_locker_boxed)
				.collect::<Result<Vec<_>>>()?;
			Box::new(FallbackLocker::new(children, retry, timeout)?)
		}
		other => bail!("<locker>: unknown type {other:?} (allowed are disk, memcache and fallback)"),
	})
}
