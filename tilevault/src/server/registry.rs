//! The endpoint registry: URL prefixes ("aliases") mapped to configurations.
//!
//! One process serves many tenants; each alias carries its own resolved
//! runtime and a pool registry handle. With pool sharing enabled every alias
//! points at the same pools.

use crate::runtime::Runtime;
use anyhow::{Result, ensure};
use std::sync::Arc;
use tilevault_cache::{BackendPools, PoolConfig};
use tilevault_core::config::Config;

pub struct AliasEntry {
	pub endpoint: String,
	pub runtime: Arc<Runtime>,
	pub pools: Arc<BackendPools>,
}

/// Matches a request URI against an alias prefix.
///
/// Any run of `/` in the alias matches any run of `/` in the URI, and a
/// partial path component never matches (`/map` does not match `/mapcache`).
/// Returns the number of URI characters consumed, or `None`.
#[must_use]
pub fn alias_matches(uri: &str, alias: &str) -> Option<usize> {
	let uri_bytes = uri.as_bytes();
	let alias_bytes = alias.as_bytes();
	let mut u = 0;
	let mut a = 0;

	while a < alias_bytes.len() {
		if alias_bytes[a] == b'/' {
			if u >= uri_bytes.len() || uri_bytes[u] != b'/' {
				return None;
			}
			while a < alias_bytes.len() && alias_bytes[a] == b'/' {
				a += 1;
			}
			while u < uri_bytes.len() && uri_bytes[u] == b'/' {
				u += 1;
			}
		} else {
			if u >= uri_bytes.len() || uri_bytes[u] != alias_bytes[a] {
				return None;
			}
			u += 1;
			a += 1;
		}
	}

	// the last alias component must match completely
	if alias_bytes.last() != Some(&b'/') && u < uri_bytes.len() && uri_bytes[u] != b'/' {
		return None;
	}

	Some(u)
}

#[derive(Default)]
pub struct Registry {
	aliases: Vec<Arc<AliasEntry>>,
}

impl Registry {
	/// Builds the registry, creating pool registries per the sharing flag:
	/// shared means one registry handle for every alias.
	pub fn build(aliases: Vec<(String, Config)>, pool_config: PoolConfig, sharing: bool) -> Result<Registry> {
		ensure!(!aliases.is_empty(), "no endpoint aliases configured");
		let mut registry = Registry::default();
		let mut shared: Option<Arc<BackendPools>> = None;

		for (endpoint, config) in aliases {
			let pools = match &shared {
				Some(pools) => {
					log::debug!("sharing a connection pool registry for alias {endpoint:?}");
					pools.clone()
				}
				None => {
					let pools = BackendPools::new(pool_config);
					log::debug!(
						"creating a connection pool registry (min={},smax={},hmax={},ttl={:?}) for alias {endpoint:?}",
						pool_config.min,
						pool_config.soft_max,
						pool_config.hard_max,
						pool_config.ttl
					);
					if sharing {
						shared = Some(pools.clone());
					}
					pools
				}
			};
			let runtime = Runtime::from_config(&config, &pools)?;
			registry.add(endpoint, Arc::new(runtime), pools)?;
		}
		Ok(registry)
	}

	pub fn add(&mut self, endpoint: String, runtime: Arc<Runtime>, pools: Arc<BackendPools>) -> Result<()> {
		ensure!(
			!self.aliases.iter().any(|a| a.endpoint == endpoint),
			"endpoint {endpoint:?} is already registered"
		);
		log::info!("registered endpoint {endpoint:?}");
		self.aliases.push(Arc::new(AliasEntry {
			endpoint,
			runtime,
			pools,
		}));
		Ok(())
	}

	/// Finds the alias matching a request path, returning the entry and the
	/// path-info (the part of the path below the alias).
	#[must_use]
	pub fn match_uri<'a>(&self, uri: &'a str) -> Option<(Arc<AliasEntry>, &'a str)> {
		for alias in &self.aliases {
			if let Some(consumed) = alias_matches(uri, &alias.endpoint) {
				return Some((alias.clone(), &uri[consumed..]));
			}
		}
		None
	}

	#[must_use]
	pub fn entries(&self) -> &[Arc<AliasEntry>] {
		&self.aliases
	}
}
