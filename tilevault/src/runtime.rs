//! Resolution of a parsed configuration into runtime registries.
//!
//! A [`Runtime`] is built once per alias at startup and read-only afterwards;
//! request handlers share it through an `Arc`.

use crate::source::{Source, WmsSource};
use anyhow::{Context, Result, bail};
use std::{collections::HashMap, sync::Arc};
use tilevault_cache::{BackendPools, Locker, TileCache, build_caches, build_locker};
use tilevault_core::{
	Grid, HttpError, Tileset,
	config::{Config, ForwardingRuleConf},
};

pub struct Runtime {
	caches: HashMap<String, Arc<dyn TileCache>>,
	grids: HashMap<String, Arc<Grid>>,
	tilesets: HashMap<String, Arc<Tileset>>,
	sources: HashMap<String, Arc<dyn Source>>,
	locker: Arc<dyn Locker>,
	forwarding_rules: Vec<ForwardingRuleConf>,
	/// Lowercased service types with `enabled="true"` (or no flag); an empty
	/// config enables every service.
	enabled_services: Option<Vec<String>>,
}

impl Runtime {
	/// Builds every registry from the parsed config. Fatal on any dangling
	/// reference or unusable backend definition.
	pub fn from_config(config: &Config, pools: &Arc<BackendPools>) -> Result<Runtime> {
		let caches = build_caches(config, pools)?;
		let locker = build_locker(&config.locker_conf())?;

		let mut grids = HashMap::new();
		for grid in config.resolved_grids()? {
			grids.insert(grid.name.clone(), Arc::new(grid));
		}

		let mut sources: HashMap<String, Arc<dyn Source>> = HashMap::new();
		for conf in &config.sources {
			match conf.source_type.as_str() {
				"wms" => {
					let http = conf
						.http
						.as_ref()
						.with_context(|| format!("source {:?} is missing <http>", conf.name))?;
					let params = conf
						.getmap
						.as_ref()
						.and_then(|g| g.params.as_ref())
						.map(|p| {
							p.entries
								.iter()
								.map(|e| (e.name.clone(), e.value.clone()))
								.collect()
						})
						.unwrap_or_default();
					sources.insert(conf.name.clone(), Arc::new(WmsSource::new(&conf.name, &http.url, params)?));
				}
				other => bail!("source {:?} has unknown type {other:?}", conf.name),
			}
		}

		let mut tilesets = HashMap::new();
		for conf in &config.tilesets {
			let tileset = conf.to_tileset()?;
			for grid in &tileset.grids {
				anyhow::ensure!(
					grids.contains_key(grid),
					"tileset {:?} references unknown grid {grid:?}",
					tileset.name
				);
			}
			tilesets.insert(tileset.name.clone(), Arc::new(tileset));
		}

		let enabled_services = if config.services.is_empty() {
			None
		} else {
			Some(
				config
					.services
					.iter()
					.filter(|s| s.enabled.unwrap_or(true))
					.map(|s| s.service_type.to_ascii_lowercase())
					.collect(),
			)
		};

		Ok(Runtime {
			caches,
			grids,
			tilesets,
			sources,
			locker,
			forwarding_rules: config.forwarding_rules.clone(),
			enabled_services,
		})
	}

	/// Replaces (or installs) a source; used by tests and demo setups to put
	/// a local renderer behind a tileset.
	pub fn set_source(&mut self, name: &str, source: Arc<dyn Source>) {
		self.sources.insert(name.to_string(), source);
	}

	pub fn tileset(&self, name: &str) -> Result<&Arc<Tileset>> {
		self
			.tilesets
			.get(name)
			.ok_or_else(|| HttpError::not_found(format!("tileset {name:?} not found")))
	}

	/// Resolves a grid for a tileset; the grid must be linked to the tileset.
	pub fn grid_for(&self, tileset: &Tileset, grid_name: &str) -> Result<&Arc<Grid>> {
		if !tileset.grids.iter().any(|g| g == grid_name) {
			return Err(HttpError::bad_request(format!(
				"tileset {:?} is not published on grid {grid_name:?}",
				tileset.name
			)));
		}
		self
			.grids
			.get(grid_name)
			.ok_or_else(|| HttpError::not_found(format!("grid {grid_name:?} not found")))
	}

	pub fn grid(&self, name: &str) -> Result<&Arc<Grid>> {
		self
			.grids
			.get(name)
			.ok_or_else(|| HttpError::not_found(format!("grid {name:?} not found")))
	}

	/// Looks up a cache backend by its configured name.
	#[must_use]
	pub fn cache(&self, name: &str) -> Option<Arc<dyn TileCache>> {
		self.caches.get(name).cloned()
	}

	#[must_use]
	pub fn cache_for(&self, tileset: &Tileset) -> Option<Arc<dyn TileCache>> {
		tileset.cache.as_ref().and_then(|name| self.caches.get(name).cloned())
	}

	#[must_use]
	pub fn source_for(&self, tileset: &Tileset) -> Option<Arc<dyn Source>> {
		tileset.source.as_ref().and_then(|name| self.sources.get(name).cloned())
	}

	#[must_use]
	pub fn locker(&self) -> &Arc<dyn Locker> {
		&self.locker
	}

	#[must_use]
	pub fn tileset_names(&self) -> Vec<String> {
		let mut names: Vec<String> = self.tilesets.keys().cloned().collect();
		names.sort();
		names
	}

	#[must_use]
	pub fn forwarding_rules(&self) -> &[ForwardingRuleConf] {
		&self.forwarding_rules
	}

	#[must_use]
	pub fn service_enabled(&self, service: &str) -> bool {
		match &self.enabled_services {
			None => true,
			Some(enabled) => enabled.iter().any(|s| s == service),
		}
	}
}

impl std::fmt::Debug for Runtime {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Runtime")
			.field("tilesets", &self.tileset_names())
			.field("caches", &self.caches.keys().collect::<Vec<_>>())
			.field("grids", &self.grids.keys().collect::<Vec<_>>())
			.finish()
	}
}
