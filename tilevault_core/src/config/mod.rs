//! Service configuration: the `<mapcache>` XML document.
//!
//! One XML file describes one endpoint's caches, grids, sources, tilesets,
//! locker and proxy forwarding rules. This module holds the serde model
//! (parsed with `quick-xml`), parse helpers for the space-separated numeric
//! fields, reference validation, and the conversions into the runtime types.
//!
//! ## XML shape
//!
//! ```xml
//! <mapcache>
//!    <cache name="disk1" type="disk">
//!       <base>/var/cache/tiles</base>
//!    </cache>
//!    <cache name="mc" type="memcache">
//!       <server><host>localhost</host><port>11211</port></server>
//!    </cache>
//!    <cache name="both" type="multitier">
//!       <cache write="false">mc</cache>
//!       <cache>disk1</cache>
//!    </cache>
//!    <source name="wms1" type="wms">
//!       <http><url>http://upstream/wms</url></http>
//!       <getmap><params>
//!          <param name="LAYERS">basemap</param>
//!       </params></getmap>
//!    </source>
//!    <tileset name="l1">
//!       <source>wms1</source>
//!       <cache>both</cache>
//!       <grid>GoogleMapsCompatible</grid>
//!       <format>PNG</format>
//!       <metatile>5 5</metatile>
//!       <metabuffer>10</metabuffer>
//!       <expires>3600</expires>
//!    </tileset>
//!    <locker type="disk">
//!       <directory>/tmp</directory>
//!       <retry>0.1</retry>
//!       <timeout>120</timeout>
//!    </locker>
//! </mapcache>
//! ```
//!
//! A legacy document without a `<locker>` element may carry `<lock_dir>` and
//! `<lock_retry>` (microseconds) at the root; both map to a disk locker with a
//! 120 s timeout.

mod parse;

pub use parse::{parse_extent, parse_pair_u32, parse_resolutions};

use crate::{
	DimensionKind, DimensionSchema, Grid, GridOrigin, TileFormat, Tileset,
};
use anyhow::{Context, Result, bail, ensure};
use serde::Deserialize;
use std::{
	fs::File,
	io::{BufReader, Read},
	path::{Path, PathBuf},
};

/// Default locker poll interval in seconds.
pub const DEFAULT_LOCK_RETRY: f64 = 0.1;
/// Default locker timeout in seconds.
pub const DEFAULT_LOCK_TIMEOUT: f64 = 120.0;

/// Top-level configuration, one per endpoint alias.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct Config {
	#[serde(rename = "cache", default)]
	pub caches: Vec<CacheConf>,

	#[serde(rename = "grid", default)]
	pub grids: Vec<GridConf>,

	#[serde(rename = "source", default)]
	pub sources: Vec<SourceConf>,

	#[serde(rename = "tileset", default)]
	pub tilesets: Vec<TilesetConf>,

	#[serde(rename = "locker")]
	pub locker: Option<LockerConf>,

	#[serde(rename = "forwarding_rule", default)]
	pub forwarding_rules: Vec<ForwardingRuleConf>,

	#[serde(rename = "service", default)]
	pub services: Vec<ServiceConf>,

	/// Legacy disk-locker directory; superseded by `<locker>`.
	pub lock_dir: Option<String>,
	/// Legacy poll interval in microseconds; superseded by `<locker>`.
	pub lock_retry: Option<u64>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct CacheConf {
	#[serde(rename = "@name")]
	pub name: String,
	#[serde(rename = "@type")]
	pub cache_type: String,

	// disk
	pub base: Option<PathBuf>,
	pub template: Option<String>,

	// sqlite
	pub dbfile: Option<PathBuf>,

	// memcache
	#[serde(rename = "server", default)]
	pub servers: Vec<ServerConf>,
	pub key_prefix: Option<String>,

	// multitier
	#[serde(rename = "cache", default)]
	pub tiers: Vec<TierRef>,
}

/// A child reference inside a multitier cache.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TierRef {
	#[serde(rename = "@write")]
	pub write: Option<bool>,
	#[serde(rename = "$text")]
	pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ServerConf {
	pub host: String,
	pub port: Option<u16>,
}

impl ServerConf {
	/// `host:port` with the default memcached port filled in.
	#[must_use]
	pub fn address(&self) -> String {
		format!("{}:{}", self.host, self.port.unwrap_or(11211))
	}
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct GridConf {
	#[serde(rename = "@name")]
	pub name: String,
	pub srs: Option<String>,
	pub units: Option<String>,
	/// Tile pixel size: `"256 256"`.
	pub size: Option<String>,
	/// `"minx miny maxx maxy"`.
	pub extent: Option<String>,
	/// Space-separated, strictly decreasing.
	pub resolutions: Option<String>,
	/// `"top-left"` or `"bottom-left"` (default).
	pub origin: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct SourceConf {
	#[serde(rename = "@name")]
	pub name: String,
	#[serde(rename = "@type")]
	pub source_type: String,
	pub http: Option<HttpConf>,
	pub getmap: Option<GetMapConf>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct HttpConf {
	pub url: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct GetMapConf {
	pub params: Option<ParamsConf>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ParamsConf {
	#[serde(rename = "param", default)]
	pub entries: Vec<ParamConf>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ParamConf {
	#[serde(rename = "@name")]
	pub name: String,
	#[serde(rename = "$text")]
	pub value: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct TilesetConf {
	#[serde(rename = "@name")]
	pub name: String,
	pub source: Option<String>,
	pub cache: Option<String>,
	#[serde(rename = "grid", default)]
	pub grids: Vec<String>,
	pub format: Option<String>,
	/// `"w h"` in tiles.
	pub metatile: Option<String>,
	pub metabuffer: Option<u32>,
	pub expires: Option<u32>,
	pub auto_expire: Option<u32>,
	pub read_only: Option<bool>,
	pub dimensions: Option<DimensionsConf>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct DimensionsConf {
	#[serde(rename = "dimension", default)]
	pub entries: Vec<DimensionConf>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct DimensionConf {
	#[serde(rename = "@name")]
	pub name: String,
	/// `"values"` (default) or `"regex"`.
	#[serde(rename = "@type")]
	pub dimension_type: Option<String>,
	#[serde(rename = "@default")]
	pub default: String,
	/// Comma-separated values, or the regex.
	#[serde(rename = "$text")]
	pub spec: String,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct LockerConf {
	#[serde(rename = "@type")]
	pub locker_type: Option<String>,
	/// Poll interval in seconds (float).
	pub retry: Option<f64>,
	/// Stale-lock timeout in seconds (float).
	pub timeout: Option<f64>,

	// disk
	pub directory: Option<String>,

	// memcache
	#[serde(rename = "server", default)]
	pub servers: Vec<ServerConf>,
	pub key_prefix: Option<String>,

	// fallback
	#[serde(rename = "locker", default)]
	pub children: Vec<LockerConf>,
}

impl LockerConf {
	#[must_use]
	pub fn retry_or_default(&self) -> f64 {
		self.retry.unwrap_or(DEFAULT_LOCK_RETRY)
	}

	#[must_use]
	pub fn timeout_or_default(&self) -> f64 {
		self.timeout.unwrap_or(DEFAULT_LOCK_TIMEOUT)
	}
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ForwardingRuleConf {
	#[serde(rename = "@name")]
	pub name: String,
	/// URL path-info prefix this rule matches.
	pub prefix: String,
	pub http: HttpConf,
	/// Maximum accepted POST body in bytes.
	pub max_post_len: Option<usize>,
}

impl ForwardingRuleConf {
	#[must_use]
	pub fn max_post_len(&self) -> usize {
		self.max_post_len.unwrap_or(1024 * 1024)
	}
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct ServiceConf {
	#[serde(rename = "@type")]
	pub service_type: String,
	#[serde(rename = "@enabled")]
	pub enabled: Option<bool>,
}

impl Config {
	/// Parse an XML config from any `Read` implementor.
	pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
		let mut text = String::new();
		let mut reader = reader;
		reader.read_to_string(&mut text).context("reading config")?;
		Config::from_string(&text)
	}

	/// Parse an XML config from a string slice.
	pub fn from_string(text: &str) -> Result<Self> {
		let config: Config = quick_xml::de::from_str(text).context("parsing config XML")?;
		config.post_config()?;
		Ok(config)
	}

	/// Parse from a file path.
	pub fn from_path(path: &Path) -> Result<Self> {
		let file = File::open(path).with_context(|| format!("opening config file {path:?}"))?;
		Config::from_reader(BufReader::new(file))
	}

	/// Cross-reference validation; fatal at startup.
	fn post_config(&self) -> Result<()> {
		let cache_names: Vec<&str> = self.caches.iter().map(|c| c.name.as_str()).collect();
		for cache in &self.caches {
			ensure!(
				cache_names.iter().filter(|n| **n == cache.name).count() == 1,
				"duplicate cache name {:?}",
				cache.name
			);
			if cache.cache_type == "multitier" {
				cache.multitier_write_index()?;
				for tier in &cache.tiers {
					// referenced caches must be declared before the multitier
					ensure!(
						self
							.caches
							.iter()
							.take_while(|c| c.name != cache.name)
							.any(|c| c.name == tier.name),
						"multitier cache {:?} references cache {:?}, but it is not configured before it",
						cache.name,
						tier.name
					);
				}
			}
		}

		for tileset in &self.tilesets {
			if let Some(cache) = &tileset.cache {
				ensure!(
					cache_names.contains(&cache.as_str()),
					"tileset {:?} references unknown cache {:?}",
					tileset.name,
					cache
				);
			}
			if let Some(source) = &tileset.source {
				ensure!(
					self.sources.iter().any(|s| &s.name == source),
					"tileset {:?} references unknown source {:?}",
					tileset.name,
					source
				);
			}
			for grid in &tileset.grids {
				ensure!(
					self.grids.iter().any(|g| &g.name == grid)
						|| grid == "GoogleMapsCompatible"
						|| grid == "WGS84",
					"tileset {:?} references unknown grid {:?}",
					tileset.name,
					grid
				);
			}
		}
		Ok(())
	}

	/// The effective locker configuration, honouring the legacy
	/// `<lock_dir>`/`<lock_retry>` keys when no `<locker>` element is present.
	#[must_use]
	pub fn locker_conf(&self) -> LockerConf {
		if let Some(locker) = &self.locker {
			return locker.clone();
		}
		LockerConf {
			locker_type: Some("disk".to_string()),
			// legacy default was 10000 microseconds
			retry: Some(self.lock_retry.unwrap_or(10_000) as f64 / 1_000_000.0),
			timeout: Some(DEFAULT_LOCK_TIMEOUT),
			directory: Some(self.lock_dir.clone().unwrap_or_else(|| "/tmp".to_string())),
			..LockerConf::default()
		}
	}

	/// The grids visible to this endpoint: built-ins plus declared ones.
	pub fn resolved_grids(&self) -> Result<Vec<Grid>> {
		let mut grids = vec![Grid::google_maps_compatible(), Grid::wgs84()];
		for conf in &self.grids {
			let grid = conf.to_grid()?;
			grids.retain(|g| g.name != grid.name);
			grids.push(grid);
		}
		Ok(grids)
	}
}

impl CacheConf {
	/// Which child of a multitier cache receives writes.
	///
	/// Exactly one child may carry `write="true"`; with no explicit flag the
	/// last child without `write="false"` wins.
	pub fn multitier_write_index(&self) -> Result<usize> {
		ensure!(
			!self.tiers.is_empty(),
			"multitier cache {:?} does not reference any child caches",
			self.name
		);
		let mut write_idx: Option<usize> = None;
		let mut rw_idx: Option<usize> = None;
		for (i, tier) in self.tiers.iter().enumerate() {
			match tier.write {
				Some(true) => {
					ensure!(
						write_idx.is_none(),
						"multitier cache {:?} has write attribute set to true on more than one child cache",
						self.name
					);
					write_idx = Some(i);
				}
				Some(false) => {}
				None => rw_idx = Some(i),
			}
		}
		write_idx.or(rw_idx).ok_or_else(|| {
			anyhow::anyhow!("multitier cache {:?} has no child cache configured as writable", self.name)
		})
	}
}

impl GridConf {
	/// Builds the runtime [`Grid`], applying defaults for missing fields.
	pub fn to_grid(&self) -> Result<Grid> {
		let (tile_width, tile_height) = self.size.as_deref().map_or(Ok((256, 256)), parse_pair_u32)?;
		let extent = parse_extent(
			self
				.extent
				.as_deref()
				.with_context(|| format!("grid {:?} is missing <extent>", self.name))?,
		)?;
		let resolutions = parse_resolutions(
			self
				.resolutions
				.as_deref()
				.with_context(|| format!("grid {:?} is missing <resolutions>", self.name))?,
		)?;
		let origin = match self.origin.as_deref() {
			None | Some("bottom-left") => GridOrigin::BottomLeft,
			Some("top-left") => GridOrigin::TopLeft,
			Some(other) => bail!("grid {:?} has unknown origin {other:?}", self.name),
		};
		Ok(Grid {
			name: self.name.clone(),
			srs: self.srs.clone().unwrap_or_default(),
			units: self.units.clone().unwrap_or_else(|| "m".to_string()),
			tile_width,
			tile_height,
			extent,
			resolutions,
			origin,
		})
	}
}

impl TilesetConf {
	/// Builds the runtime [`Tileset`], applying defaults for missing fields.
	pub fn to_tileset(&self) -> Result<Tileset> {
		let format = self
			.format
			.as_deref()
			.map_or(Ok(TileFormat::Png), TileFormat::parse)?;
		let metasize = self.metatile.as_deref().map_or(Ok((1, 1)), parse_pair_u32)?;
		ensure!(
			metasize.0 >= 1 && metasize.1 >= 1,
			"tileset {:?} has an invalid <metatile> size",
			self.name
		);
		let mut dimensions = Vec::new();
		if let Some(conf) = &self.dimensions {
			for entry in &conf.entries {
				dimensions.push(entry.to_schema()?);
			}
		}
		let grids = if self.grids.is_empty() {
			vec!["GoogleMapsCompatible".to_string()]
		} else {
			self.grids.clone()
		};
		Ok(Tileset {
			name: self.name.clone(),
			source: self.source.clone(),
			cache: self.cache.clone(),
			grids,
			format,
			metasize,
			metabuffer: self.metabuffer.unwrap_or(0),
			expires: self.expires,
			auto_expire: self.auto_expire,
			read_only: self.read_only.unwrap_or(false),
			dimensions,
		})
	}
}

impl DimensionConf {
	fn to_schema(&self) -> Result<DimensionSchema> {
		let kind = match self.dimension_type.as_deref() {
			None | Some("values") => DimensionKind::Values(
				self.spec.split(',').map(|v| v.trim().to_string()).collect(),
			),
			Some("regex") => DimensionKind::Regex(
				regex::Regex::new(self.spec.trim())
					.with_context(|| format!("dimension {:?} has an invalid regex", self.name))?,
			),
			Some(other) => bail!("dimension {:?} has unknown type {other:?}", self.name),
		};
		Ok(DimensionSchema {
			name: self.name.clone(),
			default: self.default.clone(),
			kind,
		})
	}
}
