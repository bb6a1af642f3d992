//! End-to-end scenarios: a real server on an ephemeral port, a counting
//! source behind the tilesets, and real cache backends on temp directories.

use anyhow::Result;
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;
use tilevault::{Registry, Runtime, TileServer, source::CountingSource};
use tilevault_cache::{BackendPools, PoolConfig, TileCache};
use tilevault_core::{Blob, Tile, TileCoord, config::Config};

struct TestServer {
	server: TileServer,
	port: u16,
	source: Arc<CountingSource>,
	runtime: Arc<Runtime>,
	_dirs: (TempDir, TempDir),
}

impl TestServer {
	fn url(&self, path: &str) -> String {
		format!("http://127.0.0.1:{}/mapcache{path}", self.port)
	}

	async fn stop(mut self) {
		self.server.stop().await;
	}
}

/// Builds a server with a disk cache, a disk locker and a counting source.
/// `extra` is spliced into the config (more caches, rules, tileset tweaks).
async fn start_server(cache_xml: &str, tileset_xml: &str, extra_xml: &str) -> Result<TestServer> {
	let cache_dir = TempDir::new()?;
	let lock_dir = TempDir::new()?;

	let xml = format!(
		r#"
		<mapcache>
		   <cache name="disk1" type="disk"><base>{cache}</base></cache>
		   {cache_xml}
		   <source name="src1" type="wms"><http><url>http://127.0.0.1:1/wms</url></http></source>
		   {tileset_xml}
		   <locker type="disk">
		      <directory>{locks}</directory>
		      <retry>0.02</retry>
		      <timeout>1.5</timeout>
		   </locker>
		   {extra_xml}
		</mapcache>"#,
		cache = cache_dir.path().display(),
		locks = lock_dir.path().display(),
	);

	let config = Config::from_string(&xml)?;
	let pools = BackendPools::new(PoolConfig::default());
	let mut runtime = Runtime::from_config(&config, &pools)?;

	let source = CountingSource::new();
	runtime.set_source("src1", source.clone());
	let runtime = Arc::new(runtime);

	let mut registry = Registry::default();
	registry.add("/mapcache".to_string(), runtime.clone(), pools)?;

	let mut server = TileServer::new("127.0.0.1", 0, registry);
	server.start().await?;
	let port = server.get_port();

	Ok(TestServer {
		server,
		port,
		source,
		runtime,
		_dirs: (cache_dir, lock_dir),
	})
}

const SIMPLE_TILESET: &str = r#"
	<tileset name="l1">
	   <source>src1</source>
	   <cache>disk1</cache>
	   <grid>GoogleMapsCompatible</grid>
	   <format>PNG</format>
	   <metatile>2 2</metatile>
	   <metabuffer>10</metabuffer>
	   <expires>3600</expires>
	</tileset>"#;

fn seed_tile(data: &[u8]) -> Tile {
	// wmts path 3/5/2 resolves to grid coordinates (z=3, x=2, y=2)
	let mut tile = Tile::new("l1", "GoogleMapsCompatible", TileCoord::new(3, 2, 2).unwrap());
	tile.data = Some(Blob::from(data));
	tile
}

#[tokio::test]
async fn s1_cache_hit_serves_verbatim_without_rendering() -> Result<()> {
	let ts = start_server("", SIMPLE_TILESET, "").await?;

	// pre-populate the disk cache with a 37-byte body
	let body: Vec<u8> = (0u8..37).collect();
	let disk = ts.runtime.cache("disk1").unwrap();
	disk.tile_set(&seed_tile(&body)).await?;

	let response = reqwest::get(ts.url("/wmts/1.0.0/l1/default/GoogleMapsCompatible/3/5/2.png")).await?;
	assert_eq!(response.status(), 200);
	assert_eq!(response.headers().get("content-type").unwrap(), "image/png");
	assert!(response.headers().get("last-modified").is_some());
	assert_eq!(response.headers().get("cache-control").unwrap(), "max-age=3600");
	assert_eq!(response.bytes().await?.to_vec(), body);

	assert_eq!(ts.source.render_count(), 0, "a hit must not touch the source");
	ts.stop().await;
	Ok(())
}

#[tokio::test]
async fn s2_cold_miss_renders_one_metatile_and_caches_every_child() -> Result<()> {
	let ts = start_server("", SIMPLE_TILESET, "").await?;

	let response = reqwest::get(ts.url("/wmts/1.0.0/l1/default/GoogleMapsCompatible/3/5/2.png")).await?;
	assert_eq!(response.status(), 200);
	let bytes = response.bytes().await?;
	assert_eq!(&bytes[0..4], b"\x89PNG");

	assert_eq!(ts.source.render_count(), 1);

	// the whole 2x2 metatile landed in the cache
	let disk = ts.runtime.cache("disk1").unwrap();
	for (x, y) in [(2, 2), (3, 2), (2, 3), (3, 3)] {
		let mut tile = Tile::new("l1", "GoogleMapsCompatible", TileCoord::new(3, x, y)?);
		assert!(disk.tile_exists(&tile).await?, "missing metatile child ({x},{y})");
		assert!(disk.tile_get(&mut tile).await?);
	}

	// a second request is a pure hit
	let response = reqwest::get(ts.url("/wmts/1.0.0/l1/default/GoogleMapsCompatible/3/5/2.png")).await?;
	assert_eq!(response.status(), 200);
	assert_eq!(ts.source.render_count(), 1);

	ts.stop().await;
	Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn s3_concurrent_misses_collapse_to_one_render() -> Result<()> {
	let ts = start_server("", SIMPLE_TILESET, "").await?;
	let url = ts.url("/wmts/1.0.0/l1/default/GoogleMapsCompatible/3/5/2.png");

	let mut handles = Vec::new();
	for _ in 0..20 {
		let url = url.clone();
		handles.push(tokio::spawn(async move {
			let response = reqwest::get(&url).await?;
			anyhow::ensure!(response.status() == 200, "status {}", response.status());
			Ok::<Vec<u8>, anyhow::Error>(response.bytes().await?.to_vec())
		}));
	}

	let mut bodies = Vec::new();
	for handle in handles {
		bodies.push(handle.await??);
	}

	assert_eq!(ts.source.render_count(), 1, "exactly one render for 20 concurrent misses");
	assert!(bodies.windows(2).all(|w| w[0] == w[1]), "all bodies identical");

	ts.stop().await;
	Ok(())
}

#[tokio::test]
async fn s4_multitier_backfills_the_fast_tier() -> Result<()> {
	let ts = start_server(
		r#"
		<cache name="fast" type="memory"/>
		<cache name="both" type="multitier">
		   <cache write="false">fast</cache>
		   <cache>disk1</cache>
		</cache>"#,
		r#"
		<tileset name="l1">
		   <source>src1</source>
		   <cache>both</cache>
		   <grid>GoogleMapsCompatible</grid>
		   <format>PNG</format>
		   <metatile>2 2</metatile>
		</tileset>"#,
		"",
	)
	.await?;

	// pre-populate only the durable tier
	let body: Vec<u8> = vec![9u8; 21];
	ts.runtime.cache("disk1").unwrap().tile_set(&seed_tile(&body)).await?;

	let response = reqwest::get(ts.url("/wmts/1.0.0/l1/default/GoogleMapsCompatible/3/5/2.png")).await?;
	assert_eq!(response.status(), 200);
	assert_eq!(response.bytes().await?.to_vec(), body);

	// the hit back-filled the fast tier
	let fast = ts.runtime.cache("fast").unwrap();
	assert!(fast.tile_exists(&seed_tile(&body)).await?);

	// remove the durable tier copy; the fast tier now serves alone
	ts.runtime.cache("disk1").unwrap().tile_delete(&seed_tile(&body)).await?;
	let response = reqwest::get(ts.url("/wmts/1.0.0/l1/default/GoogleMapsCompatible/3/5/2.png")).await?;
	assert_eq!(response.status(), 200);
	assert_eq!(response.bytes().await?.to_vec(), body);
	assert_eq!(ts.source.render_count(), 0);

	ts.stop().await;
	Ok(())
}

#[tokio::test]
async fn s5_proxy_post_over_limit_is_413_without_contacting_upstream() -> Result<()> {
	// the upstream is a dead port: reaching it would produce a 502
	let ts = start_server(
		"",
		SIMPLE_TILESET,
		r#"
		<forwarding_rule name="r1">
		   <prefix>/special</prefix>
		   <http><url>http://127.0.0.1:1</url></http>
		   <max_post_len>1024</max_post_len>
		</forwarding_rule>"#,
	)
	.await?;

	let client = reqwest::Client::new();
	let response = client
		.post(ts.url("/special/upload"))
		.body(vec![0u8; 2048])
		.send()
		.await?;
	assert_eq!(response.status(), 413);

	// a small body passes the check and then fails on the dead upstream
	let response = client
		.post(ts.url("/special/upload"))
		.body(vec![0u8; 16])
		.send()
		.await?;
	assert_eq!(response.status(), 502);

	ts.stop().await;
	Ok(())
}

#[tokio::test]
async fn s6_stale_lock_is_taken_over_after_timeout() -> Result<()> {
	let ts = start_server("", SIMPLE_TILESET, "").await?;

	// simulate a worker that died after acquire: its lock file exists but
	// nobody will release it
	let lock_dir = ts._dirs.1.path();
	let stale = lock_dir.join("_gc_lockl1#GoogleMapsCompatible#3#1#1.lck");
	std::fs::write(&stale, "4242")?;

	let started = std::time::Instant::now();
	let response = reqwest::get(ts.url("/wmts/1.0.0/l1/default/GoogleMapsCompatible/3/5/2.png")).await?;
	assert_eq!(response.status(), 200);
	assert!(
		started.elapsed() >= Duration::from_secs(1),
		"the stale lock must be waited out"
	);
	assert_eq!(ts.source.render_count(), 1);
	assert!(!stale.exists(), "the stale lock was force-released");

	ts.stop().await;
	Ok(())
}

#[tokio::test]
async fn conditional_get_returns_304_with_empty_body() -> Result<()> {
	let ts = start_server("", SIMPLE_TILESET, "").await?;
	let url = ts.url("/wmts/1.0.0/l1/default/GoogleMapsCompatible/3/5/2.png");

	let response = reqwest::get(&url).await?;
	assert_eq!(response.status(), 200);
	let last_modified = response.headers().get("last-modified").unwrap().to_str()?.to_string();

	let client = reqwest::Client::new();
	let response = client.get(&url).header("if-modified-since", &last_modified).send().await?;
	assert_eq!(response.status(), 304);
	assert!(response.bytes().await?.is_empty());

	// an older client copy still gets the full tile
	let response = client
		.get(&url)
		.header("if-modified-since", "Sun, 06 Nov 1994 08:49:37 GMT")
		.send()
		.await?;
	assert_eq!(response.status(), 200);

	ts.stop().await;
	Ok(())
}

#[tokio::test]
async fn wms_getmap_composes_tiles() -> Result<()> {
	let ts = start_server("", SIMPLE_TILESET, "").await?;

	// zoom 1 on the mercator grid: 2x2 tiles; request the northern half
	let half = 20037508.3427892;
	let url = format!(
		"{}?SERVICE=WMS&REQUEST=GetMap&LAYERS=l1&SRS=EPSG:3857&WIDTH=512&HEIGHT=256&BBOX=-{half},0,{half},{half}",
		ts.url("/wms")
	);
	let response = reqwest::get(&url).await?;
	assert_eq!(response.status(), 200);

	let image = image::load_from_memory(&response.bytes().await?)?;
	assert_eq!((image.width(), image.height()), (512, 256));

	ts.stop().await;
	Ok(())
}

#[tokio::test]
async fn render_failure_propagates_and_releases_the_lock() -> Result<()> {
	let ts = start_server("", SIMPLE_TILESET, "").await?;
	let url = ts.url("/wmts/1.0.0/l1/default/GoogleMapsCompatible/3/5/2.png");

	ts.source.set_failing(true);
	let response = reqwest::get(&url).await?;
	assert_eq!(response.status(), 500);

	// the lock was released on the error path, so a healthy retry succeeds
	ts.source.set_failing(false);
	let response = reqwest::get(&url).await?;
	assert_eq!(response.status(), 200);
	assert_eq!(ts.source.render_count(), 1);

	ts.stop().await;
	Ok(())
}

#[tokio::test]
async fn request_errors_carry_the_right_status() -> Result<()> {
	let ts = start_server("", SIMPLE_TILESET, "").await?;
	let client = reqwest::Client::new();

	// unknown tileset
	let response = reqwest::get(ts.url("/wmts/1.0.0/nope/default/GoogleMapsCompatible/3/5/2.png")).await?;
	assert_eq!(response.status(), 404);

	// bad coordinates
	let response = reqwest::get(ts.url("/wmts/1.0.0/l1/default/GoogleMapsCompatible/3/999/2.png")).await?;
	assert_eq!(response.status(), 400);

	// unknown endpoint
	let response = reqwest::get(format!("http://127.0.0.1:{}/other", ts.port)).await?;
	assert_eq!(response.status(), 404);

	// unsupported method
	let response = client.put(ts.url("/wmts/1.0.0/l1/default/GoogleMapsCompatible/3/5/2.png")).send().await?;
	assert_eq!(response.status(), 405);

	ts.stop().await;
	Ok(())
}

#[tokio::test]
async fn capabilities_documents_are_served() -> Result<()> {
	let ts = start_server("", SIMPLE_TILESET, "").await?;

	let response = reqwest::get(ts.url("/wmts/1.0.0/WMTSCapabilities.xml")).await?;
	assert_eq!(response.status(), 200);
	let body = response.text().await?;
	assert!(body.contains("<ows:Identifier>l1</ows:Identifier>"));
	assert!(body.contains("/mapcache/wmts/1.0.0/l1/default/"));

	let response = reqwest::get(ts.url("/tms/1.0.0")).await?;
	assert_eq!(response.status(), 200);
	assert!(response.text().await?.contains("l1@GoogleMapsCompatible"));

	ts.stop().await;
	Ok(())
}

#[tokio::test]
async fn tms_serves_the_same_tiles() -> Result<()> {
	let ts = start_server("", SIMPLE_TILESET, "").await?;

	let response = reqwest::get(ts.url("/tms/1.0.0/l1/3/2/2.png")).await?;
	assert_eq!(response.status(), 200);
	assert_eq!(ts.source.render_count(), 1);

	// same tile as the wmts path: served from cache now
	let response = reqwest::get(ts.url("/wmts/1.0.0/l1/default/GoogleMapsCompatible/3/5/2.png")).await?;
	assert_eq!(response.status(), 200);
	assert_eq!(ts.source.render_count(), 1);

	ts.stop().await;
	Ok(())
}
