//! The tile fetch path: cache probe, miss collapse, metatile render.
//!
//! The ordering contract that makes rendering at-most-once: every render
//! happens while the metatile lock is held, and the cache write completes
//! before the lock is released. A peer that waited on the lock therefore
//! finds the tiles on its next cache probe.

use crate::{
	context::Context,
	source::{RenderSpec, Source},
};
use anyhow::{Result, ensure};
use std::{
	sync::Arc,
	time::{Duration, SystemTime},
};
use tilevault_cache::{LockOutcome, TileCache, lock_or_wait};
use tilevault_core::{Grid, HttpError, MetaTile, Tile, Tileset};
use tilevault_image::{crop_tile, encode};

/// Bound on wait-and-reprobe rounds. Each round can wait a full locker
/// timeout, so this only trips when peers keep failing to populate the cache.
const MAX_WAIT_ROUNDS: u32 = 3;

/// Ensures every tile in `tiles` carries data, rendering misses through the
/// tileset's source. Tiles must all belong to `tileset` on `grid`.
pub async fn fetch_tiles(ctx: &Context, tiles: &mut [Tile], tileset: &Tileset, grid: &Grid) -> Result<()> {
	let cache = ctx.runtime.cache_for(tileset);

	for tile in tiles.iter_mut() {
		probe(cache.as_ref(), tile, tileset).await?;
	}
	if tiles.iter().all(|t| t.data.is_some()) {
		return Ok(());
	}

	let Some(source) = ctx.runtime.source_for(tileset) else {
		return Err(HttpError::not_found(format!(
			"tile not found and tileset {:?} has no source",
			tileset.name
		)));
	};

	// read-only and cache-less tilesets render directly: there is no shared
	// write to serialise, so no locking either
	let Some(cache) = cache.filter(|_| !tileset.read_only) else {
		for tile in tiles.iter_mut() {
			if tile.data.is_none() {
				render_unlocked(source.as_ref(), tileset, grid, tile).await?;
			}
		}
		return Ok(());
	};

	for _round in 0..MAX_WAIT_ROUNDS {
		// one lock per distinct metatile among the still-missing tiles
		let mut metas: Vec<MetaTile> = Vec::new();
		for tile in tiles.iter().filter(|t| t.data.is_none()) {
			let meta = MetaTile::around(tile, grid, tileset.metasize, tileset.metabuffer)?;
			if !metas.iter().any(|m| m.lock_resource() == meta.lock_resource()) {
				metas.push(meta);
			}
		}
		if metas.is_empty() {
			return Ok(());
		}

		for mut meta in metas {
			let locker = ctx.runtime.locker().clone();
			match lock_or_wait(locker.as_ref(), &meta.lock_resource()).await? {
				LockOutcome::Acquired(token) => {
					let rendered = render_locked(&cache, source.as_ref(), tileset, grid, &mut meta, tiles).await;
					// write-then-release: render_locked has already written the
					// tiles when it returns Ok
					if let Err(e) = locker.release(&token).await {
						log::warn!("failed to release metatile lock: {e:#}");
					}
					rendered?;
				}
				LockOutcome::Waited => {
					// the winner populated the cache (or its lock went stale);
					// fall through to the re-probe below
				}
			}
		}

		for tile in tiles.iter_mut() {
			if tile.data.is_none() {
				probe(Some(&cache), tile, tileset).await?;
			}
		}
		if tiles.iter().all(|t| t.data.is_some()) {
			return Ok(());
		}
	}

	Err(HttpError::backend(
		"tile did not appear in the cache after waiting on its metatile lock",
	))
}

/// Cache probe honouring `auto_expire`: a hit older than the configured age
/// is treated as a miss so the pipeline re-renders it.
async fn probe(cache: Option<&Arc<dyn TileCache>>, tile: &mut Tile, tileset: &Tileset) -> Result<bool> {
	let Some(cache) = cache else {
		return Ok(false);
	};
	if !cache.tile_get(tile).await? {
		return Ok(false);
	}
	if let (Some(auto_expire), Some(mtime)) = (tileset.auto_expire, tile.mtime) {
		let age = SystemTime::now().duration_since(mtime).unwrap_or_default();
		if age > Duration::from_secs(u64::from(auto_expire)) {
			log::debug!("tile {} expired ({}s old), re-rendering", tile.cache_key(), age.as_secs());
			tile.data = None;
			tile.mtime = None;
			return Ok(false);
		}
	}
	tile.expires = tileset.expires;
	Ok(true)
}

/// Renders a metatile while its lock is held and writes every child tile.
///
/// Re-checks the cache first: another worker may have rendered between our
/// miss and our lock acquisition, in which case nothing is rendered.
async fn render_locked(
	cache: &Arc<dyn TileCache>,
	source: &dyn Source,
	tileset: &Tileset,
	grid: &Grid,
	meta: &mut MetaTile,
	requested: &mut [Tile],
) -> Result<()> {
	let mut all_present = true;
	for child in &mut meta.tiles {
		if !probe(Some(cache), child, tileset).await? {
			all_present = false;
		}
	}

	if !all_present {
		render_meta(source, tileset, grid, meta).await?;
		cache.tile_multi_set(&meta.tiles).await?;
	}

	for tile in requested.iter_mut().filter(|t| t.data.is_none()) {
		if let Some(child) = meta.tiles.iter().find(|c| c.coord == tile.coord && c.data.is_some()) {
			tile.data = child.data.clone();
			tile.mtime = child.mtime;
			tile.expires = tileset.expires;
		}
	}
	Ok(())
}

/// Asks the source for the buffered metatile image and crops it into the
/// child tiles.
async fn render_meta(source: &dyn Source, tileset: &Tileset, grid: &Grid, meta: &mut MetaTile) -> Result<()> {
	let seed_dimensions = meta.tiles.first().map(|t| t.dimensions.clone()).unwrap_or_default();
	let spec = RenderSpec {
		extent: meta.extent,
		srs: grid.srs.clone(),
		width: meta.width_px(),
		height: meta.height_px(),
		format: tileset.format,
		dimensions: seed_dimensions,
	};
	log::debug!(
		"rendering metatile {} ({}x{} px)",
		meta.lock_resource(),
		spec.width,
		spec.height
	);

	let image = source.render_map(&spec).await?;
	ensure!(
		image.width() == spec.width && image.height() == spec.height,
		"source returned a {}x{} image for a {}x{} metatile",
		image.width(),
		image.height(),
		spec.width,
		spec.height
	);

	let now = SystemTime::now();
	for i in 0..meta.tiles.len() {
		let coord = meta.tiles[i].coord;
		let (ox, oy) = meta.crop_offset(&coord)?;
		let cropped = crop_tile(&image, ox, oy, grid.tile_width, grid.tile_height)?;
		let blob = encode(&cropped, tileset.format)?;

		let child = &mut meta.tiles[i];
		child.data = Some(blob);
		child.mtime = Some(now);
		child.expires = tileset.expires;
	}
	Ok(())
}

/// Render path for read-only and cache-less tilesets: same metatile geometry,
/// but only the requested tile is kept and nothing is written back.
async fn render_unlocked(source: &dyn Source, tileset: &Tileset, grid: &Grid, tile: &mut Tile) -> Result<()> {
	let mut meta = MetaTile::around(tile, grid, tileset.metasize, tileset.metabuffer)?;
	render_meta(source, tileset, grid, &mut meta).await?;
	let child = meta
		.tiles
		.into_iter()
		.find(|c| c.coord == tile.coord)
		.ok_or_else(|| anyhow::anyhow!("rendered metatile does not contain tile {:?}", tile.coord))?;
	tile.data = child.data;
	tile.mtime = child.mtime;
	tile.expires = tileset.expires;
	Ok(())
}
