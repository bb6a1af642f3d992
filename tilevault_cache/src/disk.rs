//! Filesystem cache backend.
//!
//! Tiles are laid out as `{base}/{tileset}/{grid}[/{dims}]/{z}/{x}/{y}.{ext}`
//! unless an explicit `<template>` overrides the layout. Writes go through a
//! sibling temp file plus rename so that concurrent readers never observe a
//! half-written tile; `Last-Modified` comes from the file's mtime.

use crate::TileCache;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::{
	fs,
	io::ErrorKind,
	path::{Path, PathBuf},
};
use tilevault_core::{Blob, Tile};

pub struct DiskCache {
	name: String,
	base: PathBuf,
	template: Option<String>,
}

impl DiskCache {
	pub fn new(name: &str, base: &Path, template: Option<String>) -> DiskCache {
		DiskCache {
			name: name.to_string(),
			base: base.to_path_buf(),
			template,
		}
	}

	/// Filesystem location for a tile.
	pub fn tile_path(&self, tile: &Tile) -> PathBuf {
		if let Some(template) = &self.template {
			let mut path = template.clone();
			for (token, value) in [
				("{tileset}", tile.tileset.clone()),
				("{grid}", tile.grid.clone()),
				("{dims}", tile.dimension_path()),
				("{z}", tile.coord.z.to_string()),
				("{x}", tile.coord.x.to_string()),
				("{y}", tile.coord.y.to_string()),
				("{ext}", tile.format.extension().to_string()),
			] {
				path = path.replace(token, &value);
			}
			return self.base.join(path);
		}

		let mut path = self.base.join(&tile.tileset).join(&tile.grid);
		for (_, v) in &tile.dimensions {
			path = path.join(v);
		}
		path
			.join(tile.coord.z.to_string())
			.join(tile.coord.x.to_string())
			.join(format!("{}.{}", tile.coord.y, tile.format.extension()))
	}
}

#[async_trait]
impl TileCache for DiskCache {
	fn name(&self) -> &str {
		&self.name
	}

	async fn tile_get(&self, tile: &mut Tile) -> Result<bool> {
		let path = self.tile_path(tile);
		match fs::read(&path) {
			Ok(data) => {
				tile.mtime = fs::metadata(&path).and_then(|m| m.modified()).ok();
				tile.data = Some(Blob::from(data));
				Ok(true)
			}
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
			Err(e) => Err(e).with_context(|| format!("disk cache {:?}: reading {path:?}", self.name)),
		}
	}

	async fn tile_set(&self, tile: &Tile) -> Result<()> {
		let data = tile
			.data
			.as_ref()
			.with_context(|| format!("disk cache {:?}: tile {} has no data", self.name, tile.cache_key()))?;
		let path = self.tile_path(tile);
		let parent = path
			.parent()
			.with_context(|| format!("tile path {path:?} has no parent"))?;
		fs::create_dir_all(parent)?;

		// temp + rename keeps concurrent readers off partial writes
		let tmp = path.with_extension("tmp");
		fs::write(&tmp, data.as_slice())
			.with_context(|| format!("disk cache {:?}: writing {tmp:?}", self.name))?;
		fs::rename(&tmp, &path).with_context(|| format!("disk cache {:?}: renaming into {path:?}", self.name))?;
		Ok(())
	}

	async fn tile_exists(&self, tile: &Tile) -> Result<bool> {
		Ok(self.tile_path(tile).exists())
	}

	async fn tile_delete(&self, tile: &Tile) -> Result<()> {
		match fs::remove_file(self.tile_path(tile)) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e).with_context(|| format!("disk cache {:?}: deleting tile", self.name)),
		}
	}
}

impl std::fmt::Debug for DiskCache {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("DiskCache")
			.field("name", &self.name)
			.field("base", &self.base)
			.finish()
	}
}
