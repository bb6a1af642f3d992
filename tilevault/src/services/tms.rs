//! TMS parser and capabilities document.
//!
//! Tile URL shape: `/tms/1.0.0/{layer}[@{grid}]/{z}/{x}/{y}.{ext}`; TMS counts
//! rows from the bottom, which matches grid coordinates directly.

use super::{ServiceKind, ServiceRequest, TileRequest, parse_u32, split_extension};
use crate::runtime::Runtime;
use anyhow::Result;
use itertools::Itertools;
use tilevault_core::{HttpError, TileCoord};

pub fn parse(runtime: &Runtime, segments: &[&str]) -> Result<ServiceRequest> {
	let Some((&version, rest)) = segments.split_first() else {
		return Ok(ServiceRequest::GetCapabilities {
			service: ServiceKind::Tms,
		});
	};
	if version != "1.0.0" {
		return Err(HttpError::bad_request(format!("unsupported tms version {version:?}")));
	}

	if rest.is_empty() {
		return Ok(ServiceRequest::GetCapabilities {
			service: ServiceKind::Tms,
		});
	}

	if rest.len() != 4 {
		return Err(HttpError::bad_request("malformed tms tile path"));
	}

	let (layer, grid_name) = match rest[0].split_once('@') {
		Some((layer, grid)) => (layer, Some(grid)),
		None => (rest[0], None),
	};
	let tileset = runtime.tileset(layer)?.clone();
	let grid_name = grid_name
		.map(str::to_string)
		.or_else(|| tileset.grids.first().cloned())
		.ok_or_else(|| HttpError::bad_request(format!("tileset {layer:?} has no grids")))?;
	let grid = runtime.grid_for(&tileset, &grid_name)?.clone();

	let z = parse_u32(rest[1], "zoom")?;
	let x = parse_u32(rest[2], "x")?;
	let y = parse_u32(split_extension(rest[3], tileset.format.extension())?, "y")?;

	if z > u32::from(grid.max_zoom()) {
		return Err(HttpError::bad_request(format!("zoom {z} exceeds grid depth")));
	}
	let coord = TileCoord::new(z as u8, x, y)?;
	if !grid.contains(&coord) {
		return Err(HttpError::bad_request(format!("tile {coord:?} is outside the grid")));
	}

	Ok(ServiceRequest::GetTile(TileRequest {
		tileset: tileset.name.clone(),
		grid: grid.name.clone(),
		coord,
		dimensions: tileset.default_dimensions(),
	}))
}

/// The TMS service document: one `TileMap` entry per (tileset, grid) pair.
#[must_use]
pub fn tms_capabilities(runtime: &Runtime, base_url: &str) -> String {
	let maps = runtime
		.tileset_names()
		.iter()
		.filter_map(|name| runtime.tileset(name).ok())
		.flat_map(|tileset| {
			tileset
				.grids
				.iter()
				.map(|grid| {
					format!(
						"   <TileMap title=\"{}\" srs=\"{}\" href=\"{base_url}/tms/1.0.0/{}@{grid}\"/>",
						tileset.name,
						runtime.grid(grid).map(|g| g.srs.clone()).unwrap_or_default(),
						tileset.name
					)
				})
				.collect::<Vec<_>>()
		})
		.join("\n");

	format!(
		"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<TileMapService version=\"1.0.0\">\n<TileMaps>\n{maps}\n</TileMaps>\n</TileMapService>"
	)
}
