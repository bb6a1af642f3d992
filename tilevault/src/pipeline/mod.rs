//! The tile request pipeline: a parsed [`ServiceRequest`] in, an
//! [`HttpResponse`] out.
//!
//! Control flow per request: cache lookup → (hit ⇒ respond) | (miss ⇒ acquire
//! metatile lock → re-check cache → render → write tiles → release lock →
//! respond). Proxy requests never reach this module; the HTTP layer forwards
//! them directly because they need the raw request body.

mod fetch;

pub use fetch::fetch_tiles;

use crate::{
	context::Context,
	response::HttpResponse,
	services::{
		FeatureInfoRequest, MapRequest, ServiceKind, ServiceRequest, TileRequest, tms_capabilities, wms_capabilities,
		wmts_capabilities,
	},
	source::RenderSpec,
};
use anyhow::Result;
use tilevault_core::{Blob, Grid, GridOrigin, HttpError, Tile, TileCoord};
use tilevault_image::{compose, decode, encode};

/// Handles everything except proxying, converting errors into responses.
pub async fn handle_request(ctx: &Context, request: ServiceRequest) -> HttpResponse {
	match dispatch(ctx, request).await {
		Ok(response) => response,
		Err(err) => HttpResponse::from_error(&err),
	}
}

async fn dispatch(ctx: &Context, request: ServiceRequest) -> Result<HttpResponse> {
	match request {
		ServiceRequest::GetCapabilities { service } => {
			let base_url = ctx.request.base_url.as_str();
			let doc = match service {
				ServiceKind::Wmts => wmts_capabilities(&ctx.runtime, base_url),
				ServiceKind::Tms => tms_capabilities(&ctx.runtime, base_url),
				ServiceKind::Wms => wms_capabilities(&ctx.runtime, base_url),
			};
			Ok(HttpResponse::ok("text/xml", Blob::from(doc)))
		}
		ServiceRequest::GetTile(request) => get_tile(ctx, request).await,
		ServiceRequest::GetMap(request) => get_map(ctx, request).await,
		ServiceRequest::GetFeatureInfo(request) => get_feature_info(ctx, request).await,
		ServiceRequest::Proxy(_) => Err(HttpError::backend("proxy requests must not reach the tile pipeline")),
	}
}

async fn get_tile(ctx: &Context, request: TileRequest) -> Result<HttpResponse> {
	let tileset = ctx.runtime.tileset(&request.tileset)?.clone();
	let grid = ctx.runtime.grid_for(&tileset, &request.grid)?.clone();

	let mut tile = Tile::new(&tileset.name, &grid.name, request.coord)
		.with_dimensions(request.dimensions)
		.with_format(tileset.format);

	fetch_tiles(ctx, std::slice::from_mut(&mut tile), &tileset, &grid).await?;

	if tile.nodata {
		return Err(HttpError::not_found(format!("tile {} has no data", tile.cache_key())));
	}
	let data = tile
		.data
		.take()
		.ok_or_else(|| HttpError::not_found(format!("tile {} not found", tile.cache_key())))?;
	let mut response = HttpResponse::ok(tileset.format.mime(), data);
	response.mtime = tile.mtime;
	response.expires = tileset.expires;
	Ok(response)
}

/// Assembles a GetMap response from cached tiles.
///
/// The request must line up with the grid: its resolution must match a zoom
/// level and its bbox must fall on tile boundaries. Resampling arbitrary
/// extents is a renderer's job, not a cache's.
async fn get_map(ctx: &Context, request: MapRequest) -> Result<HttpResponse> {
	let tileset = ctx.runtime.tileset(&request.tileset)?.clone();
	let grid = ctx.runtime.grid_for(&tileset, &request.grid)?.clone();

	let z = matching_zoom(&grid, &request)?;
	let res = grid.resolution(z)?;
	let step_x = res * f64::from(grid.tile_width);
	let step_y = res * f64::from(grid.tile_height);

	let x0 = aligned_index(request.bbox[0] - grid.extent[0], step_x, "BBOX minx")?;
	let x1 = aligned_index(request.bbox[2] - grid.extent[0], step_x, "BBOX maxx")?;
	let (y0, y1) = match grid.origin {
		GridOrigin::BottomLeft => (
			aligned_index(request.bbox[1] - grid.extent[1], step_y, "BBOX miny")?,
			aligned_index(request.bbox[3] - grid.extent[1], step_y, "BBOX maxy")?,
		),
		GridOrigin::TopLeft => (
			aligned_index(grid.extent[3] - request.bbox[3], step_y, "BBOX maxy")?,
			aligned_index(grid.extent[3] - request.bbox[1], step_y, "BBOX miny")?,
		),
	};
	if x1 <= x0 || y1 <= y0 {
		return Err(HttpError::bad_request("BBOX covers no tiles"));
	}

	let mut tiles = Vec::new();
	for ty in y0..y1 {
		for tx in x0..x1 {
			let coord = TileCoord::new(z, tx, ty)?;
			if !grid.contains(&coord) {
				return Err(HttpError::bad_request(format!("tile {coord:?} is outside the grid")));
			}
			tiles.push(
				Tile::new(&tileset.name, &grid.name, coord)
					.with_dimensions(request.dimensions.clone())
					.with_format(tileset.format),
			);
		}
	}

	fetch_tiles(ctx, &mut tiles, &tileset, &grid).await?;

	let mtime = tiles.iter().filter_map(|t| t.mtime).max();

	// single-tile requests get the cached blob verbatim
	let body = if tiles.len() == 1 && !tiles[0].nodata {
		tiles[0]
			.data
			.take()
			.ok_or_else(|| HttpError::backend("fetched tile has no data"))?
	} else {
		let mut placed = Vec::with_capacity(tiles.len());
		for tile in &tiles {
			// blank-tile markers stay transparent in the composition
			if tile.nodata {
				continue;
			}
			let data = tile
				.data
				.as_ref()
				.ok_or_else(|| HttpError::backend("fetched tile has no data"))?;
			let image = decode(data, tileset.format)?;
			let ox = i64::from(tile.coord.x - x0) * i64::from(grid.tile_width);
			let row_from_top = match grid.origin {
				GridOrigin::BottomLeft => y1 - 1 - tile.coord.y,
				GridOrigin::TopLeft => tile.coord.y - y0,
			};
			let oy = i64::from(row_from_top) * i64::from(grid.tile_height);
			placed.push((image, ox, oy));
		}
		let map = compose(request.width, request.height, &placed);
		encode(&map, tileset.format)?
	};

	let mut response = HttpResponse::ok(tileset.format.mime(), body);
	response.mtime = mtime;
	response.expires = tileset.expires;
	Ok(response)
}

async fn get_feature_info(ctx: &Context, request: FeatureInfoRequest) -> Result<HttpResponse> {
	let tileset = ctx.runtime.tileset(&request.map.tileset)?.clone();
	let grid = ctx.runtime.grid_for(&tileset, &request.map.grid)?.clone();
	let source = ctx
		.runtime
		.source_for(&tileset)
		.ok_or_else(|| HttpError::bad_request(format!("tileset {:?} is not queryable", tileset.name)))?;

	let spec = RenderSpec {
		extent: request.map.bbox,
		srs: grid.srs.clone(),
		width: request.map.width,
		height: request.map.height,
		format: tileset.format,
		dimensions: request.map.dimensions.clone(),
	};
	let (body, mime) = source
		.feature_info(&spec, request.i, request.j, &request.info_format)
		.await?;
	Ok(HttpResponse::ok(&mime, body))
}

/// The zoom level whose resolution matches the request, or 400.
fn matching_zoom(grid: &Grid, request: &MapRequest) -> Result<u8> {
	let res_x = (request.bbox[2] - request.bbox[0]) / f64::from(request.width);
	let res_y = (request.bbox[3] - request.bbox[1]) / f64::from(request.height);
	if ((res_x - res_y) / res_x).abs() > 1e-6 {
		return Err(HttpError::bad_request("non-square pixels are not supported"));
	}
	grid
		.resolutions
		.iter()
		.position(|r| ((r - res_x) / r).abs() < 1e-6)
		.map(|z| z as u8)
		.ok_or_else(|| HttpError::bad_request("requested resolution does not match any grid level"))
}

/// Snaps an offset to a whole number of tiles, or 400 when it is not aligned.
fn aligned_index(offset: f64, step: f64, what: &str) -> Result<u32> {
	let index = offset / step;
	let rounded = index.round();
	if (index - rounded).abs() > 1e-6 || rounded < 0.0 {
		return Err(HttpError::bad_request(format!("{what} is not aligned to the tile grid")));
	}
	Ok(rounded as u32)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tilevault_core::Grid;

	fn map_request(bbox: [f64; 4], width: u32, height: u32) -> MapRequest {
		MapRequest {
			tileset: "l1".to_string(),
			grid: "GoogleMapsCompatible".to_string(),
			bbox,
			width,
			height,
			dimensions: Vec::new(),
		}
	}

	#[test]
	fn zoom_matching_accepts_exact_levels() {
		let grid = Grid::google_maps_compatible();
		// zoom 2 tile: 4x4 world, one tile is a quarter; 256px at res[2]
		let half = 20037508.3427892;
		let request = map_request([-half, -half, 0.0, 0.0], 512, 512);
		assert_eq!(matching_zoom(&grid, &request).unwrap(), 2);
	}

	#[test]
	fn zoom_matching_rejects_odd_resolutions() {
		let grid = Grid::google_maps_compatible();
		let request = map_request([0.0, 0.0, 12345.0, 12345.0], 256, 256);
		assert!(matching_zoom(&grid, &request).is_err());
	}

	#[test]
	fn alignment_check() {
		assert_eq!(aligned_index(512.0, 256.0, "x").unwrap(), 2);
		assert!(aligned_index(300.0, 256.0, "x").is_err());
	}
}
