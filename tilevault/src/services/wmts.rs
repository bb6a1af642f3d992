//! WMTS RESTful parser and capabilities document.
//!
//! Tile URL shape:
//! `/wmts/1.0.0/{layer}/{style}[/{dim}...]/{TileMatrixSet}/{TileMatrix}/{TileRow}/{TileCol}.{ext}`
//!
//! WMTS numbers rows from the top of the grid, so the row is flipped for
//! bottom-left-origin grids.

use super::{ServiceKind, ServiceRequest, TileRequest, parse_u32, split_extension};
use crate::runtime::Runtime;
use anyhow::Result;
use itertools::Itertools;
use tilevault_core::{GridOrigin, HttpError, TileCoord};

pub fn parse(runtime: &Runtime, segments: &[&str]) -> Result<ServiceRequest> {
	let Some((&version, rest)) = segments.split_first() else {
		return Err(HttpError::bad_request("missing wmts version"));
	};
	if version != "1.0.0" {
		return Err(HttpError::bad_request(format!("unsupported wmts version {version:?}")));
	}

	if rest == ["WMTSCapabilities.xml"] {
		return Ok(ServiceRequest::GetCapabilities {
			service: ServiceKind::Wmts,
		});
	}

	// layer / style / dims... / grid / z / row / col.ext
	if rest.len() < 6 {
		return Err(HttpError::bad_request("malformed wmts tile path"));
	}
	let layer = rest[0];
	let tileset = runtime.tileset(layer)?.clone();
	let _style = rest[1];

	let dimension_count = tileset.dimensions.len();
	if rest.len() != 6 + dimension_count {
		return Err(HttpError::bad_request(format!(
			"wmts tile path for layer {layer:?} needs {dimension_count} dimension value(s)"
		)));
	}
	let dimension_values = &rest[2..2 + dimension_count];
	let requested: Vec<(String, String)> = tileset
		.dimensions
		.iter()
		.zip(dimension_values)
		.map(|(schema, value)| (schema.name.clone(), (*value).to_string()))
		.collect();
	let dimensions = tileset.resolve_dimensions(&requested)?;

	let grid_name = rest[2 + dimension_count];
	let grid = runtime.grid_for(&tileset, grid_name)?.clone();

	let z = parse_u32(rest[3 + dimension_count], "tile matrix")?;
	let row = parse_u32(rest[4 + dimension_count], "tile row")?;
	let col = parse_u32(split_extension(rest[5 + dimension_count], tileset.format.extension())?, "tile col")?;

	if z > u32::from(grid.max_zoom()) {
		return Err(HttpError::bad_request(format!("tile matrix {z} exceeds grid depth")));
	}
	let z = z as u8;
	let (limit_x, limit_y) = grid.level_limits(z)?;
	if col >= limit_x || row >= limit_y {
		return Err(HttpError::bad_request(format!(
			"tile ({z},{row},{col}) is outside the grid"
		)));
	}

	let y = match grid.origin {
		GridOrigin::BottomLeft => limit_y - 1 - row,
		GridOrigin::TopLeft => row,
	};

	Ok(ServiceRequest::GetTile(TileRequest {
		tileset: tileset.name.clone(),
		grid: grid.name.clone(),
		coord: TileCoord::new(z, col, y)?,
		dimensions,
	}))
}

/// A minimal WMTS capabilities document, built from config and the base URL.
#[must_use]
pub fn wmts_capabilities(runtime: &Runtime, base_url: &str) -> String {
	let layers = runtime
		.tileset_names()
		.iter()
		.filter_map(|name| runtime.tileset(name).ok())
		.map(|tileset| {
			let grids = tileset
				.grids
				.iter()
				.map(|grid| format!("      <TileMatrixSetLink><TileMatrixSet>{grid}</TileMatrixSet></TileMatrixSetLink>"))
				.join("\n");
			format!(
				"   <Layer>\n      <ows:Identifier>{}</ows:Identifier>\n      <Format>{}</Format>\n{grids}\n      <ResourceURL format=\"{}\" resourceType=\"tile\" template=\"{base_url}/wmts/1.0.0/{}/default/{{TileMatrixSet}}/{{TileMatrix}}/{{TileRow}}/{{TileCol}}.{}\"/>\n   </Layer>",
				tileset.name,
				tileset.format.mime(),
				tileset.format.mime(),
				tileset.name,
				tileset.format.extension()
			)
		})
		.join("\n");

	format!(
		"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<Capabilities xmlns=\"http://www.opengis.net/wmts/1.0\" xmlns:ows=\"http://www.opengis.net/ows/1.1\" version=\"1.0.0\">\n<Contents>\n{layers}\n</Contents>\n</Capabilities>"
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use rstest::rstest;
	use tilevault_cache::{BackendPools, PoolConfig};
	use tilevault_core::config::Config;

	fn runtime() -> Runtime {
		let config = Config::from_string(
			r#"
			<mapcache>
			   <cache name="mem" type="memory"/>
			   <tileset name="l1">
			      <cache>mem</cache>
			      <grid>GoogleMapsCompatible</grid>
			      <format>PNG</format>
			   </tileset>
			</mapcache>"#,
		)
		.unwrap();
		Runtime::from_config(&config, &BackendPools::new(PoolConfig::default())).unwrap()
	}

	#[test]
	fn tile_path_parses_and_flips_rows() {
		let rt = runtime();
		// zoom 3 has 8 rows; wmts row 5 = grid y 2 on a bottom-left grid
		let request = parse(&rt, &["1.0.0", "l1", "default", "GoogleMapsCompatible", "3", "5", "2.png"]).unwrap();
		let ServiceRequest::GetTile(tile) = request else {
			panic!("expected a tile request");
		};
		assert_eq!(tile.tileset, "l1");
		assert_eq!(tile.coord, TileCoord::new(3, 2, 2).unwrap());
	}

	#[test]
	fn capabilities_path() {
		let rt = runtime();
		let request = parse(&rt, &["1.0.0", "WMTSCapabilities.xml"]).unwrap();
		assert!(matches!(request, ServiceRequest::GetCapabilities { .. }));
	}

	#[test]
	fn unknown_layer_is_404() {
		let rt = runtime();
		let err = parse(&rt, &["1.0.0", "nope", "default", "GoogleMapsCompatible", "3", "5", "2.png"]).unwrap_err();
		assert_eq!(tilevault_core::error_status(&err), 404);
	}

	#[rstest]
	#[case::row_out_of_range(["1.0.0", "l1", "default", "GoogleMapsCompatible", "3", "99", "2.png"])]
	#[case::bad_zoom(["1.0.0", "l1", "default", "GoogleMapsCompatible", "xx", "5", "2.png"])]
	#[case::wrong_extension(["1.0.0", "l1", "default", "GoogleMapsCompatible", "3", "5", "2.gif"])]
	#[case::too_deep(["1.0.0", "l1", "default", "GoogleMapsCompatible", "25", "0", "0.png"])]
	fn bad_coordinates_are_400(#[case] path: [&str; 7]) {
		let err = parse(&runtime(), &path).unwrap_err();
		assert_eq!(tilevault_core::error_status(&err), 400, "path {path:?}");
	}

	#[test]
	fn capabilities_document_lists_layers() {
		let rt = runtime();
		let doc = wmts_capabilities(&rt, "http://localhost:8080/mapcache");
		assert!(doc.contains("<ows:Identifier>l1</ows:Identifier>"));
		assert!(doc.contains("http://localhost:8080/mapcache/wmts/1.0.0/l1/default/"));
		assert!(doc.contains("image/png"));
	}
}
