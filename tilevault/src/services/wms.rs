//! WMS KVP parser and capabilities document.
//!
//! GetMap requests are answered from the tile cache: the requested bbox and
//! size must line up with a grid level (see the pipeline's assembly step).
//! GetFeatureInfo is forwarded to the tileset's source.

use super::{FeatureInfoRequest, MapRequest, ServiceKind, ServiceRequest, query_param};
use crate::runtime::Runtime;
use anyhow::Result;
use itertools::Itertools;
use tilevault_core::HttpError;

pub fn parse(runtime: &Runtime, params: &[(String, String)]) -> Result<ServiceRequest> {
	let service = query_param(params, "SERVICE").unwrap_or("WMS");
	if !service.eq_ignore_ascii_case("WMS") {
		return Err(HttpError::bad_request(format!("unsupported service {service:?}")));
	}

	match query_param(params, "REQUEST") {
		Some(request) if request.eq_ignore_ascii_case("GetCapabilities") => Ok(ServiceRequest::GetCapabilities {
			service: ServiceKind::Wms,
		}),
		Some(request) if request.eq_ignore_ascii_case("GetMap") => Ok(ServiceRequest::GetMap(parse_map(runtime, params)?)),
		Some(request) if request.eq_ignore_ascii_case("GetFeatureInfo") => {
			let map = parse_map(runtime, params)?;
			let i = parse_num(params, "X").or_else(|_| parse_num(params, "I"))?;
			let j = parse_num(params, "Y").or_else(|_| parse_num(params, "J"))?;
			Ok(ServiceRequest::GetFeatureInfo(FeatureInfoRequest {
				map,
				i,
				j,
				info_format: query_param(params, "INFO_FORMAT").unwrap_or("text/plain").to_string(),
			}))
		}
		Some(other) => Err(HttpError::bad_request(format!("unsupported wms request {other:?}"))),
		None => Err(HttpError::bad_request("missing REQUEST parameter")),
	}
}

fn parse_num(params: &[(String, String)], name: &str) -> Result<u32> {
	query_param(params, name)
		.ok_or_else(|| HttpError::bad_request(format!("missing {name} parameter")))?
		.parse()
		.map_err(|_| HttpError::bad_request(format!("invalid {name} parameter")))
}

fn parse_map(runtime: &Runtime, params: &[(String, String)]) -> Result<MapRequest> {
	let layers = query_param(params, "LAYERS").ok_or_else(|| HttpError::bad_request("missing LAYERS parameter"))?;
	let layer = layers
		.split(',')
		.next()
		.filter(|l| !l.is_empty())
		.ok_or_else(|| HttpError::bad_request("empty LAYERS parameter"))?;
	let tileset = runtime.tileset(layer)?.clone();

	let srs = query_param(params, "SRS")
		.or_else(|| query_param(params, "CRS"))
		.ok_or_else(|| HttpError::bad_request("missing SRS parameter"))?;

	// pick the tileset grid whose srs matches the request
	let grid_name = tileset
		.grids
		.iter()
		.find(|name| {
			runtime
				.grid(name)
				.is_ok_and(|grid| grid.srs.eq_ignore_ascii_case(srs))
		})
		.ok_or_else(|| {
			HttpError::bad_request(format!("tileset {:?} is not available in srs {srs:?}", tileset.name))
		})?
		.clone();

	let bbox_text = query_param(params, "BBOX").ok_or_else(|| HttpError::bad_request("missing BBOX parameter"))?;
	let bbox_values: Vec<f64> = bbox_text
		.split(',')
		.map(|v| v.trim().parse::<f64>())
		.collect::<Result<_, _>>()
		.map_err(|_| HttpError::bad_request(format!("invalid BBOX {bbox_text:?}")))?;
	if bbox_values.len() != 4 || bbox_values[0] >= bbox_values[2] || bbox_values[1] >= bbox_values[3] {
		return Err(HttpError::bad_request(format!("invalid BBOX {bbox_text:?}")));
	}

	let width = parse_num(params, "WIDTH")?;
	let height = parse_num(params, "HEIGHT")?;
	if width == 0 || height == 0 || width > 8192 || height > 8192 {
		return Err(HttpError::bad_request("WIDTH/HEIGHT out of range"));
	}

	// any remaining parameter matching a dimension schema entry is a dimension
	let requested: Vec<(String, String)> = tileset
		.dimensions
		.iter()
		.filter_map(|schema| {
			query_param(params, &schema.name).map(|value| (schema.name.clone(), value.to_string()))
		})
		.collect();
	let dimensions = tileset.resolve_dimensions(&requested)?;

	Ok(MapRequest {
		tileset: tileset.name.clone(),
		grid: grid_name,
		bbox: [bbox_values[0], bbox_values[1], bbox_values[2], bbox_values[3]],
		width,
		height,
		dimensions,
	})
}

/// A minimal WMS capabilities document.
#[must_use]
pub fn wms_capabilities(runtime: &Runtime, base_url: &str) -> String {
	let layers = runtime
		.tileset_names()
		.iter()
		.filter_map(|name| runtime.tileset(name).ok())
		.map(|tileset| {
			let srs = tileset
				.grids
				.iter()
				.filter_map(|grid| runtime.grid(grid).ok())
				.map(|grid| format!("      <SRS>{}</SRS>", grid.srs))
				.join("\n");
			format!("   <Layer queryable=\"1\">\n      <Name>{}</Name>\n{srs}\n   </Layer>", tileset.name)
		})
		.join("\n");

	format!(
		"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<WMT_MS_Capabilities version=\"1.1.1\">\n<Capability>\n<Request><GetMap><DCPType><HTTP><Get><OnlineResource xlink:href=\"{base_url}/wms?\"/></Get></HTTP></DCPType></GetMap></Request>\n{layers}\n</Capability>\n</WMT_MS_Capabilities>"
	)
}
