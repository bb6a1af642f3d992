//! Service parsers: URL/KVP in, [`ServiceRequest`] out.
//!
//! Every protocol front-end reduces to the same small request model; the
//! pipeline only ever sees [`ServiceRequest`]. Proxy forwarding rules are
//! checked before service dispatch, so a rule can shadow any path.

mod tms;
mod wms;
mod wmts;

pub use tms::tms_capabilities;
pub use wms::wms_capabilities;
pub use wmts::wmts_capabilities;

use crate::runtime::Runtime;
use anyhow::Result;
use percent_encoding::percent_decode_str;
use tilevault_core::{HttpError, TileCoord, config::ForwardingRuleConf};

/// The parsed request, one of the five shapes the pipeline handles.
#[derive(Debug)]
pub enum ServiceRequest {
	GetCapabilities { service: ServiceKind },
	GetTile(TileRequest),
	GetMap(MapRequest),
	GetFeatureInfo(FeatureInfoRequest),
	Proxy(ProxyRequest),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceKind {
	Wmts,
	Tms,
	Wms,
}

impl ServiceKind {
	#[must_use]
	pub fn as_str(&self) -> &'static str {
		match self {
			ServiceKind::Wmts => "wmts",
			ServiceKind::Tms => "tms",
			ServiceKind::Wms => "wms",
		}
	}
}

#[derive(Debug)]
pub struct TileRequest {
	pub tileset: String,
	pub grid: String,
	pub coord: TileCoord,
	pub dimensions: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct MapRequest {
	pub tileset: String,
	pub grid: String,
	pub bbox: [f64; 4],
	pub width: u32,
	pub height: u32,
	pub dimensions: Vec<(String, String)>,
}

#[derive(Debug)]
pub struct FeatureInfoRequest {
	pub map: MapRequest,
	pub i: u32,
	pub j: u32,
	pub info_format: String,
}

#[derive(Debug)]
pub struct ProxyRequest {
	pub rule: ForwardingRuleConf,
	/// Path below the rule prefix, forwarded verbatim.
	pub path: String,
	pub query: String,
}

/// Splits and percent-decodes a raw query string into KVP pairs.
#[must_use]
pub fn parse_query(query: &str) -> Vec<(String, String)> {
	query
		.split('&')
		.filter(|part| !part.is_empty())
		.map(|part| {
			let (key, value) = part.split_once('=').unwrap_or((part, ""));
			(
				percent_decode_str(key).decode_utf8_lossy().to_string(),
				percent_decode_str(&value.replace('+', " "))
					.decode_utf8_lossy()
					.to_string(),
			)
		})
		.collect()
}

/// Case-insensitive KVP lookup (WMS parameters are case-insensitive).
#[must_use]
pub fn query_param<'a>(params: &'a [(String, String)], name: &str) -> Option<&'a str> {
	params
		.iter()
		.find(|(key, _)| key.eq_ignore_ascii_case(name))
		.map(|(_, value)| value.as_str())
}

/// Routes path-info to a forwarding rule or a service parser.
pub fn parse_request(runtime: &Runtime, path_info: &str, query: &str) -> Result<ServiceRequest> {
	// forwarding rules shadow services
	for rule in runtime.forwarding_rules() {
		if let Some(rest) = path_info.strip_prefix(rule.prefix.as_str()) {
			// match whole path components only
			if rest.is_empty() || rest.starts_with('/') {
				return Ok(ServiceRequest::Proxy(ProxyRequest {
					rule: rule.clone(),
					path: rest.to_string(),
					query: query.to_string(),
				}));
			}
		}
	}

	let segments: Vec<&str> = path_info.split('/').filter(|s| !s.is_empty()).collect();
	let Some((&service, rest)) = segments.split_first() else {
		return Err(HttpError::not_found("no service specified"));
	};

	let ensure_enabled = |kind: ServiceKind| -> Result<()> {
		if runtime.service_enabled(kind.as_str()) {
			Ok(())
		} else {
			Err(HttpError::not_found(format!("service {:?} is not enabled", kind.as_str())))
		}
	};

	match service {
		"wmts" => {
			ensure_enabled(ServiceKind::Wmts)?;
			wmts::parse(runtime, rest)
		}
		"tms" => {
			ensure_enabled(ServiceKind::Tms)?;
			tms::parse(runtime, rest)
		}
		"wms" => {
			ensure_enabled(ServiceKind::Wms)?;
			wms::parse(runtime, &parse_query(query))
		}
		other => Err(HttpError::not_found(format!("unknown service {other:?}"))),
	}
}

/// Splits `"name.ext"` and checks the extension against the tileset format.
pub(crate) fn split_extension<'a>(segment: &'a str, expected_ext: &str) -> Result<&'a str> {
	match segment.rsplit_once('.') {
		Some((stem, ext)) => {
			if ext.eq_ignore_ascii_case(expected_ext) || (ext.eq_ignore_ascii_case("jpeg") && expected_ext == "jpg") {
				Ok(stem)
			} else {
				Err(HttpError::bad_request(format!(
					"unsupported extension {ext:?} (tileset serves {expected_ext:?})"
				)))
			}
		}
		None => Ok(segment),
	}
}

pub(crate) fn parse_u32(value: &str, what: &str) -> Result<u32> {
	value
		.parse()
		.map_err(|_| HttpError::bad_request(format!("invalid {what} {value:?}")))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn query_parsing_decodes_and_splits() {
		let params = parse_query("SERVICE=WMS&BBOX=0%2C1%2C2%2C3&EMPTY&X=a+b");
		assert_eq!(query_param(&params, "service"), Some("WMS"));
		assert_eq!(query_param(&params, "bbox"), Some("0,1,2,3"));
		assert_eq!(query_param(&params, "empty"), Some(""));
		assert_eq!(query_param(&params, "x"), Some("a b"));
		assert_eq!(query_param(&params, "missing"), None);
	}

	#[test]
	fn extension_check() {
		assert_eq!(split_extension("5.png", "png").unwrap(), "5");
		assert_eq!(split_extension("5.JPEG", "jpg").unwrap(), "5");
		assert_eq!(split_extension("5", "png").unwrap(), "5");
		assert!(split_extension("5.gif", "png").is_err());
	}
}
