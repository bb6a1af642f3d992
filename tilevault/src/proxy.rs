//! Proxy subsystem: forwards matched requests to a configured upstream.
//!
//! The POST body is bounded by the rule's `max_post_len`; an oversized body
//! is rejected with 413 before the upstream is contacted. `X-Forwarded-*`
//! headers are extended comma-style when already present.

use crate::{context::Context, response::HttpResponse, services::ProxyRequest};
use anyhow::Result;
use axum::http::{HeaderMap, Method};
use bytes::Bytes;
use tilevault_core::{Blob, HttpError};

/// Checks the declared `Content-Length` against the rule limit. Called
/// before the body is read so oversized uploads fail without buffering.
pub fn check_content_length(headers: &HeaderMap, max_post_len: usize) -> Result<()> {
	if let Some(length) = headers
		.get(axum::http::header::CONTENT_LENGTH)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.parse::<usize>().ok())
	{
		if length > max_post_len {
			return Err(HttpError::payload_too_large("post request too big"));
		}
	}
	Ok(())
}

/// Builds the outgoing `X-Forwarded-*` headers, comma-appending to any the
/// client already sent.
pub fn forwarded_headers(ctx: &Context, incoming: &HeaderMap) -> Vec<(&'static str, String)> {
	let mut headers = Vec::new();

	if let Some(client_ip) = &ctx.request.client_ip {
		let value = match incoming.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
			Some(existing) => format!("{existing}, {client_ip}"),
			None => client_ip.clone(),
		};
		headers.push(("x-forwarded-for", value));
	}

	if let Some(host) = &ctx.request.host {
		let value = match incoming.get("x-forwarded-host").and_then(|v| v.to_str().ok()) {
			Some(existing) => format!("{existing}, {host}"),
			None => host.clone(),
		};
		headers.push(("x-forwarded-host", value));
	}

	let server = &ctx.request.server_name;
	let value = match incoming.get("x-forwarded-server").and_then(|v| v.to_str().ok()) {
		Some(existing) => format!("{existing}, {server}"),
		None => server.clone(),
	};
	headers.push(("x-forwarded-server", value));

	headers
}

/// Forwards the request to the rule's upstream and relays the response.
pub async fn forward(
	ctx: &Context,
	request: &ProxyRequest,
	method: &Method,
	incoming_headers: &HeaderMap,
	body: Bytes,
) -> Result<HttpResponse> {
	if body.len() > request.rule.max_post_len() {
		return Err(HttpError::payload_too_large("post request too big"));
	}

	let mut url = format!("{}{}", request.rule.http.url, request.path);
	if !request.query.is_empty() {
		url.push('?');
		url.push_str(&request.query);
	}

	let client = reqwest::Client::new();
	let mut upstream = if *method == Method::POST {
		client.post(&url).body(body.to_vec())
	} else {
		client.get(&url)
	};

	for (name, value) in forwarded_headers(ctx, incoming_headers) {
		upstream = upstream.header(name, value);
	}
	if let Some(content_type) = incoming_headers.get(axum::http::header::CONTENT_TYPE) {
		if let Ok(value) = content_type.to_str() {
			upstream = upstream.header("content-type", value);
		}
	}

	let response = upstream
		.send()
		.await
		.map_err(|e| HttpError::upstream(format!("proxy rule {:?}: upstream request failed: {e}", request.rule.name)))?;

	let status = response.status().as_u16();
	let content_type = response
		.headers()
		.get(reqwest::header::CONTENT_TYPE)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string);
	let bytes = response
		.bytes()
		.await
		.map_err(|e| HttpError::upstream(format!("proxy rule {:?}: reading upstream body failed: {e}", request.rule.name)))?;

	Ok(HttpResponse {
		status,
		content_type,
		body: Blob::from(bytes.to_vec()),
		mtime: None,
		expires: None,
		extra_headers: Vec::new(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::{context::RequestMeta, runtime::Runtime};
	use std::sync::Arc;
	use tilevault_cache::{BackendPools, PoolConfig};
	use tilevault_core::{config::Config, error_status};

	fn ctx() -> Context {
		let config = Config::from_string("<mapcache></mapcache>").unwrap();
		let pools = BackendPools::new(PoolConfig::default());
		let runtime = Runtime::from_config(&config, &pools).unwrap();
		Context::new(
			Arc::new(runtime),
			pools,
			RequestMeta {
				client_ip: Some("10.0.0.9".to_string()),
				host: Some("tiles.example.org".to_string()),
				server_name: "worker-1".to_string(),
				base_url: "http://tiles.example.org/mapcache".to_string(),
			},
		)
	}

	#[test]
	fn content_length_over_limit_is_413() {
		let mut headers = HeaderMap::new();
		headers.insert("content-length", "2048".parse().unwrap());
		let err = check_content_length(&headers, 1024).unwrap_err();
		assert_eq!(error_status(&err), 413);

		headers.insert("content-length", "512".parse().unwrap());
		assert!(check_content_length(&headers, 1024).is_ok());
	}

	#[test]
	fn forwarded_headers_are_created() {
		let headers = forwarded_headers(&ctx(), &HeaderMap::new());
		assert!(headers.contains(&("x-forwarded-for", "10.0.0.9".to_string())));
		assert!(headers.contains(&("x-forwarded-host", "tiles.example.org".to_string())));
		assert!(headers.contains(&("x-forwarded-server", "worker-1".to_string())));
	}

	#[test]
	fn forwarded_headers_are_comma_appended() {
		let mut incoming = HeaderMap::new();
		incoming.insert("x-forwarded-for", "192.0.2.1".parse().unwrap());
		incoming.insert("x-forwarded-host", "outer.example.org".parse().unwrap());
		incoming.insert("x-forwarded-server", "edge-7".parse().unwrap());

		let headers = forwarded_headers(&ctx(), &incoming);
		assert!(headers.contains(&("x-forwarded-for", "192.0.2.1, 10.0.0.9".to_string())));
		assert!(headers.contains(&("x-forwarded-host", "outer.example.org, tiles.example.org".to_string())));
		assert!(headers.contains(&("x-forwarded-server", "edge-7, worker-1".to_string())));
	}
}
