//! HTTP server lifecycle and request entry point.
//!
//! The server owns lifecycle concerns only: binding, graceful shutdown, a
//! `/status` liveness probe and the single fallback handler that matches the
//! endpoint registry. Parsing lives in `services`, the work in `pipeline`,
//! response shaping in `response`.

mod registry;

pub use registry::{AliasEntry, Registry, alias_matches};

use crate::{
	context::{Context, RequestMeta},
	pipeline,
	proxy,
	response::{HttpResponse, method_not_allowed},
	services::{self, ServiceRequest},
};
use anyhow::Result;
use axum::{
	Router,
	body::Body,
	extract::{ConnectInfo, Request, State},
	http::{Method, Response, header},
	routing::get,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::TcpListener, sync::oneshot};

pub struct TileServer {
	ip: String,
	port: u16,
	registry: Arc<Registry>,
	/// One-shot channel signalling graceful shutdown to the serving task.
	exit_signal: Option<oneshot::Sender<()>>,
	/// Join handle for the serving task; awaited in `stop()`.
	join: Option<tokio::task::JoinHandle<()>>,
}

impl TileServer {
	#[must_use]
	pub fn new(ip: &str, port: u16, registry: Registry) -> TileServer {
		TileServer {
			ip: ip.to_string(),
			port,
			registry: Arc::new(registry),
			exit_signal: None,
			join: None,
		}
	}

	/// Start listening and serving requests.
	///
	/// Idempotent: starting twice stops the previous instance first. With
	/// port 0 the assigned ephemeral port is recorded for `get_port`.
	pub async fn start(&mut self) -> Result<()> {
		if self.exit_signal.is_some() || self.join.is_some() {
			self.stop().await;
		}

		log::info!("starting server");

		let router = Router::new()
			.route("/status", get(|| async { "ready!" }))
			.fallback(handle)
			.with_state(self.registry.clone());

		let addr = format!("{}:{}", self.ip, self.port);
		log::info!("server binding on {addr}");
		let listener = TcpListener::bind(&addr).await?;
		if self.port == 0 {
			self.port = listener.local_addr()?.port();
		}

		let (tx, rx) = oneshot::channel::<()>();
		let handle = tokio::spawn(async move {
			if let Err(err) = axum::serve(
				listener,
				router.into_make_service_with_connect_info::<SocketAddr>(),
			)
			.with_graceful_shutdown(async {
				rx.await.ok();
			})
			.await
			{
				log::error!("server task exited with error: {err}");
			}
		});

		self.exit_signal = Some(tx);
		self.join = Some(handle);
		Ok(())
	}

	/// Trigger graceful shutdown and wait for the serving task (bounded).
	pub async fn stop(&mut self) {
		if self.exit_signal.is_none() && self.join.is_none() {
			return;
		}
		log::info!("stopping server");

		if let Some(tx) = self.exit_signal.take() {
			let _ = tx.send(());
		}
		if let Some(handle) = self.join.take() {
			match tokio::time::timeout(std::time::Duration::from_secs(10), handle).await {
				Ok(Err(join_err)) => log::warn!("server task join error: {join_err}"),
				Err(_) => log::warn!("server task did not shut down within timeout; continuing"),
				Ok(Ok(())) => {}
			}
		}
	}

	#[must_use]
	pub fn get_port(&self) -> u16 {
		self.port
	}
}

/// The single entry point for every aliased request.
async fn handle(
	State(registry): State<Arc<Registry>>,
	ConnectInfo(peer): ConnectInfo<SocketAddr>,
	request: Request,
) -> Response<Body> {
	let method = request.method().clone();
	if method != Method::GET && method != Method::POST {
		return HttpResponse::from_error(&method_not_allowed()).into_axum(request.headers());
	}

	let path = request.uri().path().to_string();
	let query = request.uri().query().unwrap_or("").to_string();

	let Some((alias, path_info)) = registry.match_uri(&path) else {
		return HttpResponse::from_error(&tilevault_core::HttpError::not_found(format!(
			"no endpoint matches {path:?}"
		)))
		.into_axum(request.headers());
	};
	let path_info = path_info.to_string();
	log::debug!("dispatch {path_info:?} on endpoint {:?}", alias.endpoint);

	let host = request
		.headers()
		.get(header::HOST)
		.and_then(|v| v.to_str().ok())
		.map(str::to_string);
	// base url for capabilities documents: the request url minus path-info
	let base_url = format!(
		"http://{}{}",
		host.as_deref().unwrap_or("localhost"),
		path.strip_suffix(path_info.as_str()).unwrap_or(&path)
	);
	let meta = RequestMeta {
		client_ip: Some(peer.ip().to_string()),
		host,
		server_name: hostname(),
		base_url,
	};
	let ctx = Context::new(alias.runtime.clone(), alias.pools.clone(), meta);

	let headers = request.headers().clone();
	let parsed = match services::parse_request(&ctx.runtime, &path_info, &query) {
		Ok(parsed) => parsed,
		Err(err) => return HttpResponse::from_error(&err).into_axum(&headers),
	};

	// proxying needs the raw body, so it is handled here rather than in the
	// pipeline
	if let ServiceRequest::Proxy(proxy_request) = parsed {
		let limit = proxy_request.rule.max_post_len();
		if let Err(err) = proxy::check_content_length(&headers, limit) {
			return HttpResponse::from_error(&err).into_axum(&headers);
		}
		let body = match axum::body::to_bytes(request.into_body(), limit).await {
			Ok(body) => body,
			Err(_) => {
				return HttpResponse::from_error(&tilevault_core::HttpError::payload_too_large("post request too big"))
					.into_axum(&headers);
			}
		};
		return match proxy::forward(&ctx, &proxy_request, &method, &headers, body).await {
			Ok(response) => response.into_axum(&headers),
			Err(err) => HttpResponse::from_error(&err).into_axum(&headers),
		};
	}

	pipeline::handle_request(&ctx, parsed).await.into_axum(&headers)
}

fn hostname() -> String {
	std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
