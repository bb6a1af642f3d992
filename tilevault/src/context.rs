//! The per-request context handle.

use crate::runtime::Runtime;
use std::sync::Arc;
use tilevault_cache::BackendPools;

/// Everything a request handler needs, cheap to clone for child work units.
///
/// The runtime is read-only after startup; the pools synchronise internally.
#[derive(Clone, Debug)]
pub struct Context {
	pub runtime: Arc<Runtime>,
	pub pools: Arc<BackendPools>,
	pub request: RequestMeta,
}

/// Facts about the incoming HTTP request that outlive parsing.
#[derive(Clone, Debug, Default)]
pub struct RequestMeta {
	/// Peer address, for `X-Forwarded-For`.
	pub client_ip: Option<String>,
	/// The `Host` header, for `X-Forwarded-Host`.
	pub host: Option<String>,
	/// Our own hostname, for `X-Forwarded-Server`.
	pub server_name: String,
	/// Request URL with the path-info trimmed; base for capabilities links.
	pub base_url: String,
}

impl Context {
	#[must_use]
	pub fn new(runtime: Arc<Runtime>, pools: Arc<BackendPools>, request: RequestMeta) -> Context {
		Context {
			runtime,
			pools,
			request,
		}
	}
}
