//! HTTP response assembly.
//!
//! The pipeline produces a transport-neutral [`HttpResponse`]; conversion to
//! an axum response happens here, including conditional-GET handling: a
//! request whose `If-Modified-Since` is at least the tile's mtime gets a
//! `304` with no body.

use anyhow::Result;
use axum::{
	body::Body,
	http::{HeaderMap, Response, header},
};
use std::time::SystemTime;
use tilevault_core::{Blob, HttpError, error_message, error_status};
use time::{OffsetDateTime, PrimitiveDateTime, format_description::FormatItem, macros::format_description};

/// IMF-fixdate, the only HTTP date format we emit: `Sun, 06 Nov 1994 08:49:37 GMT`.
const IMF_FIXDATE: &[FormatItem<'static>] = format_description!(
	"[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Formats a timestamp as an HTTP date header value.
pub fn format_http_date(mtime: SystemTime) -> Result<String> {
	let datetime = OffsetDateTime::from(mtime);
	Ok(datetime.format(&IMF_FIXDATE)?)
}

/// Parses an HTTP date header value (IMF-fixdate only).
pub fn parse_http_date(value: &str) -> Result<SystemTime> {
	let parsed = PrimitiveDateTime::parse(value.trim(), &IMF_FIXDATE)?;
	Ok(parsed.assume_utc().into())
}

/// A transport-neutral HTTP response.
#[derive(Debug)]
pub struct HttpResponse {
	pub status: u16,
	pub content_type: Option<String>,
	pub body: Blob,
	pub mtime: Option<SystemTime>,
	/// Response lifetime in seconds; drives `Cache-Control` and `Expires`.
	pub expires: Option<u32>,
	pub extra_headers: Vec<(String, String)>,
}

impl HttpResponse {
	#[must_use]
	pub fn ok(content_type: &str, body: Blob) -> HttpResponse {
		HttpResponse {
			status: 200,
			content_type: Some(content_type.to_string()),
			body,
			mtime: None,
			expires: None,
			extra_headers: Vec::new(),
		}
	}

	/// Formats an error into a plain-text response with the error's status.
	#[must_use]
	pub fn from_error(err: &anyhow::Error) -> HttpResponse {
		let status = error_status(err);
		if status >= 500 {
			log::error!("request failed: {err:#}");
		} else {
			log::debug!("request rejected ({status}): {err:#}");
		}
		HttpResponse {
			status,
			content_type: Some("text/plain; charset=utf-8".to_string()),
			body: Blob::from(error_message(err)),
			mtime: None,
			expires: None,
			extra_headers: Vec::new(),
		}
	}

	/// Builds the axum response, honouring `If-Modified-Since`.
	pub fn into_axum(self, request_headers: &HeaderMap) -> Response<Body> {
		if let (Some(mtime), Some(since)) = (self.mtime, request_headers.get(header::IF_MODIFIED_SINCE)) {
			if let Some(since) = since.to_str().ok().and_then(|v| parse_http_date(v).ok()) {
				// HTTP dates have second precision; truncate before comparing
				let mtime_secs = mtime
					.duration_since(SystemTime::UNIX_EPOCH)
					.map_or(0, |d| d.as_secs());
				let since_secs = since
					.duration_since(SystemTime::UNIX_EPOCH)
					.map_or(0, |d| d.as_secs());
				if mtime_secs <= since_secs {
					return Response::builder()
						.status(304)
						.body(Body::empty())
						.expect("failed to build 304 response");
				}
			}
		}

		let mut builder = Response::builder().status(self.status);
		if let Some(content_type) = &self.content_type {
			builder = builder.header(header::CONTENT_TYPE, content_type);
		}
		if let Some(mtime) = self.mtime {
			if let Ok(date) = format_http_date(mtime) {
				builder = builder.header(header::LAST_MODIFIED, date);
			}
		}
		if let Some(expires) = self.expires {
			builder = builder.header(header::CACHE_CONTROL, format!("max-age={expires}"));
			if let Ok(date) = format_http_date(SystemTime::now() + std::time::Duration::from_secs(u64::from(expires))) {
				builder = builder.header(header::EXPIRES, date);
			}
		}
		for (name, value) in &self.extra_headers {
			builder = builder.header(name.as_str(), value.as_str());
		}
		builder = builder.header(header::CONTENT_LENGTH, self.body.len());

		builder
			.body(Body::from(self.body.into_vec()))
			.expect("failed to build response")
	}
}

/// Shorthand for a 405 on anything but GET/POST.
pub fn method_not_allowed() -> anyhow::Error {
	HttpError::method_not_allowed("only GET and POST are accepted")
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::time::Duration;

	fn epoch_plus(secs: u64) -> SystemTime {
		SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
	}

	#[test]
	fn http_date_round_trip() -> Result<()> {
		let mtime = epoch_plus(784_111_777);
		let formatted = format_http_date(mtime)?;
		assert_eq!(formatted, "Sun, 06 Nov 1994 08:49:37 GMT");
		assert_eq!(parse_http_date(&formatted)?, mtime);
		Ok(())
	}

	#[test]
	fn conditional_get_honours_if_modified_since() -> Result<()> {
		let mtime = epoch_plus(784_111_777);

		let fresh = |mtime| {
			let mut response = HttpResponse::ok("image/png", Blob::from("body"));
			response.mtime = Some(mtime);
			response
		};

		// client copy as new as the tile: 304, empty body
		let mut headers = HeaderMap::new();
		headers.insert(header::IF_MODIFIED_SINCE, format_http_date(mtime)?.parse()?);
		let response = fresh(mtime).into_axum(&headers);
		assert_eq!(response.status(), 304);

		// client copy older: full 200
		let mut headers = HeaderMap::new();
		headers.insert(
			header::IF_MODIFIED_SINCE,
			format_http_date(epoch_plus(784_111_000))?.parse()?,
		);
		let response = fresh(mtime).into_axum(&headers);
		assert_eq!(response.status(), 200);
		assert_eq!(
			response.headers().get(header::LAST_MODIFIED).unwrap(),
			"Sun, 06 Nov 1994 08:49:37 GMT"
		);
		Ok(())
	}

	#[test]
	fn expires_sets_cache_headers() {
		let mut response = HttpResponse::ok("image/png", Blob::from("x"));
		response.expires = Some(3600);
		let out = response.into_axum(&HeaderMap::new());
		assert_eq!(out.headers().get(header::CACHE_CONTROL).unwrap(), "max-age=3600");
		assert!(out.headers().get(header::EXPIRES).is_some());
	}

	#[test]
	fn errors_become_plaintext() {
		let err = HttpError::not_found("tileset \"x\" not found");
		let response = HttpResponse::from_error(&err);
		assert_eq!(response.status, 404);
		assert_eq!(response.body.as_str(), "tileset \"x\" not found");
	}

	#[test]
	fn content_length_matches_body() {
		let out = HttpResponse::ok("text/plain", Blob::from("12345")).into_axum(&HeaderMap::new());
		assert_eq!(out.headers().get(header::CONTENT_LENGTH).unwrap(), "5");
	}
}
