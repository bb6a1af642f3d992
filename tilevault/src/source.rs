//! Upstream tile sources.
//!
//! A source knows how to render one rectangular map image; the pipeline never
//! asks for anything smaller than a metatile. The WMS source forwards the
//! request to an OGC WMS server via HTTP; the counting source renders flat
//! colour locally and exists for tests and demo setups.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use image::DynamicImage;
use std::{
	fmt::Debug,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
};
use tilevault_core::{Blob, HttpError, TileFormat};

/// One render request: a projected extent mapped onto a pixel box.
#[derive(Clone, Debug)]
pub struct RenderSpec {
	pub extent: [f64; 4],
	pub srs: String,
	pub width: u32,
	pub height: u32,
	pub format: TileFormat,
	pub dimensions: Vec<(String, String)>,
}

#[async_trait]
pub trait Source: Debug + Send + Sync {
	/// Renders the given extent into an image of exactly
	/// `spec.width × spec.height` pixels.
	async fn render_map(&self, spec: &RenderSpec) -> Result<DynamicImage>;

	/// Point query at pixel `(i, j)` of the rendered spec.
	async fn feature_info(&self, _spec: &RenderSpec, _i: u32, _j: u32, _info_format: &str) -> Result<(Blob, String)> {
		Err(HttpError::bad_request("this source does not support feature info"))
	}
}

/// A WMS GetMap client.
pub struct WmsSource {
	name: String,
	url: String,
	params: Vec<(String, String)>,
	client: reqwest::Client,
}

impl WmsSource {
	pub fn new(name: &str, url: &str, params: Vec<(String, String)>) -> Result<WmsSource> {
		let client = reqwest::Client::builder()
			.timeout(std::time::Duration::from_secs(60))
			.build()
			.context("building http client")?;
		Ok(WmsSource {
			name: name.to_string(),
			url: url.to_string(),
			params,
			client,
		})
	}

	fn query(&self, request: &str, spec: &RenderSpec) -> Vec<(String, String)> {
		let mut query: Vec<(String, String)> = vec![
			("SERVICE".to_string(), "WMS".to_string()),
			("VERSION".to_string(), "1.1.1".to_string()),
			("REQUEST".to_string(), request.to_string()),
			(
				"BBOX".to_string(),
				format!(
					"{},{},{},{}",
					spec.extent[0], spec.extent[1], spec.extent[2], spec.extent[3]
				),
			),
			("WIDTH".to_string(), spec.width.to_string()),
			("HEIGHT".to_string(), spec.height.to_string()),
			("SRS".to_string(), spec.srs.clone()),
			("FORMAT".to_string(), spec.format.mime().to_string()),
		];
		query.extend(self.params.iter().cloned());
		query.extend(spec.dimensions.iter().cloned());
		query
	}
}

#[async_trait]
impl Source for WmsSource {
	async fn render_map(&self, spec: &RenderSpec) -> Result<DynamicImage> {
		let response = self
			.client
			.get(&self.url)
			.query(&self.query("GetMap", spec))
			.send()
			.await
			.map_err(|e| HttpError::backend(format!("wms source {:?}: request failed: {e}", self.name)))?;

		let status = response.status();
		if !status.is_success() {
			return Err(HttpError::backend(format!(
				"wms source {:?}: upstream returned {status}",
				self.name
			)));
		}

		let bytes = response
			.bytes()
			.await
			.map_err(|e| HttpError::backend(format!("wms source {:?}: reading body failed: {e}", self.name)))?;

		// format is sniffed: some servers ignore the FORMAT parameter
		image::load_from_memory(&bytes)
			.map_err(|e| anyhow!("wms source {:?}: upstream returned an undecodable image: {e}", self.name))
	}

	async fn feature_info(&self, spec: &RenderSpec, i: u32, j: u32, info_format: &str) -> Result<(Blob, String)> {
		let mut query = self.query("GetFeatureInfo", spec);
		query.push(("QUERY_LAYERS".to_string(), String::new()));
		query.push(("X".to_string(), i.to_string()));
		query.push(("Y".to_string(), j.to_string()));
		query.push(("INFO_FORMAT".to_string(), info_format.to_string()));

		let response = self
			.client
			.get(&self.url)
			.query(&query)
			.send()
			.await
			.map_err(|e| HttpError::backend(format!("wms source {:?}: feature info failed: {e}", self.name)))?;
		let mime = response
			.headers()
			.get(reqwest::header::CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.unwrap_or("text/plain")
			.to_string();
		let bytes = response
			.bytes()
			.await
			.map_err(|e| HttpError::backend(format!("wms source {:?}: reading feature info failed: {e}", self.name)))?;
		Ok((Blob::from(bytes.to_vec()), mime))
	}
}

impl Debug for WmsSource {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WmsSource")
			.field("name", &self.name)
			.field("url", &self.url)
			.finish()
	}
}

/// A local source rendering flat colour and counting its renders.
///
/// The counter is what makes the miss-collapse scenarios testable: after N
/// concurrent requests for one metatile, `render_count()` must be 1.
#[derive(Debug, Default)]
pub struct CountingSource {
	renders: AtomicUsize,
	fail: std::sync::atomic::AtomicBool,
}

impl CountingSource {
	#[must_use]
	pub fn new() -> Arc<CountingSource> {
		Arc::new(CountingSource::default())
	}

	#[must_use]
	pub fn render_count(&self) -> usize {
		self.renders.load(Ordering::SeqCst)
	}

	/// Makes every subsequent render fail (for error-propagation tests).
	pub fn set_failing(&self, fail: bool) {
		self.fail.store(fail, Ordering::SeqCst);
	}
}

#[async_trait]
impl Source for CountingSource {
	async fn render_map(&self, spec: &RenderSpec) -> Result<DynamicImage> {
		if self.fail.load(Ordering::SeqCst) {
			return Err(HttpError::backend("counting source: render failure requested"));
		}
		self.renders.fetch_add(1, Ordering::SeqCst);
		let mut img = image::RgbaImage::new(spec.width, spec.height);
		for pixel in img.pixels_mut() {
			*pixel = image::Rgba([0, 116, 217, 255]);
		}
		Ok(DynamicImage::ImageRgba8(img))
	}

	async fn feature_info(&self, _spec: &RenderSpec, i: u32, j: u32, _info_format: &str) -> Result<(Blob, String)> {
		Ok((Blob::from(format!("pixel {i},{j}")), "text/plain".to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn counting_source_counts() -> Result<()> {
		let source = CountingSource::new();
		let spec = RenderSpec {
			extent: [0.0, 0.0, 1.0, 1.0],
			srs: "EPSG:3857".to_string(),
			width: 8,
			height: 8,
			format: TileFormat::Png,
			dimensions: Vec::new(),
		};
		assert_eq!(source.render_count(), 0);
		let img = source.render_map(&spec).await?;
		assert_eq!((img.width(), img.height()), (8, 8));
		assert_eq!(source.render_count(), 1);

		source.set_failing(true);
		assert!(source.render_map(&spec).await.is_err());
		assert_eq!(source.render_count(), 1);
		Ok(())
	}

	#[test]
	fn wms_query_carries_bbox_and_params() -> Result<()> {
		let source = WmsSource::new(
			"wms1",
			"http://upstream/wms",
			vec![("LAYERS".to_string(), "basemap".to_string())],
		)?;
		let spec = RenderSpec {
			extent: [1.0, 2.0, 3.0, 4.0],
			srs: "EPSG:3857".to_string(),
			width: 256,
			height: 256,
			format: TileFormat::Png,
			dimensions: vec![("TIME".to_string(), "2024".to_string())],
		};
		let query = source.query("GetMap", &spec);
		assert!(query.contains(&("BBOX".to_string(), "1,2,3,4".to_string())));
		assert!(query.contains(&("LAYERS".to_string(), "basemap".to_string())));
		assert!(query.contains(&("TIME".to_string(), "2024".to_string())));
		assert!(query.contains(&("FORMAT".to_string(), "image/png".to_string())));
		Ok(())
	}
}
