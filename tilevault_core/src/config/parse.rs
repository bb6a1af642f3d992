//! Parse helpers for the space-separated numeric fields of the XML config.

use anyhow::{Context, Result, ensure};

/// Parses `"w h"` into a pair of integers.
pub fn parse_pair_u32(text: &str) -> Result<(u32, u32)> {
	let parts: Vec<&str> = text.split_whitespace().collect();
	ensure!(parts.len() == 2, "expected two integers, got {text:?}");
	Ok((
		parts[0].parse().with_context(|| format!("parsing {text:?}"))?,
		parts[1].parse().with_context(|| format!("parsing {text:?}"))?,
	))
}

/// Parses `"minx miny maxx maxy"`.
pub fn parse_extent(text: &str) -> Result<[f64; 4]> {
	let values = parse_floats(text)?;
	ensure!(values.len() == 4, "expected four floats in extent, got {text:?}");
	let extent = [values[0], values[1], values[2], values[3]];
	ensure!(
		extent[0] < extent[2] && extent[1] < extent[3],
		"extent {text:?} has min >= max"
	);
	Ok(extent)
}

/// Parses a strictly decreasing list of resolutions.
pub fn parse_resolutions(text: &str) -> Result<Vec<f64>> {
	let resolutions = parse_floats(text)?;
	ensure!(!resolutions.is_empty(), "resolutions must not be empty");
	ensure!(
		resolutions.windows(2).all(|w| w[0] > w[1]),
		"resolutions must be strictly decreasing"
	);
	Ok(resolutions)
}

fn parse_floats(text: &str) -> Result<Vec<f64>> {
	text
		.split_whitespace()
		.map(|part| part.parse::<f64>().with_context(|| format!("parsing float {part:?}")))
		.collect()
}
