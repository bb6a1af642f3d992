//! Extra tile dimensions (e.g. `TIME`, `ELEVATION`) and their validation.

use anyhow::Result;
use regex::Regex;

use crate::HttpError;

/// How a dimension value is validated.
#[derive(Clone, Debug)]
pub enum DimensionKind {
	/// An explicit allow-list.
	Values(Vec<String>),
	/// A regular expression the value must fully match.
	Regex(Regex),
}

/// One dimension a tileset accepts, with its default value.
#[derive(Clone, Debug)]
pub struct DimensionSchema {
	pub name: String,
	pub default: String,
	pub kind: DimensionKind,
}

impl DimensionSchema {
	/// Validates a requested value against the schema, returning a 400 error
	/// for anything outside the allowed set.
	pub fn validate(&self, value: &str) -> Result<()> {
		let ok = match &self.kind {
			DimensionKind::Values(values) => values.iter().any(|v| v == value),
			DimensionKind::Regex(regex) => regex
				.find(value)
				.is_some_and(|m| m.start() == 0 && m.end() == value.len()),
		};
		if ok {
			Ok(())
		} else {
			Err(HttpError::bad_request(format!(
				"dimension {:?} does not allow value {value:?}",
				self.name
			)))
		}
	}
}
