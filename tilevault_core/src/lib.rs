//! Shared types for the TileVault tile-caching service.
//!
//! This crate carries everything the cache layer and the HTTP server agree
//! on: the tile/grid/metatile data model, the XML configuration, and the
//! HTTP-aware error type.

pub mod config;
mod error;
mod types;

pub use error::{HttpError, error_message, error_status};
pub use types::*;
