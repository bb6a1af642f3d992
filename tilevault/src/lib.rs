//! TileVault: a tile-caching HTTP service.
//!
//! Requests identifying a (tileset, grid, z, x, y) are answered from a
//! pluggable cache; misses are collapsed per metatile through a
//! cross-process locker, rendered once via the upstream source and written
//! back before the lock is released.

pub mod context;
pub mod pipeline;
pub mod proxy;
pub mod response;
pub mod runtime;
pub mod server;
pub mod services;
pub mod source;

pub use context::{Context, RequestMeta};
pub use runtime::Runtime;
pub use server::{Registry, TileServer};
