mod blob;
mod dimension;
mod grid;
mod metatile;
mod tile;
mod tile_coord;
mod tile_format;
mod tileset;

pub use blob::Blob;
pub use dimension::{DimensionKind, DimensionSchema};
pub use grid::{Grid, GridOrigin};
pub use metatile::MetaTile;
pub use tile::Tile;
pub use tile_coord::TileCoord;
pub use tile_format::TileFormat;
pub use tileset::Tileset;
