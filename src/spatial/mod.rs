//! Spatial structures: terrain query surface and the unit position index

pub mod sparse_hash;
pub mod terrain;

pub use sparse_hash::SpatialIndex;
pub use terrain::{GridTerrain, TerrainKind, TerrainQuery, TileCoord};
