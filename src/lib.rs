//! Tessera renders raster and animated images into fixed-size
//! palette-indexed tiles, caches the rendered output on disk and in memory,
//! and tracks which observers in a partitioned world should receive which
//! tiles.
//!
//! # Data flow
//!
//! 1. **Watch**: [`DirectoryWatcher`] detects created/modified/deleted files
//!    under the image directory (native notification, or polling where the
//!    platform cannot deliver events).
//! 2. **Index**: [`AssetIndex`] maintains the authoritative filename ->
//!    [`Asset`] map, filtered by an allow pattern.
//! 3. **Render**: [`TileCache`] turns an asset into a [`TileSet`] at a
//!    requested size: from a valid disk cache when possible, by decoding,
//!    compositing, scaling and quantizing the source otherwise, falling back
//!    to an error pattern when the source is unrenderable.
//! 4. **Track**: [`CellGrid`] partitions the world into [`CellId`] cells and
//!    drives visibility lifecycle as observers cross cell boundaries.
//!
//! Everything around this core (packet encoding, permissions, commands,
//! upload surfaces) is expected to live in a thin embedding layer.
//!
//! Key design constraints:
//!
//! - **No unsafe**: `unsafe` is forbidden in this crate.
//! - At most one concurrent render per (asset, size); unrelated sizes and
//!   assets never serialize against each other.
//! - Bookkeeping locks are never held across file I/O or image decoding.
//! - Failures degrade: stale or corrupt caches regenerate, unrenderable
//!   sources produce a visibly-distinct error tile set, and cache write
//!   failures still return the in-memory result.

#![forbid(unsafe_code)]

mod config;
mod foundation;
mod render;
mod storage;
mod world;

pub use config::TesseraConfig;
pub use foundation::error::{TesseraError, TesseraResult};
pub use foundation::id::{
    InstanceId, MAX_TILE_ID, MIN_TILE_ID, ObserverId, TileId, TileIdAllocator,
};
pub use foundation::palette::{
    ALPHA_THRESHOLD, ERROR_INDEX, PALETTE, PALETTE_LEN, TRANSPARENT_INDEX, nearest_index, quantize,
};
pub use render::cache::{CACHE_SIGNATURE, CACHE_VERSION, TileCache};
pub use render::tile::{
    MAX_STEP_DELAY, MAX_STEPS, MIN_STEP_DELAY, RESEND_THRESHOLD, TILE_DIMENSION, TILE_PIXELS,
    Tile, TileSet,
};
pub use storage::asset::{Asset, SizeKey};
pub use storage::index::{AssetIndex, ObserverIdentity, PathFilter};
pub use storage::locked::LockedFile;
pub use storage::placements::{
    MAX_INSTANCE_DIMENSION, PlacementRecord, PlacementStore,
};
pub use storage::watcher::{DirectoryWatcher, WatchEvents};
pub use world::cell::{
    CELL_SPAN_CHUNKS, CHUNK_SPAN, CellId, MAX_NEIGHBORHOOD_LEVEL, WorldId, neighborhood_level,
};
pub use world::grid::{CellEvents, CellGrid, SpatialCell};
