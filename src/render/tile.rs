//! Palette-indexed tiles and tile sets.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use crate::foundation::id::{ObserverId, TileId};
use crate::foundation::sync::lock;

/// Side length of every tile, in pixels.
pub const TILE_DIMENSION: u32 = 128;
/// Number of palette-index bytes in one tile.
pub const TILE_PIXELS: usize = (TILE_DIMENSION * TILE_DIMENSION) as usize;
/// Upper bound on animation steps per tile set.
pub const MAX_STEPS: u16 = 500;
/// Smallest valid inter-step delay, in 50 ms ticks.
pub const MIN_STEP_DELAY: u8 = 1;
/// Largest valid inter-step delay, in 50 ms ticks.
pub const MAX_STEP_DELAY: u8 = 200;
/// Time that must pass before a tile's pixels are re-sent to an observer.
pub const RESEND_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// One fixed-size palette-indexed pixel buffer, the atomic unit of
/// transmission to an observer.
///
/// Tiles are immutable once constructed except for the per-observer resend
/// bookkeeping.
pub struct Tile {
    id: TileId,
    pixels: Vec<u8>,
    last_sent: Mutex<HashMap<ObserverId, SystemTime>>,
}

impl Tile {
    pub(crate) fn new(id: TileId, pixels: Vec<u8>) -> Self {
        debug_assert_eq!(pixels.len(), TILE_PIXELS);
        Self {
            id,
            pixels,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    /// Identifier of this tile.
    pub fn id(&self) -> TileId {
        self.id
    }

    /// Palette-index payload, row-major, [`TILE_PIXELS`] bytes.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Decide whether this tile's pixels need to be (re-)sent to `observer`.
    ///
    /// Denied only while a previous send is recorded that is both younger
    /// than [`RESEND_THRESHOLD`] and newer than `observer_last_seen` (the
    /// observer's own last-seen/session timestamp). Granting records the
    /// send time.
    pub fn request_resend(&self, observer: ObserverId, observer_last_seen: SystemTime) -> bool {
        self.request_resend_at(observer, observer_last_seen, SystemTime::now())
    }

    fn request_resend_at(
        &self,
        observer: ObserverId,
        observer_last_seen: SystemTime,
        now: SystemTime,
    ) -> bool {
        let mut last_sent = lock(&self.last_sent);
        if let Some(&sent) = last_sent.get(&observer) {
            let recently = now
                .duration_since(sent)
                .map(|elapsed| elapsed < RESEND_THRESHOLD)
                .unwrap_or(true);
            if recently && observer_last_seen < sent {
                return false;
            }
        }
        last_sent.insert(observer, now);
        true
    }
}

/// The rendered representation of an asset at one requested size: a grid of
/// tiles over animation steps plus the delay between steps.
pub struct TileSet {
    columns: u32,
    rows: u32,
    steps: u32,
    delay: u8,
    tiles: Vec<Arc<Tile>>,
}

impl TileSet {
    /// `tiles` is indexed `[column][row][step]`, column-major then row then
    /// step; this is also the serialization order of the disk cache.
    pub(crate) fn from_tiles(
        columns: u32,
        rows: u32,
        steps: u32,
        delay: u8,
        tiles: Vec<Arc<Tile>>,
    ) -> Self {
        debug_assert_eq!(tiles.len(), (columns * rows * steps) as usize);
        Self {
            columns,
            rows,
            steps,
            delay,
            tiles,
        }
    }

    /// Width of the grid in tiles.
    pub fn columns(&self) -> u32 {
        self.columns
    }

    /// Height of the grid in tiles.
    pub fn rows(&self) -> u32 {
        self.rows
    }

    /// Number of animation steps (1 for static sources).
    pub fn steps(&self) -> u32 {
        self.steps
    }

    /// Inter-step delay in 50 ms ticks, 0 when single-step.
    pub fn delay(&self) -> u8 {
        self.delay
    }

    /// Tile at `(column, row, step)`.
    pub fn tile(&self, column: u32, row: u32, step: u32) -> &Arc<Tile> {
        let index = ((column * self.rows + row) * self.steps + step) as usize;
        &self.tiles[index]
    }

    /// All tiles in serialization order (column-major, then row, then step).
    pub fn tiles(&self) -> impl Iterator<Item = &Arc<Tile>> {
        self.tiles.iter()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/tile.rs"]
mod tests;
