use std::sync::atomic::{AtomicI32, Ordering};

use crate::foundation::error::{TesseraError, TesseraResult};

/// Default lower bound for tile identifiers.
pub const MIN_TILE_ID: i32 = 10_000;
/// Default upper bound for tile identifiers.
pub const MAX_TILE_ID: i32 = 32_767;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Identifier of one rendered tile.
pub struct TileId(pub i32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Identity of an observer (a connected viewer of the world).
pub struct ObserverId(pub uuid::Uuid);

impl ObserverId {
    /// Generate a fresh random observer identity.
    pub fn random() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
/// Identity of a placed visual instance subscribing to tile sets.
pub struct InstanceId(pub u64);

/// Allocator for tile identifiers.
///
/// Ids are handed out descending from `max` and wrap back to `max` once `min`
/// has been reached, so the full reserved range is cycled deterministically.
/// One allocator is owned by the tile cache it was built for; nothing here is
/// global.
#[derive(Debug)]
pub struct TileIdAllocator {
    min: i32,
    max: i32,
    last: AtomicI32,
}

impl TileIdAllocator {
    /// Create an allocator cycling through `min..=max`.
    pub fn new(min: i32, max: i32) -> TesseraResult<Self> {
        if min >= max {
            return Err(TesseraError::storage(format!(
                "tile id range must satisfy min < max, got {min}..={max}"
            )));
        }
        Ok(Self {
            min,
            max,
            last: AtomicI32::new(min),
        })
    }

    /// Allocate the next identifier.
    pub fn next(&self) -> TileId {
        let step = |last: i32| {
            if last <= self.min { self.max } else { last - 1 }
        };
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(step(last)))
            .unwrap_or_else(|last| last);
        TileId(step(prev))
    }
}

impl Default for TileIdAllocator {
    fn default() -> Self {
        Self {
            min: MIN_TILE_ID,
            max: MAX_TILE_ID,
            last: AtomicI32::new(MIN_TILE_ID),
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/id.rs"]
mod tests;
