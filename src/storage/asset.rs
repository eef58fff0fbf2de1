//! One source image and its derived render state.
//!
//! An [`Asset`] guards at most one concurrent render per requested size and
//! shares the finished [`TileSet`] between every subscriber that asked for
//! that size. The in-memory entry for a size lives exactly as long as its
//! subscriber set is non-empty; the on-disk cache outlives it.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;

use crate::foundation::id::InstanceId;
use crate::foundation::sync::lock;
use crate::render::cache::TileCache;
use crate::render::tile::TileSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
/// Requested tile-set size in cells.
pub struct SizeKey {
    /// Width in cells.
    pub width: u32,
    /// Height in cells.
    pub height: u32,
}

impl SizeKey {
    /// Build a size key.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Suffix used in derived cache file names (`<w>-<h>`).
    pub(crate) fn cache_suffix(self) -> String {
        format!("{}-{}", self.width, self.height)
    }
}

impl fmt::Display for SizeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Per-size lock registry.
///
/// An entry stays in the map until no thread references it: cleanup removes
/// it only when the departing holder owns the last reference outside the map,
/// so a trailing holder can never overlap with a fresh lock for the same key.
#[derive(Default)]
struct KeyLocks {
    entries: Mutex<HashMap<SizeKey, Arc<Mutex<()>>>>,
}

impl KeyLocks {
    fn with<R>(&self, key: SizeKey, f: impl FnOnce() -> R) -> R {
        let entry = Arc::clone(lock(&self.entries).entry(key).or_default());
        let result = {
            let _held = lock(&entry);
            f()
        };

        let mut entries = lock(&self.entries);
        let last_holder = entries
            .get(&key)
            .is_some_and(|current| Arc::ptr_eq(current, &entry) && Arc::strong_count(current) == 2);
        if last_holder {
            entries.remove(&key);
        }
        result
    }
}

#[derive(Default)]
struct SubscriberState {
    sets: HashMap<SizeKey, Arc<TileSet>>,
    subscribers: HashMap<SizeKey, HashSet<InstanceId>>,
    size_of: HashMap<InstanceId, SizeKey>,
}

/// A source image file registered in the asset index.
pub struct Asset {
    filename: String,
    path: PathBuf,
    tiles: Arc<TileCache>,
    /// `None` = unprobed, `Some(None)` = probed but not parseable as an image.
    geometry: Mutex<Option<Option<(u32, u32)>>>,
    locks: KeyLocks,
    state: Mutex<SubscriberState>,
}

impl Asset {
    pub(crate) fn new(filename: String, path: PathBuf, tiles: Arc<TileCache>) -> Self {
        Self {
            filename,
            path,
            tiles,
            geometry: Mutex::new(None),
            locks: KeyLocks::default(),
            state: Mutex::new(SubscriberState::default()),
        }
    }

    /// Relative filename this asset is indexed under.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Pixel dimensions of the source, probed from header metadata only.
    ///
    /// Returns `None` when the file cannot be interpreted as an image. The
    /// probe result is cached until the asset is invalidated.
    pub fn size(&self) -> Option<(u32, u32)> {
        let mut geometry = lock(&self.geometry);
        if let Some(probed) = *geometry {
            return probed;
        }
        let probed = image::image_dimensions(&self.path).ok();
        *geometry = Some(probed);
        probed
    }

    /// Last modification time of the source file, epoch on error.
    pub fn last_modified(&self) -> SystemTime {
        std::fs::metadata(&self.path)
            .and_then(|m| m.modified())
            .unwrap_or(UNIX_EPOCH)
    }

    /// Get the tile set for `size`, rendering it if necessary, and register
    /// `subscriber` as a user of it.
    ///
    /// At most one thread renders a given size at a time; requests for other
    /// sizes of this asset (and for other assets) proceed independently.
    pub fn tile_set_and_subscribe(&self, subscriber: InstanceId, size: SizeKey) -> Arc<TileSet> {
        self.locks.with(size, || {
            {
                let mut state = lock(&self.state);
                state.subscribers.entry(size).or_default().insert(subscriber);
                state.size_of.insert(subscriber, size);
                if let Some(set) = state.sets.get(&size) {
                    return Arc::clone(set);
                }
            }

            // Not in memory; load or generate without holding the state lock.
            let set = self.tiles.load_or_generate(&self.path, &self.filename, size);
            lock(&self.state).sets.insert(size, Arc::clone(&set));
            set
        })
    }

    /// Drop `subscriber`'s interest in its tile set.
    ///
    /// When the last subscriber of a size detaches, the in-memory tile set
    /// for that size is evicted. The disk cache remains.
    pub fn unsubscribe(&self, subscriber: InstanceId) {
        let mut state = lock(&self.state);
        let Some(size) = state.size_of.remove(&subscriber) else {
            return;
        };
        if let Some(subscribers) = state.subscribers.get_mut(&size) {
            subscribers.remove(&subscriber);
            if subscribers.is_empty() {
                state.subscribers.remove(&size);
                state.sets.remove(&size);
                debug!("evicted cached tile set {size} of \"{}\"", self.filename);
            }
        }
    }

    /// Forget everything derived from the source file.
    ///
    /// Clears the probed geometry and all in-memory tile sets, and deletes
    /// every derived cache file on disk. Subscribers stay registered; their
    /// next request re-renders.
    pub fn invalidate(&self) {
        *lock(&self.geometry) = None;
        lock(&self.state).sets.clear();
        self.tiles.delete_cached(&self.filename);
        debug!("invalidated \"{}\"", self.filename);
    }

    #[cfg(test)]
    pub(crate) fn cached_set_count(&self) -> usize {
        lock(&self.state).sets.len()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/storage/asset.rs"]
mod tests;
