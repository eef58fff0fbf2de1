//! The authoritative filename -> asset map.
//!
//! Files are indexed by their path relative to the base directory, with
//! separators normalized to `/`; nested directories therefore yield filenames
//! like `events/summer/banner.png`. The index is kept current by a
//! [`DirectoryWatcher`] and filtered for listing through an allow pattern.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::config::TesseraConfig;
use crate::foundation::error::TesseraResult;
use crate::foundation::id::TileIdAllocator;
use crate::foundation::sync::lock;
use crate::render::cache::TileCache;
use crate::storage::asset::Asset;
use crate::storage::watcher::{DirectoryWatcher, WatchEvents};

#[derive(Clone, Debug)]
/// Identity tokens of the observer a listing is being produced for.
pub struct ObserverIdentity {
    /// Display name, substituted for `#player#`.
    pub name: String,
    /// Stable unique id, substituted for `#uuid#`.
    pub uuid: uuid::Uuid,
}

/// Allow pattern deciding which filenames an observer may see.
///
/// The pattern is a case-insensitive regular expression matched anywhere in
/// the filename. `#player#` and `#uuid#` are substituted from the observer's
/// identity before compiling (the name is escaped). An empty pattern means
/// unrestricted; an invalid pattern denies everything.
pub struct PathFilter {
    pattern: String,
}

impl PathFilter {
    /// Wrap a raw pattern string.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    /// Whether this filter admits every filename.
    pub fn is_unrestricted(&self) -> bool {
        self.pattern.trim().is_empty()
    }

    /// Decide whether `filename` is visible to `observer`.
    pub fn is_allowed(&self, filename: &str, observer: Option<&ObserverIdentity>) -> bool {
        if self.is_unrestricted() {
            return true;
        }
        let (name, uuid) = match observer {
            Some(observer) => (regex::escape(&observer.name), observer.uuid.to_string()),
            None => (String::new(), String::new()),
        };
        let expanded = self
            .pattern
            .replace("#player#", &name)
            .replace("#uuid#", &uuid);
        match regex::RegexBuilder::new(&expanded)
            .case_insensitive(true)
            .build()
        {
            Ok(re) => re.is_match(filename),
            Err(e) => {
                warn!("invalid allow pattern \"{}\": {e}", self.pattern);
                false
            }
        }
    }
}

struct IndexShared {
    base_dir: PathBuf,
    filter: PathFilter,
    tiles: Arc<TileCache>,
    assets: Mutex<BTreeMap<String, Arc<Asset>>>,
}

impl IndexShared {
    /// Relative `/`-separated filename used for indexing, or `None` for
    /// paths outside the base directory.
    fn filename_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.base_dir).ok()?;
        let parts: Vec<&str> = rel
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => part.to_str(),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }
}

impl WatchEvents for IndexShared {
    fn on_created(&self, path: &Path) {
        let Some(filename) = self.filename_for(path) else {
            return;
        };
        let mut assets = lock(&self.assets);
        if !assets.contains_key(&filename) {
            let asset = Asset::new(filename.clone(), path.to_path_buf(), Arc::clone(&self.tiles));
            assets.insert(filename.clone(), Arc::new(asset));
            debug!("registered file \"{filename}\"");
        }
    }

    fn on_modified(&self, path: &Path) {
        let Some(filename) = self.filename_for(path) else {
            return;
        };
        let asset = lock(&self.assets).get(&filename).cloned();
        // Invalidation deletes derived files; do it outside the index lock.
        if let Some(asset) = asset {
            asset.invalidate();
        }
    }

    fn on_deleted(&self, path: &Path) {
        let Some(filename) = self.filename_for(path) else {
            return;
        };
        let asset = lock(&self.assets).remove(&filename);
        if let Some(asset) = asset {
            asset.invalidate();
            debug!("unregistered file \"{filename}\"");
        }
    }
}

/// Keeps track of all available image assets under a base directory.
pub struct AssetIndex {
    shared: Arc<IndexShared>,
    watcher: DirectoryWatcher,
}

impl AssetIndex {
    /// Build an index from configuration, with a default tile id allocator.
    pub fn new(config: &TesseraConfig) -> Self {
        let tiles = Arc::new(TileCache::new(
            &config.cache_dir,
            TileIdAllocator::default(),
            config.animate,
        ));
        Self::with_cache(&config.base_dir, &config.allowed_paths, tiles)
    }

    /// Build an index around an explicitly constructed [`TileCache`].
    pub fn with_cache(
        base_dir: impl Into<PathBuf>,
        allowed_paths: &str,
        tiles: Arc<TileCache>,
    ) -> Self {
        let base_dir = base_dir.into();
        let shared = Arc::new(IndexShared {
            base_dir: base_dir.clone(),
            filter: PathFilter::new(allowed_paths),
            tiles,
            assets: Mutex::new(BTreeMap::new()),
        });
        let watcher = DirectoryWatcher::new(base_dir, Arc::clone(&shared) as Arc<dyn WatchEvents>);
        Self { shared, watcher }
    }

    /// Ensure the base and cache directories exist, scan them, and begin
    /// watching for changes.
    pub fn start(&mut self) -> TesseraResult<()> {
        for (dir, what) in [
            (self.shared.base_dir.as_path(), "images"),
            (self.shared.tiles.cache_dir(), "cache"),
        ] {
            if !dir.exists() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("create {what} directory \"{}\"", dir.display()))?;
                info!("created {what} directory as it did not exist");
            }
        }
        self.watcher.start()
    }

    /// Stop watching for file changes.
    pub fn stop(&mut self) {
        self.watcher.stop();
    }

    /// Base directory containing the source images.
    pub fn base_dir(&self) -> &Path {
        &self.shared.base_dir
    }

    /// Directory containing derived cache files.
    pub fn cache_dir(&self) -> &Path {
        self.shared.tiles.cache_dir()
    }

    /// Number of indexed assets.
    pub fn size(&self) -> usize {
        lock(&self.shared.assets).len()
    }

    /// Look up an asset by filename.
    pub fn get(&self, filename: &str) -> Option<Arc<Asset>> {
        lock(&self.shared.assets).get(filename).cloned()
    }

    /// Look up an asset by filename, applying visibility filtering.
    ///
    /// `pattern` overrides the configured default allow pattern.
    pub fn get_visible(
        &self,
        filename: &str,
        observer: Option<&ObserverIdentity>,
        pattern: Option<&str>,
    ) -> Option<Arc<Asset>> {
        if !self.allowed(filename, observer, pattern) {
            return None;
        }
        self.get(filename)
    }

    /// Sorted filenames visible to `observer`.
    ///
    /// `pattern` overrides the configured default allow pattern.
    pub fn filenames(
        &self,
        observer: Option<&ObserverIdentity>,
        pattern: Option<&str>,
    ) -> Vec<String> {
        lock(&self.shared.assets)
            .keys()
            .filter(|filename| self.allowed(filename, observer, pattern))
            .cloned()
            .collect()
    }

    fn allowed(
        &self,
        filename: &str,
        observer: Option<&ObserverIdentity>,
        pattern: Option<&str>,
    ) -> bool {
        match pattern {
            Some(pattern) => PathFilter::new(pattern).is_allowed(filename, observer),
            None => self.shared.filter.is_allowed(filename, observer),
        }
    }

    #[cfg(test)]
    pub(crate) fn handler(&self) -> Arc<dyn WatchEvents> {
        Arc::clone(&self.shared) as Arc<dyn WatchEvents>
    }
}

#[cfg(test)]
#[path = "../../tests/unit/storage/index.rs"]
mod tests;
