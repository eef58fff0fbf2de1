//! Recursive directory scanning and change detection.
//!
//! The watcher keeps a sorted snapshot of every directory under the base path
//! (file path -> last-modified timestamp) and reports changes against it as
//! created/modified/deleted events. Change detection prefers native
//! filesystem notification; when the platform cannot deliver it, the watcher
//! degrades to re-scanning at a fixed interval.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, SystemTime};

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use notify::{EventKind, RecursiveMode, Watcher};
use tracing::{debug, error, warn};
use walkdir::WalkDir;

use crate::foundation::error::{TesseraError, TesseraResult};
use crate::foundation::sync::lock;

const MAX_DEPTH: usize = 32;
const POLL_INTERVAL: Duration = Duration::from_secs(4);
const PROBE_DIRNAME: &str = ".tessera-probe";
const PROBE_WINDOW: Duration = Duration::from_millis(500);

/// Receiver of file change events under a watched directory.
///
/// Callbacks run on the watcher thread (or on the caller of `start` during
/// the initial scan) while the snapshot lock is held; they should hand off
/// long work instead of performing it inline.
pub trait WatchEvents: Send + Sync + 'static {
    /// A file appeared.
    fn on_created(&self, path: &Path);
    /// A file's modification timestamp moved forward.
    fn on_modified(&self, path: &Path);
    /// A file disappeared.
    fn on_deleted(&self, path: &Path);
}

/// Directory path -> (file path -> last-modified timestamp).
type Snapshot = BTreeMap<PathBuf, HashMap<PathBuf, SystemTime>>;

struct WatcherShared {
    base: PathBuf,
    tree: Mutex<Snapshot>,
    events: Arc<dyn WatchEvents>,
}

/// Watches a directory tree and reports file changes to a [`WatchEvents`]
/// handler.
///
/// `start` performs a full synchronous scan (firing `on_created` for every
/// file already present) and then spawns one background thread for change
/// detection. `stop` halts the thread without re-scanning; dropping the
/// watcher stops it as well.
pub struct DirectoryWatcher {
    shared: Arc<WatcherShared>,
    stop_tx: Option<Sender<()>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DirectoryWatcher {
    /// Create a watcher over `base`, delivering events to `events`.
    pub fn new(base: impl Into<PathBuf>, events: Arc<dyn WatchEvents>) -> Self {
        Self {
            shared: Arc::new(WatcherShared {
                base: base.into(),
                tree: Mutex::new(BTreeMap::new()),
                events,
            }),
            stop_tx: None,
            thread: None,
        }
    }

    /// The watched base directory.
    pub fn base(&self) -> &Path {
        &self.shared.base
    }

    /// Scan the tree once and begin background change detection.
    pub fn start(&mut self) -> TesseraResult<()> {
        if self.thread.is_some() {
            return Err(TesseraError::storage("directory watcher is already running"));
        }

        self.shared.scan();

        let (stop_tx, stop_rx) = bounded(1);
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("tessera-watch".into())
            .spawn(move || {
                if native_events_usable(&shared.base) {
                    run_realtime(&shared, &stop_rx);
                } else {
                    warn!(
                        "native change notification unavailable, detection of file changes will be slower"
                    );
                    run_polling(&shared, &stop_rx);
                }
            })
            .map_err(|e| anyhow::Error::new(e).context("spawn watcher thread"))?;

        self.stop_tx = Some(stop_tx);
        self.thread = Some(handle);
        Ok(())
    }

    /// Halt background change detection.
    pub fn stop(&mut self) {
        self.stop_tx.take();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for DirectoryWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl WatcherShared {
    /// Diff the directory tree against the snapshot, firing events.
    ///
    /// Everything in the snapshot is first assumed gone; entries are unmarked
    /// as the traversal re-observes them, so whatever stays marked is
    /// genuinely deleted. A failed traversal abandons the pass before the
    /// deletion flush: a partial walk must not masquerade as mass deletion.
    fn scan(&self) {
        let mut tree = lock(&self.tree);

        let mut dead_dirs: HashSet<PathBuf> = tree.keys().cloned().collect();
        let mut dead_files: HashSet<PathBuf> = tree
            .values()
            .flat_map(|files| files.keys().cloned())
            .collect();

        let complete = self.walk_into(&mut tree, |path, is_dir| {
            if is_dir {
                dead_dirs.remove(path);
            } else {
                dead_files.remove(path);
            }
        });
        if !complete {
            return;
        }

        for path in dead_files {
            if let Some(parent) = path.parent()
                && let Some(files) = tree.get_mut(parent)
            {
                files.remove(&path);
            }
            self.events.on_deleted(&path);
        }
        for path in dead_dirs {
            tree.remove(&path);
        }
    }

    fn walk_into(&self, tree: &mut Snapshot, mut seen: impl FnMut(&Path, bool)) -> bool {
        self.walk_subtree(tree, &self.base, &mut seen)
    }

    fn walk_subtree(
        &self,
        tree: &mut Snapshot,
        root: &Path,
        seen: &mut impl FnMut(&Path, bool),
    ) -> bool {
        for entry in WalkDir::new(root).max_depth(MAX_DEPTH).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("failed to list files under \"{}\": {e}", root.display());
                    return false;
                }
            };
            let path = entry.path();
            if entry.file_type().is_dir() {
                tree.entry(path.to_path_buf()).or_default();
                seen(path, true);
            } else if entry.file_type().is_file() {
                let modified = match entry.metadata().map(|m| m.modified()) {
                    Ok(Ok(modified)) => modified,
                    _ => {
                        warn!("failed to stat \"{}\"", path.display());
                        return false;
                    }
                };
                self.upsert_file(tree, path, modified);
                seen(path, false);
            }
        }
        true
    }

    /// Record a file sighting, firing created/modified as appropriate.
    fn upsert_file(&self, tree: &mut Snapshot, path: &Path, modified: SystemTime) {
        let Some(parent) = path.parent() else {
            return;
        };
        let files = tree.entry(parent.to_path_buf()).or_default();
        match files.get(path) {
            None => {
                files.insert(path.to_path_buf(), modified);
                self.events.on_created(path);
            }
            Some(&old) if modified > old => {
                files.insert(path.to_path_buf(), modified);
                self.events.on_modified(path);
            }
            Some(_) => {}
        }
    }

    /// Apply one native notification to the snapshot.
    fn handle_event(&self, event: notify::Event) {
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }
        let mut tree = lock(&self.tree);
        for path in &event.paths {
            // Renames surface as modify events on some platforms, and some
            // platforms report file creation as modification; classify by
            // what is actually on disk plus what the snapshot knows.
            if matches!(event.kind, EventKind::Remove(_)) || !path.exists() {
                self.handle_removed(&mut tree, path);
            } else if path.is_dir() {
                if !tree.contains_key(path.as_path()) {
                    let mut noop = |_: &Path, _: bool| {};
                    let _ = self.walk_subtree(&mut tree, path, &mut noop);
                }
            } else if let Ok(modified) = fs::metadata(path).and_then(|m| m.modified()) {
                self.upsert_file(&mut tree, path, modified);
            }
        }
    }

    fn handle_removed(&self, tree: &mut Snapshot, path: &Path) {
        if let Some(parent) = path.parent()
            && let Some(files) = tree.get_mut(parent)
            && files.remove(path).is_some()
        {
            self.events.on_deleted(path);
            return;
        }
        self.remove_dir_entries(tree, path);
    }

    /// Flush deletions for every file recorded at or under `dir`.
    ///
    /// The snapshot is sorted by directory path with component-wise ordering,
    /// so all descendants of `dir` form one contiguous key range and the scan
    /// can stop at the first non-descendant.
    fn remove_dir_entries(&self, tree: &mut Snapshot, dir: &Path) {
        if !tree.contains_key(dir) {
            // Already unregistered, can skip work.
            return;
        }
        let mut doomed = Vec::new();
        for key in tree.range(dir.to_path_buf()..).map(|(key, _)| key) {
            if !key.starts_with(dir) {
                break;
            }
            doomed.push(key.clone());
        }
        for key in doomed {
            if let Some(files) = tree.remove(&key) {
                for file in files.keys() {
                    self.events.on_deleted(file);
                }
            }
        }
    }
}

/// Probe whether native change notification actually delivers events here.
///
/// Registers a temporary watch, synthetically creates and deletes a probe
/// subdirectory, and requires at least one event to arrive for it.
fn native_events_usable(base: &Path) -> bool {
    let (tx, rx) = unbounded();
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = tx.send(res);
    }) {
        Ok(watcher) => watcher,
        Err(_) => return false,
    };
    if watcher.watch(base, RecursiveMode::Recursive).is_err() {
        return false;
    }

    let probe = base.join(PROBE_DIRNAME);
    let created = fs::create_dir(&probe).is_ok();
    let _ = fs::remove_dir(&probe);

    let usable = created && rx.recv_timeout(PROBE_WINDOW).is_ok();
    let _ = watcher.unwatch(base);
    usable
}

fn run_realtime(shared: &WatcherShared, stop_rx: &Receiver<()>) {
    let (tx, rx) = unbounded();
    let mut watcher = match notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
        let _ = tx.send(res);
    }) {
        Ok(watcher) => watcher,
        Err(e) => {
            error!("failed to create watch service: {e}");
            return run_polling(shared, stop_rx);
        }
    };
    if let Err(e) = watcher.watch(&shared.base, RecursiveMode::Recursive) {
        error!("failed to register directory \"{}\": {e}", shared.base.display());
        return run_polling(shared, stop_rx);
    }
    debug!("started watching directory at \"{}\"", shared.base.display());

    loop {
        crossbeam_channel::select! {
            recv(stop_rx) -> _ => break,
            recv(rx) -> msg => match msg {
                Ok(Ok(event)) => shared.handle_event(event),
                Ok(Err(e)) => warn!("watch service error: {e}"),
                Err(_) => break,
            },
        }
    }
}

fn run_polling(shared: &WatcherShared, stop_rx: &Receiver<()>) {
    loop {
        match stop_rx.recv_timeout(POLL_INTERVAL) {
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => shared.scan(),
            _ => break,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/storage/watcher.rs"]
mod tests;
