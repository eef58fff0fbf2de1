//! Cell occupancy and observer lifecycle.
//!
//! The grid tracks which visual instances sit in which cells and which
//! observers are currently inside them, and drives the load/unload lifecycle
//! as observers cross cell boundaries: entering a cell makes its instances
//! visible to the observer, and the last observer leaving a cell resets the
//! per-observer state its instances hold. Placements themselves persist
//! independently of observer presence.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::foundation::id::{InstanceId, ObserverId};
use crate::foundation::sync::lock;
use crate::world::cell::{CellId, neighborhood_level};

/// Receiver of instance lifecycle signals from the grid.
///
/// Signals are dispatched after the grid's bookkeeping lock is released, so
/// implementations may call back into the grid.
pub trait CellEvents: Send + Sync + 'static {
    /// `instance` should become visible to `observer`.
    fn instance_visible(&self, instance: InstanceId, observer: ObserverId);
    /// `instance` should drop any per-observer state it holds.
    fn instance_reset(&self, instance: InstanceId);
}

#[derive(Default)]
/// One cell's occupancy: placed instances and present observers.
pub struct SpatialCell {
    instances: HashSet<InstanceId>,
    observers: HashSet<ObserverId>,
}

impl SpatialCell {
    /// Placed instances whose footprint intersects this cell.
    pub fn instances(&self) -> impl Iterator<Item = InstanceId> + '_ {
        self.instances.iter().copied()
    }

    /// Observers currently inside this cell's observation range.
    pub fn observers(&self) -> impl Iterator<Item = ObserverId> + '_ {
        self.observers.iter().copied()
    }

    /// Whether both sets are empty.
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty() && self.observers.is_empty()
    }
}

enum Signal {
    Visible(InstanceId, ObserverId),
    Reset(InstanceId),
}

#[derive(Default)]
struct GridState {
    cells: HashMap<CellId, SpatialCell>,
    observer_cells: HashMap<ObserverId, CellId>,
}

/// Registry of spatial cells and the observers moving through them.
pub struct CellGrid {
    level: u8,
    events: Arc<dyn CellEvents>,
    state: Mutex<GridState>,
}

impl CellGrid {
    /// Create a grid whose neighborhood level is derived from
    /// `view_distance` (in chunks).
    pub fn new(view_distance: u32, events: Arc<dyn CellEvents>) -> Self {
        Self {
            level: neighborhood_level(view_distance),
            events,
            state: Mutex::new(GridState::default()),
        }
    }

    /// Neighborhood level in effect (0..=3).
    pub fn level(&self) -> u8 {
        self.level
    }

    /// Register a placed instance in every cell its footprint intersects.
    ///
    /// Observers already inside those cells are signaled immediately.
    pub fn place(&self, instance: InstanceId, cells: &[CellId]) {
        let mut signals = Vec::new();
        let mut notified = HashSet::new();
        {
            let mut state = lock(&self.state);
            for id in cells {
                let cell = state.cells.entry(id.clone()).or_default();
                if cell.instances.insert(instance) {
                    for &observer in &cell.observers {
                        if notified.insert(observer) {
                            signals.push(Signal::Visible(instance, observer));
                        }
                    }
                }
            }
        }
        self.dispatch(signals);
    }

    /// Remove a placed instance from the given cells.
    pub fn remove(&self, instance: InstanceId, cells: &[CellId]) {
        let mut was_present = false;
        {
            let mut state = lock(&self.state);
            for id in cells {
                if let Some(cell) = state.cells.get_mut(id) {
                    was_present |= cell.instances.remove(&instance);
                    if cell.is_empty() {
                        state.cells.remove(id);
                    }
                }
            }
        }
        if was_present {
            self.events.instance_reset(instance);
        }
    }

    /// Record that `observer`'s computed cell is now `cell`.
    ///
    /// Call on join, respawn, world change and chunk crossings; a call with
    /// the unchanged cell is a no-op. Cells leaving the observer's
    /// neighborhood are unloaded, newly covered cells are loaded.
    pub fn observer_moved(&self, observer: ObserverId, cell: CellId) {
        let mut signals = Vec::new();
        let mut touched = HashSet::new();
        {
            let mut state = lock(&self.state);
            let prev = state.observer_cells.get(&observer).cloned();
            if prev.as_ref() == Some(&cell) {
                return;
            }
            state.observer_cells.insert(observer, cell.clone());
            debug!("observer moved to cell {cell}");

            let desired: HashSet<CellId> = cell.neighborhood(self.level).into_iter().collect();
            let current: HashSet<CellId> = prev
                .map(|p| p.neighborhood(self.level).into_iter().collect())
                .unwrap_or_default();

            for id in current.difference(&desired) {
                Self::unload_cell(&mut state, id, observer, &mut touched, &mut signals);
            }
            touched.clear();
            for id in desired.difference(&current) {
                Self::load_cell(&mut state, id, observer, &mut touched, &mut signals);
            }
        }
        self.dispatch(signals);
    }

    /// Record that `observer` disconnected.
    pub fn observer_left(&self, observer: ObserverId) {
        let mut signals = Vec::new();
        let mut touched = HashSet::new();
        {
            let mut state = lock(&self.state);
            let Some(prev) = state.observer_cells.remove(&observer) else {
                return;
            };
            for id in prev.neighborhood(self.level) {
                Self::unload_cell(&mut state, &id, observer, &mut touched, &mut signals);
            }
        }
        self.dispatch(signals);
    }

    /// Run `f` against the cell at `id`, if it is live.
    pub fn with_cell<R>(&self, id: &CellId, f: impl FnOnce(&SpatialCell) -> R) -> Option<R> {
        lock(&self.state).cells.get(id).map(f)
    }

    /// Instances placed in `cell`.
    pub fn instances_at(&self, cell: &CellId) -> Vec<InstanceId> {
        lock(&self.state)
            .cells
            .get(cell)
            .map(|c| c.instances().collect())
            .unwrap_or_default()
    }

    /// Observers currently inside `cell`.
    pub fn observers_at(&self, cell: &CellId) -> Vec<ObserverId> {
        lock(&self.state)
            .cells
            .get(cell)
            .map(|c| c.observers().collect())
            .unwrap_or_default()
    }

    /// The cell an observer was last recorded in.
    pub fn observer_cell(&self, observer: ObserverId) -> Option<CellId> {
        lock(&self.state).observer_cells.get(&observer).cloned()
    }

    /// Number of live (non-empty) cells.
    pub fn cell_count(&self) -> usize {
        lock(&self.state).cells.len()
    }

    /// `touched` dedupes signals for instances whose footprint spans several
    /// of the affected cells.
    fn load_cell(
        state: &mut GridState,
        id: &CellId,
        observer: ObserverId,
        touched: &mut HashSet<InstanceId>,
        signals: &mut Vec<Signal>,
    ) {
        let cell = state.cells.entry(id.clone()).or_default();
        if cell.observers.insert(observer) {
            for &instance in &cell.instances {
                if touched.insert(instance) {
                    signals.push(Signal::Visible(instance, observer));
                }
            }
        }
    }

    fn unload_cell(
        state: &mut GridState,
        id: &CellId,
        observer: ObserverId,
        touched: &mut HashSet<InstanceId>,
        signals: &mut Vec<Signal>,
    ) {
        let Some(cell) = state.cells.get_mut(id) else {
            return;
        };
        if cell.observers.remove(&observer) && cell.observers.is_empty() {
            // Placements persist; only per-observer bookkeeping is cleared.
            for &instance in &cell.instances {
                if touched.insert(instance) {
                    signals.push(Signal::Reset(instance));
                }
            }
        }
        if cell.is_empty() {
            state.cells.remove(id);
        }
    }

    fn dispatch(&self, signals: Vec<Signal>) {
        for signal in signals {
            match signal {
                Signal::Visible(instance, observer) => {
                    self.events.instance_visible(instance, observer);
                }
                Signal::Reset(instance) => self.events.instance_reset(instance),
            }
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/world/grid.rs"]
mod tests;
