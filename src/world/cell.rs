//! Spatial partitioning coordinates.
//!
//! The world is divided into square cells of 4x4 chunks (a chunk being 16
//! sub-units across). Cell ids are cheap value objects; neighborhoods are
//! lists of coordinate values derived from precomputed offset tables.

use std::fmt;
use std::sync::Arc;

/// Sub-units along one chunk edge.
pub const CHUNK_SPAN: i32 = 16;
/// Chunks along one cell edge.
pub const CELL_SPAN_CHUNKS: i32 = 4;
/// Highest supported neighborhood level.
pub const MAX_NEIGHBORHOOD_LEVEL: u8 = 3;

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
/// Identity of a world, compared by name.
pub struct WorldId(Arc<str>);

impl WorldId {
    /// Wrap a world name.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The world name.
    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, PartialEq, Eq, Hash, Debug)]
/// Identity of one spatial cell: a world plus two cell coordinates.
pub struct CellId {
    world: WorldId,
    x: i32,
    z: i32,
}

impl CellId {
    /// Build a cell id from cell coordinates.
    pub fn new(world: WorldId, x: i32, z: i32) -> Self {
        Self { world, x, z }
    }

    /// Cell containing the given chunk.
    pub fn from_chunk(world: WorldId, chunk_x: i32, chunk_z: i32) -> Self {
        // Arithmetic shift floors toward negative infinity, matching the
        // flooring integer division the partitioning is defined by.
        Self::new(world, chunk_x >> 2, chunk_z >> 2)
    }

    /// Cell containing the given continuous position.
    pub fn from_position(world: WorldId, x: f64, z: f64) -> Self {
        let chunk_x = (x.floor() as i32) >> 4;
        let chunk_z = (z.floor() as i32) >> 4;
        Self::from_chunk(world, chunk_x, chunk_z)
    }

    /// World this cell belongs to.
    pub fn world(&self) -> &WorldId {
        &self.world
    }

    /// Cell X coordinate.
    pub fn x(&self) -> i32 {
        self.x
    }

    /// Cell Z coordinate.
    pub fn z(&self) -> i32 {
        self.z
    }

    /// All cells within observation range at `level`, this cell included.
    ///
    /// Levels above [`MAX_NEIGHBORHOOD_LEVEL`] are clamped. The shapes are
    /// rounded (diamond-cornered) squares, not bounding boxes; their sizes
    /// are fixed per level: 5, 21, 37 and 61 cells.
    pub fn neighborhood(&self, level: u8) -> Vec<CellId> {
        let level = level.min(MAX_NEIGHBORHOOD_LEVEL);
        NEIGHBORHOOD_OFFSETS[level as usize]
            .iter()
            .map(|&(dx, dz)| CellId::new(self.world.clone(), self.x + dx, self.z + dz))
            .collect()
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.world, self.x, self.z)
    }
}

/// Neighborhood level for a configured view distance (in chunks).
pub fn neighborhood_level(view_distance: u32) -> u8 {
    (view_distance / CELL_SPAN_CHUNKS as u32).min(u32::from(MAX_NEIGHBORHOOD_LEVEL)) as u8
}

// ·|·
// XOX
// ·|·
const NEIGHBORHOOD_L0: &[(i32, i32)] = &[(0, -1), (-1, 0), (0, 0), (1, 0), (0, 1)];

// ·X|X·
// XX|XX
// XXOXX
// XX|XX
// ·X|X·
const NEIGHBORHOOD_L1: &[(i32, i32)] = &[
    (-1, -2), (0, -2), (1, -2),
    (-2, -1), (-1, -1), (0, -1), (1, -1), (2, -1),
    (-2, 0), (-1, 0), (0, 0), (1, 0), (2, 0),
    (-2, 1), (-1, 1), (0, 1), (1, 1), (2, 1),
    (-1, 2), (0, 2), (1, 2),
];

// ··X|X··
// ·XX|XX·
// XXX|XXX
// XXXOXXX
// XXX|XXX
// ·XX|XX·
// ··X|X··
const NEIGHBORHOOD_L2: &[(i32, i32)] = &[
    (-1, -3), (0, -3), (1, -3),
    (-2, -2), (-1, -2), (0, -2), (1, -2), (2, -2),
    (-3, -1), (-2, -1), (-1, -1), (0, -1), (1, -1), (2, -1), (3, -1),
    (-3, 0), (-2, 0), (-1, 0), (0, 0), (1, 0), (2, 0), (3, 0),
    (-3, 1), (-2, 1), (-1, 1), (0, 1), (1, 1), (2, 1), (3, 1),
    (-2, 2), (-1, 2), (0, 2), (1, 2), (2, 2),
    (-1, 3), (0, 3), (1, 3),
];

// ···X|X···
// ·XXX|XXX·
// ·XXX|XXX·
// XXXX|XXXX
// XXXXOXXXX
// XXXX|XXXX
// ·XXX|XXX·
// ·XXX|XXX·
// ···X|X···
const NEIGHBORHOOD_L3: &[(i32, i32)] = &[
    (-1, -4), (0, -4), (1, -4),
    (-3, -3), (-2, -3), (-1, -3), (0, -3), (1, -3), (2, -3), (3, -3),
    (-3, -2), (-2, -2), (-1, -2), (0, -2), (1, -2), (2, -2), (3, -2),
    (-4, -1), (-3, -1), (-2, -1), (-1, -1), (0, -1), (1, -1), (2, -1), (3, -1), (4, -1),
    (-4, 0), (-3, 0), (-2, 0), (-1, 0), (0, 0), (1, 0), (2, 0), (3, 0), (4, 0),
    (-4, 1), (-3, 1), (-2, 1), (-1, 1), (0, 1), (1, 1), (2, 1), (3, 1), (4, 1),
    (-3, 2), (-2, 2), (-1, 2), (0, 2), (1, 2), (2, 2), (3, 2),
    (-3, 3), (-2, 3), (-1, 3), (0, 3), (1, 3), (2, 3), (3, 3),
    (-1, 4), (0, 4), (1, 4),
];

const NEIGHBORHOOD_OFFSETS: [&[(i32, i32)]; 4] = [
    NEIGHBORHOOD_L0,
    NEIGHBORHOOD_L1,
    NEIGHBORHOOD_L2,
    NEIGHBORHOOD_L3,
];

#[cfg(test)]
#[path = "../../tests/unit/world/cell.rs"]
mod tests;
