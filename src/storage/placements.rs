//! Persistent registry of placed visual instances.
//!
//! The embedding renderer records one row per placement so the world can be
//! restored across restarts. The data file lives on the shared filesystem
//! and is read and written under [`LockedFile`] locks. Rows are
//! `;`-delimited with the asset filename last, since filenames may contain
//! almost anything.

use std::fs;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Context;
use tracing::warn;

use crate::foundation::error::TesseraResult;
use crate::storage::locked::LockedFile;

/// Largest accepted instance width/height, in cells.
pub const MAX_INSTANCE_DIMENSION: u32 = 30;

const FIELD_DELIMITER: char = ';';

#[derive(Clone, Debug, PartialEq, Eq)]
/// One persisted placement.
pub struct PlacementRecord {
    /// World the instance is placed in.
    pub world: String,
    /// Block X coordinate of the anchor corner.
    pub x: i32,
    /// Block Y coordinate of the anchor corner.
    pub y: i32,
    /// Block Z coordinate of the anchor corner.
    pub z: i32,
    /// Width in cells.
    pub width: u32,
    /// Height in cells.
    pub height: u32,
    /// Asset filename the instance renders.
    pub filename: String,
}

impl PlacementRecord {
    fn to_line(&self) -> String {
        format!(
            "{};{};{};{};{};{};{}",
            self.world, self.x, self.y, self.z, self.width, self.height, self.filename
        )
    }

    fn parse(line: &str) -> Option<Self> {
        let mut fields = line.splitn(7, FIELD_DELIMITER);
        let world = fields.next()?.to_string();
        let x = fields.next()?.parse().ok()?;
        let y = fields.next()?.parse().ok()?;
        let z = fields.next()?.parse().ok()?;
        let width: u32 = fields.next()?.parse().ok()?;
        let height: u32 = fields.next()?.parse().ok()?;
        let filename = fields.next()?.to_string();
        if world.is_empty() || filename.is_empty() || width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            world,
            x,
            y,
            z,
            width: width.min(MAX_INSTANCE_DIMENSION),
            height: height.min(MAX_INSTANCE_DIMENSION),
            filename,
        })
    }
}

/// Locked, line-oriented storage for [`PlacementRecord`]s with a dirty flag
/// for periodic saves.
pub struct PlacementStore {
    path: PathBuf,
    dirty: AtomicBool,
}

impl PlacementStore {
    /// Create a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            dirty: AtomicBool::new(false),
        }
    }

    /// Backing file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read all placements. A missing data file is an empty store; malformed
    /// rows are skipped with a warning.
    pub fn load(&self) -> TesseraResult<Vec<PlacementRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let locked = LockedFile::open_read(&self.path)
            .with_context(|| format!("open placements file \"{}\"", self.path.display()))?;
        let reader = BufReader::new(locked);

        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line.context("read placements file")?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match PlacementRecord::parse(line) {
                Some(record) => records.push(record),
                None => warn!("invalid placement row: {line}"),
            }
        }
        Ok(records)
    }

    /// Replace the stored placements with `records`.
    pub fn save(&self, records: &[PlacementRecord]) -> TesseraResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("create placements directory")?;
        }
        let locked = LockedFile::create_write(&self.path)
            .with_context(|| format!("open placements file \"{}\"", self.path.display()))?;
        let mut writer = BufWriter::new(locked);
        for record in records {
            writeln!(writer, "{}", record.to_line()).context("write placements file")?;
        }
        writer.flush().context("write placements file")?;
        Ok(())
    }

    /// Note that placements changed since the last save.
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clear and return the dirty flag; callers save when it was set.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/storage/placements.rs"]
mod tests;
