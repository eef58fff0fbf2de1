//! Rendering and serialization of tile sets.
//!
//! The cache produces a [`TileSet`] for an (asset, size) pair, preferring a
//! valid on-disk cache, else generating from the source image, else falling
//! back to a visibly-distinct error pattern. Generation decodes one or more
//! frames, composites them onto a persistent canvas, scales to the exact
//! output dimensions and quantizes every pixel into the fixed palette.
//!
//! Disk cache format, version 1:
//!
//! ```text
//! byte[3]  signature = "YMP"
//! byte     format version (= 1)
//! u16le    step count N (1..=MAX_STEPS)
//! byte     inter-step delay, present only if N > 1
//! byte[]   N x (columns*rows) tile buffers of TILE_PIXELS bytes each,
//!          ordered column-major, then row, then step
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::UNIX_EPOCH;

use anyhow::Context;
use image::codecs::gif::GifDecoder;
use image::imageops::{self, FilterType};
use image::{AnimationDecoder, ImageDecoder, ImageFormat, ImageReader, RgbaImage};
use tracing::{error, info, warn};

use crate::foundation::id::TileIdAllocator;
use crate::foundation::palette::{self, ERROR_INDEX};
use crate::render::tile::{
    MAX_STEP_DELAY, MAX_STEPS, MIN_STEP_DELAY, TILE_DIMENSION, TILE_PIXELS, Tile, TileSet,
};
use crate::storage::asset::SizeKey;
use crate::storage::locked::LockedFile;

/// Magic bytes opening every cache file.
pub const CACHE_SIGNATURE: [u8; 3] = *b"YMP";
/// Supported cache format version.
pub const CACHE_VERSION: u8 = 1;

const CACHE_EXT: &str = "cache";
const TICK_MS: u32 = 50;

enum CacheReadError {
    /// Recognizably foreign or out-of-range data; the file will be rewritten.
    Outdated(&'static str),
    /// I/O failure or truncation while reading.
    Corrupt(anyhow::Error),
}

/// Rendering and cache engine shared by every asset of an index.
pub struct TileCache {
    cache_dir: PathBuf,
    ids: TileIdAllocator,
    animate: bool,
    error_tile: OnceLock<Arc<Tile>>,
}

impl TileCache {
    /// Create an engine writing derived files under `cache_dir`.
    ///
    /// `ids` is the allocator all generated tiles draw their identifiers
    /// from; `animate` controls whether animated sources render all steps or
    /// just the first.
    pub fn new(cache_dir: impl Into<PathBuf>, ids: TileIdAllocator, animate: bool) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ids,
            animate,
            error_tile: OnceLock::new(),
        }
    }

    /// Directory holding derived cache files.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    #[cfg(test)]
    pub(crate) fn ids(&self) -> &TileIdAllocator {
        &self.ids
    }

    fn cache_path(&self, filename: &str, size: SizeKey) -> PathBuf {
        self.cache_dir
            .join(format!("{filename}.{}.{CACHE_EXT}", size.cache_suffix()))
    }

    /// Produce the tile set for `source` at `size`.
    ///
    /// A disk cache is used only when it exists and is strictly newer than
    /// the source file; anything else regenerates. Failures never propagate:
    /// an unrenderable source yields the error tile set (which is not written
    /// to disk), and a failed cache write still returns the in-memory result.
    pub fn load_or_generate(&self, source: &Path, filename: &str, size: SizeKey) -> Arc<TileSet> {
        let cache_file = self.cache_path(filename, size);
        let source_modified = fs::metadata(source)
            .and_then(|m| m.modified())
            .unwrap_or(UNIX_EPOCH);
        let cache_modified = fs::metadata(&cache_file).and_then(|m| m.modified()).ok();

        if let Some(cache_modified) = cache_modified
            && cache_modified > source_modified
        {
            match self.read_cache_file(&cache_file, size) {
                Ok(set) => return Arc::new(set),
                Err(CacheReadError::Outdated(reason)) => info!(
                    "cache file \"{}\" is outdated and will be overwritten: {reason}",
                    cache_file.display()
                ),
                Err(CacheReadError::Corrupt(e)) => {
                    warn!("cache file \"{}\" is corrupted: {e:#}", cache_file.display());
                }
            }
        }

        match self.generate(source, size) {
            Ok(set) => {
                if let Err(e) = self.write_cache_file(&cache_file, &set) {
                    error!(
                        "failed to write cache file \"{}\": {e:#}",
                        cache_file.display()
                    );
                }
                Arc::new(set)
            }
            Err(e) => {
                error!("failed to render tiles from \"{}\": {e:#}", source.display());
                Arc::new(self.error_tile_set(size))
            }
        }
    }

    fn read_cache_file(&self, path: &Path, size: SizeKey) -> Result<TileSet, CacheReadError> {
        let corrupt = |e: io::Error, what: &'static str| {
            CacheReadError::Corrupt(anyhow::Error::new(e).context(what))
        };

        let locked =
            LockedFile::open_read(path).map_err(|e| corrupt(e, "open cache file"))?;
        let mut reader = BufReader::new(locked);

        let mut header = [0u8; 4];
        reader
            .read_exact(&mut header)
            .map_err(|e| corrupt(e, "read cache header"))?;
        if header[..3] != CACHE_SIGNATURE {
            return Err(CacheReadError::Outdated("invalid file signature"));
        }
        if header[3] != CACHE_VERSION {
            return Err(CacheReadError::Outdated("incompatible format version"));
        }

        let mut step_bytes = [0u8; 2];
        reader
            .read_exact(&mut step_bytes)
            .map_err(|e| corrupt(e, "read step count"))?;
        let steps = u16::from_le_bytes(step_bytes);
        if !(1..=MAX_STEPS).contains(&steps) {
            return Err(CacheReadError::Outdated("animation step count out of range"));
        }

        let mut delay = 0u8;
        if steps > 1 {
            let mut byte = [0u8; 1];
            reader
                .read_exact(&mut byte)
                .map_err(|e| corrupt(e, "read step delay"))?;
            delay = byte[0];
            if !(MIN_STEP_DELAY..=MAX_STEP_DELAY).contains(&delay) {
                return Err(CacheReadError::Outdated("step delay out of range"));
            }
        }

        let mut tiles = Vec::with_capacity((size.width * size.height * u32::from(steps)) as usize);
        for _ in 0..size.width * size.height * u32::from(steps) {
            let mut pixels = vec![0u8; TILE_PIXELS];
            reader
                .read_exact(&mut pixels)
                .map_err(|e| corrupt(e, "read tile pixels"))?;
            tiles.push(Arc::new(Tile::new(self.ids.next(), pixels)));
        }

        Ok(TileSet::from_tiles(
            size.width,
            size.height,
            u32::from(steps),
            delay,
            tiles,
        ))
    }

    fn write_cache_file(&self, path: &Path, set: &TileSet) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("create cache directory")?;
        }
        let locked = LockedFile::create_write(path).context("open cache file for writing")?;
        let mut writer = BufWriter::new(locked);

        writer.write_all(&CACHE_SIGNATURE)?;
        writer.write_all(&[CACHE_VERSION])?;
        let steps = set.steps() as u16;
        writer.write_all(&steps.to_le_bytes())?;
        if steps > 1 {
            writer.write_all(&[set.delay()])?;
        }
        for tile in set.tiles() {
            writer.write_all(tile.pixels())?;
        }
        writer.flush()?;
        Ok(())
    }

    fn generate(&self, source: &Path, size: SizeKey) -> anyhow::Result<TileSet> {
        let out_width = size.width * TILE_DIMENSION;
        let out_height = size.height * TILE_DIMENSION;
        if out_width == 0 || out_height == 0 {
            anyhow::bail!("requested size {size} is empty");
        }

        let (frames, delay) = self.render_frames(source, out_width, out_height)?;

        let tile_dim = TILE_DIMENSION as usize;
        let stride = out_width as usize;
        let mut tiles = Vec::with_capacity((size.width * size.height) as usize * frames.len());
        for column in 0..size.width {
            for row in 0..size.height {
                for frame in &frames {
                    let left = (column as usize) * tile_dim;
                    let top = (row as usize) * tile_dim;
                    let mut pixels = vec![0u8; TILE_PIXELS];
                    for y in 0..tile_dim {
                        let src = (top + y) * stride + left;
                        pixels[y * tile_dim..(y + 1) * tile_dim]
                            .copy_from_slice(&frame[src..src + tile_dim]);
                    }
                    tiles.push(Arc::new(Tile::new(self.ids.next(), pixels)));
                }
            }
        }

        Ok(TileSet::from_tiles(
            size.width,
            size.height,
            frames.len() as u32,
            delay,
            tiles,
        ))
    }

    /// Decode, composite, scale and quantize the source into one
    /// palette-index buffer per animation step, plus the inter-step delay.
    fn render_frames(
        &self,
        source: &Path,
        out_width: u32,
        out_height: u32,
    ) -> anyhow::Result<(Vec<Vec<u8>>, u8)> {
        let reader = ImageReader::open(source)
            .context("open source image")?
            .with_guessed_format()
            .context("probe source format")?;

        if reader.format() == Some(ImageFormat::Gif) && self.animate {
            return self.render_animation(source, out_width, out_height);
        }

        let image = reader.decode().context("decode source image")?;
        let scaled = imageops::resize(&image.to_rgba8(), out_width, out_height, FilterType::Triangle);
        Ok((vec![palette::quantize(scaled.as_raw())], 0))
    }

    fn render_animation(
        &self,
        source: &Path,
        out_width: u32,
        out_height: u32,
    ) -> anyhow::Result<(Vec<Vec<u8>>, u8)> {
        let file = BufReader::new(fs::File::open(source).context("open source image")?);
        let decoder = GifDecoder::new(file).context("decode animation")?;
        let (canvas_width, canvas_height) = decoder.dimensions();
        // Persistent canvas: sub-region steps composite over what previous
        // steps left behind.
        let mut canvas = RgbaImage::new(canvas_width, canvas_height);

        let mut delays: HashMap<u32, u32> = HashMap::new();
        let mut rendered = Vec::new();
        for frame in decoder.into_frames().take(usize::from(MAX_STEPS)) {
            let frame = frame.context("decode animation step")?;
            let (numer, denom) = frame.delay().numer_denom_ms();
            let delay_ms = if denom == 0 { numer } else { numer / denom };
            *delays.entry(delay_ms).or_insert(0) += 1;

            imageops::overlay(
                &mut canvas,
                frame.buffer(),
                i64::from(frame.left()),
                i64::from(frame.top()),
            );
            let scaled = imageops::resize(&canvas, out_width, out_height, FilterType::Triangle);
            rendered.push(palette::quantize(scaled.as_raw()));
        }
        if rendered.is_empty() {
            anyhow::bail!("animation contained no steps");
        }

        let delay = if rendered.len() > 1 {
            modal_delay_ticks(&delays)
        } else {
            0
        };
        Ok((rendered, delay))
    }

    /// Single-step tile set filled with the error color, sized to the
    /// request. One error tile instance is shared across the whole set and
    /// across requests; error sets are never written to disk.
    pub fn error_tile_set(&self, size: SizeKey) -> TileSet {
        let tile = self.error_tile.get_or_init(|| {
            Arc::new(Tile::new(self.ids.next(), vec![ERROR_INDEX; TILE_PIXELS]))
        });
        let tiles = vec![Arc::clone(tile); (size.width * size.height) as usize];
        TileSet::from_tiles(size.width, size.height, 1, 0, tiles)
    }

    /// Delete every derived cache file of `filename`, across all sizes.
    pub fn delete_cached(&self, filename: &str) {
        let derived = self.cache_dir.join(filename);
        let Some(dir) = derived.parent() else { return };
        let Some(stem) = derived.file_name().and_then(|n| n.to_str()) else {
            return;
        };

        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!("failed to list cache files for \"{filename}\": {e}");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !is_derived_cache_name(name, stem) {
                continue;
            }
            if let Err(e) = fs::remove_file(entry.path()) {
                warn!(
                    "failed to delete cache file \"{}\": {e}",
                    entry.path().display()
                );
            }
        }
    }
}

/// `<stem>.<digits>-<digits>.cache`
fn is_derived_cache_name(name: &str, stem: &str) -> bool {
    name.strip_prefix(stem)
        .and_then(|rest| rest.strip_prefix('.'))
        .and_then(|rest| rest.strip_suffix(CACHE_EXT))
        .and_then(|rest| rest.strip_suffix('.'))
        .and_then(|dims| dims.split_once('-'))
        .is_some_and(|(w, h)| {
            !w.is_empty()
                && !h.is_empty()
                && w.bytes().all(|b| b.is_ascii_digit())
                && h.bytes().all(|b| b.is_ascii_digit())
        })
}

/// Most frequent source delay, scaled from milliseconds into 50 ms ticks and
/// clamped to the supported range. Ties prefer the shorter delay.
fn modal_delay_ticks(delays: &HashMap<u32, u32>) -> u8 {
    let modal_ms = delays
        .iter()
        .max_by_key(|entry| (*entry.1, std::cmp::Reverse(*entry.0)))
        .map(|(&ms, _)| ms)
        .unwrap_or(0);
    let ticks = (modal_ms as f32 / TICK_MS as f32).round() as u32;
    ticks.clamp(u32::from(MIN_STEP_DELAY), u32::from(MAX_STEP_DELAY)) as u8
}

#[cfg(test)]
#[path = "../../tests/unit/render/cache.rs"]
mod tests;
