//! Fixed output palette and nearest-color quantization.
//!
//! Every rendered pixel is reduced to one byte: an index into [`PALETTE`].
//! Index 0 is reserved for transparency; the remaining entries are a 6x6x6
//! color cube followed by a 24-step gray ramp.

use rayon::prelude::*;

/// Palette index representing a fully transparent pixel.
pub const TRANSPARENT_INDEX: u8 = 0;

/// Pixels with alpha below this value quantize to [`TRANSPARENT_INDEX`].
pub const ALPHA_THRESHOLD: u8 = 128;

/// Number of usable palette entries (transparent slot included).
pub const PALETTE_LEN: usize = 241;

const CUBE_STEPS: [u8; 6] = [0, 51, 102, 153, 204, 255];

/// The fixed output palette, indexed by the bytes stored in tiles.
///
/// Entry 0 is the transparent slot and never matched by color.
pub const PALETTE: [[u8; 3]; PALETTE_LEN] = build_palette();

/// Palette index used for the error tile pattern (pure red).
pub const ERROR_INDEX: u8 = nearest_opaque(255, 0, 0);

const fn build_palette() -> [[u8; 3]; PALETTE_LEN] {
    let mut out = [[0u8; 3]; PALETTE_LEN];
    let mut i = 0;
    while i < 216 {
        out[1 + i] = [
            CUBE_STEPS[i / 36],
            CUBE_STEPS[(i / 6) % 6],
            CUBE_STEPS[i % 6],
        ];
        i += 1;
    }
    let mut j = 0;
    while j < 24 {
        let v = (8 + j * 10) as u8;
        out[217 + j] = [v, v, v];
        j += 1;
    }
    out
}

const fn nearest_opaque(r: u8, g: u8, b: u8) -> u8 {
    let mut best = 1usize;
    let mut best_dist = i32::MAX;
    let mut i = 1;
    while i < PALETTE_LEN {
        let dr = PALETTE[i][0] as i32 - r as i32;
        let dg = PALETTE[i][1] as i32 - g as i32;
        let db = PALETTE[i][2] as i32 - b as i32;
        let dist = dr * dr + dg * dg + db * db;
        if dist < best_dist {
            best_dist = dist;
            best = i;
        }
        i += 1;
    }
    best as u8
}

/// Quantize one straight RGBA pixel to its palette index.
pub fn nearest_index(rgba: [u8; 4]) -> u8 {
    if rgba[3] < ALPHA_THRESHOLD {
        TRANSPARENT_INDEX
    } else {
        nearest_opaque(rgba[0], rgba[1], rgba[2])
    }
}

/// Quantize a straight RGBA8 buffer into palette indexes, one byte per pixel.
///
/// The conversion is independent per pixel and runs in parallel.
pub fn quantize(rgba: &[u8]) -> Vec<u8> {
    rgba.par_chunks_exact(4)
        .map(|px| nearest_index([px[0], px[1], px[2], px[3]]))
        .collect()
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/palette.rs"]
mod tests;
