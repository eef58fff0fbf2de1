use std::fs;
use std::time::{Duration, SystemTime};

use super::*;
use crate::foundation::palette::nearest_index;

fn cache_at(dir: &Path, animate: bool) -> TileCache {
    TileCache::new(dir, TileIdAllocator::new(0, 1_000_000).unwrap(), animate)
}

fn write_png(path: &Path, rgba: [u8; 4]) {
    let img = image::RgbaImage::from_pixel(64, 64, image::Rgba(rgba));
    img.save(path).unwrap();
}

fn write_gif(path: &Path, frames: &[([u8; 4], u32)]) {
    let file = fs::File::create(path).unwrap();
    let mut encoder = image::codecs::gif::GifEncoder::new(file);
    encoder
        .encode_frames(frames.iter().map(|&(rgba, delay_ms)| {
            image::Frame::from_parts(
                image::RgbaImage::from_pixel(64, 64, image::Rgba(rgba)),
                0,
                0,
                image::Delay::from_numer_denom_ms(delay_ms, 1),
            )
        }))
        .unwrap();
}

fn age_source(path: &Path) {
    let file = fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::UNIX_EPOCH + Duration::from_secs(1_000))
        .unwrap();
}

#[test]
fn animated_sets_round_trip_through_disk() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("anim.gif");
    write_gif(&source, &[([255, 0, 0, 255], 100), ([0, 0, 255, 255], 100)]);
    age_source(&source);

    let generated = cache_at(dir.path(), true).load_or_generate(&source, "anim.gif", SizeKey::new(2, 1));
    assert_eq!(generated.columns(), 2);
    assert_eq!(generated.steps(), 2);
    assert_eq!(generated.delay(), 2); // 100 ms = 2 ticks of 50 ms

    // Remove the source: a second engine must answer purely from disk.
    fs::remove_file(&source).unwrap();
    let loaded = cache_at(dir.path(), true).load_or_generate(&source, "anim.gif", SizeKey::new(2, 1));

    assert_eq!(loaded.delay(), generated.delay());
    assert_eq!(loaded.steps(), generated.steps());
    for (a, b) in generated.tiles().zip(loaded.tiles()) {
        assert_eq!(a.pixels(), b.pixels());
    }
}

#[test]
fn stale_cache_regenerates_from_newer_source() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("img.png");
    write_png(&source, [0, 255, 0, 255]);
    age_source(&source);

    let cache = cache_at(dir.path(), true);
    let green = cache.load_or_generate(&source, "img.png", SizeKey::new(1, 1));
    assert_eq!(
        green.tile(0, 0, 0).pixels()[0],
        nearest_index([0, 255, 0, 255])
    );

    // Touch the source with newer content; the cache on disk is now stale.
    write_png(&source, [255, 255, 0, 255]);
    let file = fs::File::options().write(true).open(&source).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(100))
        .unwrap();

    let yellow = cache.load_or_generate(&source, "img.png", SizeKey::new(1, 1));
    assert_eq!(
        yellow.tile(0, 0, 0).pixels()[0],
        nearest_index([255, 255, 0, 255])
    );
}

#[test]
fn single_frame_sources_have_no_delay() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("img.png");
    write_png(&source, [10, 20, 30, 255]);

    let set = cache_at(dir.path(), true).load_or_generate(&source, "img.png", SizeKey::new(1, 1));
    assert_eq!(set.steps(), 1);
    assert_eq!(set.delay(), 0);
}

#[test]
fn animation_disabled_renders_first_frame_only() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("anim.gif");
    write_gif(&source, &[([255, 0, 0, 255], 100), ([0, 0, 255, 255], 100)]);

    let set = cache_at(dir.path(), false).load_or_generate(&source, "anim.gif", SizeKey::new(1, 1));
    assert_eq!(set.steps(), 1);
    assert_eq!(set.delay(), 0);
}

#[test]
fn modal_delay_wins_and_is_clamped() {
    let dir = tempfile::tempdir().unwrap();

    let source = dir.path().join("mode.gif");
    write_gif(
        &source,
        &[
            ([255, 0, 0, 255], 100),
            ([0, 255, 0, 255], 100),
            ([0, 0, 255, 255], 200),
        ],
    );
    let set = cache_at(dir.path(), true).load_or_generate(&source, "mode.gif", SizeKey::new(1, 1));
    assert_eq!(set.delay(), 2);

    let quick = dir.path().join("quick.gif");
    write_gif(&quick, &[([255, 0, 0, 255], 10), ([0, 0, 255, 255], 10)]);
    let set = cache_at(dir.path(), true).load_or_generate(&quick, "quick.gif", SizeKey::new(1, 1));
    assert_eq!(set.delay(), MIN_STEP_DELAY);

    let slow = dir.path().join("slow.gif");
    write_gif(&slow, &[([255, 0, 0, 255], 60_000), ([0, 0, 255, 255], 60_000)]);
    let set = cache_at(dir.path(), true).load_or_generate(&slow, "slow.gif", SizeKey::new(1, 1));
    assert_eq!(set.delay(), MAX_STEP_DELAY);
}

#[test]
fn unrenderable_sources_fall_back_to_shared_error_tiles() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("img.png");
    fs::write(&source, b"definitely not an image").unwrap();

    let cache = cache_at(dir.path(), true);
    let set = cache.load_or_generate(&source, "img.png", SizeKey::new(2, 3));

    assert_eq!(set.columns(), 2);
    assert_eq!(set.rows(), 3);
    assert_eq!(set.steps(), 1);
    assert_eq!(set.delay(), 0);
    for tile in set.tiles() {
        assert!(tile.pixels().iter().all(|&px| px == ERROR_INDEX));
        assert!(Arc::ptr_eq(tile, set.tile(0, 0, 0)));
    }

    // Error sets are never persisted.
    assert!(!dir.path().join("img.png.2-3.cache").exists());
}

fn preamble(steps: u16, delay: Option<u8>) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&CACHE_SIGNATURE);
    bytes.push(CACHE_VERSION);
    bytes.extend_from_slice(&steps.to_le_bytes());
    if let Some(delay) = delay {
        bytes.push(delay);
    }
    bytes
}

#[test]
fn format_violations_are_outdated_and_io_failures_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_at(dir.path(), true);
    let path = dir.path().join("probe.cache");
    let size = SizeKey::new(1, 1);

    let cases: Vec<(Vec<u8>, bool)> = vec![
        // Wrong signature.
        {
            let mut bytes = preamble(1, None);
            bytes[0] = b'X';
            bytes.extend_from_slice(&[0u8; TILE_PIXELS]);
            (bytes, true)
        },
        // Unsupported version.
        {
            let mut bytes = preamble(1, None);
            bytes[3] = CACHE_VERSION + 1;
            bytes.extend_from_slice(&[0u8; TILE_PIXELS]);
            (bytes, true)
        },
        // Step count out of range.
        (preamble(0, None), true),
        (preamble(MAX_STEPS + 1, None), true),
        // Delay out of range.
        (preamble(2, Some(0)), true),
        (preamble(2, Some(MAX_STEP_DELAY + 1)), true),
        // Truncated payload.
        {
            let mut bytes = preamble(1, None);
            bytes.extend_from_slice(&[0u8; 100]);
            (bytes, false)
        },
    ];

    for (bytes, outdated) in cases {
        fs::write(&path, &bytes).unwrap();
        match cache.read_cache_file(&path, size) {
            Err(CacheReadError::Outdated(_)) => assert!(outdated, "expected corrupt"),
            Err(CacheReadError::Corrupt(_)) => assert!(!outdated, "expected outdated"),
            Ok(_) => panic!("cache file unexpectedly parsed"),
        }
    }

    // A well-formed file still parses.
    let mut bytes = preamble(1, None);
    bytes.extend_from_slice(&[7u8; TILE_PIXELS]);
    fs::write(&path, &bytes).unwrap();
    let set = cache.read_cache_file(&path, size).ok().unwrap();
    assert_eq!(set.tile(0, 0, 0).pixels(), vec![7u8; TILE_PIXELS]);
}

#[test]
fn delete_cached_touches_only_derived_variants() {
    let dir = tempfile::tempdir().unwrap();
    let cache = cache_at(dir.path(), true);

    for name in [
        "img.png.1-1.cache",
        "img.png.12-3.cache",
        "img.png.cache",
        "img.png.a-b.cache",
        "other.png.1-1.cache",
    ] {
        fs::write(dir.path().join(name), b"x").unwrap();
    }

    cache.delete_cached("img.png");

    assert!(!dir.path().join("img.png.1-1.cache").exists());
    assert!(!dir.path().join("img.png.12-3.cache").exists());
    assert!(dir.path().join("img.png.cache").exists());
    assert!(dir.path().join("img.png.a-b.cache").exists());
    assert!(dir.path().join("other.png.1-1.cache").exists());
}

#[test]
fn nested_filenames_cache_under_nested_directories() {
    let dir = tempfile::tempdir().unwrap();
    let source_dir = tempfile::tempdir().unwrap();
    let source = source_dir.path().join("img.png");
    write_png(&source, [1, 2, 3, 255]);

    let cache = cache_at(dir.path(), true);
    cache.load_or_generate(&source, "events/summer/img.png", SizeKey::new(1, 1));
    let derived = dir.path().join("events/summer/img.png.1-1.cache");
    assert!(derived.is_file());

    cache.delete_cached("events/summer/img.png");
    assert!(!derived.exists());
}
