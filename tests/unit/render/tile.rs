use std::time::Duration;

use super::*;

fn tile_with(first_byte: u8) -> Arc<Tile> {
    let mut pixels = vec![0u8; TILE_PIXELS];
    pixels[0] = first_byte;
    Arc::new(Tile::new(TileId(i32::from(first_byte)), pixels))
}

#[test]
fn resend_granted_then_denied_then_granted_again() {
    let tile = tile_with(0);
    let observer = ObserverId::random();
    let session_start = SystemTime::UNIX_EPOCH;
    let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);

    assert!(tile.request_resend_at(observer, session_start, t0));
    assert!(!tile.request_resend_at(observer, session_start, t0 + Duration::from_secs(1)));
    assert!(!tile.request_resend_at(
        observer,
        session_start,
        t0 + RESEND_THRESHOLD - Duration::from_secs(1)
    ));
    assert!(tile.request_resend_at(
        observer,
        session_start,
        t0 + RESEND_THRESHOLD + Duration::from_secs(1)
    ));
}

#[test]
fn observer_seen_after_last_send_is_granted_immediately() {
    let tile = tile_with(0);
    let observer = ObserverId::random();
    let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);

    assert!(tile.request_resend_at(observer, SystemTime::UNIX_EPOCH, t0));
    // The observer reconnected after the send; the previous transmission
    // never reached this session.
    let reconnected = t0 + Duration::from_secs(5);
    assert!(tile.request_resend_at(observer, reconnected, t0 + Duration::from_secs(10)));
}

#[test]
fn resend_bookkeeping_is_per_observer() {
    let tile = tile_with(0);
    let session_start = SystemTime::UNIX_EPOCH;
    let t0 = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000);

    let first = ObserverId::random();
    let second = ObserverId::random();
    assert!(tile.request_resend_at(first, session_start, t0));
    assert!(tile.request_resend_at(second, session_start, t0));
    assert!(!tile.request_resend_at(first, session_start, t0 + Duration::from_secs(1)));
}

#[test]
fn tile_set_indexes_column_row_step() {
    // 2 columns x 2 rows x 2 steps, first byte encodes (col, row, step).
    let mut tiles = Vec::new();
    for column in 0..2u8 {
        for row in 0..2u8 {
            for step in 0..2u8 {
                tiles.push(tile_with(column * 4 + row * 2 + step));
            }
        }
    }
    let set = TileSet::from_tiles(2, 2, 2, 3, tiles);

    assert_eq!(set.columns(), 2);
    assert_eq!(set.rows(), 2);
    assert_eq!(set.steps(), 2);
    assert_eq!(set.delay(), 3);
    for column in 0..2 {
        for row in 0..2 {
            for step in 0..2 {
                let expected = (column * 4 + row * 2 + step) as u8;
                assert_eq!(set.tile(column, row, step).pixels()[0], expected);
            }
        }
    }

    // Iteration follows the serialization order.
    let order: Vec<u8> = set.tiles().map(|tile| tile.pixels()[0]).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5, 6, 7]);
}
