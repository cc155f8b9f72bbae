//! Composites decoded frame bitmaps onto the output tiles they overlap.

use image::{imageops, RgbaImage};

use crate::protocol::CaptureFrame;
use crate::session::Tile;

/// Paints `bitmap` onto every tile it overlaps, clipped to each tile and
/// honoring arrival order: later frames overwrite earlier ones, which is
/// what scrubs fixed headers out of the padded overlap band.
///
/// The frame's CSS scroll position is mapped into device pixels with
/// `scale`; the same scale is used for every frame of a session. Overlap
/// uses open intervals, so a bitmap that only touches a tile edge paints
/// nothing there.
pub fn place(tiles: &mut [Tile], bitmap: &RgbaImage, frame: &CaptureFrame, scale: f64) {
    let left = (frame.x * scale).round() as i64;
    let top = (frame.y * scale).round() as i64;
    let right = left + bitmap.width() as i64;
    let bottom = top + bitmap.height() as i64;

    for tile in tiles.iter_mut() {
        let rect = &tile.rect;
        let overlaps = left < rect.right as i64
            && right > rect.left as i64
            && top < rect.bottom as i64
            && bottom > rect.top as i64;
        if overlaps {
            imageops::replace(
                &mut tile.surface,
                bitmap,
                left - rect.left as i64,
                top - rect.top as i64,
            );
        }
    }
}
