//! Pure geometry planning: scroll arrangements and output tile grids.
//!
//! Nothing in this module touches a surface or performs I/O, which keeps
//! the planning math trivially testable. Scroll positions are CSS pixels
//! (`f64`, matching what pages report); tile rectangles are device pixels.

use serde::{Deserialize, Serialize};

/// One scroll target in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollStop {
    pub x: f64,
    pub y: f64,
}

/// Computes the scroll positions a capture must visit.
///
/// The returned sequence is ordered top-to-bottom, left-to-right; callers
/// walk it back to front so the final stop parks the page at the origin.
/// Consecutive rows overlap by `overlap_pad` CSS pixels, which lets later
/// frames paint over fixed headers smeared into earlier ones. The last
/// hop is clamped so the walk lands exactly on scroll-Y zero.
///
/// A document no wider than the viewport (within one CSS pixel, so minor
/// zoom rounding does not fabricate a phantom column) produces a single
/// column of stops.
pub fn compute_arrangement(
    total_width: f64,
    total_height: f64,
    viewport_width: f64,
    viewport_height: f64,
    overlap_pad: f64,
) -> Vec<ScrollStop> {
    let viewport_width = viewport_width.max(1.0);
    let viewport_height = viewport_height.max(1.0);
    let total_width = if total_width <= viewport_width + 1.0 {
        viewport_width
    } else {
        total_width
    };
    let total_height = total_height.max(0.0);

    let y_step = if viewport_height > overlap_pad {
        viewport_height - overlap_pad
    } else {
        viewport_height
    };
    let y_step = y_step.max(1.0);

    // Vertical stops, deepest first, final hop clamped onto 0.
    let mut rows = Vec::new();
    let mut y = (total_height - viewport_height).max(0.0);
    loop {
        rows.push(y);
        if y <= 0.0 {
            break;
        }
        y = (y - y_step).max(0.0);
    }

    let mut cols = Vec::new();
    let mut x = 0.0;
    while x < total_width {
        cols.push(x);
        x += viewport_width;
    }
    if cols.is_empty() {
        cols.push(0.0);
    }

    let mut stops = Vec::with_capacity(rows.len() * cols.len());
    for &y in rows.iter().rev() {
        for &x in &cols {
            stops.push(ScrollStop { x, y });
        }
    }
    stops
}

/// Half-open tile rectangle in device pixels: `[left, right) x [top, bottom)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TileRect {
    pub index: usize,
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl TileRect {
    pub fn width(&self) -> u32 {
        self.right - self.left
    }

    pub fn height(&self) -> u32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }
}

/// Platform limits a single output image may not exceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileCaps {
    pub max_width: u32,
    pub max_height: u32,
    pub max_area: u64,
}

impl Default for TileCaps {
    fn default() -> Self {
        // Conservative bounds well inside common canvas limits.
        TileCaps {
            max_width: 15_000,
            max_height: 15_000,
            max_area: 60_000_000,
        }
    }
}

impl TileCaps {
    pub fn admits(&self, width: u32, height: u32) -> bool {
        width <= self.max_width
            && height <= self.max_height
            && width as u64 * height as u64 <= self.max_area
    }
}

/// Splits a `total_width` x `total_height` output into the smallest grid of
/// tiles that respects `caps`.
///
/// Splitting happens along the dominant (larger) axis first so the
/// secondary axis keeps its full extent whenever the caps allow; ties
/// break toward a vertical split. The grid is row-major with any
/// remainder absorbed by the last row and column, so the tiles cover the
/// output exactly once.
pub fn plan_tiles(total_width: u32, total_height: u32, caps: &TileCaps) -> Vec<TileRect> {
    if total_width == 0 || total_height == 0 {
        return Vec::new();
    }
    if caps.admits(total_width, total_height) {
        return vec![TileRect {
            index: 0,
            left: 0,
            top: 0,
            right: total_width,
            bottom: total_height,
        }];
    }

    // The saturated axis obeys the area cap as well. With the secondary
    // extent at or below max_area, the quotient for the other axis is
    // never rounded down to zero.
    let saturate = |total: u32, cap: u32| -> u32 {
        (total as u64).min(cap as u64).min(caps.max_area).max(1) as u32
    };
    let area_cap = |other: u32| -> u32 {
        (caps.max_area / other as u64).min(u32::MAX as u64) as u32
    };
    let (tile_width, tile_height) = if total_width > total_height {
        let h = saturate(total_height, caps.max_height);
        let w = caps.max_width.min(area_cap(h)).max(1);
        (w, h)
    } else {
        let w = saturate(total_width, caps.max_width);
        let h = caps.max_height.min(area_cap(w)).max(1);
        (w, h)
    };

    let cols = total_width.div_ceil(tile_width);
    let rows = total_height.div_ceil(tile_height);
    let mut tiles = Vec::with_capacity((cols as usize) * (rows as usize));
    for row in 0..rows {
        for col in 0..cols {
            let left = col * tile_width;
            let top = row * tile_height;
            let width = if col + 1 == cols {
                total_width - left
            } else {
                tile_width
            };
            let height = if row + 1 == rows {
                total_height - top
            } else {
                tile_height
            };
            tiles.push(TileRect {
                index: tiles.len(),
                left,
                top,
                right: left + width,
                bottom: top + height,
            });
        }
    }
    tiles
}
