//! Per-capture session state: the tile plan and the bitmaps it fills.

use image::RgbaImage;

use crate::compositor;
use crate::error::{Error, Result};
use crate::geometry::{plan_tiles, TileCaps, TileRect};
use crate::protocol::CaptureFrame;
use crate::surface::SurfaceId;

/// One output tile and the bitmap being assembled for it.
#[derive(Debug)]
pub struct Tile {
    pub rect: TileRect,
    pub surface: RgbaImage,
}

/// Output tiles are planned lazily: dimensions come from the first
/// decoded frame, not from page metrics, so the plan reflects what the
/// capture facility actually produces.
pub enum TilePlan {
    Unplanned,
    Planned(PlannedTiles),
}

impl TilePlan {
    pub fn is_planned(&self) -> bool {
        matches!(self, TilePlan::Planned(_))
    }

    pub fn planned(&self) -> Option<&PlannedTiles> {
        match self {
            TilePlan::Planned(p) => Some(p),
            TilePlan::Unplanned => None,
        }
    }

    fn planned_mut(&mut self) -> Option<&mut PlannedTiles> {
        match self {
            TilePlan::Planned(p) => Some(p),
            TilePlan::Unplanned => None,
        }
    }
}

/// Materialized tile set plus the scale that maps CSS pixels onto it.
pub struct PlannedTiles {
    /// Device pixels per CSS pixel, derived once from the first bitmap.
    pub scale: f64,
    pub total_width: u32,
    pub total_height: u32,
    pub tiles: Vec<Tile>,
}

impl PlannedTiles {
    fn materialize(frame: &CaptureFrame, bitmap_width: u32, caps: &TileCaps) -> Result<Self> {
        if frame.viewport_width <= 0.0 || bitmap_width == 0 {
            return Err(Error::Snapshot(
                "cannot derive scale from an empty viewport".to_string(),
            ));
        }
        // The page may render zoomed or on a high-density display; the
        // bitmap width against the CSS viewport width is the ground truth.
        let scale = bitmap_width as f64 / frame.viewport_width;
        let total_width = (frame.total_width * scale).round() as u32;
        let total_height = (frame.total_height * scale).round() as u32;
        if total_width == 0 || total_height == 0 {
            return Err(Error::Surface(
                "surface reported a document with no extent".to_string(),
            ));
        }
        let tiles = plan_tiles(total_width, total_height, caps)
            .into_iter()
            .map(|rect| Tile {
                surface: RgbaImage::new(rect.width(), rect.height()),
                rect,
            })
            .collect();
        Ok(PlannedTiles {
            scale,
            total_width,
            total_height,
            tiles,
        })
    }
}

/// What [`CaptureSession::absorb`] did with a frame.
#[derive(Debug)]
pub struct AbsorbOutcome {
    /// True only for the frame that materialized the tile plan.
    pub planned_now: bool,
    pub tile_count: usize,
}

/// Accumulates decoded frames into the planned tiles for one surface.
pub struct CaptureSession {
    pub surface_id: SurfaceId,
    pub plan: TilePlan,
    frames_absorbed: usize,
}

impl CaptureSession {
    pub fn new(surface_id: SurfaceId) -> Self {
        CaptureSession {
            surface_id,
            plan: TilePlan::Unplanned,
            frames_absorbed: 0,
        }
    }

    pub fn frames_absorbed(&self) -> usize {
        self.frames_absorbed
    }

    /// Composites one decoded frame onto every tile it overlaps,
    /// materializing the tile plan first if this is the opening frame.
    pub fn absorb(
        &mut self,
        frame: &CaptureFrame,
        bitmap: &RgbaImage,
        caps: &TileCaps,
    ) -> Result<AbsorbOutcome> {
        let planned_now = !self.plan.is_planned();
        if planned_now {
            self.plan = TilePlan::Planned(PlannedTiles::materialize(frame, bitmap.width(), caps)?);
        }
        let planned = self
            .plan
            .planned_mut()
            .ok_or_else(|| Error::Snapshot("tile plan missing after materialization".to_string()))?;
        compositor::place(&mut planned.tiles, bitmap, frame, planned.scale);
        self.frames_absorbed += 1;
        Ok(AbsorbOutcome {
            planned_now,
            tile_count: planned.tiles.len(),
        })
    }

    /// Consumes the session once every frame is in, yielding the tiles
    /// by value so they outlive any later persistence failure.
    pub fn finish(self) -> Result<FinishedCapture> {
        match self.plan {
            TilePlan::Planned(planned) => Ok(FinishedCapture {
                surface_id: self.surface_id,
                scale: planned.scale,
                total_width: planned.total_width,
                total_height: planned.total_height,
                frames_absorbed: self.frames_absorbed,
                tiles: planned.tiles,
            }),
            TilePlan::Unplanned => Err(Error::SequencerGone(
                "capture finished before any frame arrived".to_string(),
            )),
        }
    }
}

/// A fully assembled capture, independent of the surface it came from.
///
/// Persistence borrows rather than consumes, so a failed store leaves
/// the tiles intact for a retry against another destination.
#[derive(Debug)]
pub struct FinishedCapture {
    pub surface_id: SurfaceId,
    pub scale: f64,
    pub total_width: u32,
    pub total_height: u32,
    pub frames_absorbed: usize,
    pub tiles: Vec<Tile>,
}
