//! Capture target abstraction and an in-memory synthetic surface.
//!
//! A [`Surface`] is anything that can report page metrics, scroll, and
//! hand back encoded snapshots of its viewport: a devtools-driven tab,
//! an embedded webview, or the [`SyntheticSurface`] used by tests and
//! the demo binary.

use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use image::codecs::png::PngEncoder;
use image::{imageops, ImageEncoder, Rgba, RgbaImage};

use crate::error::{Error, Result};

/// Identifier for a capture target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceId(pub u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Size signals a page reports about itself, all in CSS pixels.
///
/// Pages under-report in creative ways, so the capture plan folds every
/// signal together instead of trusting any single one.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageMetrics {
    pub client_width: f64,
    pub client_height: f64,
    pub scroll_width: f64,
    pub scroll_height: f64,
    pub rendered_width: f64,
    pub rendered_height: f64,
    /// Height of the tallest root-level element, a fallback for pages
    /// whose document element under-reports its scrollable extent.
    pub tallest_element_height: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub device_pixel_ratio: f64,
}

impl PageMetrics {
    /// Document extent: the maximum over every size signal on each axis.
    pub fn total_extent(&self) -> (f64, f64) {
        let width = self
            .client_width
            .max(self.scroll_width)
            .max(self.rendered_width);
        let height = self
            .client_height
            .max(self.scroll_height)
            .max(self.rendered_height)
            .max(self.tallest_element_height);
        (width, height)
    }
}

/// View state recorded before a capture disturbs the page, handed back
/// verbatim to [`Surface::restore_view`] when the walk ends.
#[derive(Debug, Clone)]
pub struct SavedView {
    pub scroll_x: f64,
    pub scroll_y: f64,
    /// Root overflow style that was replaced, if any.
    pub overflow: Option<String>,
}

/// Encoded snapshot bytes as produced by the platform capture facility.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub bytes: Vec<u8>,
}

impl Snapshot {
    pub fn new(bytes: Vec<u8>) -> Self {
        Snapshot { bytes }
    }

    /// Builds a snapshot from a base64 payload, the transport format of
    /// devtools-style capture APIs.
    pub fn from_base64(data: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Snapshot(format!("base64 decode failed: {e}")))?;
        Ok(Snapshot { bytes })
    }

    /// Decodes the encoded bytes into an RGBA bitmap.
    pub fn decode(&self) -> Result<RgbaImage> {
        if self.bytes.is_empty() {
            return Err(Error::Snapshot("empty snapshot payload".to_string()));
        }
        let img = image::load_from_memory(&self.bytes)
            .map_err(|e| Error::Snapshot(format!("decode failed: {e}")))?;
        Ok(img.to_rgba8())
    }
}

/// A scrollable page that can be measured and snapshotted.
///
/// Scroll positions are CSS pixels; snapshot bitmaps come back at device
/// resolution, which is why callers derive the real scale from the first
/// bitmap instead of trusting [`PageMetrics::device_pixel_ratio`].
#[async_trait]
pub trait Surface: Send + Sync {
    fn id(&self) -> SurfaceId;

    /// Address currently loaded in the surface, checked against policy
    /// before any capture work begins.
    fn address(&self) -> String;

    /// Whether the sequencer can be installed at all. Privileged or
    /// half-loaded pages refuse scripting.
    fn scriptable(&self) -> bool {
        true
    }

    async fn metrics(&self) -> Result<PageMetrics>;

    /// Scrolls the view and returns the clamped position actually
    /// reached, which is what gets stamped on the capture frame.
    async fn scroll_to(&self, x: f64, y: f64) -> Result<(f64, f64)>;

    async fn scroll_position(&self) -> Result<(f64, f64)>;

    /// Hides scrollbars and overflow so frames stitch without seams;
    /// returns the prior view state for [`Surface::restore_view`].
    async fn conceal_scrollbars(&self) -> Result<SavedView>;

    async fn restore_view(&self, saved: SavedView) -> Result<()>;

    /// Captures exactly what is visible in the viewport right now.
    async fn snapshot(&self) -> Result<Snapshot>;
}

#[derive(Debug, Default)]
struct SyntheticState {
    scroll_x: f64,
    scroll_y: f64,
    overflow_hidden: bool,
    snapshots_taken: usize,
    restores: usize,
    scroll_history: Vec<(f64, f64)>,
}

/// In-memory [`Surface`] backed by a device-resolution bitmap.
///
/// Snapshots are real PNG crops of the backing document, so everything
/// downstream (decode, scale derivation, compositing) runs the same code
/// paths a live surface would exercise. Fault injection knobs simulate
/// slow or broken capture facilities.
pub struct SyntheticSurface {
    id: SurfaceId,
    address: String,
    document: RgbaImage,
    viewport_width: f64,
    viewport_height: f64,
    dpr: f64,
    scriptable: bool,
    scroll_delay: Option<Duration>,
    snapshot_delay_after: Option<(usize, Duration)>,
    snapshot_failure_after: Option<usize>,
    metrics_delay: Option<Duration>,
    state: Mutex<SyntheticState>,
}

impl SyntheticSurface {
    /// Wraps a device-resolution document. `viewport` is CSS pixels; the
    /// document's CSS extent is its pixel size divided by `dpr` (1.0
    /// here, see [`SyntheticSurface::with_dpr`]).
    pub fn new(document: RgbaImage, viewport_width: u32, viewport_height: u32) -> Self {
        SyntheticSurface {
            id: SurfaceId(1),
            address: "https://synthetic.test/page".to_string(),
            document,
            viewport_width: viewport_width as f64,
            viewport_height: viewport_height as f64,
            dpr: 1.0,
            scriptable: true,
            scroll_delay: None,
            snapshot_delay_after: None,
            snapshot_failure_after: None,
            metrics_delay: None,
            state: Mutex::new(SyntheticState::default()),
        }
    }

    pub fn with_id(mut self, id: u64) -> Self {
        self.id = SurfaceId(id);
        self
    }

    pub fn with_address(mut self, address: &str) -> Self {
        self.address = address.to_string();
        self
    }

    /// Reinterprets the backing bitmap as `dpr` device pixels per CSS
    /// pixel. Integral ratios keep snapshot crops exact.
    pub fn with_dpr(mut self, dpr: f64) -> Self {
        self.dpr = dpr;
        self
    }

    pub fn not_scriptable(mut self) -> Self {
        self.scriptable = false;
        self
    }

    /// Makes every scroll take `delay`, like a page with heavy scroll
    /// handlers.
    pub fn with_scroll_delay(mut self, delay: Duration) -> Self {
        self.scroll_delay = Some(delay);
        self
    }

    /// Delays every snapshot starting with the `after`-th (0-based).
    pub fn with_snapshot_delay_after(mut self, after: usize, delay: Duration) -> Self {
        self.snapshot_delay_after = Some((after, delay));
        self
    }

    /// Fails every snapshot starting with the `after`-th (0-based).
    pub fn with_snapshot_failure_after(mut self, after: usize) -> Self {
        self.snapshot_failure_after = Some(after);
        self
    }

    pub fn with_metrics_delay(mut self, delay: Duration) -> Self {
        self.metrics_delay = Some(delay);
        self
    }

    fn doc_css_size(&self) -> (f64, f64) {
        (
            self.document.width() as f64 / self.dpr,
            self.document.height() as f64 / self.dpr,
        )
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SyntheticState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of snapshots served so far.
    pub fn snapshots_taken(&self) -> usize {
        self.lock().snapshots_taken
    }

    /// Number of completed view restorations.
    pub fn restores(&self) -> usize {
        self.lock().restores
    }

    /// Scroll positions visited, in order.
    pub fn scroll_history(&self) -> Vec<(f64, f64)> {
        self.lock().scroll_history.clone()
    }

    pub fn overflow_hidden(&self) -> bool {
        self.lock().overflow_hidden
    }
}

#[async_trait]
impl Surface for SyntheticSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn address(&self) -> String {
        self.address.clone()
    }

    fn scriptable(&self) -> bool {
        self.scriptable
    }

    async fn metrics(&self) -> Result<PageMetrics> {
        if let Some(delay) = self.metrics_delay {
            tokio::time::sleep(delay).await;
        }
        let (doc_w, doc_h) = self.doc_css_size();
        Ok(PageMetrics {
            client_width: self.viewport_width.min(doc_w),
            client_height: self.viewport_height.min(doc_h),
            scroll_width: doc_w,
            scroll_height: doc_h,
            rendered_width: doc_w,
            rendered_height: doc_h,
            tallest_element_height: doc_h,
            viewport_width: self.viewport_width,
            viewport_height: self.viewport_height,
            device_pixel_ratio: self.dpr,
        })
    }

    async fn scroll_to(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if let Some(delay) = self.scroll_delay {
            tokio::time::sleep(delay).await;
        }
        let (doc_w, doc_h) = self.doc_css_size();
        let max_x = (doc_w - self.viewport_width).max(0.0);
        let max_y = (doc_h - self.viewport_height).max(0.0);
        let clamped = (x.clamp(0.0, max_x), y.clamp(0.0, max_y));
        let mut state = self.lock();
        state.scroll_x = clamped.0;
        state.scroll_y = clamped.1;
        state.scroll_history.push(clamped);
        Ok(clamped)
    }

    async fn scroll_position(&self) -> Result<(f64, f64)> {
        let state = self.lock();
        Ok((state.scroll_x, state.scroll_y))
    }

    async fn conceal_scrollbars(&self) -> Result<SavedView> {
        let mut state = self.lock();
        let saved = SavedView {
            scroll_x: state.scroll_x,
            scroll_y: state.scroll_y,
            overflow: Some("visible".to_string()),
        };
        state.overflow_hidden = true;
        Ok(saved)
    }

    async fn restore_view(&self, saved: SavedView) -> Result<()> {
        let mut state = self.lock();
        state.scroll_x = saved.scroll_x;
        state.scroll_y = saved.scroll_y;
        state.overflow_hidden = false;
        state.restores += 1;
        Ok(())
    }

    async fn snapshot(&self) -> Result<Snapshot> {
        let (taken, delay, fail) = {
            let mut state = self.lock();
            let taken = state.snapshots_taken;
            state.snapshots_taken += 1;
            let delay = match self.snapshot_delay_after {
                Some((after, delay)) if taken >= after => Some(delay),
                _ => None,
            };
            let fail = matches!(self.snapshot_failure_after, Some(after) if taken >= after);
            (taken, delay, fail)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(Error::Snapshot(format!(
                "synthetic capture facility rejected snapshot {taken}"
            )));
        }

        let (scroll_x, scroll_y) = {
            let state = self.lock();
            (state.scroll_x, state.scroll_y)
        };
        let window_w = (self.viewport_width * self.dpr).round() as u32;
        let window_h = (self.viewport_height * self.dpr).round() as u32;
        let origin_x = (scroll_x * self.dpr).round() as u32;
        let origin_y = (scroll_y * self.dpr).round() as u32;

        // Viewport-sized canvas; any span past the document edge stays
        // white, the way a live capture paints the page background.
        let mut canvas = RgbaImage::from_pixel(window_w, window_h, Rgba([255, 255, 255, 255]));
        let avail_w = self.document.width().saturating_sub(origin_x).min(window_w);
        let avail_h = self.document.height().saturating_sub(origin_y).min(window_h);
        if avail_w > 0 && avail_h > 0 {
            let crop = imageops::crop_imm(&self.document, origin_x, origin_y, avail_w, avail_h);
            imageops::replace(&mut canvas, &crop.to_image(), 0, 0);
        }

        let mut bytes = Vec::new();
        PngEncoder::new(&mut bytes)
            .write_image(
                canvas.as_raw(),
                canvas.width(),
                canvas.height(),
                image::ExtendedColorType::Rgba8,
            )
            .map_err(|e| Error::Snapshot(format!("encode failed: {e}")))?;
        Ok(Snapshot::new(bytes))
    }
}

/// Deterministic test document: a coordinate-derived color wash with a
/// dark rule every 100 pixels and a red border. Any stitching mistake
/// shifts pixels and is caught by exact comparison.
pub fn ruled_document(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        if x < 4 || y < 4 || x >= width.saturating_sub(4) || y >= height.saturating_sub(4) {
            Rgba([200, 30, 30, 255])
        } else if x % 100 == 0 || y % 100 == 0 {
            Rgba([40, 40, 40, 255])
        } else {
            Rgba([
                (x % 211) as u8,
                (y % 197) as u8,
                ((x / 7 + y / 11) % 251) as u8,
                255,
            ])
        }
    })
}
