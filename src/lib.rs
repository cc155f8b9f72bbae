//! pagecap
//!
//! A full-page capture engine for scrollable surfaces. It walks a page
//! viewport by viewport, snapshots each stop, composites the frames into
//! one or more output tiles sized within platform limits, and persists
//! the tiles next to an HTML manifest that reassembles them.
//!
//! # Design
//!
//! - **Two cooperative halves**: a scroll sequencer task drives the page
//!   and offers one frame at a time; the orchestrator snapshots and
//!   composites, acknowledging each frame before the next scroll.
//! - **Trust the pixels**: output dimensions and the CSS-to-device scale
//!   come from the first decoded bitmap, not from page metrics, so zoom
//!   and high-density displays need no special cases.
//! - **The page comes back**: scroll position and overflow styling are
//!   restored on success, abort, timeout and cancellation alike.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use pagecap::{CaptureConfig, CaptureOptions, DirStore, Orchestrator};
//! use pagecap::surface::{ruled_document, SyntheticSurface};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let surface = Arc::new(SyntheticSurface::new(ruled_document(1024, 3000), 1024, 800));
//! let store = DirStore::new("./captures");
//! let orchestrator = Orchestrator::new(CaptureConfig::default())?;
//! let artifacts = orchestrator
//!     .start_capture(surface, &store, &CaptureOptions::default())
//!     .await?;
//! println!("manifest: {}", artifacts.manifest.0);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

pub mod error;
pub use error::{Error, Result};

// Pure planning math: scroll arrangements and tile grids
pub mod geometry;

// Deny/allow address filtering
pub mod policy;

// Frame types exchanged between sequencer and orchestrator
pub mod protocol;

// Capture target trait and the synthetic in-memory surface
pub mod surface;

// Session state: lazy tile plan and frame accumulation
pub mod session;

// Bitmap placement onto tiles
pub mod compositor;

// The page-side scroll walker
pub mod sequencer;

// The privileged side: admission, snapshots, persistence driver
pub mod orchestrator;

// PNG encoding, object stores, manifest
pub mod output;

pub use geometry::{TileCaps, TileRect};
pub use orchestrator::Orchestrator;
pub use output::{CaptureArtifacts, DirStore, ObjectStore, StoredLocation};
pub use protocol::{CaptureFrame, SequencerStatus};
pub use session::FinishedCapture;
pub use surface::{PageMetrics, Snapshot, Surface, SurfaceId};

/// Configuration for the capture engine
///
/// The defaults are chosen for real pages on real displays: enough
/// settle time for lazy content to paint, an overlap band wide enough to
/// scrub fixed headers, and tile caps well inside common canvas limits.
///
/// # Examples
///
/// ```
/// let cfg = pagecap::CaptureConfig::default();
/// assert_eq!(cfg.overlap_pad, 200.0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureConfig {
    /// Vertical overlap between consecutive frames, CSS pixels
    pub overlap_pad: f64,
    /// Pause after each scroll before requesting the snapshot
    pub scroll_settle_ms: u64,
    /// Extra pause on the orchestrator side before snapshotting
    pub snapshot_settle_ms: u64,
    /// How long the sequencer waits for one frame acknowledgement
    pub frame_ack_budget_ms: u64,
    /// How long the orchestrator waits for the first frame
    pub injection_window_ms: u64,
    /// Limits one output image may not exceed
    pub tile_caps: TileCaps,
    /// Glob patterns an address must match (unless denied first)
    pub allow_addresses: Vec<String>,
    /// Regex patterns that reject an address outright
    pub deny_addresses: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            overlap_pad: 200.0,
            scroll_settle_ms: 150,
            snapshot_settle_ms: 50,
            frame_ack_budget_ms: 1250,
            injection_window_ms: 3000,
            tile_caps: TileCaps::default(),
            allow_addresses: vec![
                "http://*/*".to_string(),
                "https://*/*".to_string(),
                "ftp://*/*".to_string(),
                "file://*/*".to_string(),
            ],
            // Extension store pages refuse script injection; failing the
            // policy check is clearer than timing out mid-capture.
            deny_addresses: vec!["^https?://chrome\\.google\\.com/.*".to_string()],
        }
    }
}

impl CaptureConfig {
    /// Rejects configurations that cannot produce a working session.
    pub fn validate(&self) -> Result<()> {
        if !self.overlap_pad.is_finite() || self.overlap_pad < 0.0 {
            return Err(Error::Config(format!(
                "overlap_pad must be a non-negative number, got {}",
                self.overlap_pad
            )));
        }
        if self.frame_ack_budget_ms == 0 {
            return Err(Error::Config("frame_ack_budget_ms must be positive".to_string()));
        }
        if self.injection_window_ms == 0 {
            return Err(Error::Config("injection_window_ms must be positive".to_string()));
        }
        if self.tile_caps.max_width == 0 || self.tile_caps.max_height == 0 {
            return Err(Error::Config("tile caps must admit at least one pixel".to_string()));
        }
        if self.tile_caps.max_area == 0 {
            return Err(Error::Config("tile area cap must be positive".to_string()));
        }
        // Compiling the policy surfaces bad patterns before a session starts.
        policy::AddressPolicy::new(&self.deny_addresses, &self.allow_addresses)?;
        Ok(())
    }

    pub(crate) fn sequencer_config(&self) -> sequencer::SequencerConfig {
        sequencer::SequencerConfig {
            overlap_pad: self.overlap_pad,
            scroll_settle: Duration::from_millis(self.scroll_settle_ms),
            frame_ack_budget: Duration::from_millis(self.frame_ack_budget_ms),
        }
    }
}

/// Callback invoked after each absorbed frame with progress in `(0, 1]`.
pub type ProgressHandler = Arc<dyn Fn(f64) + Send + Sync>;
/// Callback invoked once if the output splits, with the tile count.
pub type SplitHandler = Arc<dyn Fn(usize) + Send + Sync>;
/// Callback invoked when a capture or its persistence fails.
pub type ErrorHandler = Arc<dyn Fn(&Error) + Send + Sync>;

/// Per-capture options: observers, cancellation, artifact naming.
#[derive(Clone)]
pub struct CaptureOptions {
    pub on_progress: Option<ProgressHandler>,
    pub on_split: Option<SplitHandler>,
    pub on_error: Option<ErrorHandler>,
    /// Send `true` to stop the session; the page is still restored.
    pub cancel: Option<watch::Receiver<bool>>,
    /// Base name for stored artifacts (`<base>.png`, `<base>.html`, ...).
    pub base_name: String,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            on_progress: None,
            on_split: None,
            on_error: None,
            cancel: None,
            base_name: "capture".to_string(),
        }
    }
}

/// Captures and persists a page with the default configuration.
pub async fn capture_page(
    surface: Arc<dyn Surface>,
    store: &dyn ObjectStore,
    opts: &CaptureOptions,
) -> Result<CaptureArtifacts> {
    Orchestrator::new(CaptureConfig::default())?
        .start_capture(surface, store, opts)
        .await
}
