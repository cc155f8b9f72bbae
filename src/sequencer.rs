//! Scroll sequencer: the page-side half of a capture.
//!
//! The sequencer runs as its own task. It measures the document, hides
//! the scrollbars, then walks the scroll arrangement back to front,
//! offering exactly one [`FrameRequest`] at a time over a bounded
//! channel. The walk is strictly request/ack/next: the next scroll only
//! happens after the orchestrator acknowledges the previous frame, so a
//! slow consumer can never pile up stale snapshots.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::{Error, Result};
use crate::geometry;
use crate::protocol::{CaptureFrame, FrameRequest, SequencerStatus};
use crate::surface::{PageMetrics, Surface};

/// Timing and overlap knobs the sequencer needs, lifted out of the
/// engine configuration.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Vertical overlap between consecutive frames, CSS pixels.
    pub overlap_pad: f64,
    /// Pause after each scroll so lazy content can settle.
    pub scroll_settle: Duration,
    /// How long one frame may wait for its acknowledgement.
    pub frame_ack_budget: Duration,
}

/// Handle to a running sequencer task.
pub struct SequencerHandle {
    status: watch::Receiver<SequencerStatus>,
    task: JoinHandle<Result<()>>,
}

impl SequencerHandle {
    /// A watch on the sequencer's lifecycle states.
    pub fn status(&self) -> watch::Receiver<SequencerStatus> {
        self.status.clone()
    }

    /// Waits for the task to end and yields its outcome.
    pub async fn join(self) -> Result<()> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(Error::SequencerGone(format!("sequencer task died: {e}"))),
        }
    }
}

/// Installs the sequencer on a surface and starts the walk.
///
/// Refuses surfaces that cannot be scripted; past that point every
/// failure travels through the request channel or the task outcome.
pub fn inject(
    surface: Arc<dyn Surface>,
    requests: mpsc::Sender<FrameRequest>,
    cancel: watch::Receiver<bool>,
    config: SequencerConfig,
) -> Result<SequencerHandle> {
    if !surface.scriptable() {
        return Err(Error::InjectionFailed(format!(
            "surface {} does not accept scripting",
            surface.id()
        )));
    }
    let (status_tx, status_rx) = watch::channel(SequencerStatus::Idle);
    let task = tokio::spawn(run(surface, requests, cancel, config, status_tx));
    Ok(SequencerHandle {
        status: status_rx,
        task,
    })
}

async fn run(
    surface: Arc<dyn Surface>,
    requests: mpsc::Sender<FrameRequest>,
    mut cancel: watch::Receiver<bool>,
    config: SequencerConfig,
    status: watch::Sender<SequencerStatus>,
) -> Result<()> {
    let outcome = drive(surface.as_ref(), &requests, &mut cancel, &config, &status).await;
    let _ = status.send(match outcome {
        Ok(()) => SequencerStatus::Done,
        Err(_) => SequencerStatus::Aborted,
    });
    outcome
}

async fn drive(
    surface: &dyn Surface,
    requests: &mpsc::Sender<FrameRequest>,
    cancel: &mut watch::Receiver<bool>,
    config: &SequencerConfig,
    status: &watch::Sender<SequencerStatus>,
) -> Result<()> {
    let _ = status.send(SequencerStatus::Planning);
    let metrics = tokio::select! {
        _ = cancelled(cancel) => return Err(Error::Cancelled),
        metrics = surface.metrics() => metrics?,
    };

    let saved = surface.conceal_scrollbars().await?;
    let walked = walk(surface, requests, cancel, config, status, &metrics).await;

    // The view comes back on every exit path, failed walks included.
    if let Err(e) = surface.restore_view(saved).await {
        warn!("surface {}: view restore failed: {}", surface.id(), e);
    }
    walked
}

async fn walk(
    surface: &dyn Surface,
    requests: &mpsc::Sender<FrameRequest>,
    cancel: &mut watch::Receiver<bool>,
    config: &SequencerConfig,
    status: &watch::Sender<SequencerStatus>,
    metrics: &PageMetrics,
) -> Result<()> {
    let (total_width, total_height) = metrics.total_extent();
    let stops = geometry::compute_arrangement(
        total_width,
        total_height,
        metrics.viewport_width,
        metrics.viewport_height,
        config.overlap_pad,
    );
    let total = stops.len();
    if total == 0 {
        return Err(Error::Surface(
            "surface produced an empty scroll arrangement".to_string(),
        ));
    }
    debug!(
        "surface {}: walking {} stops over {}x{} CSS",
        surface.id(),
        total,
        total_width,
        total_height
    );

    for (done, stop) in stops.iter().rev().enumerate() {
        let _ = status.send(SequencerStatus::Capturing(done));
        if *cancel.borrow() {
            return Err(Error::Cancelled);
        }

        let (x, y) = surface.scroll_to(stop.x, stop.y).await?;
        tokio::select! {
            _ = cancelled(cancel) => return Err(Error::Cancelled),
            _ = tokio::time::sleep(config.scroll_settle) => {}
        }

        let frame = CaptureFrame {
            x,
            y,
            progress: (done + 1) as f64 / total as f64,
            viewport_width: metrics.viewport_width,
            viewport_height: metrics.viewport_height,
            total_width,
            total_height,
            scale_hint: metrics.device_pixel_ratio,
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if requests
            .send(FrameRequest {
                frame,
                ack: ack_tx,
            })
            .await
            .is_err()
        {
            // Receiver hung up; whatever killed it owns the real error.
            return Err(Error::Cancelled);
        }

        let budget = config.frame_ack_budget;
        let accepted = tokio::select! {
            _ = cancelled(cancel) => return Err(Error::Cancelled),
            ack = timeout(budget, ack_rx) => match ack {
                Err(_) => return Err(Error::FrameTimeout(done, budget.as_millis() as u64)),
                Ok(Err(_)) => return Err(Error::Cancelled),
                Ok(Ok(accepted)) => accepted,
            },
        };
        if !accepted {
            debug!("surface {}: frame {} rejected, abandoning walk", surface.id(), done);
            return Err(Error::Cancelled);
        }
    }
    Ok(())
}

/// Resolves once cancellation is requested, or once the controller
/// disappears, which counts as cancellation too.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            return;
        }
    }
}
