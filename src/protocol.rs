//! Types exchanged between the scroll sequencer and the orchestrator.
//!
//! The two halves speak over a bounded channel of [`FrameRequest`]s. The
//! sequencer sends one request, parks on its `ack`, and only then moves
//! to the next scroll position; frames are never pipelined, so at most
//! one snapshot is in flight at any time.

use serde::Serialize;
use tokio::sync::oneshot;

/// Geometry payload for one scroll-and-snapshot step, all in CSS pixels.
#[derive(Debug, Clone, Serialize)]
pub struct CaptureFrame {
    /// Scroll position the surface actually reached (post-clamping).
    pub x: f64,
    pub y: f64,
    /// Fraction of the arrangement complete once this frame lands; the
    /// final frame always reports exactly 1.0.
    pub progress: f64,
    pub viewport_width: f64,
    pub viewport_height: f64,
    pub total_width: f64,
    pub total_height: f64,
    /// Device pixel ratio the page reports. A hint only: the true scale
    /// is derived from the first snapshot's bitmap width.
    pub scale_hint: f64,
}

impl CaptureFrame {
    /// Whether this frame completes the arrangement.
    pub fn is_last(&self) -> bool {
        self.progress >= 1.0
    }
}

/// One in-flight capture request. The receiver snapshots the viewport,
/// composites it, and answers on `ack`; `false` (or dropping the sender)
/// tells the sequencer to abandon the walk.
#[derive(Debug)]
pub struct FrameRequest {
    pub frame: CaptureFrame,
    pub ack: oneshot::Sender<bool>,
}

/// Lifecycle states the sequencer publishes while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerStatus {
    /// Installed but not yet measuring the page.
    Idle,
    /// Measuring the document and preparing the view.
    Planning,
    /// Working through the arrangement; the index counts processed frames.
    Capturing(usize),
    /// Every frame was acknowledged and the view is restored.
    Done,
    /// The walk stopped early; the view is still restored.
    Aborted,
}

impl SequencerStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SequencerStatus::Done | SequencerStatus::Aborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_frame_detection() {
        let mut frame = CaptureFrame {
            x: 0.0,
            y: 0.0,
            progress: 0.25,
            viewport_width: 1024.0,
            viewport_height: 800.0,
            total_width: 1024.0,
            total_height: 3000.0,
            scale_hint: 1.0,
        };
        assert!(!frame.is_last());
        frame.progress = 1.0;
        assert!(frame.is_last());
    }

    #[test]
    fn terminal_states() {
        assert!(SequencerStatus::Done.is_terminal());
        assert!(SequencerStatus::Aborted.is_terminal());
        assert!(!SequencerStatus::Capturing(3).is_terminal());
        assert!(!SequencerStatus::Idle.is_terminal());
        assert!(!SequencerStatus::Planning.is_terminal());
    }
}
