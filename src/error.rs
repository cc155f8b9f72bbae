//! Error types for the capture engine

use thiserror::Error;

/// Result type alias for capture operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while capturing a page
#[derive(Error, Debug)]
pub enum Error {
    /// The target address failed the deny/allow policy
    #[error("Address not permitted: {0}")]
    AddressNotPermitted(String),

    /// A session is already running against the surface
    #[error("Capture already in progress for surface {0}")]
    CaptureInProgress(u64),

    /// The sequencer could not be installed on the surface
    #[error("Sequencer injection failed: {0}")]
    InjectionFailed(String),

    /// The sequencer produced no frame inside the injection window
    #[error("Sequencer produced no frame within {0}ms")]
    InjectionTimeout(u64),

    /// A frame round trip blew its acknowledgement budget
    #[error("Frame {0} exceeded its {1}ms acknowledgement budget")]
    FrameTimeout(usize, u64),

    /// The snapshot facility returned nothing usable
    #[error("Snapshot failed: {0}")]
    Snapshot(String),

    /// Durable storage rejected an artifact
    #[error("Storage failed: {0}")]
    Storage(String),

    /// The surface driver reported an error
    #[error("Surface error: {0}")]
    Surface(String),

    /// The sequencer task ended without finishing the arrangement
    #[error("Sequencer stopped unexpectedly: {0}")]
    SequencerGone(String),

    /// The session was cancelled cooperatively
    #[error("Capture cancelled")]
    Cancelled,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Surface(err.to_string())
    }
}
