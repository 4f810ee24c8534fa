//! Error types at the seams of the detection pipelines.
//!
use common::RunningMode;
use thiserror::Error;

/// Failure of a single detection request.
#[derive(Debug, Error)]
pub enum DetectError {
    /// The detector has not finished initializing (or failed to).
    #[error("Object Detector is still loading.")]
    NotReady,

    #[error("detector runs in {actual} mode, {expected} entry point was called")]
    ModeMismatch {
        expected: RunningMode,
        actual: RunningMode,
    },

    #[error("video timestamp {got} ms is not after previous timestamp {last} ms")]
    NonMonotonicTimestamp { last: u64, got: u64 },

    #[error("inference failed: {0:#}")]
    Inference(#[source] anyhow::Error),
}

/// Failure to obtain or read from a video capture stream.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera capture is not available")]
    Unavailable,

    #[error("could not acquire video stream: {0}")]
    Acquire(String),

    #[error("could not read frame: {0}")]
    Frame(String),

    #[error("webcam is already capturing")]
    AlreadyCapturing,

    #[error(transparent)]
    Detector(#[from] DetectError),
}
