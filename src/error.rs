//! Error taxonomy for the capture pipeline and the OCR hand-off

use thiserror::Error;

/// Errors raised by frame sources, the scorer and the capture state machine.
///
/// Every variant is local to the tick or call that produced it; none of them
/// leaves the controller in an undefined phase.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The frame source has no frame yet. Non-fatal, the tick is skipped.
    #[error("frame source not ready")]
    NotReady,

    /// Sharpness computation failed (malformed buffer, unsupported format).
    #[error("sharpness scoring failed: {0}")]
    Scoring(String),

    /// Motion-sensor access was refused; monitoring cannot start.
    #[error("motion sensor permission denied")]
    PermissionDenied,

    /// The frame source failed for a reason other than readiness.
    #[error("frame source error: {0}")]
    Source(String),

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    #[error("configuration error: {0}")]
    Config(String),

    /// The OCR collaborator rejected the submission.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl From<config::ConfigError> for CaptureError {
    fn from(err: config::ConfigError) -> Self {
        CaptureError::Config(err.to_string())
    }
}

/// Failures reported by an [`crate::ocr::OcrDispatcher`].
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-success HTTP status with the raw response body.
    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The provider answered but reported a failure of its own.
    #[error("provider error: {0}")]
    Provider(String),

    #[error("malformed provider response: {0}")]
    Malformed(String),

    /// A long-running operation did not finish within the poll budget.
    #[error("operation still pending after {polls} polls")]
    Timeout { polls: u32 },

    #[error("dispatcher not configured: {0}")]
    NotConfigured(String),
}
