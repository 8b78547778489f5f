//! Error types for the exam session engine.

/// Top-level error type for the spoken-exam engine.
#[derive(Debug, thiserror::Error)]
pub enum ExamError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Speech capture provider error.
    #[error("capture error: {0}")]
    Capture(String),

    /// Speech playback provider error.
    #[error("playback error: {0}")]
    Playback(String),

    /// Assessment service error that escaped the turn-level fallback path.
    #[error("assessment error: {0}")]
    Assessment(String),

    /// Session lifecycle error (invalid control for the current state).
    #[error("session error: {0}")]
    Session(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ExamError>;

impl From<crate::assessment::ServiceError> for ExamError {
    fn from(e: crate::assessment::ServiceError) -> Self {
        Self::Assessment(e.to_string())
    }
}
