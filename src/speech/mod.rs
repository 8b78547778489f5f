//! Speech provider traits and the capture/playback gates.
//!
//! The engine performs no audio work itself: hosts inject a capture
//! provider (microphone + recognition) and a playback provider
//! (synthesis + speakers). The gates wrap one provider operation at a
//! time behind a cancellation race, so callers always receive a tagged
//! terminal outcome and `cancel` is safe at any point, including after
//! completion.
//!
//! Capture and playback are never active simultaneously: both gates take
//! `&mut self` and live inside the turn coordinator, whose sequential
//! cycle awaits each operation to a terminal outcome before starting the
//! next.

pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Why a capture attempt failed.
///
/// All kinds are transient: the session surfaces them as status events
/// and listens again, it never terminates because of one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureErrorKind {
    /// Microphone permission missing or revoked.
    PermissionDenied,
    /// The provider heard nothing it could transcribe.
    NoSpeechDetected,
    /// Recognition backend unreachable.
    Network,
    /// Anything else the provider reports.
    Other,
}

/// Terminal result of one provider `listen` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureResult {
    /// A transcribed utterance (possibly empty when `stop` flushed early).
    Utterance(String),
    /// The attempt failed; the kind says why.
    Failed(CaptureErrorKind),
}

/// Speech capture provider: listens for one utterance per call.
#[async_trait]
pub trait SpeechCapture: Send + Sync {
    /// Begin listening and resolve with the terminal result for one
    /// utterance.
    async fn listen(&self) -> CaptureResult;

    /// Force the in-flight `listen` to resolve with whatever was heard
    /// so far (possibly an empty transcript).
    async fn stop(&self);
}

/// Playback failure modes.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// Playback was cut off mid-utterance. Expected during session
    /// cancellation and treated identically to normal completion.
    #[error("playback interrupted")]
    Interrupted,
    /// The provider could not speak the text.
    #[error("playback failed: {0}")]
    Failed(String),
}

/// Speech playback provider: speaks one text per call.
#[async_trait]
pub trait SpeechPlayback: Send + Sync {
    /// Speak the text to completion.
    async fn speak(&self, text: &str) -> Result<(), PlaybackError>;

    /// Stop the in-flight `speak` immediately; its future resolves
    /// without any "fully spoken" side effect.
    async fn cancel(&self);
}

/// Outcome of one gated capture operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// The candidate said something.
    Utterance(String),
    /// Transient capture trouble; the caller should listen again.
    Trouble(CaptureErrorKind),
    /// The gate was cancelled before the provider resolved.
    Cancelled,
}

/// Outcome of one gated playback operation. Interruption and provider
/// failure are both folded into completion: a broken speaker must not
/// stall the exam.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The line finished playing (or failed non-fatally).
    Completed,
    /// The gate was cancelled mid-utterance.
    Cancelled,
}

/// Gate around the capture provider: one cancellable listen at a time.
pub struct CaptureGate {
    provider: Arc<dyn SpeechCapture>,
}

impl CaptureGate {
    /// Wrap a capture provider.
    pub fn new(provider: Arc<dyn SpeechCapture>) -> Self {
        Self { provider }
    }

    /// Listen for one utterance, racing the provider against `cancel`.
    ///
    /// On cancellation the provider is told to stop and any flushed text
    /// is discarded.
    pub async fn capture(&mut self, cancel: &CancellationToken) -> CaptureOutcome {
        tokio::select! {
            () = cancel.cancelled() => {
                self.provider.stop().await;
                debug!("capture cancelled");
                CaptureOutcome::Cancelled
            }
            result = self.provider.listen() => match result {
                CaptureResult::Utterance(text) => CaptureOutcome::Utterance(text),
                CaptureResult::Failed(kind) => CaptureOutcome::Trouble(kind),
            },
        }
    }
}

/// Gate around the playback provider: one cancellable utterance at a time.
pub struct PlaybackGate {
    provider: Arc<dyn SpeechPlayback>,
}

impl PlaybackGate {
    /// Wrap a playback provider.
    pub fn new(provider: Arc<dyn SpeechPlayback>) -> Self {
        Self { provider }
    }

    /// Speak `text` to completion, racing the provider against `cancel`.
    ///
    /// `PlaybackError::Interrupted` is equivalent to completion and never
    /// surfaced; other provider failures are logged and also folded into
    /// completion so the session keeps moving.
    pub async fn play(&mut self, text: &str, cancel: &CancellationToken) -> PlaybackOutcome {
        tokio::select! {
            () = cancel.cancelled() => {
                self.provider.cancel().await;
                debug!("playback cancelled");
                PlaybackOutcome::Cancelled
            }
            result = self.provider.speak(text) => match result {
                Ok(()) => PlaybackOutcome::Completed,
                Err(PlaybackError::Interrupted) => {
                    debug!("playback interrupted, treating as completed");
                    PlaybackOutcome::Completed
                }
                Err(PlaybackError::Failed(msg)) => {
                    warn!("playback failed, continuing without audio: {msg}");
                    PlaybackOutcome::Completed
                }
            },
        }
    }
}
