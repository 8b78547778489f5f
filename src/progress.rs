//! Progress collaborator seam.
//!
//! The engine reports scoring side effects; what they mean for the
//! candidate's profile (streaks, levels, persistence) is entirely the
//! host's business. Both calls are best-effort: implementations log
//! their own failures and never propagate them into the session.

use async_trait::async_trait;
use std::sync::Mutex;

/// Receives scoring side effects from a running session.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Points awarded for one successful exchange.
    async fn turn_points(&self, _points: u32) {}

    /// A session reached its result.
    async fn session_completed(&self, _session_points: u32, _overall_score: u32) {}
}

/// Sink that ignores everything. The default when a host attaches no
/// progress tracking.
#[derive(Debug, Default)]
pub struct NullProgress;

#[async_trait]
impl ProgressSink for NullProgress {}

/// Sink that remembers what it was told. Used by tests and demos.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    turn_points: Mutex<Vec<u32>>,
    completed: Mutex<Option<(u32, u32)>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points reported per exchange, in order.
    pub fn points(&self) -> Vec<u32> {
        self.turn_points.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// `(session_points, overall_score)` from the completion call, if any.
    pub fn completion(&self) -> Option<(u32, u32)> {
        *self.completed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ProgressSink for RecordingProgress {
    async fn turn_points(&self, points: u32) {
        self.turn_points
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(points);
    }

    async fn session_completed(&self, session_points: u32, overall_score: u32) {
        *self.completed.lock().unwrap_or_else(|e| e.into_inner()) =
            Some((session_points, overall_score));
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn recording_sink_accumulates() {
        let sink = RecordingProgress::new();
        sink.turn_points(2).await;
        sink.turn_points(3).await;
        sink.session_completed(5, 80).await;

        assert_eq!(sink.points(), vec![2, 3]);
        assert_eq!(sink.completion(), Some((5, 80)));
    }
}
