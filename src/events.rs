//! Session events emitted for UI and observability.
//!
//! Lightweight by design: the controller emits events without ever
//! blocking on a slow observer, and a lagging receiver loses old events
//! rather than stalling the session.

use crate::assessment::{ArtifactRef, TurnFeedback};
use crate::phase::{ExamKind, Phase};
use crate::session::{ExamResult, SessionState};
use crate::speech::CaptureErrorKind;
use crate::transcript::{Transcript, Turn};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Events that describe what the session is doing "right now".
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A new attempt began.
    SessionStarted {
        /// Identifier of the new session.
        id: Uuid,
        kind: ExamKind,
    },
    /// The session state machine moved.
    StateChanged { state: SessionState },
    /// The exam advanced to a later phase.
    PhaseChanged { phase: Phase },
    /// One second of exam time elapsed.
    Tick { remaining_seconds: u64 },
    /// A turn was appended to the transcript.
    TurnRecorded { turn: Turn },
    /// The examiner's reply carried feedback on the candidate's last
    /// answer.
    FeedbackReceived { feedback: TurnFeedback },
    /// Capture failed transiently; the engine is listening again.
    CaptureTrouble { kind: CaptureErrorKind },
    /// The exam picture is available (generated or fallback).
    ArtifactReady { artifact: ArtifactRef },
    /// The final result is available.
    ResultReady { result: ExamResult },
}

/// Wrap a broadcast receiver as a `Stream` for UI event loops.
pub fn event_stream(rx: broadcast::Receiver<SessionEvent>) -> BroadcastStream<SessionEvent> {
    BroadcastStream::new(rx)
}

/// Read-only view of the current session, published on a watch channel
/// after every mutation.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Present while a session exists (Running through Results).
    pub session_id: Option<Uuid>,
    pub kind: Option<ExamKind>,
    pub phase: Option<Phase>,
    pub remaining_seconds: u64,
    pub transcript: Transcript,
    /// Points accumulated across successful exchanges.
    pub points: u32,
    /// Set once the session reaches `Results`.
    pub result: Option<ExamResult>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Idle,
            session_id: None,
            kind: None,
            phase: None,
            remaining_seconds: 0,
            transcript: Transcript::new(),
            points: 0,
            result: None,
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn event_stream_yields_broadcast_events_in_order() {
        let (tx, rx) = broadcast::channel(8);
        let mut stream = event_stream(rx);

        tx.send(SessionEvent::StateChanged {
            state: SessionState::Running,
        })
        .expect("subscriber listening");
        tx.send(SessionEvent::Tick {
            remaining_seconds: 599,
        })
        .expect("subscriber listening");
        drop(tx);

        let first = stream.next().await.expect("first event").expect("not lagged");
        assert!(matches!(
            first,
            SessionEvent::StateChanged {
                state: SessionState::Running
            }
        ));
        let second = stream.next().await.expect("second event").expect("not lagged");
        assert!(matches!(
            second,
            SessionEvent::Tick {
                remaining_seconds: 599
            }
        ));
        // Sender dropped: the stream ends.
        assert!(stream.next().await.is_none());
    }
}
