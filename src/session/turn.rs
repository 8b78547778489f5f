//! The turn coordinator: one capture → assess → playback cycle at a time.
//!
//! The coordinator owns both speech gates and walks a three-state
//! protocol for every exchange. Each gate operation is awaited to a
//! terminal outcome before the next may start, so capture and playback
//! can never overlap. The coordinator keeps a working copy of the
//! transcript and phase for building exchange context; the session
//! controller applies the same events to the authoritative session
//! state, so the two views stay in step.

use super::EngineEvent;
use crate::assessment::{
    ArtifactRef, AssessmentService, ExchangeContext, FALLBACK_EXAMINER_LINE, TurnFeedback,
};
use crate::phase::{ExamKind, Phase, detect_transition, is_end_of_exam};
use crate::speech::{CaptureErrorKind, CaptureGate, CaptureOutcome, PlaybackGate, PlaybackOutcome};
use crate::transcript::{Speaker, Transcript};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Synthetic candidate text sent at session start to elicit the
/// examiner's opening line. It goes to the service but is never
/// recorded in the transcript.
pub const BEGIN_TOKEN: &str = "begin";

/// Synthetic candidate text asking the examiner to move straight to the
/// next part. Test/debug shortcut; goes to the service, never recorded.
pub const SKIP_TOKEN: &str = "skip";

/// True for candidate text the engine treats as an internal token
/// rather than something the candidate actually said.
fn is_synthetic_token(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.eq_ignore_ascii_case(BEGIN_TOKEN) || trimmed.eq_ignore_ascii_case(SKIP_TOKEN)
}

/// What happened inside the turn cycle, reported to the controller.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TurnEvent {
    /// The candidate's utterance was accepted for exchange.
    Candidate { text: String },
    /// The examiner's reply for one exchange.
    Examiner {
        text: String,
        points: Option<u32>,
        feedback: Option<TurnFeedback>,
        /// True when the reply is the local fallback line after a
        /// service failure.
        fallback: bool,
    },
    /// Capture failed transiently; the coordinator is listening again.
    CaptureTrouble { kind: CaptureErrorKind },
    /// The end-of-exam line finished playing; finalization may begin.
    Concluded,
}

/// Protocol position within one turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    AwaitingCandidate,
    Sending,
    AwaitingExaminerSpeech,
}

/// Drives exchange cycles until the exam ends, the session token is
/// cancelled, or the controller goes away.
pub(crate) struct TurnCoordinator {
    service: Arc<dyn AssessmentService>,
    capture: CaptureGate,
    playback: PlaybackGate,
    kind: ExamKind,
    phase: Phase,
    transcript: Transcript,
    artifact: watch::Receiver<Option<ArtifactRef>>,
    generation: u64,
    cancel: CancellationToken,
    events: mpsc::Sender<EngineEvent>,
    state: TurnState,
}

impl TurnCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        service: Arc<dyn AssessmentService>,
        capture: CaptureGate,
        playback: PlaybackGate,
        kind: ExamKind,
        artifact: watch::Receiver<Option<ArtifactRef>>,
        generation: u64,
        cancel: CancellationToken,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        Self {
            service,
            capture,
            playback,
            kind,
            phase: kind.initial_phase(),
            transcript: Transcript::new(),
            artifact,
            generation,
            cancel,
            events,
            state: TurnState::AwaitingCandidate,
        }
    }

    /// Run turn cycles to completion.
    ///
    /// The first cycle is synthetic: the begin token is exchanged
    /// without capturing, so the examiner speaks first.
    pub(crate) async fn run(mut self) {
        let mut pending = Some(BEGIN_TOKEN.to_owned());

        loop {
            self.set_state(TurnState::AwaitingCandidate);
            let candidate_text = match pending.take() {
                Some(token) => token,
                None => match self.capture.capture(&self.cancel).await {
                    CaptureOutcome::Utterance(text) => {
                        if text.trim().is_empty() {
                            debug!("discarding empty capture");
                            continue;
                        }
                        text
                    }
                    CaptureOutcome::Trouble(kind) => {
                        debug!(?kind, "capture trouble, listening again");
                        if !self.emit(TurnEvent::CaptureTrouble { kind }).await {
                            return;
                        }
                        continue;
                    }
                    CaptureOutcome::Cancelled => return,
                },
            };

            if !self.exchange(candidate_text).await {
                return;
            }
        }
    }

    /// One Sending → AwaitingExaminerSpeech leg. Returns false when the
    /// cycle must stop: cancellation, controller gone, or exam over.
    async fn exchange(&mut self, candidate_text: String) -> bool {
        self.set_state(TurnState::Sending);

        if !is_synthetic_token(&candidate_text) {
            self.transcript
                .record(Speaker::Candidate, candidate_text.clone());
            let event = TurnEvent::Candidate {
                text: candidate_text.clone(),
            };
            if !self.emit(event).await {
                return false;
            }
        }

        let artifact = self.artifact.borrow().clone();
        let result = {
            let context = ExchangeContext {
                kind: self.kind,
                phase: self.phase,
                transcript: &self.transcript,
                artifact: artifact.as_ref(),
            };
            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("exchange cancelled mid-flight");
                    return false;
                }
                result = self.service.exchange_turn(&context, &candidate_text) => result,
            }
        };

        let (text, points, feedback, fallback) = match result {
            Ok(outcome) => (
                outcome.examiner_text,
                outcome.points_awarded,
                outcome.feedback,
                false,
            ),
            Err(err) => {
                warn!("exchange failed, speaking fallback line: {err}");
                (FALLBACK_EXAMINER_LINE.to_owned(), Some(0), None, true)
            }
        };

        let end_of_exam = is_end_of_exam(&text);
        self.transcript.record(Speaker::Examiner, text.clone());
        if let Some(next) = detect_transition(&text, self.kind, self.phase) {
            self.phase = next;
        }
        let event = TurnEvent::Examiner {
            text: text.clone(),
            points,
            feedback,
            fallback,
        };
        if !self.emit(event).await {
            return false;
        }

        self.set_state(TurnState::AwaitingExaminerSpeech);
        if self.playback.play(&text, &self.cancel).await == PlaybackOutcome::Cancelled {
            return false;
        }

        if end_of_exam {
            info!("end-of-exam line spoken");
            let _ = self.emit(TurnEvent::Concluded).await;
            return false;
        }
        true
    }

    /// Send one event to the controller, tagged with the session
    /// generation. False when the controller is gone.
    async fn emit(&self, event: TurnEvent) -> bool {
        self.events
            .send(EngineEvent::Turn {
                generation: self.generation,
                event,
            })
            .await
            .is_ok()
    }

    fn set_state(&mut self, next: TurnState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "turn state");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::assessment::scripted::ScriptedAssessment;
    use crate::phase::END_OF_EXAM_PHRASE;
    use crate::speech::scripted::{ScriptedCapture, ScriptedPlayback};
    use crate::speech::{SpeechCapture, SpeechPlayback};
    use std::time::Duration;

    const TEST_GENERATION: u64 = 7;

    fn spawn_coordinator(
        service: Arc<ScriptedAssessment>,
        capture: Arc<ScriptedCapture>,
        playback: Arc<ScriptedPlayback>,
    ) -> (mpsc::Receiver<EngineEvent>, CancellationToken) {
        let (tx, rx) = mpsc::channel(32);
        let (_artifact_tx, artifact_rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let coordinator = TurnCoordinator::new(
            service as Arc<dyn AssessmentService>,
            CaptureGate::new(capture as Arc<dyn SpeechCapture>),
            PlaybackGate::new(playback as Arc<dyn SpeechPlayback>),
            ExamKind::MockExam,
            artifact_rx,
            TEST_GENERATION,
            cancel.clone(),
            tx,
        );
        tokio::spawn(coordinator.run());
        (rx, cancel)
    }

    async fn next_event(rx: &mut mpsc::Receiver<EngineEvent>) -> Option<TurnEvent> {
        match rx.recv().await {
            Some(EngineEvent::Turn { generation, event }) => {
                assert_eq!(generation, TEST_GENERATION);
                Some(event)
            }
            Some(other) => panic!("unexpected engine event: {other:?}"),
            None => None,
        }
    }

    fn examiner_text(event: TurnEvent) -> String {
        match event {
            TurnEvent::Examiner { text, .. } => text,
            other => panic!("expected examiner event, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn opening_line_arrives_without_candidate_entry() {
        let service = Arc::new(ScriptedAssessment::new(&["Good morning. What is your name?"]));
        let capture = Arc::new(ScriptedCapture::new(&["My name is Ana."]));
        let playback = Arc::new(ScriptedPlayback::new());
        let (mut rx, _cancel) =
            spawn_coordinator(Arc::clone(&service), capture, Arc::clone(&playback));

        let first = next_event(&mut rx).await.expect("opening event");
        assert_eq!(
            examiner_text(first),
            "Good morning. What is your name?".to_owned()
        );
        assert_eq!(service.candidate_texts()[0], BEGIN_TOKEN);

        let second = next_event(&mut rx).await.expect("candidate event");
        assert_eq!(
            second,
            TurnEvent::Candidate {
                text: "My name is Ana.".into()
            }
        );

        // Script exhausted: the next reply is the closing line, played
        // to completion before the cycle concludes.
        let third = next_event(&mut rx).await.expect("closing event");
        assert_eq!(examiner_text(third), END_OF_EXAM_PHRASE);
        assert_eq!(next_event(&mut rx).await, Some(TurnEvent::Concluded));
        assert_eq!(next_event(&mut rx).await, None);
        assert_eq!(playback.spoken().last().map(String::as_str), Some(END_OF_EXAM_PHRASE));
    }

    #[tokio::test]
    async fn empty_capture_is_discarded_without_events() {
        let service = Arc::new(ScriptedAssessment::new(&["Opening.", "Next question."]));
        let capture = Arc::new(ScriptedCapture::new(&["", "A real answer."]));
        let playback = Arc::new(ScriptedPlayback::new());
        let (mut rx, _cancel) = spawn_coordinator(Arc::clone(&service), capture, playback);

        let _opening = next_event(&mut rx).await.expect("opening");
        let candidate = next_event(&mut rx).await.expect("candidate");
        assert_eq!(
            candidate,
            TurnEvent::Candidate {
                text: "A real answer.".into()
            }
        );
        // The empty capture never reached the service.
        assert_eq!(service.candidate_texts(), vec![BEGIN_TOKEN, "A real answer."]);
    }

    #[tokio::test]
    async fn capture_trouble_is_reported_and_capture_rearms() {
        let service = Arc::new(ScriptedAssessment::new(&["Opening.", "Go on."]));
        let capture = Arc::new(
            ScriptedCapture::new(&[])
                .with_trouble(CaptureErrorKind::NoSpeechDetected)
                .with_utterance("Here now."),
        );
        let playback = Arc::new(ScriptedPlayback::new());
        let (mut rx, _cancel) = spawn_coordinator(service, capture, playback);

        let _opening = next_event(&mut rx).await.expect("opening");
        assert_eq!(
            next_event(&mut rx).await,
            Some(TurnEvent::CaptureTrouble {
                kind: CaptureErrorKind::NoSpeechDetected
            })
        );
        assert_eq!(
            next_event(&mut rx).await,
            Some(TurnEvent::Candidate {
                text: "Here now.".into()
            })
        );
    }

    #[tokio::test]
    async fn failed_exchange_speaks_fallback_and_cycle_continues() {
        let service = Arc::new(
            ScriptedAssessment::new(&["Opening.", "consumed by failure", "After recovery."])
                .failing_on_exchange(2),
        );
        let capture = Arc::new(ScriptedCapture::new(&["First answer.", "Second answer."]));
        let playback = Arc::new(ScriptedPlayback::new());
        let (mut rx, _cancel) = spawn_coordinator(service, capture, Arc::clone(&playback));

        let _opening = next_event(&mut rx).await.expect("opening");
        let _candidate = next_event(&mut rx).await.expect("first candidate");

        let fallback = next_event(&mut rx).await.expect("fallback examiner");
        match fallback {
            TurnEvent::Examiner {
                text,
                points,
                fallback,
                ..
            } => {
                assert_eq!(text, FALLBACK_EXAMINER_LINE);
                assert_eq!(points, Some(0));
                assert!(fallback);
            }
            other => panic!("expected fallback line, got {other:?}"),
        }

        // The failed exchange never stalls the session: the next answer
        // is captured and exchanged normally.
        let _candidate = next_event(&mut rx).await.expect("second candidate");
        let recovered = next_event(&mut rx).await.expect("recovered examiner");
        assert_eq!(examiner_text(recovered), "After recovery.".to_owned());
        assert!(playback.spoken().contains(&FALLBACK_EXAMINER_LINE.to_owned()));
    }

    #[tokio::test]
    async fn skip_token_is_exchanged_but_never_recorded() {
        let service = Arc::new(ScriptedAssessment::new(&["Opening.", "Moving on."]));
        let capture = Arc::new(ScriptedCapture::new(&[SKIP_TOKEN]));
        let playback = Arc::new(ScriptedPlayback::new());
        let (mut rx, _cancel) = spawn_coordinator(Arc::clone(&service), capture, playback);

        let _opening = next_event(&mut rx).await.expect("opening");
        // No candidate event for the skip token: straight to the next
        // examiner line.
        let next = next_event(&mut rx).await.expect("post-skip examiner");
        assert_eq!(examiner_text(next), "Moving on.".to_owned());
        assert_eq!(service.candidate_texts(), vec![BEGIN_TOKEN, SKIP_TOKEN]);
    }

    #[tokio::test(start_paused = true)]
    async fn conclusion_waits_for_closing_line_playback() {
        // Empty script: the very first exchange answers with the
        // closing line. Playback takes five seconds.
        let service = Arc::new(ScriptedAssessment::new(&[]));
        let capture = Arc::new(ScriptedCapture::new(&[]));
        let playback = Arc::new(ScriptedPlayback::new().with_delay(Duration::from_secs(5)));
        let (mut rx, _cancel) = spawn_coordinator(service, capture, Arc::clone(&playback));

        let closing = next_event(&mut rx).await.expect("closing event");
        assert_eq!(examiner_text(closing), END_OF_EXAM_PHRASE);
        // The closing line is still being spoken.
        assert!(playback.spoken().is_empty());

        assert_eq!(next_event(&mut rx).await, Some(TurnEvent::Concluded));
        assert_eq!(playback.spoken(), vec![END_OF_EXAM_PHRASE.to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_mid_exchange_emits_nothing_further() {
        let service = Arc::new(
            ScriptedAssessment::new(&["Opening.", "Never spoken."])
                .with_exchange_delay(Duration::from_secs(3600)),
        );
        let capture = Arc::new(ScriptedCapture::new(&["One."]));
        let playback = Arc::new(ScriptedPlayback::new());
        let (mut rx, cancel) = spawn_coordinator(Arc::clone(&service), capture, playback);

        let _opening = next_event(&mut rx).await.expect("opening");
        let _candidate = next_event(&mut rx).await.expect("candidate");

        // The second exchange is now in flight; cancel the session.
        cancel.cancel();

        // No examiner event for the in-flight exchange: the channel
        // closes with nothing further.
        assert_eq!(next_event(&mut rx).await, None);
        assert_eq!(service.exchange_calls(), 2);
    }
}
