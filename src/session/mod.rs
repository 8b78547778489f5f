//! Session controller: the single actor that owns an exam attempt.
//!
//! One controller task owns the `Session` value and is the only place
//! that mutates `state`, `phase`, and `remaining_seconds`. Everything
//! else (the countdown clock, the turn coordinator, artifact
//! generation, finalization) runs on its own task and reports back over
//! one internal channel, so events apply in the order they resolve.
//!
//! Stale work is handled with a session generation counter: every
//! spawned task carries the generation it was started under, and the
//! controller drops any event whose generation no longer matches. A
//! cancelled session can therefore never append a turn, tick the clock,
//! or produce a result after the cancellation point.

mod results;
mod turn;

pub use results::{DEGRADED_ANALYSIS_NOTE, DEGRADED_SUMMARY_NOTE, ExamResult};
pub use turn::{BEGIN_TOKEN, SKIP_TOKEN};

use crate::assessment::{ArtifactRef, AssessmentService};
use crate::clock::{self, ClockEvent};
use crate::config::ExamConfig;
use crate::error::{ExamError, Result};
use crate::events::{SessionEvent, SessionSnapshot};
use crate::phase::{ExamKind, Phase, detect_transition};
use crate::progress::{NullProgress, ProgressSink};
use crate::speech::{CaptureGate, PlaybackGate, SpeechCapture, SpeechPlayback};
use crate::transcript::{Speaker, Transcript};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use turn::{TurnCoordinator, TurnEvent};
use uuid::Uuid;

/// Control command channel depth.
const COMMAND_CHANNEL_SIZE: usize = 16;
/// Internal event channel depth. Sized for a clock tick backlog plus a
/// full turn's worth of events.
const INTERNAL_CHANNEL_SIZE: usize = 64;
/// Broadcast capacity for session events; a lagging UI loses old events
/// instead of stalling the session.
const EVENT_CHANNEL_SIZE: usize = 256;

/// Where the session state machine is.
///
/// The state only advances, with one exception: leaving the results
/// screen resets `Results` to `Idle`, and a fresh session replaces the
/// old one rather than mutating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No attempt in progress.
    Idle,
    /// Turn cycles running under the countdown clock.
    Running,
    /// Clock stopped, gates cancelled, scoring requests in flight.
    Finalizing,
    /// A result is available until the user moves on.
    Results,
}

/// One exam attempt. Owned exclusively by the controller task.
struct Session {
    id: Uuid,
    kind: ExamKind,
    phase: Phase,
    remaining_seconds: u64,
    started_at: DateTime<Utc>,
    transcript: Transcript,
    points: u32,
    artifact: Option<ArtifactRef>,
    result: Option<ExamResult>,
    cancel: CancellationToken,
}

/// Everything the controller's child tasks can report back.
#[derive(Debug)]
pub(crate) enum EngineEvent {
    Clock {
        generation: u64,
        event: ClockEvent,
    },
    Turn {
        generation: u64,
        event: TurnEvent,
    },
    Artifact {
        generation: u64,
        artifact: ArtifactRef,
    },
    Finalized {
        generation: u64,
        result: ExamResult,
    },
}

enum Command {
    Start {
        kind: ExamKind,
        reply: oneshot::Sender<Result<Uuid>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<()>>,
    },
    Retake {
        reply: oneshot::Sender<Result<Uuid>>,
    },
    BackToDashboard {
        reply: oneshot::Sender<Result<()>>,
    },
}

/// Builder for the exam engine.
///
/// Wire up the assessment service, the speech providers and optionally
/// a progress sink, then [`spawn`](Self::spawn) the controller task and
/// drive it through the returned [`ExamControls`].
pub struct ExamEngine {
    config: ExamConfig,
    service: Arc<dyn AssessmentService>,
    capture: Arc<dyn SpeechCapture>,
    playback: Arc<dyn SpeechPlayback>,
    progress: Arc<dyn ProgressSink>,
}

impl ExamEngine {
    /// Create an engine with the given collaborators and a no-op
    /// progress sink.
    pub fn new(
        config: ExamConfig,
        service: Arc<dyn AssessmentService>,
        capture: Arc<dyn SpeechCapture>,
        playback: Arc<dyn SpeechPlayback>,
    ) -> Self {
        Self {
            config,
            service,
            capture,
            playback,
            progress: Arc::new(NullProgress),
        }
    }

    /// Attach a progress sink for per-turn points and session completion.
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    /// Spawn the controller task and hand back its controls.
    ///
    /// The controller stops once every clone of the returned controls
    /// has been dropped, cancelling any session still in flight.
    pub fn spawn(self) -> ExamControls {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_CHANNEL_SIZE);
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::default());

        let controller = SessionController {
            config: self.config,
            service: self.service,
            capture: self.capture,
            playback: self.playback,
            progress: self.progress,
            state: SessionState::Idle,
            session: None,
            generation: 0,
            artifact_tx: None,
            internal_tx,
            events_tx: events_tx.clone(),
            snapshot_tx,
        };
        tokio::spawn(controller.run(command_rx, internal_rx));

        ExamControls {
            commands: command_tx,
            events: events_tx,
            snapshot: snapshot_rx,
        }
    }
}

/// Handle for driving and observing the engine. Cheap to clone.
#[derive(Clone)]
pub struct ExamControls {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
    snapshot: watch::Receiver<SessionSnapshot>,
}

impl ExamControls {
    /// Start a new attempt. Valid from `Idle` and from the results
    /// screen; fails while a session is running or finalizing.
    pub async fn start(&self, kind: ExamKind) -> Result<Uuid> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Start { kind, reply }, rx).await
    }

    /// Abandon the current attempt: everything stops, the transcript is
    /// discarded and no result is produced. Valid from `Running` and
    /// `Finalizing`.
    pub async fn cancel(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cancel { reply }, rx).await
    }

    /// Start a fresh attempt of the same exam kind. Valid only from the
    /// results screen.
    pub async fn retake(&self) -> Result<Uuid> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Retake { reply }, rx).await
    }

    /// Leave the results screen, discarding the finished session. A
    /// no-op when already idle.
    pub async fn back_to_dashboard(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::BackToDashboard { reply }, rx).await
    }

    /// Current read-only view of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watch channel publishing a fresh snapshot after every mutation.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Subscribe to session events. Only events emitted after the call
    /// are delivered, so subscribe before calling `start`.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    async fn send<T>(&self, command: Command, rx: oneshot::Receiver<Result<T>>) -> Result<T> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ExamError::Channel("session controller is gone".into()))?;
        rx.await
            .map_err(|_| ExamError::Channel("session controller dropped the reply".into()))?
    }
}

/// The actor behind [`ExamControls`].
struct SessionController {
    config: ExamConfig,
    service: Arc<dyn AssessmentService>,
    capture: Arc<dyn SpeechCapture>,
    playback: Arc<dyn SpeechPlayback>,
    progress: Arc<dyn ProgressSink>,
    state: SessionState,
    session: Option<Session>,
    /// Bumped on every new session and on cancellation; events carrying
    /// an older generation are dropped.
    generation: u64,
    /// Publishes the exam picture to the current turn coordinator.
    artifact_tx: Option<watch::Sender<Option<ArtifactRef>>>,
    /// Kept so the internal channel never closes while the controller
    /// runs; child tasks get clones.
    internal_tx: mpsc::Sender<EngineEvent>,
    events_tx: broadcast::Sender<SessionEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut internal: mpsc::Receiver<EngineEvent>,
    ) {
        info!("session controller started");
        loop {
            tokio::select! {
                command = commands.recv() => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        // All control handles dropped.
                        None => break,
                    }
                }
                event = internal.recv() => {
                    // Never `None`: we hold a sender clone ourselves.
                    if let Some(event) = event {
                        self.handle_engine_event(event).await;
                    }
                }
            }
        }
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
        }
        debug!("session controller stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { kind, reply } => {
                let _ = reply.send(self.start_attempt(kind));
            }
            Command::Cancel { reply } => {
                let _ = reply.send(self.cancel_attempt());
            }
            Command::Retake { reply } => {
                let _ = reply.send(self.retake_attempt());
            }
            Command::BackToDashboard { reply } => {
                let _ = reply.send(self.dismiss_results());
            }
        }
    }

    fn start_attempt(&mut self, kind: ExamKind) -> Result<Uuid> {
        match self.state {
            SessionState::Idle => Ok(self.start_session(kind)),
            SessionState::Results => {
                // Terminal reset: the finished session is replaced, not
                // mutated.
                self.set_state(SessionState::Idle);
                Ok(self.start_session(kind))
            }
            SessionState::Running | SessionState::Finalizing => Err(ExamError::Session(
                "a session is already in progress".into(),
            )),
        }
    }

    fn cancel_attempt(&mut self) -> Result<()> {
        match self.state {
            SessionState::Running | SessionState::Finalizing => {
                self.discard_session();
                Ok(())
            }
            SessionState::Idle | SessionState::Results => {
                Err(ExamError::Session("no session to cancel".into()))
            }
        }
    }

    fn retake_attempt(&mut self) -> Result<Uuid> {
        if self.state != SessionState::Results {
            return Err(ExamError::Session(
                "retake is only available from the results screen".into(),
            ));
        }
        let Some(kind) = self.session.as_ref().map(|session| session.kind) else {
            return Err(ExamError::Session("no finished session to retake".into()));
        };
        self.set_state(SessionState::Idle);
        Ok(self.start_session(kind))
    }

    fn dismiss_results(&mut self) -> Result<()> {
        match self.state {
            SessionState::Results => {
                self.session = None;
                self.artifact_tx = None;
                self.generation += 1;
                self.set_state(SessionState::Idle);
                self.publish_snapshot();
                Ok(())
            }
            SessionState::Idle => Ok(()),
            SessionState::Running | SessionState::Finalizing => Err(ExamError::Session(
                "cannot leave while a session is in progress; cancel it first".into(),
            )),
        }
    }

    /// Create a fresh session and spawn its clock, turn coordinator and
    /// (when configured) artifact generation.
    fn start_session(&mut self, kind: ExamKind) -> Uuid {
        self.generation += 1;
        let generation = self.generation;
        let duration = self.config.session.duration_for(kind);
        let cancel = CancellationToken::new();
        let id = Uuid::new_v4();

        self.session = Some(Session {
            id,
            kind,
            phase: kind.initial_phase(),
            remaining_seconds: duration,
            started_at: Utc::now(),
            transcript: Transcript::new(),
            points: 0,
            artifact: None,
            result: None,
            cancel: cancel.clone(),
        });
        self.emit(SessionEvent::SessionStarted { id, kind });
        self.set_state(SessionState::Running);

        let clock_rx = clock::start(duration, cancel.clone());
        tokio::spawn(pump_clock(clock_rx, self.internal_tx.clone(), generation));

        let (artifact_tx, artifact_rx) = watch::channel(None);
        self.artifact_tx = Some(artifact_tx);
        if self.config.artifact.enabled && kind.phases().contains(&Phase::PictureDescription) {
            self.spawn_artifact_task(generation, cancel.clone());
        }

        let coordinator = TurnCoordinator::new(
            Arc::clone(&self.service),
            CaptureGate::new(Arc::clone(&self.capture)),
            PlaybackGate::new(Arc::clone(&self.playback)),
            kind,
            artifact_rx,
            generation,
            cancel,
            self.internal_tx.clone(),
        );
        tokio::spawn(coordinator.run());

        self.publish_snapshot();
        info!(
            session = %id,
            kind = kind.label(),
            duration_secs = duration,
            "session started"
        );
        id
    }

    /// Stop everything, drop the session and go back to idle. No result
    /// is produced and stale events can no longer apply.
    fn discard_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.cancel.cancel();
            info!(session = %session.id, "session cancelled and discarded");
        }
        self.generation += 1;
        self.artifact_tx = None;
        self.set_state(SessionState::Idle);
        self.publish_snapshot();
    }

    /// Generate the exam picture off the session's critical path.
    fn spawn_artifact_task(&self, generation: u64, cancel: CancellationToken) {
        let service = Arc::clone(&self.service);
        let prompt = self.config.artifact.prompt.clone();
        let fallback = self.config.artifact.fallback_ref.clone();
        let timeout = Duration::from_secs(self.config.artifact.timeout_secs);
        let tx = self.internal_tx.clone();

        tokio::spawn(async move {
            let generated = tokio::select! {
                () = cancel.cancelled() => return,
                generated = tokio::time::timeout(timeout, service.generate_artifact(&prompt)) => generated,
            };
            let artifact = match generated {
                Ok(Ok(artifact)) => artifact,
                Ok(Err(err)) => {
                    warn!("artifact generation failed, using fallback: {err}");
                    ArtifactRef::fallback(fallback)
                }
                Err(_) => {
                    warn!("artifact generation timed out, using fallback");
                    ArtifactRef::fallback(fallback)
                }
            };
            let _ = tx.send(EngineEvent::Artifact { generation, artifact }).await;
        });
    }

    async fn handle_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Clock { generation, event } => {
                if self.event_is_current(generation, SessionState::Running) {
                    self.handle_clock_event(event);
                }
            }
            EngineEvent::Turn { generation, event } => {
                if self.event_is_current(generation, SessionState::Running) {
                    self.handle_turn_event(event).await;
                }
            }
            EngineEvent::Artifact { generation, artifact } => {
                if self.event_is_current(generation, SessionState::Running) {
                    self.attach_artifact(artifact);
                }
            }
            EngineEvent::Finalized { generation, result } => {
                if self.event_is_current(generation, SessionState::Finalizing) {
                    self.handle_finalized(result).await;
                }
            }
        }
    }

    /// An event applies only if it carries the current generation and
    /// the session is in the state that kind of event belongs to.
    fn event_is_current(&self, generation: u64, required: SessionState) -> bool {
        if generation != self.generation || self.state != required {
            debug!(
                generation,
                current = self.generation,
                state = ?self.state,
                "dropping stale engine event"
            );
            return false;
        }
        true
    }

    fn handle_clock_event(&mut self, event: ClockEvent) {
        match event {
            ClockEvent::Tick { remaining } => {
                if let Some(session) = self.session.as_mut() {
                    session.remaining_seconds = remaining;
                }
                self.emit(SessionEvent::Tick {
                    remaining_seconds: remaining,
                });
                self.publish_snapshot();
            }
            ClockEvent::Expired => {
                info!("time limit reached, finalizing with what was said so far");
                if let Some(session) = self.session.as_mut() {
                    session.remaining_seconds = 0;
                }
                self.begin_finalization();
            }
        }
    }

    async fn handle_turn_event(&mut self, event: TurnEvent) {
        match event {
            TurnEvent::Candidate { text } => {
                let turn = {
                    let Some(session) = self.session.as_mut() else {
                        return;
                    };
                    session.transcript.record(Speaker::Candidate, text);
                    session.transcript.last().cloned()
                };
                if let Some(turn) = turn {
                    self.emit(SessionEvent::TurnRecorded { turn });
                }
                self.publish_snapshot();
            }
            TurnEvent::Examiner {
                text,
                points,
                feedback,
                fallback,
            } => {
                let (turn, advanced, award) = {
                    let Some(session) = self.session.as_mut() else {
                        return;
                    };
                    session.transcript.record(Speaker::Examiner, text.clone());
                    let turn = session.transcript.last().cloned();
                    let advanced = detect_transition(&text, session.kind, session.phase);
                    if let Some(next) = advanced {
                        session.phase = next;
                    }
                    // Awards are service-supplied; saturate the total.
                    let award = points.unwrap_or(0);
                    session.points = session.points.saturating_add(award);
                    (turn, advanced, award)
                };
                if let Some(turn) = turn {
                    self.emit(SessionEvent::TurnRecorded { turn });
                }
                if let Some(phase) = advanced {
                    info!(phase = phase.label(), "exam phase advanced");
                    self.emit(SessionEvent::PhaseChanged { phase });
                }
                if let Some(feedback) = feedback {
                    self.emit(SessionEvent::FeedbackReceived { feedback });
                }
                if award > 0 && !fallback {
                    self.progress.turn_points(award).await;
                }
                self.publish_snapshot();
            }
            TurnEvent::CaptureTrouble { kind } => {
                self.emit(SessionEvent::CaptureTrouble { kind });
            }
            TurnEvent::Concluded => {
                info!("examiner concluded the exam");
                self.begin_finalization();
            }
        }
    }

    fn attach_artifact(&mut self, artifact: ArtifactRef) {
        if let Some(session) = self.session.as_mut() {
            session.artifact = Some(artifact.clone());
        }
        if let Some(tx) = &self.artifact_tx {
            let _ = tx.send(Some(artifact.clone()));
        }
        info!(
            location = %artifact.location,
            generated = artifact.generated,
            "exam picture ready"
        );
        self.emit(SessionEvent::ArtifactReady { artifact });
    }

    /// Stop the clock and the gates, then fan out the scoring requests
    /// on their own task so the controller stays responsive.
    fn begin_finalization(&mut self) {
        let (cancel, transcript, kind, artifact, started_at) = {
            let Some(session) = self.session.as_ref() else {
                return;
            };
            (
                session.cancel.clone(),
                session.transcript.clone(),
                session.kind,
                session.artifact.clone(),
                session.started_at,
            )
        };
        cancel.cancel();
        self.set_state(SessionState::Finalizing);
        self.publish_snapshot();

        let elapsed = Utc::now().signed_duration_since(started_at);
        info!(
            elapsed_secs = elapsed.num_seconds(),
            turns = transcript.len(),
            "finalizing session"
        );

        let service = Arc::clone(&self.service);
        let tx = self.internal_tx.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let result =
                results::finalize(service.as_ref(), &transcript, kind, artifact.as_ref()).await;
            let _ = tx.send(EngineEvent::Finalized { generation, result }).await;
        });
    }

    async fn handle_finalized(&mut self, result: ExamResult) {
        let points = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            session.result = Some(result.clone());
            session.points
        };
        self.set_state(SessionState::Results);
        self.emit(SessionEvent::ResultReady {
            result: result.clone(),
        });
        self.publish_snapshot();
        info!(
            score = result.summary.overall_score,
            points,
            degraded = result.degraded,
            "session result ready"
        );
        self.progress
            .session_completed(points, result.summary.overall_score)
            .await;
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "session state");
            self.state = next;
            self.emit(SessionEvent::StateChanged { state: next });
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Fails only when nobody is subscribed, which is fine.
        let _ = self.events_tx.send(event);
    }

    fn publish_snapshot(&self) {
        let snapshot = match &self.session {
            Some(session) => SessionSnapshot {
                state: self.state,
                session_id: Some(session.id),
                kind: Some(session.kind),
                phase: Some(session.phase),
                remaining_seconds: session.remaining_seconds,
                transcript: session.transcript.clone(),
                points: session.points,
                result: session.result.clone(),
            },
            None => SessionSnapshot {
                state: self.state,
                ..SessionSnapshot::default()
            },
        };
        let _ = self.snapshot_tx.send(snapshot);
    }
}

/// Forward clock events into the internal channel, tagged with the
/// generation they belong to.
async fn pump_clock(
    mut clock_rx: mpsc::Receiver<ClockEvent>,
    events: mpsc::Sender<EngineEvent>,
    generation: u64,
) {
    while let Some(event) = clock_rx.recv().await {
        if events
            .send(EngineEvent::Clock { generation, event })
            .await
            .is_err()
        {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::assessment::scripted::ScriptedAssessment;
    use crate::speech::scripted::{ScriptedCapture, ScriptedPlayback};

    fn engine_with(service: ScriptedAssessment, capture: ScriptedCapture) -> ExamControls {
        ExamEngine::new(
            ExamConfig::default(),
            Arc::new(service),
            Arc::new(capture),
            Arc::new(ScriptedPlayback::new()),
        )
        .spawn()
    }

    #[tokio::test]
    async fn snapshot_starts_idle_and_empty() {
        let controls = engine_with(ScriptedAssessment::new(&[]), ScriptedCapture::new(&[]));
        let snapshot = controls.snapshot();
        assert_eq!(snapshot.state, SessionState::Idle);
        assert!(snapshot.session_id.is_none());
        assert!(snapshot.transcript.is_empty());
        assert!(snapshot.result.is_none());
    }

    #[tokio::test]
    async fn controls_reject_out_of_state_commands() {
        // One scripted line and no capture input: after the opening
        // line the session sits in Running with capture parked.
        let controls = engine_with(
            ScriptedAssessment::new(&["Good morning."]),
            ScriptedCapture::new(&[]),
        );

        assert!(matches!(
            controls.cancel().await,
            Err(ExamError::Session(_))
        ));
        assert!(matches!(
            controls.retake().await,
            Err(ExamError::Session(_))
        ));

        controls.start(ExamKind::MockExam).await.expect("start");
        assert!(matches!(
            controls.start(ExamKind::MockExam).await,
            Err(ExamError::Session(_))
        ));
        assert!(matches!(
            controls.back_to_dashboard().await,
            Err(ExamError::Session(_))
        ));

        controls.cancel().await.expect("cancel");
        assert_eq!(controls.snapshot().state, SessionState::Idle);
        assert!(matches!(
            controls.cancel().await,
            Err(ExamError::Session(_))
        ));
    }

    #[tokio::test]
    async fn back_to_dashboard_is_a_no_op_when_idle() {
        let controls = engine_with(ScriptedAssessment::new(&[]), ScriptedCapture::new(&[]));
        controls.back_to_dashboard().await.expect("no-op");
        assert_eq!(controls.snapshot().state, SessionState::Idle);
    }
}
