//! Scripted Assessment Service for tests and rehearsal demos.
//!
//! Examiner lines come from a fixed script; scoring is canned. Failure
//! injection covers the paths the engine must survive: a failed turn
//! exchange, failed finalization branches, and failed artifact
//! generation.

use super::{
    ArtifactRef, AssessmentService, ExchangeContext, ScoreSummary, ServiceError,
    TranscriptAnalysis, TurnOutcome,
};
use crate::phase::{ExamKind, END_OF_EXAM_PHRASE};
use crate::transcript::Transcript;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Assessment Service that replays a fixed examiner script.
///
/// When the script runs out, every further exchange answers with the
/// end-of-exam phrase, so a scripted session always terminates.
pub struct ScriptedAssessment {
    lines: Mutex<VecDeque<String>>,
    exchange_calls: AtomicUsize,
    candidate_texts: Mutex<Vec<String>>,
    fail_on_exchange: Option<usize>,
    points_per_exchange: Option<u32>,
    exchange_delay: Option<Duration>,
    summary: ScoreSummary,
    analysis: TranscriptAnalysis,
    fail_summary: bool,
    fail_analysis: bool,
    fail_artifact: bool,
}

impl ScriptedAssessment {
    /// Script the given examiner lines, in order.
    pub fn new(lines: &[&str]) -> Self {
        Self {
            lines: Mutex::new(lines.iter().map(|line| (*line).to_owned()).collect()),
            exchange_calls: AtomicUsize::new(0),
            candidate_texts: Mutex::new(Vec::new()),
            fail_on_exchange: None,
            points_per_exchange: None,
            exchange_delay: None,
            summary: ScoreSummary {
                overall_score: 74,
                strengths: vec!["Clear answers".to_owned()],
                areas_for_improvement: vec!["Expand vocabulary".to_owned()],
            },
            analysis: TranscriptAnalysis {
                analysis: "A solid rehearsal with steady progress through every part."
                    .to_owned(),
            },
            fail_summary: false,
            fail_analysis: false,
            fail_artifact: false,
        }
    }

    /// Make the Nth `exchange_turn` call fail (1-based). The scripted
    /// line for that call is consumed as if the service had answered.
    pub fn failing_on_exchange(mut self, call: usize) -> Self {
        self.fail_on_exchange = Some(call);
        self
    }

    /// Award the given points on every successful exchange.
    pub fn with_points(mut self, points: u32) -> Self {
        self.points_per_exchange = Some(points);
        self
    }

    /// Each exchange takes `delay` before resolving.
    pub fn with_exchange_delay(mut self, delay: Duration) -> Self {
        self.exchange_delay = Some(delay);
        self
    }

    /// Override the canned final summary.
    pub fn with_summary(mut self, summary: ScoreSummary) -> Self {
        self.summary = summary;
        self
    }

    /// `final_summary` always fails.
    pub fn failing_summary(mut self) -> Self {
        self.fail_summary = true;
        self
    }

    /// `transcript_analysis` always fails.
    pub fn failing_analysis(mut self) -> Self {
        self.fail_analysis = true;
        self
    }

    /// `generate_artifact` always fails.
    pub fn failing_artifact(mut self) -> Self {
        self.fail_artifact = true;
        self
    }

    /// Number of `exchange_turn` calls so far.
    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    /// Every candidate text passed to `exchange_turn`, in order.
    /// Includes the synthetic tokens the engine sends but never records.
    pub fn candidate_texts(&self) -> Vec<String> {
        self.candidate_texts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl AssessmentService for ScriptedAssessment {
    async fn exchange_turn(
        &self,
        _context: &ExchangeContext<'_>,
        candidate_text: &str,
    ) -> Result<TurnOutcome, ServiceError> {
        let call = self.exchange_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.candidate_texts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(candidate_text.to_owned());

        if let Some(delay) = self.exchange_delay {
            tokio::time::sleep(delay).await;
        }

        let line = self
            .lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| END_OF_EXAM_PHRASE.to_owned());

        if self.fail_on_exchange == Some(call) {
            return Err(ServiceError::Http("scripted exchange failure".to_owned()));
        }

        Ok(TurnOutcome {
            examiner_text: line,
            feedback: None,
            points_awarded: self.points_per_exchange,
        })
    }

    async fn final_summary(
        &self,
        _transcript: &Transcript,
        _kind: ExamKind,
    ) -> Result<ScoreSummary, ServiceError> {
        if self.fail_summary {
            return Err(ServiceError::Http("scripted summary failure".to_owned()));
        }
        Ok(self.summary.clone())
    }

    async fn transcript_analysis(
        &self,
        _transcript: &Transcript,
        _artifact: Option<&ArtifactRef>,
    ) -> Result<TranscriptAnalysis, ServiceError> {
        if self.fail_analysis {
            return Err(ServiceError::Http("scripted analysis failure".to_owned()));
        }
        Ok(self.analysis.clone())
    }

    async fn generate_artifact(&self, _prompt: &str) -> Result<ArtifactRef, ServiceError> {
        if self.fail_artifact {
            return Err(ServiceError::Http("scripted artifact failure".to_owned()));
        }
        Ok(ArtifactRef::generated("scripted://exam-picture"))
    }
}
