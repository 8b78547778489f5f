//! Assessment Service interface: examiner turns, scoring, and artifacts.
//!
//! The engine talks to the service through the [`AssessmentService`]
//! trait only. [`http::HttpAssessment`] implements it against an
//! OpenAI-compatible API; [`scripted::ScriptedAssessment`] replays
//! canned examiner lines for tests and demos.

pub mod http;
pub mod scripted;

use crate::phase::{ExamKind, Phase};
use crate::transcript::Transcript;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Examiner line spoken when an exchange fails. The session must keep
/// moving, so a broken service turns into an apology plus zero points.
pub const FALLBACK_EXAMINER_LINE: &str =
    "I'm sorry, I didn't catch that. Let's move on to the next question.";

/// Errors from the Assessment Service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Transport-level failure (connect, TLS, body read).
    #[error("assessment request failed: {0}")]
    Http(String),

    /// The service answered with a non-success status.
    #[error("assessment API error {status}: {message}")]
    Api { status: u16, message: String },

    /// The response body did not match the expected shape.
    #[error("assessment response malformed: {0}")]
    Decode(String),

    /// The request exceeded its deadline.
    #[error("assessment request timed out: {0}")]
    Timeout(String),
}

impl ServiceError {
    /// True when retrying the same request may succeed: network
    /// failures, timeouts, rate limits and server errors. Malformed
    /// responses and client errors are not retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }
}

/// Reference to the exam picture, either generated for this session or
/// the configured static fallback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// URL or bundled asset path.
    pub location: String,
    /// Whether this artifact was generated for the session.
    pub generated: bool,
}

impl ArtifactRef {
    /// Artifact generated for this session.
    pub fn generated(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            generated: true,
        }
    }

    /// Static fallback artifact from configuration.
    pub fn fallback(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            generated: false,
        }
    }
}

/// Per-turn feedback on the candidate's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnFeedback {
    /// Short note on the answer.
    pub comment: String,
    /// A more natural phrasing of what the candidate said, when the
    /// service offers one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub better_phrasing: Option<String>,
}

/// Structured reply to one exchanged turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutcome {
    /// What the examiner says next.
    pub examiner_text: String,
    /// Optional feedback on the candidate's last answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<TurnFeedback>,
    /// Points awarded for the candidate's last answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points_awarded: Option<u32>,
}

/// Final scoring summary for a completed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreSummary {
    /// Overall score, 0 to 100.
    pub overall_score: u32,
    /// What went well.
    #[serde(default)]
    pub strengths: Vec<String>,
    /// What to work on.
    #[serde(default)]
    pub areas_for_improvement: Vec<String>,
}

/// Long-form commentary on the full transcript.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptAnalysis {
    /// Free-text analysis of the candidate's performance.
    pub analysis: String,
}

/// Read-only context the service needs to produce the next examiner
/// line: where the exam is and everything said so far.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeContext<'a> {
    pub kind: ExamKind,
    pub phase: Phase,
    pub transcript: &'a Transcript,
    pub artifact: Option<&'a ArtifactRef>,
}

/// The examiner brain: produces examiner lines, per-turn points, the
/// final summary, the transcript analysis and the exam picture.
///
/// Every method is a single request/response exchange. Fallback and
/// degradation policy live in the caller, not here.
#[async_trait]
pub trait AssessmentService: Send + Sync {
    /// Exchange one candidate utterance for the next examiner line.
    async fn exchange_turn(
        &self,
        context: &ExchangeContext<'_>,
        candidate_text: &str,
    ) -> Result<TurnOutcome, ServiceError>;

    /// Score the completed session.
    async fn final_summary(
        &self,
        transcript: &Transcript,
        kind: ExamKind,
    ) -> Result<ScoreSummary, ServiceError>;

    /// Produce long-form commentary on the completed session.
    async fn transcript_analysis(
        &self,
        transcript: &Transcript,
        artifact: Option<&ArtifactRef>,
    ) -> Result<TranscriptAnalysis, ServiceError>;

    /// Generate the exam picture for a mock exam session.
    async fn generate_artifact(&self, prompt: &str) -> Result<ArtifactRef, ServiceError>;
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ServiceError::Http("connection refused".into()).is_retryable());
        assert!(ServiceError::Timeout("30s elapsed".into()).is_retryable());
        assert!(
            ServiceError::Api {
                status: 429,
                message: "rate limited".into()
            }
            .is_retryable()
        );
        assert!(
            ServiceError::Api {
                status: 503,
                message: "overloaded".into()
            }
            .is_retryable()
        );
        assert!(
            !ServiceError::Api {
                status: 401,
                message: "bad key".into()
            }
            .is_retryable()
        );
        assert!(!ServiceError::Decode("missing field".into()).is_retryable());
    }

    #[test]
    fn turn_outcome_decodes_with_optional_fields() {
        let full: TurnOutcome = serde_json::from_str(
            r#"{
                "examiner_text": "Tell me about your home town.",
                "feedback": {"comment": "Clear answer."},
                "points_awarded": 2
            }"#,
        )
        .expect("full outcome");
        assert_eq!(full.examiner_text, "Tell me about your home town.");
        assert_eq!(full.points_awarded, Some(2));

        let minimal: TurnOutcome =
            serde_json::from_str(r#"{"examiner_text": "Go on."}"#).expect("minimal outcome");
        assert!(minimal.feedback.is_none());
        assert!(minimal.points_awarded.is_none());
    }
}
