//! Results aggregation: fan out the final scoring requests and merge
//! their outcomes, tolerating partial failure.

use crate::assessment::{ArtifactRef, AssessmentService, ScoreSummary, TranscriptAnalysis};
use crate::phase::ExamKind;
use crate::transcript::Transcript;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Stands in for the holistic summary when its request fails.
pub const DEGRADED_SUMMARY_NOTE: &str =
    "Scoring was unavailable for this session. Your answers were recorded in full.";

/// Stands in for the transcript analysis when its request fails.
pub const DEGRADED_ANALYSIS_NOTE: &str =
    "A detailed transcript analysis was unavailable for this session.";

/// The merged outcome of one finished attempt.
///
/// Computed exactly once per session; a new result requires a new
/// session. Either component may be a placeholder when its request
/// failed, in which case `degraded` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamResult {
    /// Holistic score, strengths, and areas for improvement.
    pub summary: ScoreSummary,
    /// Turn-by-turn analysis of the transcript.
    pub analysis: TranscriptAnalysis,
    /// True when at least one component is a placeholder.
    pub degraded: bool,
}

fn degraded_summary() -> ScoreSummary {
    ScoreSummary {
        overall_score: 0,
        strengths: Vec::new(),
        areas_for_improvement: vec![DEGRADED_SUMMARY_NOTE.to_owned()],
    }
}

fn degraded_analysis() -> TranscriptAnalysis {
    TranscriptAnalysis {
        analysis: DEGRADED_ANALYSIS_NOTE.to_owned(),
    }
}

/// Issue both scoring requests concurrently and merge what comes back.
///
/// Never fails: a failed branch is logged and replaced with its
/// placeholder, so the caller always has a result to show.
pub(crate) async fn finalize(
    service: &dyn AssessmentService,
    transcript: &Transcript,
    kind: ExamKind,
    artifact: Option<&ArtifactRef>,
) -> ExamResult {
    let (summary, analysis) = tokio::join!(
        service.final_summary(transcript, kind),
        service.transcript_analysis(transcript, artifact),
    );

    let mut degraded = false;
    let summary = summary.unwrap_or_else(|err| {
        warn!("final summary unavailable, using placeholder: {err}");
        degraded = true;
        degraded_summary()
    });
    let analysis = analysis.unwrap_or_else(|err| {
        warn!("transcript analysis unavailable, using placeholder: {err}");
        degraded = true;
        degraded_analysis()
    });

    ExamResult {
        summary,
        analysis,
        degraded,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::assessment::scripted::ScriptedAssessment;
    use crate::transcript::Speaker;

    fn transcript() -> Transcript {
        let mut transcript = Transcript::new();
        transcript.record(Speaker::Examiner, "Good morning.");
        transcript.record(Speaker::Candidate, "Good morning to you.");
        transcript
    }

    #[tokio::test]
    async fn merges_both_components_when_service_is_healthy() {
        let service = ScriptedAssessment::new(&[]);
        let result = finalize(&service, &transcript(), ExamKind::MockExam, None).await;

        assert!(!result.degraded);
        assert_eq!(result.summary.overall_score, 74);
        assert!(!result.analysis.analysis.is_empty());
    }

    #[tokio::test]
    async fn failed_summary_degrades_only_that_component() {
        let service = ScriptedAssessment::new(&[]).failing_summary();
        let result = finalize(&service, &transcript(), ExamKind::MockExam, None).await;

        assert!(result.degraded);
        assert_eq!(result.summary.overall_score, 0);
        assert_eq!(
            result.summary.areas_for_improvement,
            vec![DEGRADED_SUMMARY_NOTE.to_owned()]
        );
        // The analysis branch still succeeded.
        assert_ne!(result.analysis.analysis, DEGRADED_ANALYSIS_NOTE);
    }

    #[tokio::test]
    async fn failed_analysis_degrades_only_that_component() {
        let service = ScriptedAssessment::new(&[]).failing_analysis();
        let result = finalize(&service, &transcript(), ExamKind::MockExam, None).await;

        assert!(result.degraded);
        assert_eq!(result.analysis.analysis, DEGRADED_ANALYSIS_NOTE);
        assert_eq!(result.summary.overall_score, 74);
    }

    #[tokio::test]
    async fn both_branches_failing_still_yields_a_result() {
        let service = ScriptedAssessment::new(&[])
            .failing_summary()
            .failing_analysis();
        let result = finalize(&service, &transcript(), ExamKind::MockExam, None).await;

        assert!(result.degraded);
        assert_eq!(result.summary.overall_score, 0);
        assert_eq!(result.analysis.analysis, DEGRADED_ANALYSIS_NOTE);
    }
}
