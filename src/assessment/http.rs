//! OpenAI-compatible HTTP implementation of the Assessment Service.
//!
//! One chat-completions request per exchange, with the examiner
//! instructed to answer in strict JSON. Turn exchanges get a single
//! bounded retry with jitter on transient failures; finalization calls
//! do not retry because the aggregator already degrades gracefully.

use super::{
    ArtifactRef, AssessmentService, ExchangeContext, ScoreSummary, ServiceError,
    TranscriptAnalysis, TurnOutcome,
};
use crate::config::{ArtifactConfig, AssessmentConfig};
use crate::error::ExamError;
use crate::phase::{END_OF_EXAM_PHRASE, ExamKind};
use crate::transcript::{Speaker, Transcript};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, warn};

/// Environment variable consulted when `[assessment].api_key` is empty.
pub const API_KEY_ENV: &str = "VIVA_API_KEY";

/// Base delay before the single retry of a failed exchange.
const RETRY_BASE_MS: u64 = 300;

/// Assessment Service backed by an OpenAI-compatible HTTP API.
pub struct HttpAssessment {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    artifact_model: String,
    artifact_timeout: Duration,
}

impl std::fmt::Debug for HttpAssessment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAssessment")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("artifact_model", &self.artifact_model)
            .finish()
    }
}

impl HttpAssessment {
    /// Build a client from configuration. The API key comes from the
    /// config file or, when that field is empty, from `VIVA_API_KEY`.
    pub fn new(
        assessment: &AssessmentConfig,
        artifact: &ArtifactConfig,
    ) -> crate::error::Result<Self> {
        let api_key = if assessment.api_key.trim().is_empty() {
            std::env::var(API_KEY_ENV)
                .ok()
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| {
                    ExamError::Config(format!(
                        "assessment API key missing: set [assessment].api_key or {API_KEY_ENV}"
                    ))
                })?
        } else {
            assessment.api_key.clone()
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(assessment.request_timeout_secs))
            .build()
            .map_err(|e| ExamError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: normalize_base_url(&assessment.api_url),
            model: assessment.api_model.clone(),
            api_key,
            temperature: assessment.temperature,
            max_tokens: assessment.max_tokens,
            max_retries: assessment.max_retries,
            artifact_model: artifact.model.clone(),
            artifact_timeout: Duration::from_secs(artifact.timeout_secs),
        })
    }

    /// One chat-completions round trip; returns the assistant message
    /// content verbatim.
    async fn send_chat(&self, messages: Vec<serde_json::Value>) -> Result<String, ServiceError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
            "response_format": {"type": "json_object"},
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message: extract_error_message(&body_text),
            });
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Decode(format!("invalid completion body: {e}")))?;
        let content = value["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ServiceError::Decode("completion has no message content".to_owned()))?;
        Ok(content.to_owned())
    }
}

#[async_trait]
impl AssessmentService for HttpAssessment {
    async fn exchange_turn(
        &self,
        context: &ExchangeContext<'_>,
        candidate_text: &str,
    ) -> Result<TurnOutcome, ServiceError> {
        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": exchange_system_prompt(context),
        })];
        messages.extend(history_messages(context.transcript));
        // The engine appends the candidate turn before exchanging, so it
        // is usually the transcript tail already; only synthetic tokens
        // need an extra user message.
        let already_last = context.transcript.last().is_some_and(|turn| {
            turn.speaker == Speaker::Candidate && turn.text == candidate_text
        });
        if !already_last {
            messages.push(serde_json::json!({
                "role": "user",
                "content": candidate_text,
            }));
        }

        let mut attempt: u32 = 0;
        loop {
            let result = self
                .send_chat(messages.clone())
                .await
                .and_then(|content| decode_payload::<TurnOutcome>(&content));
            match result {
                Ok(outcome) => return Ok(outcome),
                Err(err) if err.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = retry_delay();
                    warn!(attempt, "transient assessment error, retrying exchange: {err}");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn final_summary(
        &self,
        transcript: &Transcript,
        kind: ExamKind,
    ) -> Result<ScoreSummary, ServiceError> {
        let messages = vec![
            serde_json::json!({
                "role": "system",
                "content": summary_system_prompt(kind),
            }),
            serde_json::json!({
                "role": "user",
                "content": transcript.render_lines(),
            }),
        ];
        let content = self.send_chat(messages).await?;
        decode_payload(&content)
    }

    async fn transcript_analysis(
        &self,
        transcript: &Transcript,
        artifact: Option<&ArtifactRef>,
    ) -> Result<TranscriptAnalysis, ServiceError> {
        let messages = vec![
            serde_json::json!({
                "role": "system",
                "content": analysis_system_prompt(artifact),
            }),
            serde_json::json!({
                "role": "user",
                "content": transcript.render_lines(),
            }),
        ];
        let content = self.send_chat(messages).await?;
        decode_payload(&content)
    }

    async fn generate_artifact(&self, prompt: &str) -> Result<ArtifactRef, ServiceError> {
        let url = format!("{}/v1/images/generations", self.base_url);
        let body = serde_json::json!({
            "model": self.artifact_model,
            "prompt": prompt,
            "n": 1,
            "size": "1024x1024",
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .timeout(self.artifact_timeout)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ServiceError::Api {
                status: status.as_u16(),
                message: extract_error_message(&body_text),
            });
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::Decode(format!("invalid image body: {e}")))?;
        let image_url = value["data"][0]["url"]
            .as_str()
            .ok_or_else(|| ServiceError::Decode("image response has no url".to_owned()))?;
        debug!("exam picture generated");
        Ok(ArtifactRef::generated(image_url))
    }
}

/// Strip a `/v1` suffix and trailing slashes so endpoint paths can be
/// appended uniformly.
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let base = trimmed.strip_suffix("/v1").unwrap_or(trimmed);
    base.trim_end_matches('/').to_owned()
}

fn map_transport_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout(e.to_string())
    } else {
        ServiceError::Http(e.to_string())
    }
}

/// Pull the human-readable message out of an OpenAI-style error body.
fn extract_error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| body.to_string())
}

/// Parse the assistant content as `T`, tolerating a markdown code fence
/// around the JSON document.
fn decode_payload<T: DeserializeOwned>(content: &str) -> Result<T, ServiceError> {
    serde_json::from_str(strip_code_fence(content))
        .map_err(|e| ServiceError::Decode(format!("unexpected payload shape: {e}")))
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.trim()
}

fn retry_delay() -> Duration {
    // Base delay plus 0-10% jitter.
    let jitter = RETRY_BASE_MS as f64 * rand::random::<f64>() * 0.1;
    Duration::from_millis(RETRY_BASE_MS + jitter as u64)
}

/// Transcript turns as chat messages: examiner lines are `assistant`,
/// candidate lines are `user`.
fn history_messages(transcript: &Transcript) -> Vec<serde_json::Value> {
    transcript
        .turns()
        .iter()
        .map(|turn| {
            let role = match turn.speaker {
                Speaker::Examiner => "assistant",
                Speaker::Candidate => "user",
            };
            serde_json::json!({"role": role, "content": turn.text})
        })
        .collect()
}

fn exchange_system_prompt(context: &ExchangeContext<'_>) -> String {
    let mut prompt = String::from(
        "You are the examiner in a timed spoken language exam rehearsal. \
         Speak naturally and briefly: one or two short sentences, usually ending \
         in a question. Never mention that you are an AI or that this is a simulation.\n\n",
    );

    match context.kind {
        ExamKind::MockExam => {
            prompt.push_str(
                "This is a full mock exam with four parts, in this order:\n\
                 1. Introduction: greet the candidate and ask everyday questions \
                 about them.\n\
                 2. Picture description: when moving to this part, announce it with \
                 a sentence containing the words \"look at a picture\", then ask the \
                 candidate to describe the picture.\n\
                 3. First discussion topic: announce it with a sentence containing \
                 \"talk about something else\".\n\
                 4. Directions task: announce it with a sentence containing \
                 \"ask you for some directions\".\n\
                 Spend two or three exchanges on each part before moving on.\n",
            );
            if let Some(artifact) = context.artifact {
                prompt.push_str(&format!(
                    "The picture for the description part is at: {}\n",
                    artifact.location
                ));
            }
        }
        ExamKind::TopicPractice => {
            prompt.push_str(
                "This is a focused practice session with two parts, in this order:\n\
                 1. Topic discussion: ask the candidate questions about their chosen \
                 topic.\n\
                 2. Free conversation: when moving to this part, announce it with a \
                 sentence containing \"have a conversation\".\n\
                 Spend several exchanges on each part before moving on.\n",
            );
        }
    }

    prompt.push_str(&format!(
        "\nThe exam is currently in the {} part.\n\
         When the candidate's message is the single word \"begin\", the session is \
         starting: greet them and ask your first question. When it is the single \
         word \"skip\", move straight to the next part. To finish the exam, say \
         exactly: \"{END_OF_EXAM_PHRASE}\"\n\n\
         Reply ONLY with a JSON object: {{\"examiner_text\": string (what you say \
         next), \"feedback\": {{\"comment\": string, \"better_phrasing\": string \
         (optional)}} (optional, about the candidate's last answer), \
         \"points_awarded\": integer 0-3 (optional, for the candidate's last \
         answer)}}.",
        context.phase.label(),
    ));

    prompt
}

fn summary_system_prompt(kind: ExamKind) -> String {
    format!(
        "You are scoring a completed spoken exam rehearsal ({}). The user message \
         is the full transcript. Reply ONLY with a JSON object: \
         {{\"overall_score\": integer 0-100, \"strengths\": array of short strings, \
         \"areas_for_improvement\": array of short strings}}.",
        kind.label(),
    )
}

fn analysis_system_prompt(artifact: Option<&ArtifactRef>) -> String {
    let mut prompt = String::from(
        "You are reviewing a completed spoken exam rehearsal. The user message is \
         the full transcript. Write an encouraging, specific analysis of the \
         candidate's performance: vocabulary, fluency, and how well they handled \
         each part.",
    );
    if let Some(artifact) = artifact {
        prompt.push_str(&format!(
            " The picture discussed in the description part is at: {}.",
            artifact.location
        ));
    }
    prompt.push_str(" Reply ONLY with a JSON object: {\"analysis\": string}.");
    prompt
}
