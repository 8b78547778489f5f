//! Configuration types for the exam session engine.

use crate::phase::ExamKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration for the exam engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExamConfig {
    /// Session timing settings.
    pub session: SessionConfig,
    /// Assessment provider settings.
    pub assessment: AssessmentConfig,
    /// Exam artifact (picture) generation settings.
    pub artifact: ArtifactConfig,
}

/// Session timing configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Hard time limit for a full mock exam, in seconds.
    pub mock_exam_secs: u64,
    /// Hard time limit for a topic-practice session, in seconds.
    pub topic_practice_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mock_exam_secs: 600,
            topic_practice_secs: 300,
        }
    }
}

impl SessionConfig {
    /// The configured duration for one exam format.
    pub fn duration_for(&self, kind: ExamKind) -> u64 {
        match kind {
            ExamKind::MockExam => self.mock_exam_secs,
            ExamKind::TopicPractice => self.topic_practice_secs,
        }
    }
}

/// Assessment provider configuration (OpenAI-compatible HTTP API).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessmentConfig {
    /// Provider base URL, e.g. `https://api.openai.com` or a local server.
    pub api_url: String,
    /// Model used for examiner turns and scoring.
    pub api_model: String,
    /// Inline API key. Leave empty to read from the `VIVA_API_KEY`
    /// environment variable (or run unauthenticated against a local server).
    pub api_key: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    /// Extra attempts for retryable failures during turn exchanges.
    /// Finalization requests never retry; they degrade instead.
    pub max_retries: u32,
    /// Sampling temperature for examiner replies.
    pub temperature: f32,
    /// Response token budget per exchange.
    pub max_tokens: usize,
}

impl Default for AssessmentConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com".to_owned(),
            api_model: "gpt-4o-mini".to_owned(),
            api_key: String::new(),
            request_timeout_secs: 30,
            max_retries: 1,
            temperature: 0.7,
            max_tokens: 512,
        }
    }
}

/// Exam artifact (picture) generation configuration.
///
/// Mock exams show the candidate a generated picture to describe. The
/// request is best-effort: on failure the session uses `fallback_ref`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Whether to request a generated picture at session start.
    pub enabled: bool,
    /// Image model identifier.
    pub model: String,
    /// Prompt sent to the image endpoint.
    pub prompt: String,
    /// Static picture reference used when generation fails or is disabled.
    pub fallback_ref: String,
    /// Timeout for the generation request in seconds.
    pub timeout_secs: u64,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "dall-e-3".to_owned(),
            prompt: "A clear, everyday scene suitable for a beginner spoken \
                     language exam: people doing ordinary activities in a \
                     public place, photorealistic, no text."
                .to_owned(),
            fallback_ref: "assets/default-exam-picture.png".to_owned(),
            timeout_secs: 20,
        }
    }
}

impl ExamConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ExamError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ExamError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/viva/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("viva").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("viva")
                .join("config.toml")
        } else {
            PathBuf::from("viva-config.toml")
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = ExamConfig::default();
        assert_eq!(config.session.mock_exam_secs, 600);
        assert_eq!(config.session.topic_practice_secs, 300);
        assert_eq!(config.assessment.max_retries, 1);
        assert!(config.artifact.enabled);
        assert!(!config.artifact.fallback_ref.is_empty());
    }

    #[test]
    fn duration_follows_exam_kind() {
        let session = SessionConfig::default();
        assert_eq!(session.duration_for(ExamKind::MockExam), 600);
        assert_eq!(session.duration_for(ExamKind::TopicPractice), 300);
    }

    #[test]
    fn save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("config.toml");

        let mut config = ExamConfig::default();
        config.session.mock_exam_secs = 480;
        config.assessment.api_model = "local-examiner".to_owned();
        config.artifact.enabled = false;

        config.save_to_file(&path).expect("save config");
        let loaded = ExamConfig::from_file(&path).expect("reload config");

        assert_eq!(loaded.session.mock_exam_secs, 480);
        assert_eq!(loaded.assessment.api_model, "local-examiner");
        assert!(!loaded.artifact.enabled);
    }

    #[test]
    fn partial_file_fills_missing_sections_with_defaults() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[session]\nmock_exam_secs = 120\n").expect("write partial");

        let loaded = ExamConfig::from_file(&path).expect("load partial");
        assert_eq!(loaded.session.mock_exam_secs, 120);
        assert_eq!(loaded.session.topic_practice_secs, 300);
        assert_eq!(loaded.assessment.request_timeout_secs, 30);
    }

    #[test]
    fn from_file_nonexistent_returns_error() {
        let result = ExamConfig::from_file(std::path::Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "not [valid toml").expect("write broken file");
        assert!(ExamConfig::from_file(&path).is_err());
    }
}
