//! The session transcript: an append-only record of who said what.
//!
//! The transcript is the single source of truth for post-hoc analysis.
//! Entries are never mutated or reordered after being appended; the
//! session controller is the only writer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    /// The human taking the exam.
    Candidate,
    /// The automated examiner.
    Examiner,
}

impl Speaker {
    /// Display label used when rendering the transcript as dialogue.
    pub fn label(self) -> &'static str {
        match self {
            Self::Candidate => "Candidate",
            Self::Examiner => "Examiner",
        }
    }
}

/// One utterance by either party. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Who spoke.
    pub speaker: Speaker,
    /// What was said (capture transcript or examiner reply text).
    pub text: String,
    /// When the turn was recorded.
    pub at: DateTime<Utc>,
}

/// Append-only ordered sequence of [`Turn`]s.
///
/// The first entry is always the examiner's opening line; entries then
/// alternate candidate/examiner for the rest of the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    /// Create an empty transcript.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one turn, timestamped now.
    pub fn record(&mut self, speaker: Speaker, text: impl Into<String>) {
        self.turns.push(Turn {
            speaker,
            text: text.into(),
            at: Utc::now(),
        });
    }

    /// All turns in append order.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Number of recorded turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The most recently recorded turn.
    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Render the transcript as labelled dialogue lines, one per turn.
    ///
    /// Used to build assessment prompts:
    /// `Examiner: Good morning.` / `Candidate: Good morning, my name is...`
    pub fn render_lines(&self) -> String {
        let mut out = String::new();
        for turn in &self.turns {
            out.push_str(turn.speaker.label());
            out.push_str(": ");
            out.push_str(&turn.text);
            out.push('\n');
        }
        out
    }
}
