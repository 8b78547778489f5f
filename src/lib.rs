//! Viva: timed spoken-exam rehearsal engine.
//!
//! A candidate rehearses an oral exam against an automated examiner.
//! The engine runs capture → assessment → playback turn cycles under a
//! hard countdown clock:
//!
//! Microphone → Speech Capture → Assessment Service → Speech Playback → Speaker
//!
//! # Architecture
//!
//! One controller task owns the session and is the only mutator of its
//! state; every other concern runs on its own task and reports back
//! over channels:
//! - **Session controller**: idle → running → finalizing → results
//!   state machine, driven through [`ExamControls`]
//! - **Turn coordinator**: one capture/assess/playback cycle at a time,
//!   with the examiner always speaking first
//! - **Phase detector**: advances the exam through its parts by
//!   matching trigger phrases in examiner lines
//! - **Clock**: hard time limit; expiry finalizes with whatever was
//!   said so far
//! - **Results aggregator**: concurrent scoring requests merged into a
//!   single result, degrading instead of failing
//!
//! Speech providers and the assessment service are trait objects, so
//! hosts can plug in real audio and a real provider or run everything
//! scripted.

pub mod assessment;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod phase;
pub mod progress;
pub mod session;
pub mod speech;
pub mod transcript;

pub use config::ExamConfig;
pub use error::{ExamError, Result};
pub use events::{SessionEvent, SessionSnapshot, event_stream};
pub use phase::{ExamKind, Phase};
pub use session::{ExamControls, ExamEngine, ExamResult, SessionState};
pub use transcript::{Speaker, Transcript, Turn};
