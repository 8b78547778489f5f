//! Scripted speech providers for tests and rehearsal demos.
//!
//! These implementations never touch audio hardware: capture pops
//! pre-scripted utterances and playback records what it was asked to
//! say. Host apps can use them to run the engine end to end without
//! microphone or speaker access.

use super::{CaptureErrorKind, CaptureResult, PlaybackError, SpeechCapture, SpeechPlayback};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Notify;

/// One scripted capture event.
#[derive(Debug, Clone)]
enum ScriptItem {
    Utterance(String),
    Trouble(CaptureErrorKind),
}

/// Capture provider that replays a fixed script.
///
/// When the script runs out, `listen` waits until `stop` is called and
/// then resolves with an empty transcript, mirroring a real provider
/// being told to flush.
pub struct ScriptedCapture {
    queue: Mutex<VecDeque<ScriptItem>>,
    delay: Option<Duration>,
    stopped: Notify,
}

impl ScriptedCapture {
    /// Script the given candidate utterances, in order.
    pub fn new(lines: &[&str]) -> Self {
        let queue = lines
            .iter()
            .map(|line| ScriptItem::Utterance((*line).to_owned()))
            .collect();
        Self {
            queue: Mutex::new(queue),
            delay: None,
            stopped: Notify::new(),
        }
    }

    /// Append a capture failure to the script.
    pub fn with_trouble(self, kind: CaptureErrorKind) -> Self {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(ScriptItem::Trouble(kind));
        self
    }

    /// Append another utterance after previously scripted items.
    pub fn with_utterance(self, line: &str) -> Self {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(ScriptItem::Utterance(line.to_owned()));
        self
    }

    /// Simulate speaking time: each scripted item resolves after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of scripted items not yet consumed.
    pub fn remaining(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl SpeechCapture for ScriptedCapture {
    async fn listen(&self) -> CaptureResult {
        let item = self.queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let Some(item) = item else {
            // Script exhausted: hold the line until someone stops us.
            self.stopped.notified().await;
            return CaptureResult::Utterance(String::new());
        };
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match item {
            ScriptItem::Utterance(text) => CaptureResult::Utterance(text),
            ScriptItem::Trouble(kind) => CaptureResult::Failed(kind),
        }
    }

    async fn stop(&self) {
        self.stopped.notify_waiters();
    }
}

/// Playback failure the scripted provider should simulate.
#[derive(Debug, Clone)]
enum FailureMode {
    None,
    Interrupted,
    Failed(String),
}

/// Playback provider that records every line it is asked to speak.
pub struct ScriptedPlayback {
    spoken: Mutex<Vec<String>>,
    delay: Option<Duration>,
    failure: FailureMode,
    cancel_calls: AtomicUsize,
}

impl ScriptedPlayback {
    /// Instant, always-successful playback.
    pub fn new() -> Self {
        Self {
            spoken: Mutex::new(Vec::new()),
            delay: None,
            failure: FailureMode::None,
            cancel_calls: AtomicUsize::new(0),
        }
    }

    /// Each utterance takes `delay` to finish.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every `speak` call reports an interruption.
    pub fn failing_with_interrupted(mut self) -> Self {
        self.failure = FailureMode::Interrupted;
        self
    }

    /// Every `speak` call fails with the given message.
    pub fn failing_with(mut self, message: &str) -> Self {
        self.failure = FailureMode::Failed(message.to_owned());
        self
    }

    /// Lines spoken to completion, in order.
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// How many times `cancel` was invoked.
    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::Relaxed)
    }
}

impl Default for ScriptedPlayback {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SpeechPlayback for ScriptedPlayback {
    async fn speak(&self, text: &str) -> Result<(), PlaybackError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.failure {
            FailureMode::None => {
                self.spoken.lock().unwrap_or_else(|e| e.into_inner()).push(text.to_owned());
                Ok(())
            }
            FailureMode::Interrupted => Err(PlaybackError::Interrupted),
            FailureMode::Failed(message) => Err(PlaybackError::Failed(message.clone())),
        }
    }

    async fn cancel(&self) {
        self.cancel_calls.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn scripted_capture_replays_in_order() {
        let capture = ScriptedCapture::new(&["first", "second"]);
        assert_eq!(capture.remaining(), 2);
        assert_eq!(
            capture.listen().await,
            CaptureResult::Utterance("first".into())
        );
        assert_eq!(
            capture.listen().await,
            CaptureResult::Utterance("second".into())
        );
        assert_eq!(capture.remaining(), 0);
    }

    #[tokio::test]
    async fn exhausted_script_resolves_empty_on_stop() {
        let capture = std::sync::Arc::new(ScriptedCapture::new(&[]));
        let listener = {
            let capture = std::sync::Arc::clone(&capture);
            tokio::spawn(async move { capture.listen().await })
        };

        // Give the listener a chance to park on the notify.
        tokio::task::yield_now().await;
        capture.stop().await;

        let result = listener.await.expect("listener task");
        assert_eq!(result, CaptureResult::Utterance(String::new()));
    }

    #[tokio::test]
    async fn scripted_playback_records_spoken_lines() {
        let playback = ScriptedPlayback::new();
        playback.speak("Hello.").await.expect("speak");
        playback.speak("Goodbye.").await.expect("speak");
        assert_eq!(playback.spoken(), vec!["Hello.", "Goodbye."]);
    }

    #[tokio::test]
    async fn failing_playback_reports_failure_kind() {
        let playback = ScriptedPlayback::new().failing_with("no audio device");
        let err = playback.speak("Hello.").await.expect_err("should fail");
        assert!(matches!(err, PlaybackError::Failed(_)));
        assert!(playback.spoken().is_empty());
    }
}
