//! Countdown clock for the hard session time limit.
//!
//! The clock runs on its own task so ticking continues while a turn is
//! mid-flight; expiry mid-turn still fires and the session controller
//! decides what to do with the in-flight work. The clock cannot fail,
//! only be cancelled.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Clock event channel depth. The controller drains continuously; this
/// only buffers scheduling jitter.
const CLOCK_CHANNEL_SIZE: usize = 32;

/// Events emitted by the countdown clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockEvent {
    /// One second elapsed; `remaining` seconds left.
    Tick { remaining: u64 },
    /// The countdown reached zero. Terminal: nothing follows.
    Expired,
}

/// Start a countdown of `duration_secs`, emitting one event per second.
///
/// The final second emits [`ClockEvent::Expired`] in place of a zero
/// tick. Cancelling the token stops the task; no event is emitted after
/// cancellation (events already queued are dropped when the receiver is
/// dropped by the caller).
pub fn start(duration_secs: u64, cancel: CancellationToken) -> mpsc::Receiver<ClockEvent> {
    let (tx, rx) = mpsc::channel(CLOCK_CHANNEL_SIZE);

    tokio::spawn(async move {
        if duration_secs == 0 {
            let _ = tx.send(ClockEvent::Expired).await;
            return;
        }

        let mut remaining = duration_secs;
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        // The first interval tick completes immediately; consume it so
        // the first emitted event lands a full second after start.
        interval.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    debug!("clock cancelled with {remaining}s remaining");
                    break;
                }
                _ = interval.tick() => {
                    remaining = remaining.saturating_sub(1);
                    let event = if remaining == 0 {
                        ClockEvent::Expired
                    } else {
                        ClockEvent::Tick { remaining }
                    };
                    let terminal = remaining == 0;
                    if tx.send(event).await.is_err() || terminal {
                        break;
                    }
                }
            }
        }
    });

    rx
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn counts_down_and_expires() {
        let cancel = CancellationToken::new();
        let mut rx = start(3, cancel);

        assert_eq!(rx.recv().await, Some(ClockEvent::Tick { remaining: 2 }));
        assert_eq!(rx.recv().await, Some(ClockEvent::Tick { remaining: 1 }));
        assert_eq!(rx.recv().await, Some(ClockEvent::Expired));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_all_events() {
        let cancel = CancellationToken::new();
        let mut rx = start(10, cancel.clone());

        assert_eq!(rx.recv().await, Some(ClockEvent::Tick { remaining: 9 }));
        cancel.cancel();

        // The task exits on cancellation, closing the channel without
        // emitting further ticks or an expiry.
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_duration_expires_immediately() {
        let cancel = CancellationToken::new();
        let mut rx = start(0, cancel);
        assert_eq!(rx.recv().await, Some(ClockEvent::Expired));
        assert_eq!(rx.recv().await, None);
    }
}
