//! Progress side channel between fetch tasks and whatever renders progress.
//!
//! Sending never blocks the transfer: when the consumer falls behind, events
//! are dropped. Each event carries the cumulative byte count, so a dropped
//! event only delays the display.
//!
//! The end of every attempt, successful or not, is marked by one event with
//! `finished` set. That one is sent by the scheduler, which waits briefly for
//! room in the channel so that renderers can release per-job state.

use serde::Serialize;
use tokio::sync::mpsc;

use super::constants::{PROGRESS_CHANNEL_CAPACITY, PROGRESS_FINISH_TIMEOUT};

/// Incremental progress of one transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Job being transferred.
    pub job_id: String,
    /// Bytes written so far in this attempt.
    pub bytes_written: u64,
    /// Total size when the server advertised it.
    pub total_bytes: Option<u64>,
    /// Set on the last event of an attempt.
    pub finished: bool,
}

/// Fire-and-forget handle for publishing [`ProgressEvent`]s.
///
/// A disabled sender discards everything.
#[derive(Debug, Clone, Default)]
pub struct ProgressSender {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSender {
    /// A sender that drops all events.
    #[must_use]
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Publishes an event without waiting. Returns false if it was dropped.
    pub fn report(&self, job_id: &str, bytes_written: u64, total_bytes: Option<u64>) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        tx.try_send(ProgressEvent {
            job_id: job_id.to_string(),
            bytes_written,
            total_bytes,
            finished: false,
        })
        .is_ok()
    }

    /// Marks the end of the current attempt for `job_id`.
    ///
    /// Unlike [`report`](Self::report) this waits up to a short timeout for
    /// channel capacity. Returns false if the event could not be delivered.
    pub async fn finish(&self, job_id: &str) -> bool {
        let Some(tx) = &self.tx else {
            return false;
        };
        let event = ProgressEvent {
            job_id: job_id.to_string(),
            bytes_written: 0,
            total_bytes: None,
            finished: true,
        };
        tx.send_timeout(event, PROGRESS_FINISH_TIMEOUT).await.is_ok()
    }

    /// Returns true when events go anywhere.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.tx.as_ref().is_some_and(|tx| !tx.is_closed())
    }
}

/// Creates a progress channel with the default buffer depth.
#[must_use]
pub fn progress_channel() -> (ProgressSender, mpsc::Receiver<ProgressEvent>) {
    progress_channel_with_capacity(PROGRESS_CHANNEL_CAPACITY)
}

/// Creates a progress channel with an explicit buffer depth (minimum 1).
#[must_use]
pub fn progress_channel_with_capacity(
    capacity: usize,
) -> (ProgressSender, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ProgressSender { tx: Some(tx) }, rx)
}
