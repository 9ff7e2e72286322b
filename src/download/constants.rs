//! Constants for the download module (timeouts, temp files, progress, cancellation).

use std::time::Duration;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes for large audio files).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Suffix appended to the destination path while a transfer is in progress.
pub const TEMP_SUFFIX: &str = ".part";

/// Default buffer depth of the progress event channel.
pub const PROGRESS_CHANNEL_CAPACITY: usize = 256;

/// How long the coordinator waits to deliver an end-of-attempt progress event.
pub const PROGRESS_FINISH_TIMEOUT: Duration = Duration::from_millis(250);

/// How long in-flight transfers get to wind down after cancellation.
pub const DEFAULT_CANCEL_GRACE: Duration = Duration::from_secs(5);
