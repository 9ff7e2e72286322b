//! Job, status and per-attempt outcome types shared by the download core.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One logical unit of work: download one remote resource to one local path.
///
/// Jobs are immutable once created. Retries reuse the same value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadJob {
    id: String,
    url: String,
    dest_path: PathBuf,
    expected_bytes: Option<u64>,
}

impl DownloadJob {
    /// Creates a job without a known size.
    #[must_use]
    pub fn new(id: impl Into<String>, url: impl Into<String>, dest_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            dest_path: dest_path.into(),
            expected_bytes: None,
        }
    }

    /// Sets the size the finished file must have.
    #[must_use]
    pub fn with_expected_bytes(mut self, expected_bytes: u64) -> Self {
        self.expected_bytes = Some(expected_bytes);
        self
    }

    /// Unique job identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Source URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Final destination of the downloaded file.
    #[must_use]
    pub fn dest_path(&self) -> &Path {
        &self.dest_path
    }

    /// Expected size of the finished file, if known up front.
    #[must_use]
    pub fn expected_bytes(&self) -> Option<u64> {
        self.expected_bytes
    }
}

/// Classified cause of a failed transfer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connection-level failure (DNS, refused, reset, truncated body).
    Network,
    /// The request or body read exceeded its timeout.
    Timeout,
    /// Server answered with a non-success status.
    ServerError {
        /// HTTP status code.
        status: u16,
    },
    /// Local filesystem failure.
    Disk,
    /// The batch was cancelled before or during this attempt.
    Cancelled,
    /// The job URL could not be parsed.
    InvalidUrl,
    /// The transfer completed but its size differs from the job's expected size.
    SizeMismatch {
        /// Size the job declared.
        expected: u64,
        /// Size actually written.
        actual: u64,
    },
}

impl ErrorKind {
    /// Returns true for failures that are worth retrying: network blips,
    /// timeouts and 5xx responses.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network | Self::Timeout => true,
            Self::ServerError { status } => (500..600).contains(status),
            Self::Disk | Self::Cancelled | Self::InvalidUrl | Self::SizeMismatch { .. } => false,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network => write!(f, "network error"),
            Self::Timeout => write!(f, "timeout"),
            Self::ServerError { status } => write!(f, "server error (HTTP {status})"),
            Self::Disk => write!(f, "disk error"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::InvalidUrl => write!(f, "invalid URL"),
            Self::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {expected} bytes, got {actual}")
            }
        }
    }
}

/// Lifecycle state of a job inside one batch.
///
/// Legal paths: `Pending → InFlight → Succeeded`,
/// `InFlight → RetryScheduled → InFlight → …`, and
/// `{Pending, InFlight, RetryScheduled} → FailedPermanently`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobStatus {
    /// Known to the scheduler, not yet handed to a worker.
    Pending,
    /// A worker is transferring this job.
    InFlight,
    /// The file is at its destination.
    Succeeded,
    /// Waiting out a backoff delay before the given retry attempt.
    RetryScheduled {
        /// Retry number (1 for the first retry).
        attempt: u32,
    },
    /// Terminal failure.
    FailedPermanently {
        /// Why the job gave up.
        cause: ErrorKind,
    },
}

impl JobStatus {
    /// Returns true for `Succeeded` and `FailedPermanently`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::FailedPermanently { .. })
    }

    /// Checks whether moving from `self` to `next` respects the lifecycle.
    ///
    /// Any non-terminal state may fail permanently (cancellation reaches jobs
    /// wherever they are); terminal states never change.
    #[must_use]
    pub fn can_transition_to(&self, next: &JobStatus) -> bool {
        match (self, next) {
            (Self::Pending | Self::RetryScheduled { .. }, Self::InFlight) => true,
            (Self::InFlight, Self::Succeeded | Self::RetryScheduled { .. }) => true,
            (current, Self::FailedPermanently { .. }) => !current.is_terminal(),
            _ => false,
        }
    }

    /// Short label used in logs and summaries.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Succeeded => "succeeded",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::FailedPermanently { .. } => "failed_permanently",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RetryScheduled { attempt } => write!(f, "retry_scheduled({attempt})"),
            Self::FailedPermanently { cause } => write!(f, "failed_permanently({cause})"),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Result of a single fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferOutcome {
    /// Job this attempt belongs to.
    pub job_id: String,
    /// Bytes written to disk during the attempt. For a failed attempt these
    /// were discarded along with the temp file.
    pub bytes_written: u64,
    /// Whether the file reached its destination.
    pub success: bool,
    /// Failure classification when `success` is false.
    pub error: Option<ErrorKind>,
}

impl TransferOutcome {
    /// Builds a successful outcome.
    #[must_use]
    pub fn succeeded(job_id: impl Into<String>, bytes_written: u64) -> Self {
        Self {
            job_id: job_id.into(),
            bytes_written,
            success: true,
            error: None,
        }
    }

    /// Builds a failed outcome.
    #[must_use]
    pub fn failed(job_id: impl Into<String>, bytes_written: u64, error: ErrorKind) -> Self {
        Self {
            job_id: job_id.into(),
            bytes_written,
            success: false,
            error: Some(error),
        }
    }
}
