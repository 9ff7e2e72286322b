//! Job producer boundary.
//!
//! The scheduler pulls jobs one at a time from a [`JobSource`]; it does not
//! care whether they come from an API walk, a file list or a test vector.

use std::collections::VecDeque;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::DownloadJob;

/// Failure raised by a job producer.
#[derive(Debug, Error)]
pub enum SourceError {
    /// A catalog request failed at the HTTP level.
    #[error("catalog request to {url} failed: {reason}")]
    Request {
        /// Endpoint that failed.
        url: String,
        /// Human-readable failure description.
        reason: String,
    },

    /// A catalog response could not be decoded.
    #[error("unexpected catalog response from {url}: {reason}")]
    Decode {
        /// Endpoint whose payload was malformed.
        url: String,
        /// Decoder message.
        reason: String,
    },

    /// Preparing the local directory tree failed.
    #[error("IO error preparing {path}: {source}")]
    Io {
        /// Path being written.
        path: std::path::PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Any other producer failure.
    #[error("{0}")]
    Other(String),
}

impl SourceError {
    /// Creates a request error.
    pub fn request(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Request {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates a decode error.
    pub fn decode(url: impl Into<String>, reason: impl ToString) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<std::path::PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Lazy producer of download jobs.
///
/// `Ok(None)` marks the end of the sequence. Implementations are driven from a
/// single producer task, so they need `Send` but not `Sync`.
#[async_trait]
pub trait JobSource: Send {
    /// Returns the next job, `Ok(None)` when exhausted.
    async fn next_job(&mut self) -> Result<Option<DownloadJob>, SourceError>;

    /// Drains notes about entries the source gave up on without ending the
    /// sequence. Called by the producer after every `next_job`.
    fn take_skipped(&mut self) -> Vec<String> {
        Vec::new()
    }
}

/// Job source over an in-memory list.
#[derive(Debug, Default)]
pub struct IterJobSource {
    jobs: VecDeque<DownloadJob>,
}

impl IterJobSource {
    /// Creates a source yielding `jobs` in order.
    pub fn new(jobs: impl IntoIterator<Item = DownloadJob>) -> Self {
        Self {
            jobs: jobs.into_iter().collect(),
        }
    }

    /// Number of jobs not yet yielded.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.jobs.len()
    }
}

impl FromIterator<DownloadJob> for IterJobSource {
    fn from_iter<T: IntoIterator<Item = DownloadJob>>(iter: T) -> Self {
        Self::new(iter)
    }
}

#[async_trait]
impl JobSource for IterJobSource {
    async fn next_job(&mut self) -> Result<Option<DownloadJob>, SourceError> {
        Ok(self.jobs.pop_front())
    }
}
