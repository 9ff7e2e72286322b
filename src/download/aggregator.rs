//! Collection of terminal per-job results into the batch [`Report`].
//!
//! The scheduler records one [`JobRecord`] per job as it reaches a terminal
//! state, seals the aggregator once every worker is idle and the job source is
//! drained, and only then can the report be taken out with
//! [`ResultAggregator::finalize`].

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::job::{ErrorKind, JobStatus};

/// Errors from [`ResultAggregator`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregatorError {
    /// `finalize` was called before the batch finished.
    #[error("report requested before the batch was sealed")]
    NotReady,

    /// A record carried a non-terminal status.
    #[error("job {job_id} recorded in non-terminal state {status}")]
    NotTerminal {
        /// Offending job.
        job_id: String,
        /// The status it carried.
        status: JobStatus,
    },

    /// The same job was recorded twice.
    #[error("job {job_id} already recorded")]
    AlreadyRecorded {
        /// Offending job.
        job_id: String,
    },

    /// A record arrived after sealing.
    #[error("job {job_id} recorded after the batch was sealed")]
    Sealed {
        /// Offending job.
        job_id: String,
    },
}

/// Final accounting for one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobRecord {
    /// Job identifier.
    pub id: String,
    /// Position of the job in the source order (0-based).
    pub seq: u64,
    /// Source URL.
    pub url: String,
    /// Destination path.
    pub dest_path: PathBuf,
    /// Terminal status.
    pub status: JobStatus,
    /// Fetch attempts made (0 for skipped or never-started jobs).
    pub attempts: u32,
    /// Bytes written by the successful attempt.
    pub bytes_written: u64,
    /// Every status the job passed through, in order, ending with `status`.
    pub history: Vec<JobStatus>,
    /// True when the destination already existed and no fetch was made.
    pub skipped: bool,
}

impl JobRecord {
    /// Returns true when the job ended `Succeeded`.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.status == JobStatus::Succeeded
    }

    /// Failure cause, when the job failed.
    #[must_use]
    pub fn failure(&self) -> Option<ErrorKind> {
        match self.status {
            JobStatus::FailedPermanently { cause } => Some(cause),
            _ => None,
        }
    }
}

/// Immutable outcome of one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Report {
    jobs: Vec<JobRecord>,
    cancelled: bool,
    source_error: Option<String>,
    duplicates: Vec<String>,
    source_skips: Vec<String>,
    path_conflicts: Vec<String>,
}

/// Counts derived from a [`Report`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReportSummary {
    /// Jobs accounted for.
    pub total: usize,
    /// Jobs that ended `Succeeded`, including skipped ones.
    pub succeeded: usize,
    /// Succeeded jobs that needed more than one attempt.
    pub retried: usize,
    /// Jobs that ended `FailedPermanently`.
    pub failed: usize,
    /// Succeeded jobs that were skipped because the file existed.
    pub skipped: usize,
    /// Failed jobs whose cause was cancellation.
    pub cancelled: usize,
}

impl Report {
    /// Looks up a job by id.
    #[must_use]
    pub fn get(&self, job_id: &str) -> Option<&JobRecord> {
        self.jobs.iter().find(|record| record.id == job_id)
    }

    /// All records in source order.
    #[must_use]
    pub fn entries(&self) -> &[JobRecord] {
        &self.jobs
    }

    /// Number of jobs accounted for.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Returns true when no job reached the scheduler.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Records that ended `Succeeded`.
    pub fn succeeded(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.iter().filter(|record| record.succeeded())
    }

    /// Succeeded records that needed at least one retry.
    pub fn retried_then_succeeded(&self) -> impl Iterator<Item = &JobRecord> {
        self.succeeded().filter(|record| record.attempts > 1)
    }

    /// Records that ended `FailedPermanently`.
    pub fn failed(&self) -> impl Iterator<Item = &JobRecord> {
        self.jobs.iter().filter(|record| record.failure().is_some())
    }

    /// Returns true if any job failed permanently.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    /// Whether the batch was cancelled.
    #[must_use]
    pub fn cancelled(&self) -> bool {
        self.cancelled
    }

    /// Job source failure that ended the stream early, if any.
    #[must_use]
    pub fn source_error(&self) -> Option<&str> {
        self.source_error.as_deref()
    }

    /// Ids rejected because an earlier job already used them.
    #[must_use]
    pub fn duplicates(&self) -> &[String] {
        &self.duplicates
    }

    /// Notes from the job source about entries it left out and kept going.
    #[must_use]
    pub fn source_skips(&self) -> &[String] {
        &self.source_skips
    }

    /// Ids rejected because an earlier job already claimed their destination.
    #[must_use]
    pub fn path_conflicts(&self) -> &[String] {
        &self.path_conflicts
    }

    /// Returns true when some work the source offered, or would have
    /// offered, never got a record: the batch was cancelled, the source
    /// failed or skipped entries, or jobs were rejected at admission.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        self.cancelled
            || self.source_error.is_some()
            || !self.source_skips.is_empty()
            || !self.duplicates.is_empty()
            || !self.path_conflicts.is_empty()
    }

    /// Computes aggregate counts.
    #[must_use]
    pub fn summary(&self) -> ReportSummary {
        let mut summary = ReportSummary {
            total: self.jobs.len(),
            ..ReportSummary::default()
        };
        for record in &self.jobs {
            match record.status {
                JobStatus::Succeeded => {
                    summary.succeeded += 1;
                    if record.skipped {
                        summary.skipped += 1;
                    } else if record.attempts > 1 {
                        summary.retried += 1;
                    }
                }
                JobStatus::FailedPermanently { cause } => {
                    summary.failed += 1;
                    if cause == ErrorKind::Cancelled {
                        summary.cancelled += 1;
                    }
                }
                _ => {}
            }
        }
        summary
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    report: Report,
    seen: HashSet<String>,
    sealed: bool,
}

/// Thread-safe collector of terminal job records.
///
/// Cloning yields another handle to the same state.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    inner: Arc<Mutex<AggregatorState>>,
}

impl ResultAggregator {
    /// Creates an empty, unsealed aggregator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, AggregatorState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a terminal record.
    ///
    /// # Errors
    ///
    /// Rejects non-terminal records, repeats of an already recorded job and
    /// records arriving after [`seal`](Self::seal).
    pub fn record(&self, record: JobRecord) -> Result<(), AggregatorError> {
        let mut state = self.lock();
        if state.sealed {
            warn!(job_id = %record.id, "record after seal rejected");
            return Err(AggregatorError::Sealed { job_id: record.id });
        }
        if !record.status.is_terminal() {
            warn!(job_id = %record.id, status = %record.status, "non-terminal record rejected");
            return Err(AggregatorError::NotTerminal {
                job_id: record.id,
                status: record.status,
            });
        }
        if !state.seen.insert(record.id.clone()) {
            return Err(AggregatorError::AlreadyRecorded { job_id: record.id });
        }
        debug!(job_id = %record.id, status = %record.status, attempts = record.attempts, "recorded");
        state.report.jobs.push(record);
        Ok(())
    }

    /// Notes that the batch was cancelled.
    pub fn mark_cancelled(&self) {
        self.lock().report.cancelled = true;
    }

    /// Notes a job source failure that ended the stream.
    pub fn set_source_error(&self, message: impl Into<String>) {
        self.lock().report.source_error = Some(message.into());
    }

    /// Notes a job rejected for reusing an id.
    pub fn add_duplicate(&self, job_id: impl Into<String>) {
        self.lock().report.duplicates.push(job_id.into());
    }

    /// Notes an entry the job source skipped without ending the stream.
    pub fn add_source_skip(&self, note: impl Into<String>) {
        self.lock().report.source_skips.push(note.into());
    }

    /// Notes a job rejected because its destination was already claimed.
    pub fn add_path_conflict(&self, job_id: impl Into<String>) {
        self.lock().report.path_conflicts.push(job_id.into());
    }

    /// Number of records stored so far.
    #[must_use]
    pub fn recorded(&self) -> usize {
        self.lock().report.jobs.len()
    }

    /// Marks the batch complete. Later records are rejected.
    pub fn seal(&self) {
        self.lock().sealed = true;
    }

    /// Returns the finished report, ordered by source sequence.
    ///
    /// # Errors
    ///
    /// Returns [`AggregatorError::NotReady`] before [`seal`](Self::seal).
    pub fn finalize(&self) -> Result<Report, AggregatorError> {
        let state = self.lock();
        if !state.sealed {
            return Err(AggregatorError::NotReady);
        }
        let mut report = state.report.clone();
        report.jobs.sort_by_key(|record| record.seq);
        Ok(report)
    }
}
