//! Bounded-concurrency batch scheduler with retry and cancellation.
//!
//! A producer task pulls jobs from the [`JobSource`] into a bounded channel.
//! A single coordinator owns the status table: it admits jobs in source order,
//! hands at most `concurrency` of them to fetch tasks at a time, schedules
//! retries after a backoff delay, and records every terminal state in a
//! [`ResultAggregator`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use msr_core::download::{
//!     FetchConfig, HttpFetcher, ProgressSender, Scheduler, SchedulerConfig,
//! };
//! use msr_core::{DownloadJob, IterJobSource};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//! let fetcher = Arc::new(HttpFetcher::new(&FetchConfig::default())?);
//! let source = IterJobSource::new([DownloadJob::new(
//!     "cover",
//!     "https://example.com/cover.jpg",
//!     "./out/cover.jpg",
//! )]);
//! let report = scheduler
//!     .run(source, fetcher, ProgressSender::disabled(), CancellationToken::new())
//!     .await?;
//! println!("{:?}", report.summary());
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::aggregator::{AggregatorError, JobRecord, Report, ResultAggregator};
use super::constants::DEFAULT_CANCEL_GRACE;
use super::fetcher::{Fetcher, temp_path_for};
use super::progress::ProgressSender;
use super::retry::{RetryDecision, RetryPolicy};
use crate::job::{DownloadJob, ErrorKind, JobStatus, TransferOutcome};
use crate::source::{JobSource, SourceError};

/// Minimum allowed concurrency value.
const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Error type for scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// The job source failed before yielding a single job.
    #[error("job source failed before producing any job: {0}")]
    Producer(#[source] SourceError),

    /// The report could not be assembled.
    #[error("report error: {0}")]
    Aggregator(#[from] AggregatorError),
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Maximum number of simultaneous transfers (1-100).
    pub concurrency: usize,
    /// Retry budget and backoff.
    pub retry_policy: RetryPolicy,
    /// Record jobs whose destination already exists as succeeded without fetching.
    pub skip_existing: bool,
    /// Time in-flight transfers get to stop after cancellation before they are aborted.
    pub cancel_grace: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry_policy: RetryPolicy::default(),
            skip_existing: false,
            cancel_grace: DEFAULT_CANCEL_GRACE,
        }
    }
}

/// Runs batches of jobs through a [`Fetcher`].
///
/// # Concurrency Model
///
/// - Each transfer attempt runs in its own Tokio task
/// - At most `concurrency` attempts are in flight at any instant
/// - Jobs equally ready to run start in source order
/// - Backoff timers, channel reads and transfers all observe one
///   [`CancellationToken`]
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    /// Creates a scheduler after validating its settings.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::InvalidConcurrency`] if the value is outside
    /// the valid range (1-100).
    #[instrument(level = "debug", skip(config), fields(concurrency = config.concurrency))]
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&config.concurrency) {
            return Err(SchedulerError::InvalidConcurrency {
                value: config.concurrency,
            });
        }
        debug!(
            max_retries = config.retry_policy.max_retries(),
            skip_existing = config.skip_existing,
            "scheduler created"
        );
        Ok(Self { config })
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.config.concurrency
    }

    /// Returns the full configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Drains `source` through `fetcher` and returns the batch report.
    ///
    /// Per-job failures never abort the batch; they are recorded in the
    /// report. When `cancel` fires, in-flight transfers get
    /// `cancel_grace` to stop, every job not yet running is recorded as
    /// `FailedPermanently(Cancelled)`, and the partial report comes back with
    /// `cancelled() == true`.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Producer`] when the source fails before
    /// yielding its first job.
    #[instrument(skip_all, fields(concurrency = self.config.concurrency))]
    pub async fn run<S>(
        &self,
        source: S,
        fetcher: Arc<dyn Fetcher>,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Result<Report, SchedulerError>
    where
        S: JobSource + 'static,
    {
        info!("starting batch");

        let (tx, mut rx) = mpsc::channel(self.config.concurrency * 2);
        let producer = tokio::spawn(produce(source, tx, cancel.clone()));

        let mut batch = Batch::new(&self.config, fetcher, progress, cancel.clone());
        let mut source_open = true;
        let mut received: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                break;
            }
            batch.dispatch_ready();
            if !source_open && batch.is_idle() {
                break;
            }

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                Some(joined) = batch.in_flight.join_next_with_id() => {
                    batch.complete(joined, true).await;
                }
                Some(timer) = batch.backoff.join_next() => batch.requeue(timer),
                feed = rx.recv(), if source_open && batch.ready.len() < self.config.concurrency => {
                    match feed {
                        Some(Feed::Job(job)) => {
                            received += 1;
                            batch.admit(job).await;
                        }
                        Some(Feed::SourceFailed(source_error)) => {
                            source_open = false;
                            if received == 0 {
                                error!(error = %source_error, "job source failed before any job");
                                if let Err(e) = producer.await {
                                    warn!(error = %e, "producer task failed");
                                }
                                return Err(SchedulerError::Producer(source_error));
                            }
                            warn!(error = %source_error, received, "job source failed, no further jobs will be read");
                            batch.aggregator.set_source_error(source_error.to_string());
                        }
                        Some(Feed::Skipped(note)) => {
                            debug!(note = %note, "job source skipped an entry");
                            batch.aggregator.add_source_skip(note);
                        }
                        None => {
                            debug!(received, "job source drained");
                            source_open = false;
                        }
                    }
                }
                else => break,
            }
        }

        if cancel.is_cancelled() {
            batch.wind_down(&mut rx).await;
        }
        drop(rx);

        if let Err(e) = producer.await {
            warn!(error = %e, "producer task failed");
        }

        batch.aggregator.seal();
        let report = batch.aggregator.finalize()?;
        let summary = report.summary();
        info!(
            total = summary.total,
            succeeded = summary.succeeded,
            retried = summary.retried,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = report.cancelled(),
            "batch finished"
        );
        Ok(report)
    }
}

/// Item passed from the producer task to the coordinator.
enum Feed {
    Job(DownloadJob),
    Skipped(String),
    SourceFailed(SourceError),
}

async fn produce<S: JobSource>(
    mut source: S,
    tx: mpsc::Sender<Feed>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            debug!("producer stopping after cancellation");
            return;
        }
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            next = source.next_job() => next,
        };
        for note in source.take_skipped() {
            if tx.send(Feed::Skipped(note)).await.is_err() {
                return;
            }
        }
        let (feed, last) = match next {
            Ok(Some(job)) => (Feed::Job(job), false),
            Ok(None) => return,
            Err(source_error) => (Feed::SourceFailed(source_error), true),
        };
        // A job already pulled is always delivered so it can be accounted for.
        if tx.send(feed).await.is_err() || last {
            return;
        }
    }
}

/// Coordinator-side state of one job.
struct JobEntry {
    seq: u64,
    job: Arc<DownloadJob>,
    status: JobStatus,
    history: Vec<JobStatus>,
    attempts: u32,
    retries: u32,
    bytes_written: u64,
    skipped: bool,
}

impl JobEntry {
    fn new(seq: u64, job: DownloadJob) -> Self {
        Self {
            seq,
            job: Arc::new(job),
            status: JobStatus::Pending,
            history: vec![JobStatus::Pending],
            attempts: 0,
            retries: 0,
            bytes_written: 0,
            skipped: false,
        }
    }

    fn skipped(seq: u64, job: DownloadJob) -> Self {
        Self {
            status: JobStatus::Succeeded,
            history: vec![JobStatus::Succeeded],
            skipped: true,
            ..Self::new(seq, job)
        }
    }

    fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(&next) {
            warn!(
                job_id = %self.job.id(),
                from = %self.status,
                to = %next,
                "illegal status transition ignored"
            );
            return false;
        }
        self.status = next;
        self.history.push(next);
        true
    }

    fn into_record(self) -> JobRecord {
        JobRecord {
            id: self.job.id().to_string(),
            seq: self.seq,
            url: self.job.url().to_string(),
            dest_path: self.job.dest_path().to_path_buf(),
            status: self.status,
            attempts: self.attempts,
            bytes_written: self.bytes_written,
            history: self.history,
            skipped: self.skipped,
        }
    }
}

/// Mutable state of one `run` call, owned by the coordinator.
struct Batch<'a> {
    config: &'a SchedulerConfig,
    fetcher: Arc<dyn Fetcher>,
    progress: ProgressSender,
    cancel: CancellationToken,
    aggregator: ResultAggregator,
    next_seq: u64,
    ids: HashSet<String>,
    claimed: HashSet<PathBuf>,
    table: BTreeMap<u64, JobEntry>,
    ready: BTreeSet<u64>,
    in_flight: JoinSet<(u64, TransferOutcome)>,
    task_seqs: HashMap<tokio::task::Id, u64>,
    backoff: JoinSet<u64>,
}

impl<'a> Batch<'a> {
    fn new(
        config: &'a SchedulerConfig,
        fetcher: Arc<dyn Fetcher>,
        progress: ProgressSender,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            fetcher,
            progress,
            cancel,
            aggregator: ResultAggregator::new(),
            next_seq: 0,
            ids: HashSet::new(),
            claimed: HashSet::new(),
            table: BTreeMap::new(),
            ready: BTreeSet::new(),
            in_flight: JoinSet::new(),
            task_seqs: HashMap::new(),
            backoff: JoinSet::new(),
        }
    }

    fn is_idle(&self) -> bool {
        self.ready.is_empty() && self.in_flight.is_empty() && self.backoff.is_empty()
    }

    /// Registers a new job, rejecting duplicate ids and destinations already
    /// claimed by an earlier job. Returns its entry when the job still needs
    /// work.
    async fn register(&mut self, job: DownloadJob) -> Option<JobEntry> {
        let seq = self.next_seq;
        self.next_seq += 1;

        if !self.ids.insert(job.id().to_string()) {
            warn!(job_id = %job.id(), seq, "duplicate job id rejected");
            self.aggregator.add_duplicate(job.id());
            return None;
        }

        if !self.claimed.insert(job.dest_path().to_path_buf()) {
            warn!(
                job_id = %job.id(),
                seq,
                path = %job.dest_path().display(),
                "destination already claimed by another job, rejected"
            );
            self.aggregator.add_path_conflict(job.id());
            return None;
        }

        if self.config.skip_existing && already_present(&job).await {
            info!(job_id = %job.id(), path = %job.dest_path().display(), "destination exists, skipping");
            self.finish(JobEntry::skipped(seq, job));
            return None;
        }

        Some(JobEntry::new(seq, job))
    }

    async fn admit(&mut self, job: DownloadJob) {
        if let Some(entry) = self.register(job).await {
            debug!(job_id = %entry.job.id(), seq = entry.seq, "job admitted");
            self.ready.insert(entry.seq);
            self.table.insert(entry.seq, entry);
        }
    }

    async fn admit_cancelled(&mut self, job: DownloadJob) {
        if let Some(mut entry) = self.register(job).await {
            entry.transition(JobStatus::FailedPermanently {
                cause: ErrorKind::Cancelled,
            });
            self.finish(entry);
        }
    }

    fn dispatch_ready(&mut self) {
        while self.in_flight.len() < self.config.concurrency {
            let Some(seq) = self.ready.pop_first() else {
                break;
            };
            self.dispatch(seq);
        }
    }

    fn dispatch(&mut self, seq: u64) {
        let Some(entry) = self.table.get_mut(&seq) else {
            warn!(seq, "ready job missing from table");
            return;
        };
        if !entry.transition(JobStatus::InFlight) {
            return;
        }
        entry.attempts += 1;
        debug!(job_id = %entry.job.id(), seq, attempt = entry.attempts, "dispatching");

        let job = Arc::clone(&entry.job);
        let fetcher = Arc::clone(&self.fetcher);
        let progress = self.progress.clone();
        let cancel = self.cancel.clone();
        let handle = self.in_flight.spawn(async move {
            let outcome = fetcher.fetch(&job, &progress, &cancel).await;
            (seq, outcome)
        });
        self.task_seqs.insert(handle.id(), seq);
    }

    fn requeue(&mut self, timer: Result<u64, JoinError>) {
        match timer {
            Ok(seq) => {
                debug!(seq, "backoff elapsed");
                self.ready.insert(seq);
            }
            Err(e) => warn!(error = %e, "backoff timer failed"),
        }
    }

    async fn complete(
        &mut self,
        joined: Result<(tokio::task::Id, (u64, TransferOutcome)), JoinError>,
        allow_retry: bool,
    ) {
        match joined {
            Ok((id, (seq, outcome))) => {
                self.task_seqs.remove(&id);
                self.progress.finish(&outcome.job_id).await;
                self.settle(seq, outcome, allow_retry);
            }
            Err(join_error) => {
                let Some(seq) = self.task_seqs.remove(&join_error.id()) else {
                    warn!(error = %join_error, "untracked fetch task ended");
                    return;
                };
                let Some(entry) = self.table.get(&seq) else {
                    return;
                };
                let job_id = entry.job.id().to_string();
                let kind = if join_error.is_cancelled() {
                    let temp_path = temp_path_for(entry.job.dest_path());
                    let _ = tokio::fs::remove_file(&temp_path).await;
                    ErrorKind::Cancelled
                } else {
                    error!(job_id = %job_id, error = %join_error, "fetch task panicked");
                    ErrorKind::Network
                };
                self.progress.finish(&job_id).await;
                self.settle(seq, TransferOutcome::failed(job_id, 0, kind), allow_retry);
            }
        }
    }

    fn settle(&mut self, seq: u64, outcome: TransferOutcome, allow_retry: bool) {
        let Some(mut entry) = self.table.remove(&seq) else {
            warn!(seq, job_id = %outcome.job_id, "outcome for unknown job");
            return;
        };

        if outcome.success {
            entry.bytes_written = outcome.bytes_written;
            entry.transition(JobStatus::Succeeded);
            self.finish(entry);
            return;
        }

        let kind = outcome.error.unwrap_or(ErrorKind::Network);
        let discarded = outcome.bytes_written;
        if allow_retry {
            match self.config.retry_policy.should_retry(kind, entry.retries) {
                RetryDecision::Retry { delay, attempt } => {
                    entry.retries = attempt;
                    entry.transition(JobStatus::RetryScheduled { attempt });
                    info!(
                        job_id = %entry.job.id(),
                        attempt,
                        delay_ms = delay.as_millis(),
                        cause = %kind,
                        discarded,
                        "retry scheduled"
                    );
                    self.backoff.spawn(async move {
                        tokio::time::sleep(delay).await;
                        seq
                    });
                    self.table.insert(seq, entry);
                    return;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(job_id = %entry.job.id(), reason = %reason, "not retrying");
                }
            }
        }

        warn!(
            job_id = %entry.job.id(),
            cause = %kind,
            attempts = entry.attempts,
            discarded,
            "job failed permanently"
        );
        entry.transition(JobStatus::FailedPermanently { cause: kind });
        self.finish(entry);
    }

    fn finish(&self, entry: JobEntry) {
        if let Err(e) = self.aggregator.record(entry.into_record()) {
            warn!(error = %e, "failed to record job result");
        }
    }

    /// Brings the batch to a stop after cancellation.
    async fn wind_down(&mut self, rx: &mut mpsc::Receiver<Feed>) {
        info!(
            in_flight = self.in_flight.len(),
            waiting = self.table.len().saturating_sub(self.in_flight.len()),
            "batch cancelled, winding down"
        );
        self.aggregator.mark_cancelled();
        self.backoff.shutdown().await;

        let deadline = Instant::now() + self.config.cancel_grace;
        while !self.in_flight.is_empty() {
            match tokio::time::timeout_at(deadline, self.in_flight.join_next_with_id()).await {
                Ok(Some(joined)) => self.complete(joined, false).await,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        remaining = self.in_flight.len(),
                        grace_ms = self.config.cancel_grace.as_millis(),
                        "grace period expired, aborting transfers"
                    );
                    self.in_flight.abort_all();
                    while let Some(joined) = self.in_flight.join_next_with_id().await {
                        self.complete(joined, false).await;
                    }
                }
            }
        }

        self.ready.clear();
        let waiting = std::mem::take(&mut self.table);
        for mut entry in waiting.into_values() {
            entry.transition(JobStatus::FailedPermanently {
                cause: ErrorKind::Cancelled,
            });
            self.finish(entry);
        }

        while let Some(feed) = rx.recv().await {
            match feed {
                Feed::Job(job) => self.admit_cancelled(job).await,
                Feed::Skipped(note) => self.aggregator.add_source_skip(note),
                Feed::SourceFailed(source_error) => {
                    self.aggregator.set_source_error(source_error.to_string());
                }
            }
        }
    }
}

async fn already_present(job: &DownloadJob) -> bool {
    match tokio::fs::metadata(job.dest_path()).await {
        Ok(meta) if meta.is_file() => job.expected_bytes().is_none_or(|n| n == meta.len()),
        _ => false,
    }
}
