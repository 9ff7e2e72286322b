//! Bulk download core: fetch, schedule, retry, report.
//!
//! # Features
//!
//! - Streaming transfers into `.part` temp files, renamed on success
//! - Bounded concurrency with FIFO assignment
//! - Exponential backoff with jitter for transient failures
//! - Cooperative cancellation with a grace period
//! - Non-blocking progress events
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use msr_core::download::{FetchConfig, HttpFetcher, Scheduler, SchedulerConfig, progress_channel};
//! use msr_core::{DownloadJob, IterJobSource};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (progress, mut events) = progress_channel();
//! tokio::spawn(async move {
//!     while let Some(event) = events.recv().await {
//!         println!("{}: {} bytes", event.job_id, event.bytes_written);
//!     }
//! });
//!
//! let scheduler = Scheduler::new(SchedulerConfig::default())?;
//! let fetcher = Arc::new(HttpFetcher::new(&FetchConfig::default())?);
//! let jobs = IterJobSource::new([DownloadJob::new("a", "https://example.com/a.mp3", "out/a.mp3")]);
//! let report = scheduler.run(jobs, fetcher, progress, CancellationToken::new()).await?;
//! assert!(!report.has_failures());
//! # Ok(())
//! # }
//! ```

mod aggregator;
pub(crate) mod constants;
mod error;
mod fetcher;
mod progress;
mod retry;
mod scheduler;

pub use aggregator::{AggregatorError, JobRecord, Report, ReportSummary, ResultAggregator};
pub use constants::{DEFAULT_CANCEL_GRACE, TEMP_SUFFIX};
pub use error::DownloadError;
pub use fetcher::{FetchConfig, Fetcher, HttpFetcher, temp_path_for};
pub use progress::{ProgressEvent, ProgressSender, progress_channel, progress_channel_with_capacity};
pub use retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_RETRIES, RetryDecision, RetryPolicy};
pub use scheduler::{DEFAULT_CONCURRENCY, Scheduler, SchedulerConfig, SchedulerError};

// Note: no module-local Result aliases.
// Use `Result<T, DownloadError>` explicitly in function signatures.
