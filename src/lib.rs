//! Monster Siren downloader core library.
//!
//! Downloads every album of the Monster Siren catalog (covers, audio and
//! lyrics) through a bounded-concurrency, retrying, cancellable bulk
//! downloader.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`job`] - Jobs, statuses and per-attempt outcomes
//! - [`source`] - The [`JobSource`] boundary the scheduler pulls from
//! - [`download`] - Fetcher, scheduler, retry policy, progress and report
//! - [`catalog`] - Monster Siren API client and the job source built on it
//! - [`http_client`] - Shared reqwest client construction

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod catalog;
pub mod download;
pub mod http_client;
pub mod job;
pub mod source;

// Re-export commonly used types
pub use catalog::{CatalogClient, CatalogJobSource, sanitize};
pub use download::{
    DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, FetchConfig, Fetcher, HttpFetcher, ProgressEvent,
    ProgressSender, Report, ResultAggregator, RetryDecision, RetryPolicy, Scheduler,
    SchedulerConfig, SchedulerError,
};
pub use http_client::{HttpTimeouts, RequestHeaders};
pub use job::{DownloadJob, ErrorKind, JobStatus, TransferOutcome};
pub use source::{IterJobSource, JobSource, SourceError};
