//! Integration tests for the scheduler driving `HttpFetcher` against a mock
//! HTTP server, including retry with backoff and the concurrency bound.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use msr_core::download::temp_path_for;
use msr_core::{
    DownloadJob, ErrorKind, FetchConfig, HttpFetcher, HttpTimeouts, IterJobSource, JobStatus,
    ProgressSender, Report, RetryPolicy, Scheduler, SchedulerConfig,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, Respond, ResponseTemplate};

mod support;
use support::socket_guard::{socket_skip_return, start_mock_server_or_skip};

macro_rules! require_mock_server {
    () => {{
        let Some(mock_server) = start_mock_server_or_skip().await else {
            return socket_skip_return();
        };
        mock_server
    }};
}

// ==================== Helpers ====================

fn scheduler(concurrency: usize, max_retries: u32) -> Result<Scheduler, Box<dyn std::error::Error>> {
    Ok(Scheduler::new(SchedulerConfig {
        concurrency,
        retry_policy: RetryPolicy::with_max_retries(max_retries)
            .with_base_delay(Duration::from_millis(10)),
        ..SchedulerConfig::default()
    })?)
}

async fn run_jobs(
    scheduler: &Scheduler,
    jobs: Vec<DownloadJob>,
) -> Result<Report, Box<dyn std::error::Error>> {
    run_jobs_with(scheduler, HttpFetcher::new(&FetchConfig::default())?, jobs).await
}

async fn run_jobs_with(
    scheduler: &Scheduler,
    fetcher: HttpFetcher,
    jobs: Vec<DownloadJob>,
) -> Result<Report, Box<dyn std::error::Error>> {
    let report = scheduler
        .run(
            IterJobSource::new(jobs),
            Arc::new(fetcher),
            ProgressSender::disabled(),
            CancellationToken::new(),
        )
        .await?;
    Ok(report)
}

fn leftover_temp_files(dir: &Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".part"))
                .collect()
        })
        .unwrap_or_default()
}

/// Fails with 500 for the first `failures` requests, then succeeds.
struct FlakyResponder {
    calls: Arc<AtomicUsize>,
    failures: usize,
}

impl Respond for FlakyResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            ResponseTemplate::new(500)
        } else {
            ResponseTemplate::new(200).set_body_bytes(b"recovered")
        }
    }
}

/// Tracks how many requests are being served at once.
///
/// Uses a blocking sleep so that overlapping requests keep the counter up.
struct ConcurrencyTrackingResponder {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    delay_ms: u64,
}

impl Respond for ConcurrencyTrackingResponder {
    fn respond(&self, _request: &wiremock::Request) -> ResponseTemplate {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(self.delay_ms));
        self.current.fetch_sub(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_bytes(b"content")
    }
}

// ==================== Retry ====================

#[tokio::test]
async fn test_retry_recovers_after_two_server_errors() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    let calls = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .and(path("/flaky.wav"))
        .respond_with(FlakyResponder {
            calls: Arc::clone(&calls),
            failures: 2,
        })
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let dest = out.path().join("flaky.wav");
    let jobs = vec![DownloadJob::new(
        "flaky",
        format!("{}/flaky.wav", mock_server.uri()),
        &dest,
    )];

    let report = run_jobs(&scheduler(2, 3)?, jobs).await?;

    let record = report.get("flaky").unwrap();
    assert_eq!(record.status, JobStatus::Succeeded);
    assert_eq!(record.attempts, 3);
    assert!(record.history.contains(&JobStatus::RetryScheduled { attempt: 1 }));
    assert!(record.history.contains(&JobStatus::RetryScheduled { attempt: 2 }));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(std::fs::read(&dest)?, b"recovered");
    assert_eq!(report.retried_then_succeeded().count(), 1);
    Ok(())
}

#[tokio::test]
async fn test_not_found_fails_without_retry() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/gone.lrc"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let jobs = vec![DownloadJob::new(
        "gone",
        format!("{}/gone.lrc", mock_server.uri()),
        out.path().join("gone.lrc"),
    )];

    let report = run_jobs(&scheduler(2, 3)?, jobs).await?;

    let record = report.get("gone").unwrap();
    assert_eq!(record.attempts, 1);
    assert_eq!(
        record.failure(),
        Some(ErrorKind::ServerError { status: 404 })
    );
    assert!(report.has_failures());
    Ok(())
}

#[tokio::test]
async fn test_retries_exhausted_records_last_error() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let jobs = vec![DownloadJob::new(
        "down",
        format!("{}/down.png", mock_server.uri()),
        out.path().join("down.png"),
    )];

    let report = run_jobs(&scheduler(1, 2)?, jobs).await?;

    let record = report.get("down").unwrap();
    assert_eq!(record.attempts, 3);
    assert_eq!(
        record.failure(),
        Some(ErrorKind::ServerError { status: 502 })
    );
    assert!(leftover_temp_files(out.path()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_timeouts_are_retried() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/stall.wav"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"late")
                .set_delay(Duration::from_secs(5)),
        )
        .expect(2)
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let jobs = vec![DownloadJob::new(
        "stall",
        format!("{}/stall.wav", mock_server.uri()),
        out.path().join("stall.wav"),
    )];
    let fetcher = HttpFetcher::new(&FetchConfig {
        timeouts: HttpTimeouts {
            connect: Duration::from_secs(1),
            read: Duration::from_millis(200),
        },
        ..FetchConfig::default()
    })?;

    let report = run_jobs_with(&scheduler(1, 1)?, fetcher, jobs).await?;

    let record = report.get("stall").unwrap();
    assert_eq!(record.attempts, 2);
    assert!(record.history.contains(&JobStatus::RetryScheduled { attempt: 1 }));
    assert_eq!(record.failure(), Some(ErrorKind::Timeout));
    assert!(leftover_temp_files(out.path()).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_disk_failure_is_not_retried() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"unused"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let blocker = out.path().join("Album");
    std::fs::write(&blocker, b"file, not directory")?;
    let jobs = vec![DownloadJob::new(
        "blocked",
        format!("{}/track.wav", mock_server.uri()),
        blocker.join("Track.wav"),
    )];

    let report = run_jobs(&scheduler(1, 3)?, jobs).await?;

    let record = report.get("blocked").unwrap();
    assert_eq!(
        record.status,
        JobStatus::FailedPermanently {
            cause: ErrorKind::Disk
        }
    );
    assert_eq!(record.attempts, 1);
    assert!(!record.history.iter().any(|s| matches!(s, JobStatus::RetryScheduled { .. })));
    Ok(())
}

// ==================== Batch behavior ====================

#[tokio::test]
async fn test_mixed_batch_isolates_failures() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/bad.wav"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"fine"))
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let jobs: Vec<DownloadJob> = ["a.wav", "bad.wav", "c.wav", "d.wav"]
        .iter()
        .map(|name| {
            DownloadJob::new(
                *name,
                format!("{}/{name}", mock_server.uri()),
                out.path().join(name),
            )
        })
        .collect();

    let report = run_jobs(&scheduler(3, 1)?, jobs).await?;

    let summary = report.summary();
    assert_eq!(summary.total, 4);
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 1);
    let order: Vec<&str> = report.entries().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(order, ["a.wav", "bad.wav", "c.wav", "d.wav"]);
    assert!(out.path().join("a.wav").exists());
    assert!(!out.path().join("bad.wav").exists());
    assert!(!temp_path_for(&out.path().join("bad.wav")).exists());
    Ok(())
}

#[tokio::test]
async fn test_concurrency_limit_holds_against_server() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    Mock::given(method("GET"))
        .respond_with(ConcurrencyTrackingResponder {
            current: Arc::clone(&current),
            peak: Arc::clone(&peak),
            delay_ms: 100,
        })
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let jobs: Vec<DownloadJob> = (0..10)
        .map(|i| {
            DownloadJob::new(
                format!("file-{i}"),
                format!("{}/file{i}.bin", mock_server.uri()),
                out.path().join(format!("file{i}.bin")),
            )
        })
        .collect();

    let report = run_jobs(&scheduler(3, 0)?, jobs).await?;

    assert_eq!(report.summary().succeeded, 10);
    let observed = peak.load(Ordering::SeqCst);
    assert!(observed <= 3, "peak concurrency {observed} exceeded limit 3");
    assert!(observed >= 1);
    Ok(())
}

#[tokio::test]
async fn test_second_run_with_skip_existing_fetches_nothing()
-> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let make_jobs = || -> Vec<DownloadJob> {
        ["one.wav", "two.wav"]
            .iter()
            .map(|name| {
                DownloadJob::new(
                    *name,
                    format!("{}/{name}", mock_server.uri()),
                    out.path().join(name),
                )
            })
            .collect()
    };

    let first = run_jobs(&scheduler(2, 0)?, make_jobs()).await?;
    assert_eq!(first.summary().succeeded, 2);
    assert_eq!(first.summary().skipped, 0);

    let skipping = Scheduler::new(SchedulerConfig {
        concurrency: 2,
        skip_existing: true,
        ..SchedulerConfig::default()
    })?;
    let second = run_jobs(&skipping, make_jobs()).await?;

    let summary = second.summary();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(summary.skipped, 2);
    assert!(second.entries().iter().all(|r| r.attempts == 0));
    Ok(())
}

#[tokio::test]
async fn test_cancelled_batch_accounts_for_every_job() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"late")
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let jobs: Vec<DownloadJob> = (0..5)
        .map(|i| {
            DownloadJob::new(
                format!("slow-{i}"),
                format!("{}/slow{i}.wav", mock_server.uri()),
                out.path().join(format!("slow{i}.wav")),
            )
        })
        .collect();

    let scheduler = scheduler(2, 3)?;
    let fetcher = HttpFetcher::new(&FetchConfig::default())?;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let report = scheduler
        .run(
            IterJobSource::new(jobs),
            Arc::new(fetcher),
            ProgressSender::disabled(),
            cancel,
        )
        .await?;

    assert!(report.cancelled());
    assert_eq!(report.len(), 5);
    assert!(
        report
            .entries()
            .iter()
            .all(|r| r.failure() == Some(ErrorKind::Cancelled))
    );
    assert!(leftover_temp_files(out.path()).is_empty());
    Ok(())
}
