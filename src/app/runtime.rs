//! One download run: settings, catalog source, scheduler, report.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use msr_core::download::DEFAULT_CANCEL_GRACE;
use msr_core::{
    CatalogClient, CatalogJobSource, FetchConfig, HttpFetcher, Report, RetryPolicy, Scheduler,
    SchedulerConfig,
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::app::exit_handler::{ProcessExit, exit_outcome_for};
use crate::app::progress_manager;
use crate::app_config::{Settings, load_config};
use crate::cli::Args;

pub(crate) async fn run_downloader(args: Args) -> Result<ProcessExit> {
    let file_config = load_config(args.config.as_deref())?;
    let settings = Settings::resolve(&args, file_config.as_ref());
    debug!(?settings, "settings resolved");

    tokio::fs::create_dir_all(&settings.output_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to create output directory '{}'",
                settings.output_dir.display()
            )
        })?;

    let retry_policy =
        RetryPolicy::with_max_retries(settings.max_retries).with_base_delay(settings.backoff);

    let catalog = CatalogClient::new(&settings.headers, settings.timeouts, &settings.api_base)
        .context("Failed to build catalog client")?
        .with_retry_policy(retry_policy.clone());
    let mut source = CatalogJobSource::new(catalog, &settings.output_dir);
    if let Some(filter) = &settings.album_filter {
        source = source.with_album_filter(filter.clone());
    }

    let fetcher = HttpFetcher::new(&FetchConfig {
        headers: settings.headers.clone(),
        timeouts: settings.timeouts,
    })
    .context("Failed to build download client")?;

    let scheduler = Scheduler::new(SchedulerConfig {
        concurrency: settings.concurrency,
        retry_policy,
        skip_existing: settings.skip_existing,
        cancel_grace: DEFAULT_CANCEL_GRACE,
    })?;

    info!(
        output_dir = %settings.output_dir.display(),
        api_base = %settings.api_base,
        concurrency = settings.concurrency,
        "MSR downloader starting"
    );

    let cancel = CancellationToken::new();
    let signal_task = spawn_interrupt_handler(cancel.clone());
    let (progress, progress_task) = progress_manager::spawn_progress_ui(!args.quiet);

    let result = scheduler
        .run(source, Arc::new(fetcher), progress, cancel)
        .await;

    signal_task.abort();
    if let Some(handle) = progress_task {
        let _ = handle.await;
    }

    let report = result.context("Download batch could not start")?;
    log_summary(&report);

    if let Some(path) = &settings.report_path {
        write_report(path, &report)?;
        info!(path = %path.display(), "Report written");
    }

    Ok(exit_outcome_for(&report))
}

fn spawn_interrupt_handler(cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling downloads");
            cancel.cancel();
        }
    })
}

fn log_summary(report: &Report) {
    for record in report.failed() {
        if let Some(cause) = record.failure() {
            warn!(job_id = %record.id, url = %record.url, cause = %cause, attempts = record.attempts, "Download failed");
        }
    }
    if let Some(source_error) = report.source_error() {
        warn!(error = %source_error, "Catalog walk ended early");
    }
    for note in report.source_skips() {
        warn!(note = %note, "Catalog entry left out");
    }
    for duplicate in report.duplicates() {
        warn!(job_id = %duplicate, "Duplicate job skipped");
    }
    for job_id in report.path_conflicts() {
        warn!(job_id = %job_id, "Job skipped, destination already used by another job");
    }

    let summary = report.summary();
    info!(
        total = summary.total,
        succeeded = summary.succeeded,
        retried = summary.retried,
        skipped = summary.skipped,
        failed = summary.failed,
        cancelled = report.cancelled(),
        "Download complete"
    );
}

fn write_report(path: &Path, report: &Report) -> Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create report directory '{}'", parent.display()))?;
    }
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write report '{}'", path.display()))
}
