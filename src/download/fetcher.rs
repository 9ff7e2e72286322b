//! Single-file HTTP transfers.
//!
//! [`HttpFetcher`] streams one job's body into `dest_path + ".part"` and
//! renames it into place only after the byte count checks out, so the
//! destination never holds a partial file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::constants::TEMP_SUFFIX;
use super::error::DownloadError;
use super::progress::ProgressSender;
use crate::http_client::{ClientBuildError, HttpTimeouts, RequestHeaders, build_http_client};
use crate::job::{DownloadJob, TransferOutcome};

/// Performs one transfer attempt for one job.
///
/// Implementations never panic on transfer failures; every failure is
/// reported through the returned [`TransferOutcome`].
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Downloads `job` to its destination, publishing progress and honouring
    /// `cancel`.
    async fn fetch(
        &self,
        job: &DownloadJob,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> TransferOutcome;
}

/// Construction parameters for [`HttpFetcher`].
#[derive(Debug, Clone, Default)]
pub struct FetchConfig {
    /// Headers sent with every request.
    pub headers: RequestHeaders,
    /// Connect and read timeouts.
    pub timeouts: HttpTimeouts,
}

/// [`Fetcher`] backed by a pooled reqwest client.
///
/// Create once and share behind an `Arc`; connections are reused across jobs.
///
/// The read timeout bounds the wait for the response head (on top of the
/// connect timeout) and every gap between body chunks.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    timeouts: HttpTimeouts,
}

impl HttpFetcher {
    /// Builds a fetcher from explicit headers and timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] when a header is invalid or the client
    /// cannot be built.
    pub fn new(config: &FetchConfig) -> Result<Self, ClientBuildError> {
        let client = build_http_client(&config.headers, config.timeouts)?;
        Ok(Self {
            client,
            timeouts: config.timeouts,
        })
    }

    /// Wraps an already configured client, using the default timeouts.
    #[must_use]
    pub fn from_client(client: Client) -> Self {
        Self {
            client,
            timeouts: HttpTimeouts::default(),
        }
    }

    /// Runs one attempt. `written` tracks the bytes put in the temp file so
    /// far, whether or not the attempt succeeds.
    async fn transfer(
        &self,
        job: &DownloadJob,
        progress: &ProgressSender,
        cancel: &CancellationToken,
        written: &mut u64,
    ) -> Result<(), DownloadError> {
        let url = job.url();
        Url::parse(url).map_err(|_| DownloadError::invalid_url(url))?;

        let dest = job.dest_path();
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::io(parent, e))?;
        }

        let head_timeout = self.timeouts.connect + self.timeouts.read;
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(DownloadError::cancelled(url)),
            result = tokio::time::timeout(head_timeout, self.client.get(url).send()) => {
                result
                    .map_err(|_| DownloadError::timeout(url))?
                    .map_err(|e| DownloadError::from_reqwest(url, e))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::http_status(url, status.as_u16()));
        }

        debug!(status = status.as_u16(), content_length = ?response.content_length(), "response received");

        let temp_path = temp_path_for(dest);
        let result = match self
            .write_body(response, &temp_path, job, progress, cancel, written)
            .await
        {
            Ok(()) => tokio::fs::rename(&temp_path, dest)
                .await
                .map_err(|e| DownloadError::io(dest, e)),
            Err(error) => Err(error),
        };

        if result.is_err() {
            debug!(path = %temp_path.display(), "removing temp file after failure");
            let _ = tokio::fs::remove_file(&temp_path).await;
        }

        result
    }

    async fn write_body(
        &self,
        response: reqwest::Response,
        temp_path: &Path,
        job: &DownloadJob,
        progress: &ProgressSender,
        cancel: &CancellationToken,
        bytes_written: &mut u64,
    ) -> Result<(), DownloadError> {
        let url = job.url();
        let content_length = response.content_length();
        let file = File::create(temp_path)
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;
        let mut writer = BufWriter::new(file);
        let mut stream = response.bytes_stream();

        loop {
            let next = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(DownloadError::cancelled(url)),
                next = tokio::time::timeout(self.timeouts.read, stream.next()) => {
                    next.map_err(|_| DownloadError::timeout(url))?
                }
            };
            let Some(chunk_result) = next else {
                break;
            };
            let chunk = chunk_result.map_err(|e| DownloadError::from_reqwest(url, e))?;

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| DownloadError::io(temp_path, e))?;

            *bytes_written += chunk.len() as u64;
            progress.report(job.id(), *bytes_written, content_length);
        }

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;
        writer
            .get_ref()
            .sync_all()
            .await
            .map_err(|e| DownloadError::io(temp_path, e))?;
        drop(writer);

        let total = *bytes_written;
        if let Some(advertised) = content_length
            && advertised != total
        {
            return Err(DownloadError::truncated(url, advertised, total));
        }

        if let Some(expected) = job.expected_bytes()
            && expected != total
        {
            return Err(DownloadError::size_mismatch(temp_path, expected, total));
        }

        Ok(())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[instrument(skip(self, progress, cancel), fields(job_id = %job.id(), url = %job.url()))]
    async fn fetch(
        &self,
        job: &DownloadJob,
        progress: &ProgressSender,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        let mut written = 0;
        match self.transfer(job, progress, cancel, &mut written).await {
            Ok(()) => {
                info!(bytes = written, path = %job.dest_path().display(), "download complete");
                TransferOutcome::succeeded(job.id(), written)
            }
            Err(error) => {
                let kind = error.kind();
                warn!(error = %error, kind = %kind, discarded = written, "download attempt failed");
                TransferOutcome::failed(job.id(), written, kind)
            }
        }
    }
}

/// Temp path used while `dest` is being written: `dest` plus `.part`.
#[must_use]
pub fn temp_path_for(dest: &Path) -> PathBuf {
    let mut raw = dest.as_os_str().to_owned();
    raw.push(TEMP_SUFFIX);
    PathBuf::from(raw)
}
