//! HTTP client for the Monster Siren catalog API.

use reqwest::Client;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument, warn};

use super::models::{AlbumDetail, AlbumSummary, ApiEnvelope, SongDetail};
use crate::download::{RetryDecision, RetryPolicy};
use crate::http_client::{ClientBuildError, HttpTimeouts, RequestHeaders, build_http_client};
use crate::job::ErrorKind;
use crate::source::SourceError;

/// Production API base URL.
pub const DEFAULT_API_BASE: &str = "https://monster-siren.hypergryph.com/api";

/// Typed access to the catalog endpoints.
///
/// Transport failures, timeouts and 5xx responses are retried under the
/// client's [`RetryPolicy`]. Undecodable bodies and non-zero API codes are
/// returned at once.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: Client,
    base_url: String,
    retry_policy: RetryPolicy,
}

impl CatalogClient {
    /// Creates a client for `base_url` with the given headers and timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError`] if HTTP client construction fails.
    pub fn new(
        headers: &RequestHeaders,
        timeouts: HttpTimeouts,
        base_url: impl Into<String>,
    ) -> Result<Self, ClientBuildError> {
        let client = build_http_client(headers, timeouts)?;
        Ok(Self::with_client(client, base_url))
    }

    /// Wraps an existing reqwest client.
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            retry_policy: RetryPolicy::default(),
        }
    }

    /// Replaces the retry policy for catalog requests.
    #[must_use]
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// API base URL without trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lists every album.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] on transport failure or a non-success status
    /// once retries run out, and at once for an undecodable body or a
    /// non-zero API code.
    pub async fn albums(&self) -> Result<Vec<AlbumSummary>, SourceError> {
        self.get_data("/albums").await
    }

    /// Fetches one album with its track list.
    ///
    /// # Errors
    ///
    /// See [`albums`](Self::albums).
    pub async fn album_detail(&self, cid: &str) -> Result<AlbumDetail, SourceError> {
        self.get_data(&format!("/album/{cid}/detail")).await
    }

    /// Fetches one song with its download URLs.
    ///
    /// # Errors
    ///
    /// See [`albums`](Self::albums).
    pub async fn song(&self, cid: &str) -> Result<SongDetail, SourceError> {
        self.get_data(&format!("/song/{cid}")).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn get_data<T: DeserializeOwned>(&self, path: &str) -> Result<T, SourceError> {
        let url = format!("{}{path}", self.base_url);
        let mut retries = 0;
        loop {
            let (error, kind) = match self.get_once(&url).await {
                Ok(data) => return Ok(data),
                Err(AttemptError::Final(error)) => return Err(error),
                Err(AttemptError::Retryable(error, kind)) => (error, kind),
            };
            match self.retry_policy.should_retry(kind, retries) {
                RetryDecision::Retry { delay, attempt } => {
                    warn!(
                        url = %url,
                        attempt,
                        delay_ms = delay.as_millis(),
                        cause = %kind,
                        "catalog request failed, retrying"
                    );
                    retries = attempt;
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %url, reason = %reason, "catalog request not retried");
                    return Err(error);
                }
            }
        }
    }

    async fn get_once<T: DeserializeOwned>(&self, url: &str) -> Result<T, AttemptError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            let kind = if e.is_timeout() {
                ErrorKind::Timeout
            } else {
                ErrorKind::Network
            };
            AttemptError::Retryable(SourceError::request(url, e), kind)
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Retryable(
                SourceError::request(url, format!("HTTP {}", status.as_u16())),
                ErrorKind::ServerError {
                    status: status.as_u16(),
                },
            ));
        }

        let envelope = response
            .json::<ApiEnvelope<T>>()
            .await
            .map_err(|e| AttemptError::Final(SourceError::decode(url, e)))?;

        if envelope.code != 0 {
            return Err(AttemptError::Final(SourceError::decode(
                url,
                format!("API code {}: {}", envelope.code, envelope.msg),
            )));
        }

        debug!(url = %url, "catalog response decoded");
        Ok(envelope.data)
    }
}

/// Failure of one catalog request, split by whether another try may help.
enum AttemptError {
    Retryable(SourceError, ErrorKind),
    Final(SourceError),
}
