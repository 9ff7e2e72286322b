//! Shared HTTP client construction for the catalog and the fetcher.
//!
//! Request headers and timeouts are explicit values handed to constructors,
//! so two clients in one process can be configured differently.

use std::time::Duration;

use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderName, HeaderValue, REFERER};
use reqwest::Client;
use thiserror::Error;
use tracing::debug;

use crate::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};

/// Browser User-Agent the site's web player sends.
pub const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36";

/// Referer the site's web player sends.
pub const DEFAULT_REFERER: &str = "https://monster-siren.hypergryph.com/";

const DEFAULT_ACCEPT: &str = "*/*";
const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Errors building an HTTP client.
#[derive(Debug, Error)]
pub enum ClientBuildError {
    /// A configured header name or value is not valid HTTP.
    #[error("invalid header {name}: {value:?}")]
    InvalidHeader {
        /// Header name as configured.
        name: String,
        /// Header value as configured.
        value: String,
    },

    /// reqwest refused the builder configuration.
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// Headers attached to every request a client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeaders {
    /// `User-Agent` value.
    pub user_agent: String,
    /// `Referer` value, if any.
    pub referer: Option<String>,
    /// `Accept` value.
    pub accept: String,
    /// `Accept-Language` value, if any.
    pub accept_language: Option<String>,
    /// Additional headers in send order.
    pub extra: Vec<(String, String)>,
}

impl Default for RequestHeaders {
    fn default() -> Self {
        Self {
            user_agent: BROWSER_USER_AGENT.to_string(),
            referer: Some(DEFAULT_REFERER.to_string()),
            accept: DEFAULT_ACCEPT.to_string(),
            accept_language: Some(DEFAULT_ACCEPT_LANGUAGE.to_string()),
            extra: Vec::new(),
        }
    }
}

impl RequestHeaders {
    /// Converts to a header map, validating every name and value.
    ///
    /// `User-Agent` is not included; it is applied through the client builder.
    ///
    /// # Errors
    ///
    /// Returns [`ClientBuildError::InvalidHeader`] for the first invalid entry.
    pub fn to_header_map(&self) -> Result<HeaderMap, ClientBuildError> {
        let mut map = HeaderMap::new();
        map.insert(ACCEPT, header_value("Accept", &self.accept)?);
        if let Some(referer) = &self.referer {
            map.insert(REFERER, header_value("Referer", referer)?);
        }
        if let Some(language) = &self.accept_language {
            map.insert(ACCEPT_LANGUAGE, header_value("Accept-Language", language)?);
        }
        for (name, value) in &self.extra {
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|_| ClientBuildError::InvalidHeader {
                    name: name.clone(),
                    value: value.clone(),
                })?;
            map.insert(header_name, header_value(name, value)?);
        }
        Ok(map)
    }
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, ClientBuildError> {
    HeaderValue::from_str(value).map_err(|_| ClientBuildError::InvalidHeader {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Connect and per-read timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HttpTimeouts {
    /// TCP/TLS connect timeout.
    pub connect: Duration,
    /// Maximum idle time between body reads.
    pub read: Duration,
}

impl Default for HttpTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read: Duration::from_secs(READ_TIMEOUT_SECS),
        }
    }
}

/// Builds a client with the given headers and timeouts.
///
/// # Errors
///
/// Returns [`ClientBuildError`] when a header is invalid or reqwest rejects
/// the configuration.
pub fn build_http_client(
    headers: &RequestHeaders,
    timeouts: HttpTimeouts,
) -> Result<Client, ClientBuildError> {
    debug!(
        connect_timeout_ms = timeouts.connect.as_millis(),
        read_timeout_ms = timeouts.read.as_millis(),
        referer = ?headers.referer,
        "building HTTP client"
    );
    let builder = Client::builder()
        .connect_timeout(timeouts.connect)
        .read_timeout(timeouts.read)
        .gzip(true)
        .user_agent(headers.user_agent.clone())
        .default_headers(headers.to_header_map()?);
    Ok(builder.build()?)
}
