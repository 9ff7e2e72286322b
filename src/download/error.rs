//! Error types for the download module.
//!
//! [`DownloadError`] carries full context for logs; [`DownloadError::kind`]
//! collapses it into the serialisable [`ErrorKind`] the scheduler reasons about.

use std::path::PathBuf;

use thiserror::Error;

use crate::job::ErrorKind;

/// Errors that can occur during a single file transfer.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Network-level error (DNS resolution, connection refused, reset mid-body).
    #[error("network error downloading {url}: {source}")]
    Network {
        /// The URL that failed to download.
        url: String,
        /// The underlying network error.
        #[source]
        source: reqwest::Error,
    },

    /// Request timed out before completion.
    #[error("timeout downloading {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} downloading {url}")]
    HttpStatus {
        /// The URL that returned an error status.
        url: String,
        /// The HTTP status code.
        status: u16,
    },

    /// File system error during download (create dir, create file, write, rename).
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The provided URL is malformed or invalid.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The invalid URL string.
        url: String,
    },

    /// Body ended before the advertised Content-Length was reached.
    #[error("truncated body for {url}: expected {expected_bytes} bytes, got {actual_bytes}")]
    Truncated {
        /// The URL being downloaded.
        url: String,
        /// Content-Length advertised by the server.
        expected_bytes: u64,
        /// Bytes actually received.
        actual_bytes: u64,
    },

    /// Finished file does not have the size the job declared.
    #[error(
        "size check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    SizeMismatch {
        /// Temp path that failed verification.
        path: PathBuf,
        /// Size declared by the job.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },

    /// The batch was cancelled while this transfer was running.
    #[error("download of {url} cancelled")]
    Cancelled {
        /// The URL being downloaded.
        url: String,
    },
}

impl DownloadError {
    /// Creates a network error from a reqwest error.
    pub fn network(url: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Network {
            url: url.into(),
            source,
        }
    }

    /// Classifies a reqwest error as timeout or network failure.
    pub fn from_reqwest(url: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_timeout() {
            Self::timeout(url)
        } else {
            Self::network(url, source)
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(url: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            url: url.into(),
            status,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(url: impl Into<String>) -> Self {
        Self::Timeout { url: url.into() }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates a truncated-body error.
    pub fn truncated(url: impl Into<String>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Truncated {
            url: url.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a size mismatch error.
    pub fn size_mismatch(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::SizeMismatch {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Collapses the error into the kind recorded in outcomes and reports.
    ///
    /// A truncated body is a dropped connection and maps to `Network`.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network { .. } | Self::Truncated { .. } => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::HttpStatus { status, .. } => ErrorKind::ServerError { status: *status },
            Self::Io { .. } => ErrorKind::Disk,
            Self::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            Self::SizeMismatch {
                expected_bytes,
                actual_bytes,
                ..
            } => ErrorKind::SizeMismatch {
                expected: *expected_bytes,
                actual: *actual_bytes,
            },
            Self::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }
}

// No From<reqwest::Error> / From<std::io::Error>: every variant needs the url
// or path, which the source errors don't carry. Use the constructors above.
