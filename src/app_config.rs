//! Application configuration: TOML file defaults merged with CLI flags.
//!
//! Precedence: command-line flag, then config file value, then built-in default.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use msr_core::catalog::DEFAULT_API_BASE;
use msr_core::download::{DEFAULT_BASE_DELAY, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES};
use msr_core::{HttpTimeouts, RequestHeaders};
use serde::Deserialize;

use crate::cli::Args;

/// Default directory albums are written into.
pub const DEFAULT_OUTPUT_DIR: &str = "MSR_Albums";

const APP_DIR: &str = "msr-downloader";

/// TOML-backed file configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Directory albums are written into.
    pub output_dir: Option<PathBuf>,
    /// Concurrent downloads (same range as CLI).
    pub concurrency: Option<u8>,
    /// Retries after the first attempt.
    pub max_retries: Option<u8>,
    /// Base retry backoff in milliseconds.
    pub backoff_ms: Option<u64>,
    /// Skip files that already exist.
    pub skip_existing: Option<bool>,
    /// Catalog API base URL.
    pub api_base: Option<String>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP read timeout in seconds.
    pub read_timeout_secs: Option<u64>,
    /// User-Agent header override.
    pub user_agent: Option<String>,
    /// Referer header override; an empty string disables the header.
    pub referer: Option<String>,
}

impl FileConfig {
    /// Validates config values against runtime and CLI constraints.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=100).contains(&concurrency)
        {
            bail!("Invalid config value for `concurrency`: {concurrency}. Expected range: 1..=100");
        }
        if let Some(max_retries) = self.max_retries
            && max_retries > 10
        {
            bail!("Invalid config value for `max_retries`: {max_retries}. Expected range: 0..=10");
        }
        if let Some(backoff_ms) = self.backoff_ms
            && backoff_ms > 60_000
        {
            bail!("Invalid config value for `backoff_ms`: {backoff_ms}. Expected range: 0..=60000");
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        if let Some(user_agent) = &self.user_agent
            && user_agent.trim().is_empty()
        {
            bail!("Invalid config value for `user_agent`: must not be empty");
        }
        if let Some(api_base) = &self.api_base {
            url::Url::parse(api_base)
                .with_context(|| format!("Invalid config value for `api_base`: {api_base}"))?;
        }
        Ok(())
    }
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/msr-downloader/config.toml`
/// 2. `$HOME/.config/msr-downloader/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(APP_DIR).join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(APP_DIR)
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file.
///
/// An explicit path must exist. The default path is optional: when it is
/// missing, `Ok(None)` is returned.
pub fn load_config(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        return load_file_config(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => load_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let config: FileConfig = toml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

/// Effective settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory albums are written into.
    pub output_dir: PathBuf,
    /// Concurrent downloads.
    pub concurrency: usize,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base retry backoff.
    pub backoff: Duration,
    /// Skip files that already exist.
    pub skip_existing: bool,
    /// Catalog API base URL.
    pub api_base: String,
    /// Album name filter.
    pub album_filter: Option<String>,
    /// Where to write the JSON report.
    pub report_path: Option<PathBuf>,
    /// Request headers for catalog and downloads.
    pub headers: RequestHeaders,
    /// HTTP timeouts.
    pub timeouts: HttpTimeouts,
}

impl Settings {
    /// Merges CLI flags over file values over defaults.
    #[must_use]
    pub fn resolve(args: &Args, file: Option<&FileConfig>) -> Self {
        let file = file.cloned().unwrap_or_default();

        let mut headers = RequestHeaders::default();
        if let Some(user_agent) = file.user_agent {
            headers.user_agent = user_agent;
        }
        if let Some(referer) = file.referer {
            headers.referer = (!referer.is_empty()).then_some(referer);
        }

        let defaults = HttpTimeouts::default();
        let timeouts = HttpTimeouts {
            connect: file
                .connect_timeout_secs
                .map_or(defaults.connect, Duration::from_secs),
            read: file
                .read_timeout_secs
                .map_or(defaults.read, Duration::from_secs),
        };

        let backoff = args
            .backoff_ms
            .or(file.backoff_ms)
            .map_or(DEFAULT_BASE_DELAY, Duration::from_millis);

        Self {
            output_dir: args
                .output_dir
                .clone()
                .or(file.output_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
            concurrency: args
                .concurrency
                .or(file.concurrency)
                .map_or(DEFAULT_CONCURRENCY, usize::from),
            max_retries: args
                .max_retries
                .or(file.max_retries)
                .map_or(DEFAULT_MAX_RETRIES, u32::from),
            backoff,
            skip_existing: args.skip_existing || file.skip_existing.unwrap_or(false),
            api_base: args
                .api_base
                .clone()
                .or(file.api_base)
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            album_filter: args.album.clone(),
            report_path: args.report.clone(),
            headers,
            timeouts,
        }
    }
}
