//! CLI argument definitions using clap derive macros.
//!
//! Tunables are optional here so that a config file value can fill in for
//! an omitted flag; built-in defaults are applied last (see `app_config`).

use std::path::PathBuf;

use clap::Parser;

/// Download every Monster Siren album: covers, audio and lyrics.
///
/// Albums land under the output directory, one folder per album, each with an
/// `album_info.txt` describing the release.
#[derive(Parser, Debug)]
#[command(name = "msr-downloader")]
#[command(author, version, about)]
pub struct Args {
    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum concurrent downloads (1-100) [default: 4]
    #[arg(short = 'c', long, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: Option<u8>,

    /// Maximum retries for transient failures (0-10) [default: 3]
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: Option<u8>,

    /// Base retry backoff in milliseconds (0-60000) [default: 1000]
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub backoff_ms: Option<u64>,

    /// Directory albums are written into [default: MSR_Albums]
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Skip files that already exist at their destination
    #[arg(long)]
    pub skip_existing: bool,

    /// Only download albums whose name contains this text (case-insensitive)
    #[arg(long, value_name = "TEXT")]
    pub album: Option<String>,

    /// Write the JSON batch report to this path
    #[arg(long, value_name = "PATH")]
    pub report: Option<PathBuf>,

    /// Config file to use instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Catalog API base URL
    #[arg(long, value_name = "URL")]
    pub api_base: Option<String>,
}
