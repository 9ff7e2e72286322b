//! Integration tests for `HttpFetcher` against a mock HTTP server.

use msr_core::download::{progress_channel, temp_path_for};
use msr_core::http_client::DEFAULT_REFERER;
use msr_core::{
    DownloadJob, ErrorKind, FetchConfig, Fetcher, HttpFetcher, HttpTimeouts, ProgressSender,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, ResponseTemplate};

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

fn fetcher() -> Result<HttpFetcher, Box<dyn std::error::Error>> {
    Ok(HttpFetcher::new(&FetchConfig::default())?)
}

#[tokio::test]
async fn test_fetch_success_writes_destination_and_no_temp_file()
-> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/audio/track.wav"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFF-audio-bytes"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let dest = out.path().join("Album").join("Track.wav");
    let job = DownloadJob::new(
        "48:audio",
        format!("{}/audio/track.wav", mock_server.uri()),
        &dest,
    );

    let outcome = fetcher()?
        .fetch(&job, &ProgressSender::disabled(), &CancellationToken::new())
        .await;

    assert!(outcome.success, "unexpected failure: {:?}", outcome.error);
    assert_eq!(outcome.job_id, "48:audio");
    assert_eq!(outcome.bytes_written, 16);
    assert_eq!(std::fs::read(&dest)?, b"RIFF-audio-bytes");
    assert!(!temp_path_for(&dest).exists());
    Ok(())
}

#[tokio::test]
async fn test_fetch_not_found_is_server_error() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let dest = out.path().join("missing.jpg");
    let job = DownloadJob::new("1:cover", format!("{}/missing.jpg", mock_server.uri()), &dest);

    let outcome = fetcher()?
        .fetch(&job, &ProgressSender::disabled(), &CancellationToken::new())
        .await;

    assert!(!outcome.success);
    assert_eq!(outcome.error, Some(ErrorKind::ServerError { status: 404 }));
    assert_eq!(outcome.bytes_written, 0);
    assert!(!dest.exists());
    assert!(!temp_path_for(&dest).exists());
    Ok(())
}

#[tokio::test]
async fn test_fetch_server_error_is_transient() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let job = DownloadJob::new(
        "busy",
        format!("{}/busy.lrc", mock_server.uri()),
        out.path().join("busy.lrc"),
    );

    let outcome = fetcher()?
        .fetch(&job, &ProgressSender::disabled(), &CancellationToken::new())
        .await;

    let kind = outcome.error.unwrap();
    assert_eq!(kind, ErrorKind::ServerError { status: 503 });
    assert!(kind.is_transient());
    Ok(())
}

#[tokio::test]
async fn test_fetch_size_mismatch_discards_file() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(path("/short.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"12345"))
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let dest = out.path().join("short.png");
    let job = DownloadJob::new("short", format!("{}/short.png", mock_server.uri()), &dest)
        .with_expected_bytes(10);

    let outcome = fetcher()?
        .fetch(&job, &ProgressSender::disabled(), &CancellationToken::new())
        .await;

    assert_eq!(
        outcome.error,
        Some(ErrorKind::SizeMismatch {
            expected: 10,
            actual: 5
        })
    );
    assert_eq!(outcome.bytes_written, 5, "discarded bytes are still reported");
    assert!(!dest.exists());
    assert!(!temp_path_for(&dest).exists());
    Ok(())
}

#[tokio::test]
async fn test_fetch_reports_cumulative_progress() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"hello world"))
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let job = DownloadJob::new(
        "progress",
        format!("{}/hello.txt", mock_server.uri()),
        out.path().join("hello.txt"),
    );
    let (sender, mut rx) = progress_channel();

    let outcome = fetcher()?
        .fetch(&job, &sender, &CancellationToken::new())
        .await;
    assert!(outcome.success);
    drop(sender);

    let mut last = None;
    while let Some(event) = rx.recv().await {
        assert_eq!(event.job_id, "progress");
        assert_eq!(event.total_bytes, Some(11));
        if let Some(previous) = last {
            assert!(event.bytes_written >= previous);
        }
        last = Some(event.bytes_written);
    }
    assert_eq!(last, Some(11));
    Ok(())
}

#[tokio::test]
async fn test_fetch_sends_browser_headers() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .and(header("referer", DEFAULT_REFERER))
        .and(header_exists("user-agent"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"ok"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let job = DownloadJob::new(
        "headers",
        format!("{}/any.mp3", mock_server.uri()),
        out.path().join("any.mp3"),
    );

    let outcome = fetcher()?
        .fetch(&job, &ProgressSender::disabled(), &CancellationToken::new())
        .await;

    assert!(outcome.success, "request did not carry expected headers");
    Ok(())
}

#[tokio::test]
async fn test_fetch_cancelled_mid_transfer_leaves_nothing() -> Result<(), Box<dyn std::error::Error>>
{
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"slow body")
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let dest = out.path().join("slow.wav");
    let job = DownloadJob::new("slow", format!("{}/slow.wav", mock_server.uri()), &dest);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let outcome = fetcher()?
        .fetch(&job, &ProgressSender::disabled(), &cancel)
        .await;

    assert_eq!(outcome.error, Some(ErrorKind::Cancelled));
    assert!(started.elapsed() < std::time::Duration::from_secs(4));
    assert!(!dest.exists());
    assert!(!temp_path_for(&dest).exists());
    Ok(())
}

#[tokio::test]
async fn test_fetch_connection_refused_is_network_error() -> Result<(), Box<dyn std::error::Error>>
{
    let out = TempDir::new()?;
    let job = DownloadJob::new(
        "refused",
        "http://127.0.0.1:1/never.wav",
        out.path().join("never.wav"),
    );

    let outcome = fetcher()?
        .fetch(&job, &ProgressSender::disabled(), &CancellationToken::new())
        .await;

    let kind = outcome.error.unwrap();
    assert!(
        matches!(kind, ErrorKind::Network | ErrorKind::Timeout),
        "got {kind:?}"
    );
    assert!(kind.is_transient());
    Ok(())
}

#[tokio::test]
async fn test_fetch_slow_response_times_out() -> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(b"too late")
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    let dest = out.path().join("stall.wav");
    let job = DownloadJob::new("stall", format!("{}/stall.wav", mock_server.uri()), &dest);
    let fetcher = HttpFetcher::new(&FetchConfig {
        timeouts: HttpTimeouts {
            connect: std::time::Duration::from_secs(1),
            read: std::time::Duration::from_millis(200),
        },
        ..FetchConfig::default()
    })?;

    let started = std::time::Instant::now();
    let outcome = fetcher
        .fetch(&job, &ProgressSender::disabled(), &CancellationToken::new())
        .await;

    assert_eq!(outcome.error, Some(ErrorKind::Timeout));
    assert!(ErrorKind::Timeout.is_transient());
    assert!(started.elapsed() < std::time::Duration::from_secs(4));
    assert_eq!(outcome.bytes_written, 0);
    assert!(!dest.exists());
    assert!(!temp_path_for(&dest).exists());
    Ok(())
}

#[tokio::test]
async fn test_fetch_into_unwritable_destination_is_disk_error()
-> Result<(), Box<dyn std::error::Error>> {
    let mock_server = require_mock_server!();
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"never written"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let out = TempDir::new()?;
    // A regular file where the album directory should go.
    let blocker = out.path().join("Album");
    std::fs::write(&blocker, b"not a directory")?;
    let job = DownloadJob::new(
        "blocked",
        format!("{}/track.wav", mock_server.uri()),
        blocker.join("Track.wav"),
    );

    let outcome = fetcher()?
        .fetch(&job, &ProgressSender::disabled(), &CancellationToken::new())
        .await;

    assert_eq!(outcome.error, Some(ErrorKind::Disk));
    assert!(!ErrorKind::Disk.is_transient());
    assert_eq!(std::fs::read(&blocker)?, b"not a directory");
    Ok(())
}
