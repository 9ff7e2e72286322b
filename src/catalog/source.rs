//! [`JobSource`] over the catalog API.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::client::CatalogClient;
use super::models::{AlbumDetail, AlbumSummary, SongSummary, album_info_text};
use super::naming::{claim_path, extension_from_url, sanitize};
use crate::job::DownloadJob;
use crate::source::{JobSource, SourceError};

/// Name of the metadata file written into every album directory.
pub const ALBUM_INFO_FILE: &str = "album_info.txt";

/// Walks the catalog lazily and yields one job per downloadable file.
///
/// The album list is fetched on the first pull. Album details and song
/// details are fetched only when the previous album's jobs have been handed
/// out, so a slow consumer never causes API requests to pile up.
///
/// An album or song whose lookup still fails after the client's retries is
/// left out and noted (see [`JobSource::take_skipped`]); the walk goes on.
/// Only a failed album list or a local I/O error ends it. Every destination
/// is unique within one walk: names that collide get the catalog id
/// appended, as in `Theme (1002).wav`.
#[derive(Debug)]
pub struct CatalogJobSource {
    client: CatalogClient,
    output_dir: PathBuf,
    album_filter: Option<String>,
    albums: Option<VecDeque<AlbumSummary>>,
    album_dir: PathBuf,
    songs: VecDeque<SongSummary>,
    pending: VecDeque<DownloadJob>,
    claimed: HashSet<PathBuf>,
    skipped: Vec<String>,
}

impl CatalogJobSource {
    /// Creates a source writing under `output_dir`.
    #[must_use]
    pub fn new(client: CatalogClient, output_dir: impl Into<PathBuf>) -> Self {
        let output_dir = output_dir.into();
        Self {
            client,
            album_dir: output_dir.clone(),
            output_dir,
            album_filter: None,
            albums: None,
            songs: VecDeque::new(),
            pending: VecDeque::new(),
            claimed: HashSet::new(),
            skipped: Vec::new(),
        }
    }

    /// Restricts the walk to albums whose name contains `needle`, ignoring case.
    #[must_use]
    pub fn with_album_filter(mut self, needle: impl Into<String>) -> Self {
        let needle = needle.into();
        self.album_filter = (!needle.is_empty()).then(|| needle.to_lowercase());
        self
    }

    fn matches_filter(&self, album: &AlbumSummary) -> bool {
        self.album_filter
            .as_deref()
            .is_none_or(|needle| album.name.to_lowercase().contains(needle))
    }

    async fn load_albums(&mut self) -> Result<(), SourceError> {
        let all = self.client.albums().await?;
        let total = all.len();
        let selected: VecDeque<AlbumSummary> =
            all.into_iter().filter(|a| self.matches_filter(a)).collect();
        info!(total, selected = selected.len(), "album list loaded");
        self.albums = Some(selected);
        Ok(())
    }

    fn skip(&mut self, note: String) {
        warn!(note = %note, "catalog entry skipped");
        self.skipped.push(note);
    }

    /// Prepares the next album that can be looked up. Returns false when no
    /// albums remain.
    async fn open_next_album(&mut self) -> Result<bool, SourceError> {
        if self.albums.is_none() {
            self.load_albums().await?;
        }
        loop {
            let Some(album) = self.albums.as_mut().and_then(VecDeque::pop_front) else {
                return Ok(false);
            };

            let detail = match self.client.album_detail(&album.cid).await {
                Ok(detail) => detail,
                Err(error) => {
                    self.skip(format!("album {} ({}): {error}", album.name, album.cid));
                    continue;
                }
            };
            let album_dir = claim_path(
                &mut self.claimed,
                &self.output_dir,
                &sanitize(&detail.name),
                None,
                &detail.cid,
            );
            tokio::fs::create_dir_all(&album_dir)
                .await
                .map_err(|e| SourceError::io(&album_dir, e))?;
            self.claimed.insert(album_dir.join(ALBUM_INFO_FILE));
            write_album_info(&album_dir, &detail).await?;

            info!(album = %detail.name, songs = detail.songs.len(), "album opened");
            self.pending.extend(cover_jobs(&detail, &album_dir, &mut self.claimed));
            self.songs = detail.songs.into();
            self.album_dir = album_dir;
            return Ok(true);
        }
    }

    async fn expand_song(&mut self, summary: &SongSummary) {
        let song = match self.client.song(&summary.cid).await {
            Ok(song) => song,
            Err(error) => {
                self.skip(format!("song {} ({}): {error}", summary.name, summary.cid));
                return;
            }
        };
        let stem = sanitize(&song.name);

        match song.source_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => {
                let dest = self.claim(&stem, url, &song.cid);
                self.pending
                    .push_back(DownloadJob::new(format!("{}:audio", song.cid), url, dest));
            }
            None => warn!(song = %song.name, cid = %song.cid, "song has no audio URL"),
        }

        if let Some(url) = song.lyric_url.as_deref().filter(|u| !u.is_empty()) {
            let dest = self.claim(&stem, url, &song.cid);
            self.pending
                .push_back(DownloadJob::new(format!("{}:lyric", song.cid), url, dest));
        }
        debug!(song = %song.name, "song expanded");
    }

    fn claim(&mut self, stem: &str, url: &str, cid: &str) -> PathBuf {
        let ext = extension_from_url(url);
        claim_path(&mut self.claimed, &self.album_dir, stem, ext.as_deref(), cid)
    }
}

#[async_trait]
impl JobSource for CatalogJobSource {
    async fn next_job(&mut self) -> Result<Option<DownloadJob>, SourceError> {
        loop {
            if let Some(job) = self.pending.pop_front() {
                return Ok(Some(job));
            }
            if let Some(song) = self.songs.pop_front() {
                self.expand_song(&song).await;
                continue;
            }
            if !self.open_next_album().await? {
                return Ok(None);
            }
        }
    }

    fn take_skipped(&mut self) -> Vec<String> {
        std::mem::take(&mut self.skipped)
    }
}

fn cover_jobs(
    detail: &AlbumDetail,
    album_dir: &Path,
    claimed: &mut HashSet<PathBuf>,
) -> Vec<DownloadJob> {
    let album_name = sanitize(&detail.name);
    [
        ("cover", "Cover", detail.cover_url.as_deref()),
        ("cover_de", "CoverDe", detail.cover_de_url.as_deref()),
    ]
    .into_iter()
    .filter_map(|(id_suffix, name_suffix, url)| {
        let url = url.filter(|u| !u.is_empty())?;
        let dest = claim_path(
            claimed,
            album_dir,
            &format!("{album_name}_{name_suffix}"),
            extension_from_url(url).as_deref(),
            &detail.cid,
        );
        Some(DownloadJob::new(format!("{}:{id_suffix}", detail.cid), url, dest))
    })
    .collect()
}

async fn write_album_info(album_dir: &Path, detail: &AlbumDetail) -> Result<(), SourceError> {
    let path = album_dir.join(ALBUM_INFO_FILE);
    tokio::fs::write(&path, album_info_text(detail))
        .await
        .map_err(|e| SourceError::io(&path, e))
}
