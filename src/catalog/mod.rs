//! Monster Siren catalog: API client and the job source that walks it.
//!
//! [`CatalogJobSource`] visits albums one at a time (album list, album
//! detail, then each song's detail) and yields cover, audio and lyric
//! [`DownloadJob`](crate::job::DownloadJob)s. It writes `album_info.txt` into
//! each album directory as it goes.

mod client;
mod models;
mod naming;
mod source;

pub use client::{CatalogClient, DEFAULT_API_BASE};
pub use models::{AlbumDetail, AlbumSummary, ApiEnvelope, SongDetail, SongSummary, album_info_text};
pub use naming::{extension_from_url, sanitize};
pub use source::{ALBUM_INFO_FILE, CatalogJobSource};
