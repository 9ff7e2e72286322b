//! Catalog API response types.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};

/// Wrapper around every API payload.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    /// 0 on success.
    pub code: i64,
    /// Server message, empty on success.
    #[serde(default)]
    pub msg: String,
    /// Payload.
    pub data: T,
}

/// Entry of `GET /albums`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumSummary {
    /// Album id.
    pub cid: String,
    /// Display name.
    pub name: String,
    /// Small cover image.
    #[serde(default)]
    pub cover_url: Option<String>,
    /// Credited artists.
    #[serde(default)]
    pub artistes: Vec<String>,
}

/// Payload of `GET /album/{cid}/detail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlbumDetail {
    /// Album id.
    pub cid: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub intro: String,
    /// Owning label or series.
    #[serde(default)]
    pub belong: String,
    /// Cover image.
    #[serde(default)]
    pub cover_url: Option<String>,
    /// Large cover image.
    #[serde(default)]
    pub cover_de_url: Option<String>,
    /// Track list.
    #[serde(default)]
    pub songs: Vec<SongSummary>,
}

/// Track entry inside an [`AlbumDetail`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongSummary {
    /// Song id.
    pub cid: String,
    /// Display name.
    pub name: String,
    /// Credited artists.
    #[serde(default)]
    pub artistes: Vec<String>,
}

/// Payload of `GET /song/{cid}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongDetail {
    /// Song id.
    pub cid: String,
    /// Display name.
    pub name: String,
    /// Owning album.
    #[serde(default)]
    pub album_cid: Option<String>,
    /// Audio file.
    #[serde(default)]
    pub source_url: Option<String>,
    /// Lyric file, absent for instrumentals.
    #[serde(default)]
    pub lyric_url: Option<String>,
    /// Credited artists.
    #[serde(default)]
    pub artists: Vec<String>,
}

/// Renders the `album_info.txt` contents for an album.
#[must_use]
pub fn album_info_text(detail: &AlbumDetail) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "name: {}", detail.name);
    let _ = writeln!(out, "intro: \n{}", detail.intro);
    let _ = writeln!(out, "belong: {}", detail.belong);
    out.push_str("songs: \n");
    for song in &detail.songs {
        let _ = writeln!(out, "{}", song.name);
        if !song.artistes.is_empty() {
            let _ = writeln!(out, "   artistes: {}", song.artistes.join("、"));
        }
    }
    out
}
