//! File and directory names derived from catalog data.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use url::Url;

/// Makes a catalog name safe to use as a single path component.
///
/// Each of `\ / : * ? " < > |` becomes a space, then leading and trailing
/// spaces and dots are trimmed. A name that trims to nothing becomes `_`.
#[must_use]
pub fn sanitize(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => ' ',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim_matches(|c| c == ' ' || c == '.');
    if trimmed.is_empty() {
        return "_".to_string();
    }
    trimmed.to_string()
}

/// Extension of the last path segment of `url`, without the dot.
///
/// Query strings and fragments are ignored. Returns `None` when the segment
/// has no dot or the URL cannot be parsed.
#[must_use]
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let last_segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = last_segment.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_string())
}

/// Picks `dir/stem.ext` (or `dir/stem` without an extension) and records it
/// in `claimed`.
///
/// When that path is already claimed the stem gets a ` (tag)` suffix, then
/// ` (tag 2)`, ` (tag 3)` and so on until the path is free.
pub(crate) fn claim_path(
    claimed: &mut HashSet<PathBuf>,
    dir: &Path,
    stem: &str,
    ext: Option<&str>,
    tag: &str,
) -> PathBuf {
    let join = |stem: &str| match ext {
        Some(ext) => dir.join(format!("{stem}.{ext}")),
        None => dir.join(stem),
    };
    let mut candidate = join(stem);
    let mut round = 1;
    while claimed.contains(&candidate) {
        candidate = if round == 1 {
            join(&format!("{stem} ({tag})"))
        } else {
            join(&format!("{stem} ({tag} {round})"))
        };
        round += 1;
    }
    claimed.insert(candidate.clone());
    candidate
}
