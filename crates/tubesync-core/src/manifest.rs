//! M3U manifest generation and the on-disk playlist layout.
//!
//! Layout under the download directory:
//!
//! ```text
//! <download_dir>/<playlist name> [<playlist id>]/<artist - title> [<remote id>].mp3
//! <download_dir>/<playlist name> [<playlist id>]/<playlist name>.m3u
//! ```
//!
//! Ids keep paths unique when names collide. A name that sanitizes to
//! nothing is replaced by the id. All names pass through
//! [`sanitize_filename`].

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{FileSystemError, Result};
use crate::format::sanitize_filename;
use crate::model::{Playlist, Track};

/// First line of every manifest.
pub const M3U_HEADER: &str = "#EXTM3U";

/// Extension of generated manifests.
pub const MANIFEST_EXTENSION: &str = "m3u";

/// Extension of downloaded audio files.
pub const AUDIO_EXTENSION: &str = "mp3";

/// Directory holding a playlist's audio files and manifest.
pub fn playlist_directory(download_dir: &Path, playlist: &Playlist) -> PathBuf {
    let id = sanitize_filename(&playlist.id);
    let name = sanitize_filename(&playlist.name);
    if name.is_empty() {
        download_dir.join(id)
    } else {
        download_dir.join(format!("{name} [{id}]"))
    }
}

/// Where the audio file of `track` is written.
pub fn track_destination(download_dir: &Path, playlist: &Playlist, track: &Track) -> PathBuf {
    playlist_directory(download_dir, playlist).join(format!(
        "{} [{}].{AUDIO_EXTENSION}",
        sanitize_filename(&track.display_label()),
        sanitize_filename(&track.remote_id)
    ))
}

/// Where the manifest of `playlist` is written.
pub fn manifest_path(download_dir: &Path, playlist: &Playlist) -> PathBuf {
    let name = sanitize_filename(&playlist.name);
    let stem = if name.is_empty() {
        sanitize_filename(&playlist.id)
    } else {
        name
    };
    playlist_directory(download_dir, playlist).join(format!("{stem}.{MANIFEST_EXTENSION}"))
}

/// Render the manifest for `tracks`.
///
/// Only completed tracks with a local file are listed, in position order,
/// regardless of the order they are passed in. Output is deterministic.
pub fn render_m3u(tracks: &[Track]) -> String {
    let mut completed: Vec<&Track> = tracks
        .iter()
        .filter(|t| t.is_completed() && t.local_path.is_some())
        .collect();
    completed.sort_by_key(|t| t.position);

    let mut lines = Vec::with_capacity(1 + completed.len() * 2);
    lines.push(M3U_HEADER.to_string());
    for track in completed {
        if let Some(path) = &track.local_path {
            lines.push(format!(
                "#EXTINF:{},{}",
                track.duration_secs,
                track.display_label()
            ));
            lines.push(path.display().to_string());
        }
    }
    lines.join("\n")
}

/// Write the manifest of `playlist` under `download_dir`.
///
/// # Errors
///
/// Returns a [`FileSystemError`] if the playlist directory cannot be
/// created or the file cannot be written.
pub async fn write_manifest(
    download_dir: &Path,
    playlist: &Playlist,
    tracks: &[Track],
) -> Result<PathBuf> {
    let dir = playlist_directory(download_dir, playlist);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| FileSystemError::CreateDirFailed {
            path: dir.clone(),
            reason: e.to_string(),
        })?;

    let path = manifest_path(download_dir, playlist);
    let content = render_m3u(tracks);
    debug!("Writing manifest {} ({} bytes)", path.display(), content.len());

    tokio::fs::write(&path, content)
        .await
        .map_err(|e| FileSystemError::WriteFailed {
            path: path.clone(),
            reason: e.to_string(),
        })?;

    info!("Wrote manifest for '{}' to {}", playlist.name, path.display());
    Ok(path)
}
