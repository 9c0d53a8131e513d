//! Domain records: playlists, tracks and the normalized remote metadata
//! they are built from.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Current Unix time in milliseconds.
pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Download state of a single track.
///
/// Transitions: `Pending -> Downloading -> {Completed | Error}`,
/// `Error -> Downloading` (retry), `Downloading -> Pending` (cancel).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    /// Waiting to be downloaded.
    #[default]
    Pending,
    /// Bytes are moving.
    Downloading,
    /// Audio file is on disk.
    Completed,
    /// Last attempt failed.
    Error,
}

impl DownloadStatus {
    /// Whether moving from `self` to `next` is a legal state change.
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Error, Self::Downloading)
                | (Self::Downloading, Self::Completed | Self::Error | Self::Pending)
        )
    }
}

impl std::fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Downloading => write!(f, "Downloading"),
            Self::Completed => write!(f, "Completed"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Sync state of a playlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Reconciling against the remote listing.
    Syncing,
    /// Worker pool is draining pending tracks.
    Downloading,
    /// Last sync or download pass finished.
    Completed,
    /// Last sync failed after mutating local state.
    Error,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Syncing => write!(f, "Syncing"),
            Self::Downloading => write!(f, "Downloading"),
            Self::Completed => write!(f, "Completed"),
            Self::Error => write!(f, "Error"),
        }
    }
}

/// Playlist-level metadata as returned by the metadata gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistInfo {
    /// Remote playlist id.
    pub id: String,
    /// Playlist title.
    pub title: String,
    /// Playlist description (may be empty).
    pub description: String,
    /// Thumbnail URL (may be empty).
    pub thumbnail_url: String,
    /// Number of items the backend reports.
    pub item_count: usize,
}

/// One remote video, normalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoInfo {
    /// Remote video id.
    pub remote_id: String,
    /// Video title.
    pub title: String,
    /// Channel or artist name.
    pub artist: String,
    /// Duration in seconds.
    pub duration_secs: u64,
    /// Thumbnail URL (may be empty).
    pub thumbnail_url: String,
}

/// One remote video mapped to a local audio file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Stable key, see [`Track::derive_id`].
    pub id: String,
    /// Owning playlist.
    pub playlist_id: String,
    /// Source video id.
    pub remote_id: String,
    /// Title at last sync.
    pub title: String,
    /// Artist at last sync.
    pub artist: String,
    /// Duration in seconds.
    pub duration_secs: u64,
    /// Thumbnail URL (may be empty).
    #[serde(default)]
    pub thumbnail_url: String,
    /// Order within the playlist.
    pub position: usize,
    /// Download state.
    pub download_status: DownloadStatus,
    /// Fraction downloaded, 0.0 to 1.0.
    pub download_progress: f64,
    /// Size in bytes, 0 until known.
    pub file_size: u64,
    /// Local file, set only once completed.
    pub local_path: Option<PathBuf>,
}

impl Track {
    /// Derive the store key for a remote video inside a playlist.
    ///
    /// Pure function of its inputs so that a re-sync recognizes tracks it
    /// already knows.
    pub fn derive_id(playlist_id: &str, remote_id: &str) -> String {
        format!("{playlist_id}-{remote_id}")
    }

    /// Build a fresh pending track from remote metadata.
    pub fn from_video(playlist_id: &str, video: &VideoInfo, position: usize) -> Self {
        Self {
            id: Self::derive_id(playlist_id, &video.remote_id),
            playlist_id: playlist_id.to_string(),
            remote_id: video.remote_id.clone(),
            title: video.title.clone(),
            artist: video.artist.clone(),
            duration_secs: video.duration_secs,
            thumbnail_url: video.thumbnail_url.clone(),
            position,
            download_status: DownloadStatus::Pending,
            download_progress: 0.0,
            file_size: 0,
            local_path: None,
        }
    }

    /// Display label used in manifests and file names.
    pub fn display_label(&self) -> String {
        format!("{} - {}", self.artist, self.title)
    }

    /// Whether the audio file is on disk.
    pub const fn is_completed(&self) -> bool {
        matches!(self.download_status, DownloadStatus::Completed)
    }

    /// Put the track back into the pending state with no file reference.
    pub fn reset_to_pending(&mut self) {
        self.download_status = DownloadStatus::Pending;
        self.download_progress = 0.0;
        self.local_path = None;
    }
}

/// Sum of the file sizes of completed tracks.
pub fn completed_size(tracks: &[Track]) -> u64 {
    tracks
        .iter()
        .filter(|t| t.is_completed())
        .map(|t| t.file_size)
        .sum()
}

/// A synced collection of tracks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    /// Remote playlist id, also the local key.
    pub id: String,
    /// Playlist name.
    pub name: String,
    /// Canonical playlist URL.
    #[serde(default)]
    pub url: String,
    /// Description snapshot.
    #[serde(default)]
    pub description: String,
    /// Thumbnail snapshot.
    #[serde(default)]
    pub thumbnail_url: String,
    /// Remote track count as of `last_synced_at`.
    pub track_count: usize,
    /// Sum of completed track sizes, derived.
    pub total_size: u64,
    /// Last successful sync (Unix millis).
    pub last_synced_at: Option<u64>,
    /// When the playlist was added (Unix millis).
    #[serde(default)]
    pub added_at: u64,
    /// Sync state.
    pub sync_status: SyncStatus,
}

impl Playlist {
    /// Create a playlist record from freshly fetched metadata.
    pub fn from_info(info: &PlaylistInfo, track_count: usize) -> Self {
        Self {
            id: info.id.clone(),
            name: info.title.clone(),
            url: format!("https://www.youtube.com/playlist?list={}", info.id),
            description: info.description.clone(),
            thumbnail_url: info.thumbnail_url.clone(),
            track_count,
            total_size: 0,
            last_synced_at: None,
            added_at: now_millis(),
            sync_status: SyncStatus::Idle,
        }
    }
}

/// Outcome of a reconciliation.
///
/// Returned by preview without touching the store, and by commit to
/// describe what was applied.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SyncPreview {
    /// Remote videos with no local track, as new pending tracks.
    pub tracks_to_add: Vec<Track>,
    /// Local tracks whose video left the remote playlist.
    pub tracks_to_remove: Vec<Track>,
    /// Bytes to download; unknown before download, so always 0.
    pub total_download_size: u64,
}

impl SyncPreview {
    /// Whether local state already matches the remote listing.
    pub fn is_empty(&self) -> bool {
        self.tracks_to_add.is_empty() && self.tracks_to_remove.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video(id: &str) -> VideoInfo {
        VideoInfo {
            remote_id: id.to_string(),
            title: format!("Song {id}"),
            artist: "Artist".to_string(),
            duration_secs: 200,
            thumbnail_url: String::new(),
        }
    }

    #[test]
    fn test_derive_id_is_deterministic() {
        assert_eq!(Track::derive_id("PL1", "abc"), "PL1-abc");
        assert_eq!(
            Track::derive_id("PL1", "abc"),
            Track::derive_id("PL1", "abc")
        );
        assert_ne!(Track::derive_id("PL1", "abc"), Track::derive_id("PL2", "abc"));
    }

    #[test]
    fn test_from_video_is_pending() {
        let track = Track::from_video("PL1", &video("v1"), 4);
        assert_eq!(track.id, "PL1-v1");
        assert_eq!(track.position, 4);
        assert_eq!(track.download_status, DownloadStatus::Pending);
        assert_eq!(track.download_progress, 0.0);
        assert_eq!(track.file_size, 0);
        assert!(track.local_path.is_none());
        assert_eq!(track.display_label(), "Artist - Song v1");
    }

    #[test]
    fn test_status_transitions() {
        use DownloadStatus::{Completed, Downloading, Error, Pending};

        assert!(Pending.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Completed));
        assert!(Downloading.can_transition_to(Error));
        assert!(Downloading.can_transition_to(Pending));
        assert!(Error.can_transition_to(Downloading));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Downloading));
        assert!(!Error.can_transition_to(Completed));
    }

    #[test]
    fn test_reset_to_pending_clears_file() {
        let mut track = Track::from_video("PL1", &video("v1"), 0);
        track.download_status = DownloadStatus::Downloading;
        track.download_progress = 0.4;
        track.local_path = Some(PathBuf::from("/tmp/a.mp3"));

        track.reset_to_pending();

        assert_eq!(track.download_status, DownloadStatus::Pending);
        assert_eq!(track.download_progress, 0.0);
        assert!(track.local_path.is_none());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&SyncStatus::Downloading).expect("serialize");
        assert_eq!(json, "\"downloading\"");
        let status: DownloadStatus = serde_json::from_str("\"error\"").expect("deserialize");
        assert_eq!(status, DownloadStatus::Error);
    }

    #[test]
    fn test_completed_size_ignores_unfinished_tracks() {
        let mut a = Track::from_video("PL1", &video("a"), 0);
        a.download_status = DownloadStatus::Completed;
        a.file_size = 1_048_576;
        let mut b = Track::from_video("PL1", &video("b"), 1);
        b.download_status = DownloadStatus::Completed;
        b.file_size = 2_097_152;
        let mut c = Track::from_video("PL1", &video("c"), 2);
        c.download_status = DownloadStatus::Error;
        c.file_size = 512;

        assert_eq!(completed_size(&[a, b, c]), 3_145_728);
    }

    #[test]
    fn test_playlist_from_info() {
        let info = PlaylistInfo {
            id: "PLabc".to_string(),
            title: "Road Trip".to_string(),
            description: String::new(),
            thumbnail_url: String::new(),
            item_count: 12,
        };
        let playlist = Playlist::from_info(&info, 10);
        assert_eq!(playlist.name, "Road Trip");
        assert_eq!(playlist.track_count, 10);
        assert_eq!(playlist.sync_status, SyncStatus::Idle);
        assert!(playlist.last_synced_at.is_none());
        assert_eq!(playlist.url, "https://www.youtube.com/playlist?list=PLabc");
    }
}
