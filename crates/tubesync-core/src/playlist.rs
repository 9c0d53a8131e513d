//! Playlist lifecycle.
//!
//! Adding a playlist resolves its id, fetches metadata and the video
//! listing, then stores the playlist with one pending track per video.
//! Removing a playlist cascades to its tracks and can delete their files.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result, ValidationError};
use crate::format::extract_playlist_id;
use crate::gateway::MetadataGateway;
use crate::manifest::{manifest_path, playlist_directory};
use crate::model::{Playlist, PlaylistInfo, Track, completed_size};
use crate::store::StateStore;
use crate::transport::Transport;

/// Manages the set of synced playlists.
pub struct PlaylistManager {
    store: Arc<dyn StateStore>,
    gateway: Arc<dyn MetadataGateway>,
    transport: Arc<dyn Transport>,
    download_dir: PathBuf,
}

impl PlaylistManager {
    /// Create a manager over the given collaborators.
    pub fn new(
        store: Arc<dyn StateStore>,
        gateway: Arc<dyn MetadataGateway>,
        transport: Arc<dyn Transport>,
        download_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            gateway,
            transport,
            download_dir: download_dir.into(),
        }
    }

    /// Root directory playlists are downloaded into.
    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Add a playlist from a URL or a bare playlist id.
    ///
    /// Nothing is stored unless both metadata lookups succeed.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::InvalidPlaylistId`] if no id can be extracted
    /// - [`ValidationError::DuplicatePlaylist`] if it is already stored
    /// - a metadata error if the backend lookup fails
    pub async fn add_playlist(&self, url_or_id: &str) -> Result<Playlist> {
        let id = extract_playlist_id(url_or_id)
            .ok_or_else(|| ValidationError::InvalidPlaylistId(url_or_id.to_string()))?;

        if self.store.get_playlist(&id).await?.is_some() {
            warn!("Playlist {} is already tracked", id);
            return Err(ValidationError::DuplicatePlaylist(id).into());
        }

        let info = self.gateway.fetch_playlist_info(&id).await?;
        let videos = self.gateway.fetch_playlist_videos(&id).await?;

        let playlist = Playlist::from_info(
            &PlaylistInfo {
                id: id.clone(),
                ..info
            },
            videos.len(),
        );

        let mut seen = HashSet::new();
        let tracks: Vec<Track> = videos
            .iter()
            .filter(|v| seen.insert(v.remote_id.as_str()))
            .enumerate()
            .map(|(position, video)| Track::from_video(&id, video, position))
            .collect();

        self.store.upsert_playlist(playlist.clone()).await?;
        self.store.upsert_tracks(tracks).await?;

        info!(
            "Added playlist '{}' ({}) with {} track(s)",
            playlist.name, playlist.id, playlist.track_count
        );
        Ok(playlist)
    }

    /// Look up a stored playlist.
    pub async fn get_playlist(&self, id: &str) -> Result<Playlist> {
        self.store
            .get_playlist(id)
            .await?
            .ok_or_else(|| Error::playlist_not_found(id))
    }

    /// All stored playlists.
    pub async fn list_playlists(&self) -> Result<Vec<Playlist>> {
        self.store.list_playlists().await
    }

    /// Tracks of a stored playlist, in position order.
    pub async fn tracks(&self, id: &str) -> Result<Vec<Track>> {
        self.get_playlist(id).await?;
        self.store.tracks_for_playlist(id).await
    }

    /// Remove a playlist and all of its tracks.
    ///
    /// With `delete_files`, each downloaded file and the manifest are
    /// deleted first; the first failure aborts before the store is touched.
    pub async fn remove_playlist(&self, id: &str, delete_files: bool) -> Result<()> {
        let playlist = self.get_playlist(id).await?;

        if delete_files {
            let tracks = self.store.tracks_for_playlist(id).await?;
            for path in tracks.iter().filter_map(|t| t.local_path.as_deref()) {
                self.transport.delete_file(path).await?;
            }
            self.transport
                .delete_file(&manifest_path(&self.download_dir, &playlist))
                .await?;

            let dir = playlist_directory(&self.download_dir, &playlist);
            if let Err(e) = tokio::fs::remove_dir(&dir).await {
                debug!("Leaving playlist directory {}: {}", dir.display(), e);
            }
        }

        self.store.remove_playlist(id).await?;
        info!("Removed playlist '{}' ({})", playlist.name, id);
        Ok(())
    }

    /// Recompute and store the total size of completed tracks.
    pub async fn refresh_total_size(&self, id: &str) -> Result<u64> {
        let mut playlist = self.get_playlist(id).await?;
        let tracks = self.store.tracks_for_playlist(id).await?;
        playlist.total_size = completed_size(&tracks);
        let total = playlist.total_size;
        self.store.upsert_playlist(playlist).await?;
        debug!("Playlist {} uses {} bytes", id, total);
        Ok(total)
    }

    /// Bytes used on disk under the download directory.
    pub async fn storage_usage(&self) -> Result<u64> {
        let root = self.download_dir.clone();
        tokio::task::spawn_blocking(move || directory_size(&root))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))
    }
}

/// Total size of regular files below `path`; 0 if it does not exist.
pub fn directory_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .min_depth(1)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

impl std::fmt::Debug for PlaylistManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaylistManager")
            .field("download_dir", &self.download_dir)
            .finish_non_exhaustive()
    }
}
