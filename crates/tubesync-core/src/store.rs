//! Local persistence of playlists and tracks.
//!
//! The reconciler and orchestrator receive a [`StateStore`] at
//! construction and mutate state only through its methods. [`JsonStore`]
//! keeps everything in memory and, when opened on a directory, mirrors
//! each mutation to a single JSON file. A mutation is persisted before it
//! becomes visible, so a failed write leaves both disk and memory on the
//! previous state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result, StoreError};
use crate::model::{Playlist, Track};

/// File name of the persisted library inside the data directory.
pub const LIBRARY_FILE: &str = "library.json";

/// Durable key-value persistence of playlists and tracks.
///
/// Each call is atomic at the level of the records it touches.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Look up one playlist.
    async fn get_playlist(&self, id: &str) -> Result<Option<Playlist>>;

    /// All playlists, ordered by id.
    async fn list_playlists(&self) -> Result<Vec<Playlist>>;

    /// Look up one track.
    async fn get_track(&self, id: &str) -> Result<Option<Track>>;

    /// Tracks owned by a playlist, ordered by position.
    async fn tracks_for_playlist(&self, playlist_id: &str) -> Result<Vec<Track>>;

    /// Insert or replace a playlist record.
    async fn upsert_playlist(&self, playlist: Playlist) -> Result<()>;

    /// Insert or replace a track record. The owning playlist must exist.
    async fn upsert_track(&self, track: Track) -> Result<()>;

    /// Insert or replace several tracks in one write.
    async fn upsert_tracks(&self, tracks: Vec<Track>) -> Result<()>;

    /// Remove tracks by id; unknown ids are ignored.
    async fn remove_tracks(&self, ids: &[String]) -> Result<()>;

    /// Remove a playlist and every track it owns.
    async fn remove_playlist(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Library {
    playlists: BTreeMap<String, Playlist>,
    tracks: BTreeMap<String, Track>,
}

impl Library {
    fn check_owner(&self, track: &Track) -> Result<()> {
        if self.playlists.contains_key(&track.playlist_id) {
            Ok(())
        } else {
            Err(Error::playlist_not_found(&track.playlist_id))
        }
    }
}

/// In-memory store with optional JSON file persistence.
pub struct JsonStore {
    library: RwLock<Library>,
    path: Option<PathBuf>,
}

impl JsonStore {
    /// Create a store that is never written to disk.
    pub fn in_memory() -> Self {
        Self {
            library: RwLock::new(Library::default()),
            path: None,
        }
    }

    /// Open (or create) the store persisted in `data_dir`.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(LIBRARY_FILE);

        let library = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let content = tokio::fs::read(&path)
                .await
                .map_err(|e| load_failed(&path, &e))?;
            let library: Library =
                serde_json::from_slice(&content).map_err(|e| load_failed(&path, &e))?;
            info!(
                "Loaded {} playlist(s) and {} track(s) from {}",
                library.playlists.len(),
                library.tracks.len(),
                path.display()
            );
            library
        } else {
            tokio::fs::create_dir_all(data_dir)
                .await
                .map_err(|e| persist_failed(&path, &e))?;
            debug!("No library at {}, starting empty", path.display());
            Library::default()
        };

        Ok(Self {
            library: RwLock::new(library),
            path: Some(path),
        })
    }

    /// Path of the backing file, if persistent.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Apply `change` to a copy of the library, persist it, then publish it.
    async fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Library) -> Result<()> + Send,
    {
        let mut guard = self.library.write().await;
        let mut next = guard.clone();
        change(&mut next)?;

        if next == *guard {
            return Ok(());
        }

        if let Some(path) = &self.path {
            persist(path, &next).await?;
        }
        *guard = next;
        Ok(())
    }
}

async fn persist(path: &Path, library: &Library) -> Result<()> {
    let content = serde_json::to_vec_pretty(library)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &content)
        .await
        .map_err(|e| persist_failed(path, &e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| persist_failed(path, &e))?;
    Ok(())
}

fn load_failed(path: &Path, e: &dyn std::fmt::Display) -> Error {
    Error::Store(StoreError::LoadFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

fn persist_failed(path: &Path, e: &dyn std::fmt::Display) -> Error {
    Error::Store(StoreError::PersistFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl StateStore for JsonStore {
    async fn get_playlist(&self, id: &str) -> Result<Option<Playlist>> {
        Ok(self.library.read().await.playlists.get(id).cloned())
    }

    async fn list_playlists(&self) -> Result<Vec<Playlist>> {
        Ok(self.library.read().await.playlists.values().cloned().collect())
    }

    async fn get_track(&self, id: &str) -> Result<Option<Track>> {
        Ok(self.library.read().await.tracks.get(id).cloned())
    }

    async fn tracks_for_playlist(&self, playlist_id: &str) -> Result<Vec<Track>> {
        let library = self.library.read().await;
        let mut tracks: Vec<Track> = library
            .tracks
            .values()
            .filter(|t| t.playlist_id == playlist_id)
            .cloned()
            .collect();
        tracks.sort_by_key(|t| t.position);
        Ok(tracks)
    }

    async fn upsert_playlist(&self, playlist: Playlist) -> Result<()> {
        self.mutate(move |library| {
            library.playlists.insert(playlist.id.clone(), playlist);
            Ok(())
        })
        .await
    }

    async fn upsert_track(&self, track: Track) -> Result<()> {
        self.mutate(move |library| {
            library.check_owner(&track)?;
            library.tracks.insert(track.id.clone(), track);
            Ok(())
        })
        .await
    }

    async fn upsert_tracks(&self, tracks: Vec<Track>) -> Result<()> {
        self.mutate(move |library| {
            for track in tracks {
                library.check_owner(&track)?;
                library.tracks.insert(track.id.clone(), track);
            }
            Ok(())
        })
        .await
    }

    async fn remove_tracks(&self, ids: &[String]) -> Result<()> {
        self.mutate(|library| {
            for id in ids {
                library.tracks.remove(id);
            }
            Ok(())
        })
        .await
    }

    async fn remove_playlist(&self, id: &str) -> Result<()> {
        self.mutate(|library| {
            library.playlists.remove(id);
            library.tracks.retain(|_, t| t.playlist_id != id);
            Ok(())
        })
        .await
    }
}
