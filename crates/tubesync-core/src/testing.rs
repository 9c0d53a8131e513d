//! Shared fixtures for unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::config::AudioQuality;
use crate::error::{FileSystemError, Result, StoreError, TransportError};
use crate::model::{Playlist, PlaylistInfo, Track, VideoInfo};
use crate::store::{JsonStore, StateStore};
use crate::transport::{ProgressSender, TransferControls, TransferProgress, Transport};

pub(crate) const DEFAULT_PAYLOAD: u64 = 1024;
const CHUNKS: u64 = 4;

pub(crate) fn playlist_info(id: &str, title: &str) -> PlaylistInfo {
    PlaylistInfo {
        id: id.to_string(),
        title: title.to_string(),
        description: format!("{title} description"),
        thumbnail_url: String::new(),
        item_count: 0,
    }
}

pub(crate) fn video(remote_id: &str) -> VideoInfo {
    VideoInfo {
        remote_id: remote_id.to_string(),
        title: format!("Song {remote_id}"),
        artist: "Band".to_string(),
        duration_secs: 180,
        thumbnail_url: String::new(),
    }
}

pub(crate) fn videos(remote_ids: &[&str]) -> Vec<VideoInfo> {
    remote_ids.iter().map(|id| video(id)).collect()
}

/// In-process transport writing synthetic payloads in a few chunks and
/// yielding between them so concurrent transfers interleave.
#[derive(Default)]
pub(crate) struct FakeTransport {
    sizes: Mutex<HashMap<String, u64>>,
    failing: Mutex<HashSet<String>>,
    start_paused: Mutex<HashSet<String>>,
    undeletable: Mutex<HashSet<PathBuf>>,
    deleted: Mutex<Vec<PathBuf>>,
    controls: TransferControls,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    cancels: AtomicUsize,
}

impl FakeTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_size(self, remote_id: &str, bytes: u64) -> Self {
        lock(&self.sizes).insert(remote_id.to_string(), bytes);
        self
    }

    pub(crate) fn failing(self, remote_id: &str) -> Self {
        lock(&self.failing).insert(remote_id.to_string());
        self
    }

    pub(crate) fn paused(self, remote_id: &str) -> Self {
        lock(&self.start_paused).insert(remote_id.to_string());
        self
    }

    pub(crate) fn undeletable(self, path: &Path) -> Self {
        lock(&self.undeletable).insert(path.to_path_buf());
        self
    }

    pub(crate) fn heal(&self, remote_id: &str) {
        lock(&self.failing).remove(remote_id);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub(crate) fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }

    pub(crate) fn deleted(&self) -> Vec<PathBuf> {
        lock(&self.deleted).clone()
    }

    async fn write_payload(
        &self,
        track_id: &str,
        remote_id: &str,
        destination: &Path,
        progress: &ProgressSender,
    ) -> std::result::Result<PathBuf, TransportError> {
        let control = self.controls.register(track_id).await;
        if lock(&self.start_paused).contains(remote_id) {
            control.pause();
        }
        self.calls.fetch_add(1, Ordering::SeqCst);

        let disk_error = |e: std::io::Error| TransportError::Disk {
            path: destination.to_path_buf(),
            reason: e.to_string(),
        };

        let total = lock(&self.sizes)
            .get(remote_id)
            .copied()
            .unwrap_or(DEFAULT_PAYLOAD);
        let fails = lock(&self.failing).contains(remote_id);
        let chunk = total.div_ceil(CHUNKS);

        let mut written = 0;
        while written < total || total == 0 {
            if !control.checkpoint().await {
                return Err(TransportError::Aborted(track_id.to_string()));
            }
            tokio::task::yield_now().await;
            if fails {
                return Err(TransportError::Network {
                    track_id: track_id.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            if total == 0 {
                break;
            }
            written = (written + chunk).min(total);
            let _ = progress.send(TransferProgress {
                bytes_written: written,
                bytes_expected: total,
            });
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(disk_error)?;
        }
        let payload = vec![0u8; usize::try_from(total).unwrap_or_default()];
        tokio::fs::write(destination, payload)
            .await
            .map_err(disk_error)?;
        Ok(destination.to_path_buf())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

#[async_trait]
impl Transport for FakeTransport {
    async fn resolve_url(
        &self,
        remote_id: &str,
        _quality: AudioQuality,
    ) -> std::result::Result<String, TransportError> {
        Ok(format!("fake://{remote_id}"))
    }

    async fn download(
        &self,
        track_id: &str,
        url: &str,
        destination: &Path,
        progress: ProgressSender,
    ) -> std::result::Result<PathBuf, TransportError> {
        let remote_id = url.strip_prefix("fake://").unwrap_or(url);

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let result = self
            .write_payload(track_id, remote_id, destination, &progress)
            .await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        self.controls.unregister(track_id).await;
        result
    }

    async fn pause(&self, track_id: &str) {
        if let Some(control) = self.controls.get(track_id).await {
            control.pause();
        }
    }

    async fn resume(&self, track_id: &str) {
        if let Some(control) = self.controls.get(track_id).await {
            control.resume();
        }
    }

    async fn cancel(&self, track_id: &str) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        if let Some(control) = self.controls.get(track_id).await {
            control.cancel();
        }
    }

    async fn delete_file(&self, path: &Path) -> std::result::Result<(), FileSystemError> {
        if lock(&self.undeletable).contains(path) {
            return Err(FileSystemError::DeleteFailed {
                path: path.to_path_buf(),
                reason: "permission denied".to_string(),
            });
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(FileSystemError::DeleteFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                });
            }
        }
        lock(&self.deleted).push(path.to_path_buf());
        Ok(())
    }
}

/// In-memory store whose track writes and track listings can be switched
/// to fail.
pub(crate) struct FlakyStore {
    inner: JsonStore,
    fail_track_writes: AtomicBool,
    fail_track_listing: AtomicBool,
}

impl FlakyStore {
    pub(crate) fn new() -> Self {
        Self {
            inner: JsonStore::in_memory(),
            fail_track_writes: AtomicBool::new(false),
            fail_track_listing: AtomicBool::new(false),
        }
    }

    pub(crate) fn fail_track_writes(&self, fail: bool) {
        self.fail_track_writes.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_track_listing(&self, fail: bool) {
        self.fail_track_listing.store(fail, Ordering::SeqCst);
    }

    fn check(switch: &AtomicBool) -> Result<()> {
        if switch.load(Ordering::SeqCst) {
            return Err(StoreError::PersistFailed {
                path: PathBuf::from("flaky"),
                reason: "disk full".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for FlakyStore {
    async fn get_playlist(&self, id: &str) -> Result<Option<Playlist>> {
        self.inner.get_playlist(id).await
    }

    async fn list_playlists(&self) -> Result<Vec<Playlist>> {
        self.inner.list_playlists().await
    }

    async fn get_track(&self, id: &str) -> Result<Option<Track>> {
        self.inner.get_track(id).await
    }

    async fn tracks_for_playlist(&self, playlist_id: &str) -> Result<Vec<Track>> {
        Self::check(&self.fail_track_listing)?;
        self.inner.tracks_for_playlist(playlist_id).await
    }

    async fn upsert_playlist(&self, playlist: Playlist) -> Result<()> {
        self.inner.upsert_playlist(playlist).await
    }

    async fn upsert_track(&self, track: Track) -> Result<()> {
        Self::check(&self.fail_track_writes)?;
        self.inner.upsert_track(track).await
    }

    async fn upsert_tracks(&self, tracks: Vec<Track>) -> Result<()> {
        Self::check(&self.fail_track_writes)?;
        self.inner.upsert_tracks(tracks).await
    }

    async fn remove_tracks(&self, ids: &[String]) -> Result<()> {
        self.inner.remove_tracks(ids).await
    }

    async fn remove_playlist(&self, id: &str) -> Result<()> {
        self.inner.remove_playlist(id).await
    }
}
