//! Download orchestration.
//!
//! [`DownloadOrchestrator`] downloads single tracks or drains a whole
//! playlist through a bounded pool of cooperative workers. It keeps at
//! most one transfer in flight per track id, relays transport progress
//! into the store, and publishes [`DownloadEvent`]s to subscribers.
//!
//! The pool is a set of futures joined on the calling task; each worker
//! pops the next track id from a shared queue until it is empty. A failed
//! track is recorded and the worker moves on.

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::config::{
    AppConfig, AudioQuality, DEFAULT_MAX_CONCURRENT_DOWNLOADS, MAX_CONCURRENT_DOWNLOADS,
    MIN_CONCURRENT_DOWNLOADS,
};
use crate::error::{Error, Result, TransportError, ValidationError};
use crate::manifest::{track_destination, write_manifest};
use crate::model::{DownloadStatus, Playlist, SyncStatus, Track, completed_size};
use crate::store::StateStore;
use crate::transport::{TransferProgress, Transport};

/// Capacity of the event broadcast channel. Slow subscribers lag.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Settings the orchestrator needs from the application config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Root directory playlists are downloaded into.
    pub download_directory: PathBuf,
    /// Requested audio bitrate.
    pub audio_quality: AudioQuality,
    /// Worker pool size for playlist downloads.
    pub max_concurrent_downloads: usize,
}

impl DownloadSettings {
    /// Settings with default quality and concurrency.
    pub fn new(download_directory: impl Into<PathBuf>) -> Self {
        Self {
            download_directory: download_directory.into(),
            audio_quality: AudioQuality::default(),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
        }
    }

    /// Take download settings from the application config.
    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.download_directory.clone())
            .with_audio_quality(config.audio_quality)
            .with_max_concurrent_downloads(config.max_concurrent_downloads)
    }

    /// Set the audio quality.
    #[must_use]
    pub const fn with_audio_quality(mut self, quality: AudioQuality) -> Self {
        self.audio_quality = quality;
        self
    }

    /// Set the concurrency ceiling, clamped to the supported range.
    #[must_use]
    pub fn with_max_concurrent_downloads(mut self, max: usize) -> Self {
        self.max_concurrent_downloads =
            max.clamp(MIN_CONCURRENT_DOWNLOADS, MAX_CONCURRENT_DOWNLOADS);
        self
    }
}

/// Observable download lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum DownloadEvent {
    /// A track entered `downloading`.
    Started {
        /// Track id.
        track_id: String,
    },
    /// Bytes arrived for a track.
    Progress {
        /// Track id.
        track_id: String,
        /// Fraction complete (0.0 - 1.0).
        progress: f64,
        /// Bytes written so far.
        bytes_written: u64,
        /// Total expected bytes, 0 if unknown.
        bytes_expected: u64,
    },
    /// A track finished downloading.
    Completed {
        /// Track id.
        track_id: String,
        /// Local audio file.
        path: PathBuf,
        /// Final size in bytes.
        file_size: u64,
    },
    /// A track download failed.
    Failed {
        /// Track id.
        track_id: String,
        /// Error message.
        error: String,
    },
    /// A track download was cancelled and reset to pending.
    Cancelled {
        /// Track id.
        track_id: String,
    },
    /// Every worker of a playlist download drained the queue.
    PlaylistFinished {
        /// Playlist id.
        playlist_id: String,
        /// Tracks completed during this run.
        completed: usize,
        /// Tracks that failed during this run.
        failed: usize,
    },
}

/// Outcome of [`DownloadOrchestrator::download_playlist`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaylistDownloadReport {
    /// Playlist id.
    pub playlist_id: String,
    /// Tracks completed during this run.
    pub completed: Vec<String>,
    /// Tracks that failed, with the error message.
    pub failed: Vec<(String, String)>,
    /// Tracks not transferred: already completed, or in flight elsewhere.
    pub skipped: Vec<String>,
    /// Manifest location, if it was written.
    pub manifest_path: Option<PathBuf>,
    /// Why the manifest could not be written.
    pub manifest_error: Option<String>,
}

impl PlaylistDownloadReport {
    /// Whether every queued track completed and the manifest was written.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.manifest_error.is_none()
    }
}

/// Result of a finished transfer.
struct Transferred {
    path: PathBuf,
    last: TransferProgress,
}

/// Drives track and playlist downloads.
pub struct DownloadOrchestrator {
    store: Arc<dyn StateStore>,
    transport: Arc<dyn Transport>,
    settings: DownloadSettings,
    /// In-flight track ids and their cancel flags.
    active: Mutex<HashMap<String, Arc<AtomicBool>>>,
    /// Serializes read-modify-write of records touched by concurrent workers.
    records: Mutex<()>,
    events: broadcast::Sender<DownloadEvent>,
}

impl DownloadOrchestrator {
    /// Create an orchestrator over the given store and transport.
    pub fn new(
        store: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
        settings: DownloadSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let max = settings.max_concurrent_downloads;
        Self {
            store,
            transport,
            settings: settings.with_max_concurrent_downloads(max),
            active: Mutex::new(HashMap::new()),
            records: Mutex::new(()),
            events,
        }
    }

    /// Current settings.
    pub const fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    /// Receive download events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.events.subscribe()
    }

    /// Ids of tracks with a transfer in flight, sorted.
    pub async fn active_downloads(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.lock().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Download one track.
    ///
    /// Returns `Ok(None)` without doing anything if the track already has
    /// a transfer in flight or is already completed. On failure the track is marked `error` and
    /// the error is returned; there is no automatic retry, calling this
    /// again on an errored track is the retry. A cancelled download
    /// returns an error for which [`Error::is_cancelled`] holds and leaves
    /// the track pending.
    pub async fn download_track(&self, track_id: &str) -> Result<Option<PathBuf>> {
        let cancelled = {
            let mut active = self.active.lock().await;
            if active.contains_key(track_id) {
                debug!("Track {} is already downloading, ignoring", track_id);
                return Ok(None);
            }
            let flag = Arc::new(AtomicBool::new(false));
            active.insert(track_id.to_string(), Arc::clone(&flag));
            flag
        };

        let result = self.run(track_id, &cancelled).await;
        self.active.lock().await.remove(track_id);
        result
    }

    /// Cancel the in-flight download of a track.
    ///
    /// The track goes back to `pending` with no progress and no file.
    /// Returns `false` if nothing was in flight.
    pub async fn cancel_download(&self, track_id: &str) -> Result<bool> {
        let flag = self.active.lock().await.get(track_id).cloned();
        let Some(flag) = flag else {
            debug!("No active download for {}, nothing to cancel", track_id);
            return Ok(false);
        };

        {
            let _records = self.records.lock().await;
            let Some(mut track) = self.store.get_track(track_id).await? else {
                return Ok(false);
            };
            if track.download_status != DownloadStatus::Downloading {
                debug!("{} is {}, too late to cancel", track_id, track.download_status);
                return Ok(false);
            }
            track.reset_to_pending();
            self.store.upsert_track(track).await?;
            flag.store(true, Ordering::SeqCst);
        }

        self.transport.cancel(track_id).await;
        info!("Cancelled download of {}", track_id);
        self.emit(DownloadEvent::Cancelled {
            track_id: track_id.to_string(),
        });
        Ok(true)
    }

    /// Pause the in-flight transfer of a track. The track stays
    /// `downloading`. Returns `false` if nothing was in flight.
    pub async fn pause_download(&self, track_id: &str) -> bool {
        if !self.active.lock().await.contains_key(track_id) {
            return false;
        }
        self.transport.pause(track_id).await;
        info!("Paused download of {}", track_id);
        true
    }

    /// Resume a paused transfer. Returns `false` if nothing was in flight.
    pub async fn resume_download(&self, track_id: &str) -> bool {
        if !self.active.lock().await.contains_key(track_id) {
            return false;
        }
        self.transport.resume(track_id).await;
        info!("Resumed download of {}", track_id);
        true
    }

    /// Download every track of a playlist that is not completed yet.
    ///
    /// Individual track failures are collected in the report rather than
    /// returned. The manifest is regenerated from completed tracks
    /// afterwards and the playlist ends up `completed` either way.
    pub async fn download_playlist(&self, playlist_id: &str) -> Result<PlaylistDownloadReport> {
        let tracks = self.store.tracks_for_playlist(playlist_id).await?;
        self.update_playlist(playlist_id, |p| p.sync_status = SyncStatus::Downloading)
            .await?;

        let mut report = PlaylistDownloadReport {
            playlist_id: playlist_id.to_string(),
            ..PlaylistDownloadReport::default()
        };

        let mut queue = VecDeque::new();
        for track in tracks {
            if track.is_completed() {
                report.skipped.push(track.id);
            } else {
                queue.push_back(track.id);
            }
        }

        let workers = self.settings.max_concurrent_downloads.min(queue.len());
        info!(
            "Downloading {} track(s) of {} with {} worker(s)",
            queue.len(),
            playlist_id,
            workers
        );

        let queue = Mutex::new(queue);
        let outcomes = join_all((0..workers).map(|worker| self.worker(worker, &queue))).await;

        for (track_id, outcome) in outcomes.into_iter().flatten() {
            match outcome {
                Ok(Some(_)) => report.completed.push(track_id),
                Ok(None) => report.skipped.push(track_id),
                Err(e) => report.failed.push((track_id, e.to_string())),
            }
        }

        let playlist = self.find_playlist(playlist_id).await?;
        let tracks = self.store.tracks_for_playlist(playlist_id).await?;
        match write_manifest(&self.settings.download_directory, &playlist, &tracks).await {
            Ok(path) => report.manifest_path = Some(path),
            Err(e) => {
                error!("Failed to write manifest for {}: {}", playlist_id, e);
                report.manifest_error = Some(e.to_string());
            }
        }

        self.update_playlist(playlist_id, |p| {
            p.total_size = completed_size(&tracks);
            p.sync_status = SyncStatus::Completed;
        })
        .await?;

        info!(
            "Playlist {} finished: {} completed, {} failed, {} skipped",
            playlist_id,
            report.completed.len(),
            report.failed.len(),
            report.skipped.len()
        );
        self.emit(DownloadEvent::PlaylistFinished {
            playlist_id: playlist_id.to_string(),
            completed: report.completed.len(),
            failed: report.failed.len(),
        });
        Ok(report)
    }

    async fn worker(
        &self,
        worker: usize,
        queue: &Mutex<VecDeque<String>>,
    ) -> Vec<(String, Result<Option<PathBuf>>)> {
        let mut outcomes = Vec::new();
        loop {
            let next = queue.lock().await.pop_front();
            let Some(track_id) = next else {
                break;
            };

            debug!("Worker {} picked {}", worker, track_id);
            let outcome = self.download_track(&track_id).await;
            if let Err(e) = &outcome {
                warn!("Worker {}: {} failed: {}", worker, track_id, e);
            }
            outcomes.push((track_id, outcome));
        }
        debug!("Worker {} drained", worker);
        outcomes
    }

    async fn run(&self, track_id: &str, cancelled: &AtomicBool) -> Result<Option<PathBuf>> {
        let (playlist, track) = {
            let _records = self.records.lock().await;
            let mut track = self
                .store
                .get_track(track_id)
                .await?
                .ok_or_else(|| Error::track_not_found(track_id))?;

            // We hold the active slot, so a `downloading` record is left over
            // from an interrupted run and may be restarted.
            let status = track.download_status;
            if status != DownloadStatus::Downloading
                && !status.can_transition_to(DownloadStatus::Downloading)
            {
                debug!("{} is {}, nothing to download", track_id, status);
                return Ok(None);
            }
            let playlist = self.find_playlist(&track.playlist_id).await?;

            track.download_status = DownloadStatus::Downloading;
            track.download_progress = 0.0;
            track.local_path = None;
            self.store.upsert_track(track.clone()).await?;
            (playlist, track)
        };

        info!("Downloading {} ({})", track.id, track.display_label());
        self.emit(DownloadEvent::Started {
            track_id: track.id.clone(),
        });

        let outcome = self.transfer(&playlist, &track, cancelled).await;
        if cancelled.load(Ordering::SeqCst) {
            return Err(TransportError::Aborted(track.id).into());
        }

        match outcome {
            Ok(done) => self.complete(&track.id, done, cancelled).await.map(Some),
            Err(e) => {
                self.fail(&track.id, &e, cancelled).await;
                Err(e)
            }
        }
    }

    async fn transfer(
        &self,
        playlist: &Playlist,
        track: &Track,
        cancelled: &AtomicBool,
    ) -> Result<Transferred> {
        let url = self
            .transport
            .resolve_url(&track.remote_id, self.settings.audio_quality)
            .await?;

        if cancelled.load(Ordering::SeqCst) {
            return Err(TransportError::Aborted(track.id.clone()).into());
        }

        let destination = track_destination(&self.settings.download_directory, playlist, track);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let download = self.transport.download(&track.id, &url, &destination, tx);
        tokio::pin!(download);

        let mut last = TransferProgress::default();
        let result = loop {
            tokio::select! {
                biased;
                Some(tick) = rx.recv() => {
                    self.record_progress(&track.id, tick, cancelled).await;
                    last = tick;
                }
                result = &mut download => break result,
            }
        };
        while let Ok(tick) = rx.try_recv() {
            self.record_progress(&track.id, tick, cancelled).await;
            last = tick;
        }

        let path = result?;
        Ok(Transferred { path, last })
    }

    async fn record_progress(
        &self,
        track_id: &str,
        tick: TransferProgress,
        cancelled: &AtomicBool,
    ) {
        let _records = self.records.lock().await;
        if cancelled.load(Ordering::SeqCst) {
            return;
        }

        let mut track = match self.store.get_track(track_id).await {
            Ok(Some(track)) if track.download_status == DownloadStatus::Downloading => track,
            Ok(_) => return,
            Err(e) => {
                warn!("Could not load {} to record progress: {}", track_id, e);
                return;
            }
        };

        track.download_progress = tick.fraction();
        track.file_size = if tick.bytes_expected > 0 {
            tick.bytes_expected
        } else {
            tick.bytes_written
        };
        if let Err(e) = self.store.upsert_track(track).await {
            warn!("Could not record progress of {}: {}", track_id, e);
            return;
        }

        self.emit(DownloadEvent::Progress {
            track_id: track_id.to_string(),
            progress: tick.fraction(),
            bytes_written: tick.bytes_written,
            bytes_expected: tick.bytes_expected,
        });
    }

    async fn complete(
        &self,
        track_id: &str,
        done: Transferred,
        cancelled: &AtomicBool,
    ) -> Result<PathBuf> {
        let file_size = if done.last.bytes_written > 0 {
            done.last.bytes_written
        } else {
            tokio::fs::metadata(&done.path)
                .await
                .map(|m| m.len())
                .unwrap_or(0)
        };

        let records = self.records.lock().await;
        if cancelled.load(Ordering::SeqCst) {
            return Err(TransportError::Aborted(track_id.to_string()).into());
        }

        let mut track = self
            .store
            .get_track(track_id)
            .await?
            .ok_or_else(|| Error::track_not_found(track_id))?;

        if file_size == 0 {
            track.download_status = DownloadStatus::Error;
            self.store.upsert_track(track).await?;
            drop(records);

            let err = Error::from(ValidationError::EmptyDownload(track_id.to_string()));
            error!("{}", err);
            self.emit(DownloadEvent::Failed {
                track_id: track_id.to_string(),
                error: err.to_string(),
            });
            return Err(err);
        }

        track.download_status = DownloadStatus::Completed;
        track.download_progress = 1.0;
        track.file_size = file_size;
        track.local_path = Some(done.path.clone());
        let playlist_id = track.playlist_id.clone();
        self.store.upsert_track(track).await?;

        let tracks = self.store.tracks_for_playlist(&playlist_id).await?;
        if let Some(mut playlist) = self.store.get_playlist(&playlist_id).await? {
            playlist.total_size = completed_size(&tracks);
            self.store.upsert_playlist(playlist).await?;
        }
        drop(records);

        info!(
            "Completed {} ({} bytes) -> {}",
            track_id,
            file_size,
            done.path.display()
        );
        self.emit(DownloadEvent::Completed {
            track_id: track_id.to_string(),
            path: done.path.clone(),
            file_size,
        });
        Ok(done.path)
    }

    async fn fail(&self, track_id: &str, err: &Error, cancelled: &AtomicBool) {
        error!("Download of {} failed: {}", track_id, err);
        {
            let _records = self.records.lock().await;
            if cancelled.load(Ordering::SeqCst) {
                return;
            }
            match self.store.get_track(track_id).await {
                Ok(Some(mut track)) => {
                    track.download_status = DownloadStatus::Error;
                    if let Err(e) = self.store.upsert_track(track).await {
                        warn!("Could not mark {} as failed: {}", track_id, e);
                    }
                }
                Ok(None) => {}
                Err(e) => warn!("Could not mark {} as failed: {}", track_id, e),
            }
        }
        self.emit(DownloadEvent::Failed {
            track_id: track_id.to_string(),
            error: err.to_string(),
        });
    }

    async fn find_playlist(&self, playlist_id: &str) -> Result<Playlist> {
        self.store
            .get_playlist(playlist_id)
            .await?
            .ok_or_else(|| Error::playlist_not_found(playlist_id))
    }

    async fn update_playlist<F>(&self, playlist_id: &str, change: F) -> Result<()>
    where
        F: FnOnce(&mut Playlist) + Send,
    {
        let _records = self.records.lock().await;
        let mut playlist = self.find_playlist(playlist_id).await?;
        change(&mut playlist);
        self.store.upsert_playlist(playlist).await
    }

    fn emit(&self, event: DownloadEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl std::fmt::Debug for DownloadOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadOrchestrator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
