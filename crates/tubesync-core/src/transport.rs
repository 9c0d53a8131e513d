//! Moving audio bytes from a resolved URL to local storage.
//!
//! A [`Transport`] resolves a download URL for a remote video, streams it
//! to a destination file while reporting [`TransferProgress`] through a
//! channel, and honours per-track pause/resume/cancel requests.
//! [`HttpTransport`] is the production implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, info, warn};

use crate::config::{AppConfig, AudioQuality};
use crate::error::{Error, FileSystemError, Result, TransportError};

const DOWNLOAD_INFO_ENDPOINT: &str = "/api/download-info";

/// Byte counters reported after every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransferProgress {
    /// Bytes written so far.
    pub bytes_written: u64,
    /// Total expected bytes, 0 when the server did not say.
    pub bytes_expected: u64,
}

impl TransferProgress {
    /// Fraction complete in `[0.0, 1.0]`; 0 while the total is unknown.
    pub fn fraction(&self) -> f64 {
        if self.bytes_expected == 0 {
            return 0.0;
        }
        (self.bytes_written as f64 / self.bytes_expected as f64).clamp(0.0, 1.0)
    }
}

/// Channel a transport reports progress on. Delivery order is the order
/// chunks were written.
pub type ProgressSender = mpsc::UnboundedSender<TransferProgress>;

/// Moves bytes for one track at a time per track id.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolve the URL audio for `remote_id` can be fetched from.
    async fn resolve_url(
        &self,
        remote_id: &str,
        quality: AudioQuality,
    ) -> std::result::Result<String, TransportError>;

    /// Stream `url` into `destination` and return the final file location.
    async fn download(
        &self,
        track_id: &str,
        url: &str,
        destination: &Path,
        progress: ProgressSender,
    ) -> std::result::Result<PathBuf, TransportError>;

    /// Suspend the transfer of `track_id`; no-op if none is active.
    async fn pause(&self, track_id: &str);

    /// Continue a paused transfer; no-op if none is active.
    async fn resume(&self, track_id: &str);

    /// Abort the transfer of `track_id`; no-op if none is active.
    async fn cancel(&self, track_id: &str);

    /// Delete a local file; succeeds if it is already gone.
    async fn delete_file(&self, path: &Path) -> std::result::Result<(), FileSystemError>;
}

/// Cooperative pause/cancel switch for one transfer.
///
/// The transfer loop calls [`TransferControl::checkpoint`] between chunks.
#[derive(Debug, Default)]
pub struct TransferControl {
    cancelled: AtomicBool,
    paused: AtomicBool,
    wake: Notify,
}

impl TransferControl {
    /// Request cancellation; also releases a paused transfer.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// Request a pause at the next checkpoint.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Release a paused transfer.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.wake.notify_waiters();
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check if the transfer is paused.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Wait while paused. Returns `false` once cancelled.
    pub async fn checkpoint(&self) -> bool {
        loop {
            if self.is_cancelled() {
                return false;
            }
            if !self.is_paused() {
                return true;
            }

            let notified = self.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_cancelled() || !self.is_paused() {
                continue;
            }
            notified.await;
        }
    }
}

/// Registry of in-flight transfers keyed by track id.
#[derive(Debug, Default)]
pub struct TransferControls {
    active: Mutex<HashMap<String, Arc<TransferControl>>>,
}

impl TransferControls {
    /// Register a fresh control for `track_id`, replacing any stale one.
    pub async fn register(&self, track_id: &str) -> Arc<TransferControl> {
        let control = Arc::new(TransferControl::default());
        self.active
            .lock()
            .await
            .insert(track_id.to_string(), Arc::clone(&control));
        control
    }

    /// Forget the control for `track_id`.
    pub async fn unregister(&self, track_id: &str) {
        self.active.lock().await.remove(track_id);
    }

    /// Control of the active transfer for `track_id`.
    pub async fn get(&self, track_id: &str) -> Option<Arc<TransferControl>> {
        self.active.lock().await.get(track_id).cloned()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadInfo {
    download_url: String,
}

/// Transport backed by the resolution backend and plain HTTP downloads.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
    controls: TransferControls,
}

impl HttpTransport {
    /// Create a transport for the given backend.
    ///
    /// `request_timeout` bounds connection setup and URL resolution; the
    /// body of a transfer may take as long as it needs.
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            request_timeout,
            controls: TransferControls::default(),
        })
    }

    /// Create a transport from application settings.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.backend_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    async fn stream_to_file(
        &self,
        track_id: &str,
        url: &str,
        destination: &Path,
        control: &TransferControl,
        progress: &ProgressSender,
    ) -> std::result::Result<PathBuf, TransportError> {
        let disk_error = |e: std::io::Error| TransportError::Disk {
            path: destination.to_path_buf(),
            reason: e.to_string(),
        };
        let network_error = |e: reqwest::Error| TransportError::Network {
            track_id: track_id.to_string(),
            reason: e.to_string(),
        };

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(disk_error)?;
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(network_error)?;

        let bytes_expected = response.content_length().unwrap_or(0);
        debug!(
            "Streaming {} ({} bytes expected) -> {}",
            track_id,
            bytes_expected,
            destination.display()
        );

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(disk_error)?;
        let mut bytes_written = 0u64;
        let _ = progress.send(TransferProgress {
            bytes_written,
            bytes_expected,
        });

        loop {
            if !control.checkpoint().await {
                info!("Transfer of {} aborted after {} bytes", track_id, bytes_written);
                return Err(TransportError::Aborted(track_id.to_string()));
            }

            let Some(chunk) = response.chunk().await.map_err(network_error)? else {
                break;
            };

            file.write_all(&chunk).await.map_err(disk_error)?;
            bytes_written += chunk.len() as u64;
            let _ = progress.send(TransferProgress {
                bytes_written,
                bytes_expected,
            });
        }

        file.flush().await.map_err(disk_error)?;

        info!(
            "Downloaded {} bytes for {} -> {}",
            bytes_written,
            track_id,
            destination.display()
        );
        Ok(destination.to_path_buf())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn resolve_url(
        &self,
        remote_id: &str,
        quality: AudioQuality,
    ) -> std::result::Result<String, TransportError> {
        let resolve_error = |reason: String| TransportError::ResolveFailed {
            remote_id: remote_id.to_string(),
            reason,
        };

        let quality = quality.kbps().to_string();
        let response = self
            .client
            .get(format!("{}{DOWNLOAD_INFO_ENDPOINT}", self.base_url))
            .query(&[("videoId", remote_id), ("quality", quality.as_str())])
            .timeout(self.request_timeout)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| resolve_error(e.to_string()))?;

        let info: DownloadInfo = response
            .json()
            .await
            .map_err(|e| resolve_error(e.to_string()))?;

        if info.download_url.trim().is_empty() {
            return Err(resolve_error("backend returned an empty URL".to_string()));
        }
        Ok(info.download_url)
    }

    async fn download(
        &self,
        track_id: &str,
        url: &str,
        destination: &Path,
        progress: ProgressSender,
    ) -> std::result::Result<PathBuf, TransportError> {
        let control = self.controls.register(track_id).await;
        let result = self
            .stream_to_file(track_id, url, destination, &control, &progress)
            .await;
        self.controls.unregister(track_id).await;
        result
    }

    async fn pause(&self, track_id: &str) {
        if let Some(control) = self.controls.get(track_id).await {
            debug!("Pausing transfer of {}", track_id);
            control.pause();
        }
    }

    async fn resume(&self, track_id: &str) {
        if let Some(control) = self.controls.get(track_id).await {
            debug!("Resuming transfer of {}", track_id);
            control.resume();
        }
    }

    async fn cancel(&self, track_id: &str) {
        if let Some(control) = self.controls.get(track_id).await {
            debug!("Cancelling transfer of {}", track_id);
            control.cancel();
        }
    }

    async fn delete_file(&self, path: &Path) -> std::result::Result<(), FileSystemError> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                debug!("Deleted {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("Failed to delete {}: {}", path.display(), e);
                Err(FileSystemError::DeleteFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
