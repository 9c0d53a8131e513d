//! Tubesync Core Library
//!
//! This crate keeps local copies of remote video playlists as audio files:
//! - Playlist management (add, remove, storage totals)
//! - Sync reconciliation between the remote listing and local tracks
//! - Download orchestration with a bounded worker pool, cancellation and
//!   per-track progress
//! - M3U manifest generation for completed tracks
//!
//! Collaborators sit behind traits so hosts can swap them:
//! [`MetadataGateway`] for playlist metadata, [`Transport`] for moving
//! bytes and [`StateStore`] for persistence.

pub mod config;
pub mod download;
pub mod error;
pub mod format;
pub mod gateway;
pub mod logging;
pub mod manifest;
pub mod model;
pub mod playlist;
pub mod store;
pub mod sync;
pub mod transport;

#[cfg(test)]
mod testing;

pub use config::{AppConfig, AudioQuality, ConfigManager};
pub use download::{DownloadEvent, DownloadOrchestrator, DownloadSettings, PlaylistDownloadReport};
pub use error::{Error, ErrorKind, Result};
pub use gateway::{HttpMetadataGateway, MetadataGateway};
pub use logging::{ConsoleFormat, FileLogging, LoggingConfig, LoggingGuard};
pub use model::{DownloadStatus, Playlist, PlaylistInfo, SyncPreview, SyncStatus, Track, VideoInfo};
pub use playlist::PlaylistManager;
pub use store::{JsonStore, StateStore};
pub use sync::SyncReconciler;
pub use transport::{HttpTransport, TransferProgress, Transport};
