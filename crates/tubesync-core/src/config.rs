//! Application configuration management.
//!
//! Handles loading, saving, and validating settings: where audio files
//! and local state live, download quality, the concurrency ceiling of the
//! download worker pool, and how to reach the metadata backend.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, FileSystemError, Result};

/// Default ceiling on simultaneous track downloads.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 3;

/// Minimum allowed concurrent downloads.
pub const MIN_CONCURRENT_DOWNLOADS: usize = 1;

/// Maximum allowed concurrent downloads.
pub const MAX_CONCURRENT_DOWNLOADS: usize = 8;

/// Default metadata/resolution backend.
pub const DEFAULT_BACKEND_URL: &str = "https://yt-music-manager-backend.onrender.com";

/// Default timeout for backend and transfer requests.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Auto-sync intervals offered to the user, in hours.
pub const AUTO_SYNC_INTERVALS_HOURS: [u32; 5] = [1, 3, 6, 12, 24];

/// Audio bitrate requested from the resolution backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "u32", into = "u32")]
pub enum AudioQuality {
    /// 128 kbps.
    Kbps128,
    /// 192 kbps (default).
    #[default]
    Kbps192,
    /// 256 kbps.
    Kbps256,
    /// 320 kbps.
    Kbps320,
}

impl AudioQuality {
    /// Bitrate in kbps.
    pub const fn kbps(self) -> u32 {
        match self {
            Self::Kbps128 => 128,
            Self::Kbps192 => 192,
            Self::Kbps256 => 256,
            Self::Kbps320 => 320,
        }
    }
}

impl TryFrom<u32> for AudioQuality {
    type Error = String;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        match value {
            128 => Ok(Self::Kbps128),
            192 => Ok(Self::Kbps192),
            256 => Ok(Self::Kbps256),
            320 => Ok(Self::Kbps320),
            other => Err(format!("unsupported audio quality: {other} kbps")),
        }
    }
}

impl From<AudioQuality> for u32 {
    fn from(quality: AudioQuality) -> Self {
        quality.kbps()
    }
}

impl std::fmt::Display for AudioQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} kbps", self.kbps())
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Directory where downloaded audio and manifests are stored.
    #[serde(default = "default_download_directory")]
    pub download_directory: PathBuf,
    /// Directory holding persisted playlist and track records.
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
    /// Requested audio bitrate.
    #[serde(default)]
    pub audio_quality: AudioQuality,
    /// Worker pool size for playlist downloads.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_downloads: usize,
    /// Base URL of the metadata and resolution backend.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Timeout applied to backend and transfer requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Whether playlists are re-synced in the background.
    #[serde(default = "default_true")]
    pub auto_sync_enabled: bool,
    /// Hours between background syncs.
    #[serde(default = "default_auto_sync_interval")]
    pub auto_sync_interval_hours: u32,
    /// Whether files of removed tracks are cleaned up automatically.
    #[serde(default)]
    pub storage_cleanup_enabled: bool,
}

const fn default_true() -> bool {
    true
}

const fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_DOWNLOADS
}

const fn default_request_timeout() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_auto_sync_interval() -> u32 {
    6
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            download_directory: default_download_directory(),
            data_directory: default_data_directory(),
            audio_quality: AudioQuality::default(),
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
            backend_url: default_backend_url(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            auto_sync_enabled: true,
            auto_sync_interval_hours: default_auto_sync_interval(),
            storage_cleanup_enabled: false,
        }
    }
}

impl AppConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(content: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(content)
            .map_err(|e| Error::Configuration(format!("Invalid settings JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Pretty JSON form written to disk.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load from the platform config file, writing defaults there on first
    /// run.
    pub fn load() -> Result<Self> {
        Self::load_or_create(&config_file_path())
    }

    /// Load from `path`, or write and return the defaults when the file
    /// does not exist yet.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load_from(path);
        }
        debug!("No settings at {}, writing defaults", path.display());
        let config = Self::default();
        config.save_to(path)?;
        Ok(config)
    }

    /// Load and validate configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            Error::FileSystem(FileSystemError::ReadFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        })?;
        let config = Self::from_json(&content)?;
        info!(
            "Settings loaded from {} (downloads in {}, {} workers)",
            path.display(),
            config.download_directory.display(),
            config.max_concurrent_downloads
        );
        Ok(config)
    }

    /// Write configuration to a specific file, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(dir) = parent {
            fs::create_dir_all(dir).map_err(|e| {
                Error::FileSystem(FileSystemError::CreateDirFailed {
                    path: dir.to_path_buf(),
                    reason: e.to_string(),
                })
            })?;
        }
        fs::write(path, self.to_json()?).map_err(|e| {
            Error::FileSystem(FileSystemError::WriteFailed {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        })?;
        debug!("Settings written to {}", path.display());
        Ok(())
    }

    /// Clamp the concurrency ceiling and reject unusable settings.
    pub fn validate(&mut self) -> Result<()> {
        let requested = self.max_concurrent_downloads;
        self.max_concurrent_downloads =
            requested.clamp(MIN_CONCURRENT_DOWNLOADS, MAX_CONCURRENT_DOWNLOADS);
        if requested != self.max_concurrent_downloads {
            warn!(
                "Worker count {requested} outside {MIN_CONCURRENT_DOWNLOADS}..={MAX_CONCURRENT_DOWNLOADS}, using {}",
                self.max_concurrent_downloads
            );
        }

        let problem = if !self.download_directory.is_absolute() {
            Some(format!(
                "Download directory must be an absolute path: {}",
                self.download_directory.display()
            ))
        } else if !AUTO_SYNC_INTERVALS_HOURS.contains(&self.auto_sync_interval_hours) {
            Some(format!(
                "Unsupported auto-sync interval: {} hours",
                self.auto_sync_interval_hours
            ))
        } else if self.backend_url.trim().is_empty() {
            Some("Backend URL must not be empty".to_string())
        } else {
            None
        };

        problem.map_or(Ok(()), |msg| Err(Error::Configuration(msg)))
    }

    /// Location of the platform settings file.
    pub fn settings_path() -> PathBuf {
        config_file_path()
    }
}

/// Get the default directory for downloaded audio.
pub fn default_download_directory() -> PathBuf {
    dirs::audio_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tubesync")
}

/// Get the default directory for persisted state.
pub fn default_data_directory() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tubesync")
        .join("state")
}

fn config_file_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tubesync")
        .join("settings.json")
}

/// Holds the active settings and writes every change back to one file.
#[derive(Debug)]
pub struct ConfigManager {
    path: PathBuf,
    current: AppConfig,
}

impl ConfigManager {
    /// Open the platform settings file.
    pub fn new() -> Result<Self> {
        Self::with_path(config_file_path())
    }

    /// Open `path`, creating it with defaults when missing.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let current = AppConfig::load_or_create(&path)?;
        Ok(Self { path, current })
    }

    /// Active settings.
    pub const fn config(&self) -> &AppConfig {
        &self.current
    }

    /// File backing this manager.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate, persist, then swap in `config`.
    pub fn update(&mut self, mut config: AppConfig) -> Result<()> {
        config.validate()?;
        config.save_to(&self.path)?;
        self.current = config;
        Ok(())
    }

    /// Go back to defaults.
    pub fn reset(&mut self) -> Result<()> {
        self.update(AppConfig::default())
    }
}
