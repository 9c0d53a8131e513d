//! Error types for Tubesync core operations.
//!
//! Every domain gets its own typed error enum; the crate-wide [`Error`]
//! wraps them so callers can either match precisely or branch on
//! [`Error::kind`].

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures while looking up playlist metadata on the remote backend.
#[derive(Debug, Error)]
pub enum MetadataFetchError {
    /// The request could not be sent or the connection failed.
    #[error("Network error while fetching {resource}: {reason}")]
    Network {
        /// What was being fetched.
        resource: String,
        /// Underlying failure.
        reason: String,
    },

    /// The backend answered with a non-success status.
    #[error("Backend returned HTTP {status} for {resource}")]
    Status {
        /// What was being fetched.
        resource: String,
        /// HTTP status code.
        status: u16,
    },

    /// The response body did not have the expected shape.
    #[error("Malformed response for {resource}: {reason}")]
    Malformed {
        /// What was being fetched.
        resource: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The playlist does not exist or returned no entries.
    #[error("Playlist not found or empty: {0}")]
    NotFound(String),
}

/// Failures while resolving or moving audio bytes.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The download URL could not be resolved for a remote video.
    #[error("Could not resolve download URL for {remote_id}: {reason}")]
    ResolveFailed {
        /// Remote video identifier.
        remote_id: String,
        /// Underlying failure.
        reason: String,
    },

    /// Network failure during the transfer.
    #[error("Network error downloading {track_id}: {reason}")]
    Network {
        /// Track being downloaded.
        track_id: String,
        /// Underlying failure.
        reason: String,
    },

    /// Writing the destination file failed.
    #[error("Disk error writing {path}: {reason}")]
    Disk {
        /// Destination path.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// The transfer was aborted through a cancel request.
    #[error("Download aborted: {0}")]
    Aborted(String),
}

/// Local filesystem failures outside of a transfer.
#[derive(Debug, Error)]
pub enum FileSystemError {
    /// A file could not be deleted.
    #[error("Failed to delete {path}: {reason}")]
    DeleteFailed {
        /// Path of the file.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// A file could not be written.
    #[error("Failed to write {path}: {reason}")]
    WriteFailed {
        /// Path of the file.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// A file could not be read.
    #[error("Failed to read {path}: {reason}")]
    ReadFailed {
        /// Path of the file.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// A directory could not be created.
    #[error("Failed to create directory {path}: {reason}")]
    CreateDirFailed {
        /// Path of the directory.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },
}

/// Rejected input or violated domain invariant.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// The string is neither a playlist URL nor a playlist id.
    #[error("Invalid playlist URL or ID: {0}")]
    InvalidPlaylistId(String),

    /// The playlist is already in the local store.
    #[error("Playlist already exists: {0}")]
    DuplicatePlaylist(String),

    /// The playlist is not in the local store.
    #[error("Playlist not found: {0}")]
    PlaylistNotFound(String),

    /// The track is not in the local store.
    #[error("Track not found: {0}")]
    TrackNotFound(String),

    /// A transfer finished without producing any bytes.
    #[error("Download of {0} completed with zero bytes")]
    EmptyDownload(String),
}

/// Local state store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Loading persisted state failed.
    #[error("Failed to load store from {path}: {reason}")]
    LoadFailed {
        /// Store file.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },

    /// Persisting state failed.
    #[error("Failed to persist store to {path}: {reason}")]
    PersistFailed {
        /// Store file.
        path: PathBuf,
        /// Underlying failure.
        reason: String,
    },
}

/// Errors that can occur in Tubesync core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote metadata lookup failed.
    #[error(transparent)]
    Metadata(#[from] MetadataFetchError),

    /// Byte transfer failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Local file operation failed.
    #[error(transparent)]
    FileSystem(#[from] FileSystemError),

    /// Input or invariant check failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Persistence failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// IO error wrapper.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`MetadataFetchError`].
    Metadata,
    /// See [`TransportError`].
    Transport,
    /// See [`FileSystemError`].
    FileSystem,
    /// See [`ValidationError`].
    Validation,
    /// See [`StoreError`].
    Store,
    /// Invalid settings.
    Configuration,
    /// Raw IO failure.
    Io,
    /// JSON (de)serialization failure.
    Serialization,
}

impl Error {
    /// Classify this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Metadata(_) => ErrorKind::Metadata,
            Self::Transport(_) => ErrorKind::Transport,
            Self::FileSystem(_) => ErrorKind::FileSystem,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Store(_) => ErrorKind::Store,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Io(_) => ErrorKind::Io,
            Self::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Whether re-invoking the failed operation may succeed.
    ///
    /// Only transport failures qualify, and not user cancellations.
    /// Nothing in this crate retries on its own.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(e) if !matches!(e, TransportError::Aborted(_)))
    }

    /// Whether this error is the result of a cancel request.
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Transport(TransportError::Aborted(_)))
    }

    pub(crate) fn playlist_not_found(id: impl Into<String>) -> Self {
        Self::Validation(ValidationError::PlaylistNotFound(id.into()))
    }

    pub(crate) fn track_not_found(id: impl Into<String>) -> Self {
        Self::Validation(ValidationError::TrackNotFound(id.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_is_transparent() {
        let err = Error::from(ValidationError::DuplicatePlaylist("PL123".to_string()));
        assert_eq!(err.to_string(), "Playlist already exists: PL123");
    }

    #[test]
    fn test_file_system_error_display() {
        let err = Error::FileSystem(FileSystemError::DeleteFailed {
            path: PathBuf::from("/music/a.mp3"),
            reason: "permission denied".to_string(),
        });
        assert!(err.to_string().contains("/music/a.mp3"));
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_kind_classification() {
        let err = Error::from(MetadataFetchError::NotFound("PLx".to_string()));
        assert_eq!(err.kind(), ErrorKind::Metadata);

        let err = Error::Configuration("bad".to_string());
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn test_retryable_excludes_cancellation() {
        let network = Error::from(TransportError::Network {
            track_id: "t".to_string(),
            reason: "reset".to_string(),
        });
        assert!(network.is_retryable());
        assert!(!network.is_cancelled());

        let aborted = Error::from(TransportError::Aborted("t".to_string()));
        assert!(!aborted.is_retryable());
        assert!(aborted.is_cancelled());

        let validation = Error::playlist_not_found("PLx");
        assert!(!validation.is_retryable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
