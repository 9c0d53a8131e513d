//! Playlist reconciliation.
//!
//! [`reconcile`] is the pure diff between a remote listing and the local
//! tracks of a playlist, keyed by remote video id. [`SyncReconciler`]
//! wraps it with a read-only preview and a committing sync.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::gateway::MetadataGateway;
use crate::model::{
    Playlist, SyncPreview, SyncStatus, Track, VideoInfo, completed_size, now_millis,
};
use crate::store::StateStore;
use crate::transport::Transport;

/// Diff a remote listing against the local tracks of `playlist_id`.
///
/// New videos keep remote order and are positioned after every existing
/// track; matched tracks are left alone. A remote id listed twice is
/// added once.
pub fn reconcile(playlist_id: &str, remote: &[VideoInfo], local: &[Track]) -> SyncPreview {
    let remote_ids: HashSet<&str> = remote.iter().map(|v| v.remote_id.as_str()).collect();
    let mut known: HashSet<&str> = local.iter().map(|t| t.remote_id.as_str()).collect();

    let tracks_to_add = remote
        .iter()
        .filter(|v| known.insert(v.remote_id.as_str()))
        .enumerate()
        .map(|(index, video)| Track::from_video(playlist_id, video, local.len() + index))
        .collect();

    let tracks_to_remove = local
        .iter()
        .filter(|t| !remote_ids.contains(t.remote_id.as_str()))
        .cloned()
        .collect();

    SyncPreview {
        tracks_to_add,
        tracks_to_remove,
        total_download_size: 0,
    }
}

/// Brings local playlist state in line with the remote listing.
pub struct SyncReconciler {
    store: Arc<dyn StateStore>,
    gateway: Arc<dyn MetadataGateway>,
    transport: Arc<dyn Transport>,
}

impl SyncReconciler {
    /// Create a reconciler over the given collaborators.
    pub fn new(
        store: Arc<dyn StateStore>,
        gateway: Arc<dyn MetadataGateway>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            store,
            gateway,
            transport,
        }
    }

    /// Preview or commit a sync.
    pub async fn sync_playlist(&self, playlist_id: &str, dry_run: bool) -> Result<SyncPreview> {
        if dry_run {
            self.preview(playlist_id).await
        } else {
            self.commit(playlist_id).await
        }
    }

    /// Compute what a sync would change. Never writes to the store.
    pub async fn preview(&self, playlist_id: &str) -> Result<SyncPreview> {
        let (_, diff, _) = self.diff(playlist_id).await?;
        debug!(
            "Sync preview for {}: +{} -{}",
            playlist_id,
            diff.tracks_to_add.len(),
            diff.tracks_to_remove.len()
        );
        Ok(diff)
    }

    /// Apply a sync and return the diff that was applied.
    ///
    /// The remote listing is fetched before any write, so a metadata
    /// failure leaves the store and the playlist's sync status untouched.
    /// Removals run one track at a time (file, then row) and stop at the
    /// first failure, which marks the playlist as errored; rows already
    /// removed stay removed.
    pub async fn commit(&self, playlist_id: &str) -> Result<SyncPreview> {
        let (mut playlist, diff, remote_count) = self.diff(playlist_id).await?;

        info!(
            "Syncing playlist '{}': adding {}, removing {}",
            playlist.name,
            diff.tracks_to_add.len(),
            diff.tracks_to_remove.len()
        );

        playlist.sync_status = SyncStatus::Syncing;
        self.store.upsert_playlist(playlist.clone()).await?;

        if let Err(e) = self.apply(playlist, &diff, remote_count).await {
            error!("Sync of {} failed: {}", playlist_id, e);
            self.mark_failed(playlist_id).await;
            return Err(e);
        }

        Ok(diff)
    }

    async fn diff(&self, playlist_id: &str) -> Result<(Playlist, SyncPreview, usize)> {
        let playlist = self
            .store
            .get_playlist(playlist_id)
            .await?
            .ok_or_else(|| Error::playlist_not_found(playlist_id))?;

        let remote = self.gateway.fetch_playlist_videos(playlist_id).await?;
        let local = self.store.tracks_for_playlist(playlist_id).await?;

        Ok((playlist, reconcile(playlist_id, &remote, &local), remote.len()))
    }

    async fn apply(
        &self,
        mut playlist: Playlist,
        diff: &SyncPreview,
        remote_count: usize,
    ) -> Result<()> {
        for track in &diff.tracks_to_remove {
            if let Some(path) = &track.local_path {
                self.transport.delete_file(path).await?;
            }
            self.store.remove_tracks(std::slice::from_ref(&track.id)).await?;
            debug!("Removed track {} from {}", track.id, playlist.id);
        }

        self.store.upsert_tracks(diff.tracks_to_add.clone()).await?;

        let tracks = self.store.tracks_for_playlist(&playlist.id).await?;
        playlist.track_count = remote_count;
        playlist.total_size = completed_size(&tracks);
        playlist.last_synced_at = Some(now_millis());
        playlist.sync_status = SyncStatus::Completed;
        let id = playlist.id.clone();
        self.store.upsert_playlist(playlist).await?;

        info!("Sync of {} committed", id);
        Ok(())
    }

    async fn mark_failed(&self, playlist_id: &str) {
        match self.store.get_playlist(playlist_id).await {
            Ok(Some(mut playlist)) => {
                playlist.sync_status = SyncStatus::Error;
                if let Err(e) = self.store.upsert_playlist(playlist).await {
                    warn!("Could not record sync failure for {}: {}", playlist_id, e);
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Could not record sync failure for {}: {}", playlist_id, e),
        }
    }
}

impl std::fmt::Debug for SyncReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncReconciler").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{FileSystemError, MetadataFetchError};
    use crate::gateway::MockMetadataGateway;
    use crate::model::DownloadStatus;
    use crate::store::{JsonStore, LIBRARY_FILE};
    use crate::testing::{FakeTransport, playlist_info, video, videos};
    use std::path::PathBuf;
    use tempfile::TempDir;

    const ID: &str = "PL1";

    fn local(remote_ids: &[&str]) -> Vec<Track> {
        remote_ids
            .iter()
            .enumerate()
            .map(|(position, id)| Track::from_video(ID, &video(id), position))
            .collect()
    }

    fn remote_ids(tracks: &[Track]) -> Vec<&str> {
        tracks.iter().map(|t| t.remote_id.as_str()).collect()
    }

    fn gateway_returning(remote: &'static [&'static str]) -> MockMetadataGateway {
        let mut gateway = MockMetadataGateway::new();
        gateway
            .expect_fetch_playlist_videos()
            .returning(move |_| Ok(videos(remote)));
        gateway
    }

    async fn seeded_store(store: &JsonStore, tracks: Vec<Track>) {
        let mut playlist = Playlist::from_info(&playlist_info(ID, "Mix"), tracks.len());
        playlist.sync_status = SyncStatus::Completed;
        store.upsert_playlist(playlist).await.expect("playlist");
        store.upsert_tracks(tracks).await.expect("tracks");
    }

    fn reconciler(
        store: Arc<JsonStore>,
        gateway: MockMetadataGateway,
        transport: Arc<FakeTransport>,
    ) -> SyncReconciler {
        SyncReconciler::new(store, Arc::new(gateway), transport)
    }

    #[test]
    fn test_reconcile_adds_new_remote_tracks() {
        let diff = reconcile(ID, &videos(&["a", "b", "c"]), &local(&["a", "b"]));

        assert_eq!(remote_ids(&diff.tracks_to_add), ["c"]);
        assert_eq!(diff.tracks_to_add[0].position, 2);
        assert_eq!(diff.tracks_to_add[0].download_status, DownloadStatus::Pending);
        assert!(diff.tracks_to_remove.is_empty());
        assert_eq!(diff.total_download_size, 0);
    }

    #[test]
    fn test_reconcile_removes_vanished_tracks() {
        let diff = reconcile(ID, &videos(&["a", "c"]), &local(&["a", "b", "c"]));

        assert!(diff.tracks_to_add.is_empty());
        assert_eq!(remote_ids(&diff.tracks_to_remove), ["b"]);
    }

    #[test]
    fn test_reconcile_appends_after_existing_positions() {
        let diff = reconcile(ID, &videos(&["x", "a", "y"]), &local(&["a", "b"]));

        let added: Vec<_> = diff
            .tracks_to_add
            .iter()
            .map(|t| (t.remote_id.as_str(), t.position))
            .collect();
        assert_eq!(added, [("x", 2), ("y", 3)]);
        assert_eq!(remote_ids(&diff.tracks_to_remove), ["b"]);
    }

    #[test]
    fn test_reconcile_leaves_matched_tracks_alone() {
        let mut existing = local(&["a"]);
        existing[0].title = "Locally edited".to_string();

        let diff = reconcile(ID, &videos(&["a"]), &existing);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_reconcile_collapses_duplicate_remote_ids() {
        let diff = reconcile(ID, &videos(&["a", "a"]), &[]);
        assert_eq!(remote_ids(&diff.tracks_to_add), ["a"]);
    }

    #[tokio::test]
    async fn test_preview_is_idempotent_and_read_only() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = Arc::new(JsonStore::open(temp_dir.path()).await.expect("open"));
        seeded_store(&store, local(&["a", "b", "c"])).await;
        let before = std::fs::read(temp_dir.path().join(LIBRARY_FILE)).expect("read");

        let sync = reconciler(
            store.clone(),
            gateway_returning(&["a", "c", "d"]),
            Arc::new(FakeTransport::new()),
        );
        let first = sync.sync_playlist(ID, true).await.expect("preview");
        let second = sync.sync_playlist(ID, true).await.expect("preview");

        assert_eq!(first, second);
        assert_eq!(remote_ids(&first.tracks_to_add), ["d"]);
        assert_eq!(remote_ids(&first.tracks_to_remove), ["b"]);

        let after = std::fs::read(temp_dir.path().join(LIBRARY_FILE)).expect("read");
        assert_eq!(before, after);
        let playlist = store.get_playlist(ID).await.expect("get").expect("present");
        assert_eq!(playlist.sync_status, SyncStatus::Completed);
    }

    #[tokio::test]
    async fn test_commit_applies_diff() {
        let temp_dir = TempDir::new().expect("temp dir");
        let store = Arc::new(JsonStore::in_memory());
        let mut tracks = local(&["a", "b"]);
        let file = temp_dir.path().join("b.mp3");
        std::fs::write(&file, b"audio").expect("write");
        tracks[1].download_status = DownloadStatus::Completed;
        tracks[1].file_size = 5;
        tracks[1].local_path = Some(file.clone());
        seeded_store(&store, tracks).await;

        let transport = Arc::new(FakeTransport::new());
        let sync = reconciler(store.clone(), gateway_returning(&["a", "c"]), transport.clone());

        let applied = sync.commit(ID).await.expect("commit");

        assert_eq!(remote_ids(&applied.tracks_to_add), ["c"]);
        assert_eq!(remote_ids(&applied.tracks_to_remove), ["b"]);
        assert!(!file.exists());
        assert_eq!(transport.deleted(), [file]);

        let stored = store.tracks_for_playlist(ID).await.expect("tracks");
        assert_eq!(remote_ids(&stored), ["a", "c"]);
        assert_eq!(stored[1].position, 2);
        assert_eq!(stored[1].download_status, DownloadStatus::Pending);

        let playlist = store.get_playlist(ID).await.expect("get").expect("present");
        assert_eq!(playlist.sync_status, SyncStatus::Completed);
        assert_eq!(playlist.track_count, 2);
        assert_eq!(playlist.total_size, 0);
        assert!(playlist.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_commit_with_no_changes_still_stamps_sync() {
        let store = Arc::new(JsonStore::in_memory());
        seeded_store(&store, local(&["a"])).await;

        let sync = reconciler(
            store.clone(),
            gateway_returning(&["a"]),
            Arc::new(FakeTransport::new()),
        );
        let applied = sync.commit(ID).await.expect("commit");

        assert!(applied.is_empty());
        let playlist = store.get_playlist(ID).await.expect("get").expect("present");
        assert!(playlist.last_synced_at.is_some());
    }

    #[tokio::test]
    async fn test_metadata_failure_leaves_state_untouched() {
        let store = Arc::new(JsonStore::in_memory());
        seeded_store(&store, local(&["a"])).await;
        let before = store.get_playlist(ID).await.expect("get");

        let mut gateway = MockMetadataGateway::new();
        gateway.expect_fetch_playlist_videos().returning(|_| {
            Err(MetadataFetchError::Network {
                resource: "videos".to_string(),
                reason: "offline".to_string(),
            })
        });
        let sync = reconciler(store.clone(), gateway, Arc::new(FakeTransport::new()));

        let err = sync.commit(ID).await.unwrap_err();
        assert!(matches!(err, Error::Metadata(MetadataFetchError::Network { .. })));
        assert_eq!(store.get_playlist(ID).await.expect("get"), before);
        assert_eq!(store.tracks_for_playlist(ID).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_failure_stops_removals_and_marks_error() {
        let store = Arc::new(JsonStore::in_memory());
        let mut tracks = local(&["a", "b", "c"]);
        for track in &mut tracks[1..] {
            track.download_status = DownloadStatus::Completed;
            track.file_size = 10;
            track.local_path = Some(PathBuf::from(format!("/music/{}.mp3", track.remote_id)));
        }
        seeded_store(&store, tracks).await;

        let transport =
            Arc::new(FakeTransport::new().undeletable(&PathBuf::from("/music/c.mp3")));
        let sync = reconciler(store.clone(), gateway_returning(&["a", "d"]), transport);

        let err = sync.commit(ID).await.unwrap_err();
        assert!(matches!(
            err,
            Error::FileSystem(FileSystemError::DeleteFailed { .. })
        ));

        // b went before the failure, c stayed, d was never added.
        let stored = store.tracks_for_playlist(ID).await.expect("tracks");
        assert_eq!(remote_ids(&stored), ["a", "c"]);

        let playlist = store.get_playlist(ID).await.expect("get").expect("present");
        assert_eq!(playlist.sync_status, SyncStatus::Error);
    }

    #[tokio::test]
    async fn test_unknown_playlist() {
        let sync = reconciler(
            Arc::new(JsonStore::in_memory()),
            MockMetadataGateway::new(),
            Arc::new(FakeTransport::new()),
        );
        let err = sync.preview("PL404").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(crate::error::ValidationError::PlaylistNotFound(_))
        ));
    }
}
