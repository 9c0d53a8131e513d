//! Remote playlist metadata lookup.
//!
//! [`MetadataGateway`] is the seam the reconciler and playlist manager
//! depend on. [`HttpMetadataGateway`] talks to the backend service; all
//! knowledge of the backend's JSON shapes lives in [`parse_playlist_info`]
//! and [`parse_playlist_videos`], so nothing else ever sees raw responses.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::AppConfig;
use crate::error::{Error, MetadataFetchError, Result};
use crate::model::{PlaylistInfo, VideoInfo};

const PLAYLIST_ENDPOINT: &str = "/api/youtube/playlist";
const PLAYLIST_VIDEOS_ENDPOINT: &str = "/api/youtube/playlist/videos";

/// Source of playlist metadata.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MetadataGateway: Send + Sync {
    /// Fetch playlist-level metadata.
    async fn fetch_playlist_info(
        &self,
        playlist_id: &str,
    ) -> std::result::Result<PlaylistInfo, MetadataFetchError>;

    /// Fetch the ordered list of videos in a playlist.
    async fn fetch_playlist_videos(
        &self,
        playlist_id: &str,
    ) -> std::result::Result<Vec<VideoInfo>, MetadataFetchError>;
}

/// Metadata gateway backed by the HTTP backend service.
///
/// An optional bearer token unlocks private playlists; without one only
/// public playlists resolve.
pub struct HttpMetadataGateway {
    client: reqwest::Client,
    base_url: String,
    access_token: RwLock<Option<String>>,
}

impl HttpMetadataGateway {
    /// Create a gateway for the given backend.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: RwLock::new(None),
        })
    }

    /// Create a gateway from application settings.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::new(
            config.backend_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    /// Set or clear the bearer credential sent with every request.
    pub async fn set_access_token(&self, token: Option<String>) {
        *self.access_token.write().await = token;
    }

    async fn get_json(
        &self,
        resource: &str,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<Value, MetadataFetchError> {
        let url = format!("{}{endpoint}", self.base_url);
        debug!("GET {} {:?}", url, query);

        let mut request = self.client.get(&url).query(query);
        if let Some(token) = self.access_token.read().await.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| MetadataFetchError::Network {
                resource: resource.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(MetadataFetchError::NotFound(resource.to_string()));
        }
        if !status.is_success() {
            warn!("Backend returned {} for {}", status, resource);
            return Err(MetadataFetchError::Status {
                resource: resource.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| MetadataFetchError::Malformed {
                resource: resource.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl MetadataGateway for HttpMetadataGateway {
    async fn fetch_playlist_info(
        &self,
        playlist_id: &str,
    ) -> std::result::Result<PlaylistInfo, MetadataFetchError> {
        let resource = format!("playlist {playlist_id}");
        let body = self
            .get_json(&resource, PLAYLIST_ENDPOINT, &[("id", playlist_id)])
            .await?;
        parse_playlist_info(playlist_id, &body)
    }

    async fn fetch_playlist_videos(
        &self,
        playlist_id: &str,
    ) -> std::result::Result<Vec<VideoInfo>, MetadataFetchError> {
        let resource = format!("videos of playlist {playlist_id}");
        let body = self
            .get_json(
                &resource,
                PLAYLIST_VIDEOS_ENDPOINT,
                &[("playlistId", playlist_id)],
            )
            .await?;
        parse_playlist_videos(playlist_id, &body)
    }
}

/// Normalize a playlist info response.
pub fn parse_playlist_info(
    playlist_id: &str,
    body: &Value,
) -> std::result::Result<PlaylistInfo, MetadataFetchError> {
    let malformed = |reason: &str| MetadataFetchError::Malformed {
        resource: format!("playlist {playlist_id}"),
        reason: reason.to_string(),
    };

    if !body.is_object() {
        return Err(malformed("expected a JSON object"));
    }

    let title = string_field(body, "title").ok_or_else(|| malformed("missing title"))?;

    Ok(PlaylistInfo {
        id: string_field(body, "id").unwrap_or_else(|| playlist_id.to_string()),
        title,
        description: string_field(body, "description").unwrap_or_default(),
        thumbnail_url: string_field(body, "thumbnailUrl").unwrap_or_default(),
        item_count: body
            .get("itemCount")
            .and_then(number_field)
            .unwrap_or_default() as usize,
    })
}

/// Normalize a playlist videos response, keeping backend order.
pub fn parse_playlist_videos(
    playlist_id: &str,
    body: &Value,
) -> std::result::Result<Vec<VideoInfo>, MetadataFetchError> {
    let resource = format!("videos of playlist {playlist_id}");

    let items = body
        .get("videos")
        .and_then(Value::as_array)
        .ok_or_else(|| MetadataFetchError::Malformed {
            resource: resource.clone(),
            reason: "missing videos array".to_string(),
        })?;

    if items.is_empty() {
        return Err(MetadataFetchError::NotFound(playlist_id.to_string()));
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let remote_id =
                string_field(item, "id").ok_or_else(|| MetadataFetchError::Malformed {
                    resource: resource.clone(),
                    reason: format!("video at index {index} has no id"),
                })?;

            Ok(VideoInfo {
                title: string_field(item, "title").unwrap_or_else(|| "Unknown Title".to_string()),
                artist: string_field(item, "artist")
                    .unwrap_or_else(|| "Unknown Artist".to_string()),
                duration_secs: item
                    .get("duration")
                    .and_then(number_field)
                    .unwrap_or_default(),
                thumbnail_url: string_field(item, "thumbnailUrl").unwrap_or_default(),
                remote_id,
            })
        })
        .collect()
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
}

/// Accept non-negative integers, floats, or numeric strings.
fn number_field(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
