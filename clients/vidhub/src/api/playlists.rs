//! Playlists: curated, optionally paid collections of videos.

use crate::api::client::ApiClient;
use crate::api::error::ApiError;
use crate::api::videos::Video;
use crate::entitlement::{AccessFlags, AccessTier, ContentItem, ContentKind, Price};
use http::Method;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::instrument;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Playlist {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner_id: String,
    #[serde(default)]
    pub videos: Vec<Video>,
    #[serde(default)]
    pub image: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(flatten)]
    pub access: AccessFlags,
}

impl Playlist {
    /// The gating-relevant view of this playlist.
    pub fn content_item(&self) -> Result<ContentItem, ApiError> {
        Ok(ContentItem {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            kind: ContentKind::Playlist,
            tier: self.access.tier()?,
            status: None,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePlaylistRequest {
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    is_paid: bool,
    price: f64,
}

impl CreatePlaylistRequest {
    /// A new playlist, sold at `price` or free with `None`.
    pub fn new(title: impl Into<String>, price: Option<Price>) -> Self {
        Self {
            title: title.into(),
            description: None,
            is_paid: price.is_some(),
            price: price.map_or(0.0, Price::amount),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Changes to a playlist. Unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlaylistRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_paid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
}

impl UpdatePlaylistRequest {
    /// Makes the playlist paid at `price`, or free with `None`.
    pub fn pricing(mut self, price: Option<Price>) -> Self {
        let flags = match price {
            Some(price) => AccessTier::Paid { price }.flags(),
            None => AccessTier::Free.flags(),
        };
        self.is_paid = Some(flags.is_paid);
        self.price = flags.price;
        self
    }
}

impl ApiClient {
    #[instrument(skip(self))]
    pub async fn list_playlists(&self) -> Result<Vec<Playlist>, ApiError> {
        let playlists: Vec<Playlist> = self
            .request_json(Method::GET, "/playlists", None, None::<&()>, "playlist list")
            .await?;
        tracing::debug!(returned_items = playlists.len(), "fetched playlists");
        Ok(playlists)
    }

    #[instrument(skip(self))]
    pub async fn get_playlist(&self, playlist_id: &str) -> Result<Playlist, ApiError> {
        let path = format!("/playlists/{playlist_id}");
        self.request_json(Method::GET, &path, None, None::<&()>, "playlist")
            .await
    }

    #[instrument(skip(self, request), fields(title = %request.title))]
    pub async fn create_playlist(
        &self,
        request: &CreatePlaylistRequest,
    ) -> Result<Playlist, ApiError> {
        if request.title.trim().is_empty() {
            return Err(ApiError::InvalidInput("playlist title is empty".to_string()));
        }
        let playlist: Playlist = self
            .request_json(
                Method::POST,
                "/playlists",
                None,
                Some(request),
                "created playlist",
            )
            .await?;
        tracing::info!(playlist_id = %playlist.id, "created playlist");
        Ok(playlist)
    }

    #[instrument(skip(self))]
    pub async fn update_playlist(
        &self,
        playlist_id: &str,
        update: &UpdatePlaylistRequest,
    ) -> Result<Playlist, ApiError> {
        let path = format!("/playlists/{playlist_id}");
        self.request_json(Method::PATCH, &path, None, Some(update), "playlist update")
            .await
    }

    #[instrument(skip(self))]
    pub async fn delete_playlist(&self, playlist_id: &str) -> Result<(), ApiError> {
        let path = format!("/playlists/{playlist_id}");
        self.make_authenticated_request(Method::DELETE, &path, None, None::<&()>)
            .await?;
        tracing::info!(playlist_id, "deleted playlist");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn add_video_to_playlist(
        &self,
        playlist_id: &str,
        video_id: &str,
    ) -> Result<(), ApiError> {
        let path = format!("/playlists/{playlist_id}/videos/{video_id}");
        self.make_authenticated_request(Method::POST, &path, None, None::<&()>)
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn remove_video_from_playlist(
        &self,
        playlist_id: &str,
        video_id: &str,
    ) -> Result<(), ApiError> {
        let path = format!("/playlists/{playlist_id}/videos/{video_id}");
        self.make_authenticated_request(Method::DELETE, &path, None, None::<&()>)
            .await?;
        Ok(())
    }
}
