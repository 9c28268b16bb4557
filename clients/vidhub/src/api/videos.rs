//! Videos: the public catalog, uploads, signed playback, and the owner dashboard.

use crate::api::client::ApiClient;
use crate::api::error::ApiError;
use crate::api::types::{PagedStream, Paginated};
use crate::entitlement::{AccessFlags, ContentItem, ContentKind, Price};
use bytes::Bytes;
use http::Method;
use jiff::Timestamp;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_stream::Stream;
use tracing::instrument;

/// Encoding state of an uploaded video.
///
/// Moves `pending -> processing -> completed | failed` exactly once, driven by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ProcessingStatus {
    /// No further transitions happen after a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Private,
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoOwner {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

/// A catalog entry as returned by the video list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoSummary {
    pub id: String,
    pub title: Option<String>,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub thumbnail: Option<String>,
    pub user: VideoOwner,
    #[serde(default)]
    pub is_live: bool,
    #[serde(flatten)]
    pub access: AccessFlags,
}

/// A single video with its processing status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    #[serde(flatten)]
    pub summary: VideoSummary,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    /// The backend may leave this empty for gated videos; use
    /// [`ApiClient::signed_playback_url`] to obtain a playable link.
    #[serde(default)]
    pub url: Option<String>,
    pub status: ProcessingStatus,
}

impl Video {
    pub fn id(&self) -> &str {
        &self.summary.id
    }

    /// The gating-relevant view of this video.
    pub fn content_item(&self) -> Result<ContentItem, ApiError> {
        Ok(ContentItem {
            id: self.summary.id.clone(),
            owner_id: self.summary.user.id.clone(),
            kind: ContentKind::Video,
            tier: self.summary.access.tier()?,
            status: Some(self.status),
        })
    }
}

/// A video as its owner sees it on the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MyVideo {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub visibility: Visibility,
    pub encoding_status: ProcessingStatus,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub views: u64,
    #[serde(flatten)]
    pub access: AccessFlags,
    #[serde(default)]
    pub is_published: bool,
}

/// Changes to a video's details. Unset fields are left untouched.
///
/// Publishing is a separate mutation, see [`ApiClient::set_video_published`].
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    is_paid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<f64>,
}

impl VideoUpdate {
    /// Makes the video paid at `price`, or free with `None`.
    ///
    /// Paid flag and price always travel together so they cannot disagree.
    pub fn pricing(mut self, price: Option<Price>) -> Self {
        self.is_paid = Some(price.is_some());
        self.price = Some(price.map_or(0.0, Price::amount));
        self
    }
}

/// A time-limited link to the media of a video the viewer is entitled to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrl {
    pub url: String,
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
}

/// A video file to upload, with its metadata.
#[derive(Debug, Clone)]
pub struct VideoUpload {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub file_name: String,
    pub content_type: String,
    pub data: Bytes,
}

impl VideoUpload {
    fn validate(&self) -> Result<(), ApiError> {
        if self.title.trim().is_empty() {
            return Err(ApiError::InvalidInput("video title is empty".to_string()));
        }
        if self.data.is_empty() {
            return Err(ApiError::InvalidInput("video file is empty".to_string()));
        }
        if !self.content_type.starts_with("video/") {
            return Err(ApiError::InvalidInput(format!(
                "'{}' is not a video content type",
                self.content_type
            )));
        }
        Ok(())
    }

    fn form(&self) -> Form {
        let len = self.data.len() as u64;
        let part = || {
            Part::stream_with_length(self.data.clone(), len).file_name(self.file_name.clone())
        };
        // validate() has checked the content type; send the file untyped if reqwest disagrees
        let file = part().mime_str(&self.content_type).unwrap_or_else(|_| part());

        let mut form = Form::new()
            .text("title", self.title.clone())
            .text("description", self.description.clone());
        for tag in &self.tags {
            form = form.text("tags", tag.clone());
        }
        form.part("file", file)
    }
}

impl ApiClient {
    /// Returns a paginated stream over the public catalog, newest first.
    ///
    /// Pages are fetched on demand as the stream is consumed.
    #[instrument(skip(self))]
    pub fn list_videos(
        &self,
        page_size: u32,
    ) -> impl Stream<Item = Result<VideoSummary, ApiError>> + use<'_> {
        PagedStream::new(move |page| async move {
            let response = self.list_videos_page(page, page_size, None).await?;
            Ok(response.into_page())
        })
    }

    /// Like [`Self::list_videos`], restricted to videos matching `query`.
    #[instrument(skip(self))]
    pub fn search_videos(
        &self,
        query: &str,
        page_size: u32,
    ) -> impl Stream<Item = Result<VideoSummary, ApiError>> + use<'_> {
        let query = query.to_string();
        PagedStream::new(move |page| {
            let query = query.clone();
            async move {
                let response = self
                    .list_videos_page(page, page_size, Some(query.as_str()))
                    .await?;
                Ok(response.into_page())
            }
        })
    }

    /// Fetches one page of the catalog.
    #[instrument(skip(self), level = tracing::Level::DEBUG)]
    pub async fn list_videos_page(
        &self,
        page: u32,
        limit: u32,
        search: Option<&str>,
    ) -> Result<Paginated<VideoSummary>, ApiError> {
        let page = page.to_string();
        let limit = limit.to_string();
        let mut query_params = vec![("page", page.as_str()), ("limit", limit.as_str())];
        if let Some(search) = search.filter(|s| !s.is_empty()) {
            query_params.push(("search", search));
        }

        let videos: Paginated<VideoSummary> = self
            .request_json(
                Method::GET,
                "/video",
                Some(&query_params),
                None::<&()>,
                "video list",
            )
            .await?;

        tracing::debug!(
            total = videos.meta.total,
            returned_items = videos.data.len(),
            "fetched videos"
        );
        Ok(videos)
    }

    #[instrument(skip(self))]
    pub async fn get_video(&self, video_id: &str) -> Result<Video, ApiError> {
        let path = format!("/video/{video_id}");
        let video: Video = self
            .request_json(Method::GET, &path, None, None::<&()>, "video")
            .await?;
        tracing::trace!(video_id, status = %video.status, "fetched video");
        Ok(video)
    }

    /// Requests a signed playback URL for a video.
    ///
    /// The backend answers `403` when the viewer is not entitled to the video
    /// ([`ApiError::NotEntitled`]) and `404` when the video does not exist
    /// ([`ApiError::NotFound`]).
    #[instrument(skip(self))]
    pub async fn signed_playback_url(&self, video_id: &str) -> Result<SignedUrl, ApiError> {
        let path = format!("/video/{video_id}/stream-url");
        self.request_json(Method::GET, &path, None, None::<&()>, "signed playback URL")
            .await
    }

    /// Uploads a new video. Encoding starts on the backend right away; the returned video is
    /// usually still `pending`.
    #[instrument(skip(self, upload), fields(title = %upload.title, bytes = upload.data.len()))]
    pub async fn upload_video(&self, upload: &VideoUpload) -> Result<Video, ApiError> {
        upload.validate()?;
        let video: Video = self
            .execute(Method::POST, "/video", &|request| {
                request.multipart(upload.form())
            })
            .await?
            .json()
            .await
            .map_err(|source| ApiError::Decode {
                what: "uploaded video",
                source,
            })?;

        tracing::info!(video_id = %video.id(), status = %video.status, "uploaded video");
        Ok(video)
    }

    /// Lists the logged-in user's own videos.
    #[instrument(skip(self))]
    pub async fn list_my_videos(&self) -> Result<Vec<MyVideo>, ApiError> {
        let videos: Vec<MyVideo> = self
            .request_json(
                Method::GET,
                "/video/my-videos",
                None,
                None::<&()>,
                "own video list",
            )
            .await?;
        tracing::debug!(returned_items = videos.len(), "fetched own videos");
        Ok(videos)
    }

    #[instrument(skip(self))]
    pub async fn update_video(
        &self,
        video_id: &str,
        update: &VideoUpdate,
    ) -> Result<MyVideo, ApiError> {
        let path = format!("/video/{video_id}");
        self.request_json(Method::PATCH, &path, None, Some(update), "video update")
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_video_published(
        &self,
        video_id: &str,
        published: bool,
    ) -> Result<MyVideo, ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct Publish {
            is_published: bool,
        }

        let path = format!("/video/{video_id}/publish");
        self.request_json(
            Method::PATCH,
            &path,
            None,
            Some(&Publish {
                is_published: published,
            }),
            "publish toggle",
        )
        .await
    }
}
