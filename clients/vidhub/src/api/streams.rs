//! Live streaming: creating a stream, the ingest server's view of active streams, and
//! checking whether a stream's playback has started.

use crate::api::client::ApiClient;
use crate::api::error::ApiError;
use crate::api::types::ActionResponse;
use http::Method;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::instrument;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamQuality {
    pub resolution: String,
    pub url: String,
}

/// A stream as the ingest server sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stream {
    pub stream_key: String,
    pub start_time: Timestamp,
    /// Seconds since the stream started.
    pub duration: f64,
    pub hls_url: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    #[serde(flatten)]
    pub stream: Stream,
    #[serde(default)]
    pub qualities: Vec<StreamQuality>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveStreamsResponse {
    pub success: bool,
    pub count: usize,
    pub streams: Vec<Stream>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfoResponse {
    pub success: bool,
    pub stream: StreamInfo,
}

pub type StreamActionResponse = ActionResponse;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerState {
    pub running: bool,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckResponse {
    pub success: bool,
    pub status: String,
    pub rtmp_server: ServerState,
    pub http_server: ServerState,
    pub active_streams: usize,
    /// Seconds the ingest server has been up.
    pub uptime: f64,
}

/// Everything a broadcaster needs after creating a live stream.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamSession {
    /// Secret; anyone holding it can broadcast on this channel.
    pub stream_key: String,
    pub rtmp_url: String,
    pub playback_url: String,
}

impl std::fmt::Debug for LiveStreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveStreamSession")
            .field("stream_key", &"<redacted>")
            .field("rtmp_url", &self.rtmp_url)
            .field("playback_url", &self.playback_url)
            .finish()
    }
}

impl ApiClient {
    /// Registers a new live stream and returns where to broadcast to and watch it.
    #[instrument(skip(self))]
    pub async fn create_live_stream(
        &self,
        title: &str,
        description: &str,
    ) -> Result<LiveStreamSession, ApiError> {
        #[derive(Serialize)]
        struct CreateLive<'a> {
            title: &'a str,
            description: &'a str,
        }

        if title.trim().is_empty() {
            return Err(ApiError::InvalidInput("stream title is empty".to_string()));
        }
        let session: LiveStreamSession = self
            .request_json(
                Method::POST,
                "/video/live",
                None,
                Some(&CreateLive { title, description }),
                "live stream",
            )
            .await?;
        tracing::info!(playback_url = %session.playback_url, "created live stream");
        Ok(session)
    }

    #[instrument(skip(self))]
    pub async fn list_active_streams(&self) -> Result<ActiveStreamsResponse, ApiError> {
        self.request_json(Method::GET, "/streams", None, None::<&()>, "active streams")
            .await
    }

    #[instrument(skip(self))]
    pub async fn get_stream_info(&self, stream_key: &str) -> Result<StreamInfoResponse, ApiError> {
        let path = format!("/streams/{stream_key}");
        self.request_json(Method::GET, &path, None, None::<&()>, "stream info")
            .await
    }

    #[instrument(skip(self))]
    pub async fn stop_stream(&self, stream_key: &str) -> Result<StreamActionResponse, ApiError> {
        let path = format!("/streams/{stream_key}");
        let response: StreamActionResponse = self
            .request_json(Method::DELETE, &path, None, None::<&()>, "stop stream")
            .await?;
        tracing::info!(
            success = response.success,
            detail = %response.message,
            "stopped stream"
        );
        Ok(response)
    }

    #[instrument(skip(self), ret)]
    pub async fn check_stream_health(&self) -> Result<HealthCheckResponse, ApiError> {
        self.request_json(
            Method::GET,
            "/streams/health/check",
            None,
            None::<&()>,
            "stream health",
        )
        .await
    }

    /// Checks whether a live stream's playback URL serves media yet.
    ///
    /// The playlist only appears once the broadcaster has started sending, so anything but a
    /// 2xx answer means "not yet". Only failing to reach the server at all is an error.
    #[instrument(skip(self), level = tracing::Level::DEBUG, ret)]
    pub async fn probe_playback(&self, playback_url: &str) -> Result<bool, ApiError> {
        let response = self
            .http_client()
            .head(playback_url)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                method: Method::HEAD,
                url: playback_url.to_string(),
                source,
            })?;
        Ok(response.status().is_success())
    }
}
