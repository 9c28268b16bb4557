//! Core VidHub API client functionality and session management.

use crate::api::error::ApiError;
use crate::api::users::AuthTokens;
use crate::config::ClientConfig;
use eyre::Context;
use http::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::instrument;

/// Client for the VidHub backend REST API.
///
/// The client is cheap to clone; clones share the HTTP connection pool and the session. When a
/// session is present, every request carries its access token as a bearer token. If the backend
/// answers `401`, the client refreshes the session once using the stored refresh token and
/// replays the original request. A failed refresh clears the session.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// Base URL of the backend, without a trailing slash.
    base_url: Arc<str>,
    /// The current session, if logged in. Guarded so that concurrent callers refresh it once.
    session: Arc<Mutex<Option<AuthTokens>>>,
    client: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, client: reqwest::Client) -> Self {
        Self {
            base_url: Arc::from(base_url.trim_end_matches('/')),
            session: Arc::new(Mutex::new(None)),
            client,
        }
    }

    pub fn from_config(config: &ClientConfig) -> eyre::Result<Self> {
        let client = config.http_client().context("build HTTP client")?;
        Ok(Self::new(&config.base_url, client))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns a copy of the current session tokens, if any.
    ///
    /// Useful for persisting the session after the client has refreshed it.
    pub async fn session(&self) -> Option<AuthTokens> {
        self.session.lock().await.clone()
    }

    pub async fn set_session(&self, tokens: AuthTokens) {
        *self.session.lock().await = Some(tokens);
    }

    pub async fn clear_session(&self) {
        *self.session.lock().await = None;
    }

    pub(crate) fn http_client(&self) -> &reqwest::Client {
        &self.client
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn access_token(&self) -> Option<String> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|tokens| tokens.access_token.clone())
    }

    /// Exchanges the stored refresh token for a new session.
    ///
    /// `stale_access` is the access token the failed request was sent with. If the session has
    /// moved on since then, some other caller already refreshed it and we just use the new one.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - the session is fresh and the request can be retried
    /// * `Ok(false)` - there is no usable session anymore
    /// * `Err(_)` - the refresh could not be attempted (network failure, backend down)
    #[instrument(skip_all, ret)]
    pub(crate) async fn refresh_session(&self, stale_access: &str) -> Result<bool, ApiError> {
        let mut session = self.session.lock().await;
        let Some(tokens) = session.as_ref() else {
            return Ok(false);
        };
        if tokens.access_token != stale_access {
            tracing::trace!("session was already refreshed by another request");
            return Ok(true);
        }

        let refresh_token = tokens.refresh_token.clone();
        match self.request_refresh(&refresh_token).await {
            Ok(new_tokens) => {
                tracing::debug!("refreshed session");
                *session = Some(new_tokens);
                Ok(true)
            }
            Err(e) if e.is_transient() => Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "session refresh was refused, logging out");
                *session = None;
                Ok(false)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<AuthTokens, ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct RefreshRequest<'a> {
            refresh_token: &'a str,
        }

        self.make_unauthenticated_request(
            Method::POST,
            "/auth/refresh",
            Some(&RefreshRequest { refresh_token }),
        )
        .await?
        .json()
        .await
        .map_err(|source| ApiError::Decode {
            what: "session refresh",
            source,
        })
    }

    /// Sends one request built by `build`, attaching `bearer` if given.
    async fn send(
        &self,
        method: &Method,
        url: &str,
        bearer: Option<&str>,
        build: &(dyn Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync),
    ) -> Result<reqwest::Response, ApiError> {
        let mut request = self.client.request(method.clone(), url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        build(request)
            .send()
            .await
            .map_err(|source| ApiError::Transport {
                method: method.clone(),
                url: url.to_string(),
                source,
            })
    }

    /// Makes a request to the backend with the session's bearer token and common error
    /// handling.
    ///
    /// This consolidates the logic every endpoint wrapper shares:
    /// - attaching the access token, if there is a session
    /// - one refresh-and-replay on `401`
    /// - mapping non-success answers onto [`ApiError`]
    ///
    /// `build` adds whatever the specific request needs (query, JSON or multipart body). It is
    /// called once more if the request has to be replayed after a refresh.
    #[instrument(skip(self, build), level = tracing::Level::TRACE)]
    pub(crate) async fn execute(
        &self,
        method: Method,
        path: &str,
        build: &(dyn Fn(reqwest::RequestBuilder) -> reqwest::RequestBuilder + Send + Sync),
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.endpoint(path);
        let access = self.access_token().await;

        let response = self.send(&method, &url, access.as_deref(), build).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        let Some(stale_access) = access else {
            // nothing to refresh; the endpoint needs a login
            return check_status(response).await;
        };
        tracing::debug!(%method, path, "access token rejected, refreshing session");
        if !self.refresh_session(&stale_access).await? {
            return Err(ApiError::Unauthorized);
        }

        let access = self.access_token().await;
        let response = self.send(&method, &url, access.as_deref(), build).await?;
        check_status(response).await
    }

    /// Shorthand for [`Self::execute`] with optional query parameters and JSON body.
    pub(crate) async fn make_authenticated_request(
        &self,
        method: Method,
        path: &str,
        query_params: Option<&[(&str, &str)]>,
        json_body: Option<&(impl Serialize + Sync)>,
    ) -> Result<reqwest::Response, ApiError> {
        self.execute(method, path, &|mut request| {
            if let Some(params) = query_params {
                request = request.query(params);
            }
            if let Some(body) = json_body {
                request = request.json(body);
            }
            request
        })
        .await
    }

    /// Makes a request without any session attached, for the `/auth` endpoints.
    pub(crate) async fn make_unauthenticated_request(
        &self,
        method: Method,
        path: &str,
        json_body: Option<&(impl Serialize + Sync)>,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.endpoint(path);
        let response = self
            .send(&method, &url, None, &|request| match json_body {
                Some(body) => request.json(body),
                None => request,
            })
            .await?;
        check_status(response).await
    }

    /// Makes an authenticated request and decodes the JSON answer.
    pub(crate) async fn request_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query_params: Option<&[(&str, &str)]>,
        json_body: Option<&(impl Serialize + Sync)>,
        what: &'static str,
    ) -> Result<T, ApiError> {
        self.make_authenticated_request(method, path, query_params, json_body)
            .await?
            .json()
            .await
            .map_err(|source| ApiError::Decode { what, source })
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    tracing::trace!(%status, body = %body, "request failed");
    Err(ApiError::from_status(status, &body))
}
