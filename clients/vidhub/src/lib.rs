use crate::api::ApiClient;
use crate::api::users::{AuthTokens, Credentials, User};
use crate::config::ClientConfig;
use eyre::Context;
use std::ops::AsyncFnMut;

pub mod api;
pub mod background;
pub mod config;
pub mod entitlement;
pub mod purchase;

/// Complete session setup for the CLI and other long-running consumers.
///
/// Restores the session from `stored_session` (the JSON written from [`ApiClient::session`]),
/// refreshing it right away so it has its full lifetime ahead of it. Falls back to logging in
/// with `credentials` when there is no stored session or it can no longer be refreshed. The
/// session is then validated by fetching the profile.
///
/// `notify` is told about steps the user may want to know about, as `(id, message)`.
pub async fn setup_client<F>(
    config: &ClientConfig,
    stored_session: &str,
    credentials: Option<&Credentials>,
    mut notify: F,
) -> eyre::Result<(ApiClient, User)>
where
    F: AsyncFnMut(&str, &str),
{
    let client = ApiClient::from_config(config)?;

    let stored_session = stored_session.trim();
    if stored_session.is_empty() || stored_session == "null" {
        notify("vidhub_login", "No stored session, logging in.").await;
        let Some(credentials) = credentials else {
            eyre::bail!("no stored session and no credentials to log in with");
        };
        let user = client.login(credentials).await.context("log in to VidHub")?;
        return Ok((client, user));
    }

    let tokens: AuthTokens =
        serde_json::from_str(stored_session).context("parse stored VidHub session")?;
    client.set_session(tokens).await;

    tracing::info!("proactively refreshing stored session");
    if client.refresh().await.context("refresh session")? {
        tracing::debug!("successfully refreshed stored session");
    } else {
        notify(
            "vidhub_relogin",
            "Stored session has expired, logging in again.",
        )
        .await;
        tracing::warn!("session refresh failed, logging in again");
        let Some(credentials) = credentials else {
            eyre::bail!("stored session has expired and there are no credentials to log in with");
        };
        client.login(credentials).await.context("log in to VidHub")?;
    }

    let user = client
        .get_profile()
        .await
        .context("validate session by fetching profile")?;
    tracing::info!(user = %user.id, plan = %user.subscription_plan, "session is valid");
    Ok((client, user))
}
