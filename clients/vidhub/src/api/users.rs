//! Accounts: login, session tokens, profiles, and the admin user list.

use crate::api::client::ApiClient;
use crate::api::error::ApiError;
use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;

use http::Method;
use tracing::instrument;

/// The token pair issued by `/auth/login`, `/auth/register`, and `/auth/refresh`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

// tokens end up in logs via #[instrument]; never print them
impl fmt::Debug for AuthTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: User,
    pub access_token: String,
    pub refresh_token: String,
}

impl AuthResponse {
    pub fn tokens(&self) -> AuthTokens {
        AuthTokens {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

/// Subscription tier of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionPlan {
    #[default]
    Free,
    Basic,
    Premium,
}

impl SubscriptionPlan {
    /// Whether this plan unlocks subscription-only content.
    pub fn is_paid(self) -> bool {
        !matches!(self, Self::Free)
    }

    /// Monthly price of the plan, as offered on the subscription page.
    pub fn monthly_price(self) -> f64 {
        match self {
            Self::Free => 0.0,
            Self::Basic => 9.99,
            Self::Premium => 19.99,
        }
    }
}

impl fmt::Display for SubscriptionPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Free => write!(f, "FREE"),
            Self::Basic => write!(f, "BASIC"),
            Self::Premium => write!(f, "PREMIUM"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Payout destination for creator earnings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankDetails {
    pub account_number: String,
    pub ifsc: String,
    pub beneficiary_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub is_banned: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub subscription_plan: SubscriptionPlan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_expiry: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_details: Option<BankDetails>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub password: String,
}

/// Fields of the own profile that can be changed. Unset fields are left untouched.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bank_details: Option<BankDetails>,
}

impl ApiClient {
    /// Creates an account and logs in as it.
    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    pub async fn register(&self, credentials: &Credentials) -> Result<User, ApiError> {
        if credentials.name.as_deref().is_none_or(str::is_empty) {
            return Err(ApiError::InvalidInput(
                "registration requires a name".to_string(),
            ));
        }
        self.authenticate("/auth/register", credentials).await
    }

    /// Logs in with email and password and stores the resulting session in this client.
    #[instrument(skip(self, credentials), fields(email = %credentials.email))]
    pub async fn login(&self, credentials: &Credentials) -> Result<User, ApiError> {
        #[derive(Serialize)]
        struct Login<'a> {
            email: &'a str,
            password: &'a str,
        }

        self.authenticate(
            "/auth/login",
            &Login {
                email: &credentials.email,
                password: &credentials.password,
            },
        )
        .await
    }

    async fn authenticate(
        &self,
        path: &str,
        body: &(impl Serialize + Sync),
    ) -> Result<User, ApiError> {
        let response: AuthResponse = self
            .make_unauthenticated_request(Method::POST, path, Some(body))
            .await?
            .json()
            .await
            .map_err(|source| ApiError::Decode {
                what: "authentication",
                source,
            })?;

        self.set_session(response.tokens()).await;
        tracing::info!(user = %response.user.id, "logged in");
        Ok(response.user)
    }

    /// Exchanges the current refresh token for a new session right away.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - the session was refreshed
    /// * `Ok(false)` - there was no session, or the backend refused the refresh token
    /// * `Err(_)` - network or backend failure
    #[instrument(skip(self), ret)]
    pub async fn refresh(&self) -> Result<bool, ApiError> {
        let Some(tokens) = self.session().await else {
            return Ok(false);
        };
        self.refresh_session(&tokens.access_token).await
    }

    #[instrument(skip(self))]
    pub async fn get_profile(&self) -> Result<User, ApiError> {
        self.request_json(Method::GET, "/users/me", None, None::<&()>, "profile")
            .await
    }

    #[instrument(skip(self))]
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        self.request_json(Method::PUT, "/users/me", None, Some(update), "profile update")
            .await
    }

    #[instrument(skip_all)]
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ApiError> {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct ChangePassword<'a> {
            old_password: &'a str,
            new_password: &'a str,
        }

        if new_password.is_empty() {
            return Err(ApiError::InvalidInput("new password is empty".to_string()));
        }
        self.make_authenticated_request(
            Method::PUT,
            "/users/change-password",
            None,
            Some(&ChangePassword {
                old_password,
                new_password,
            }),
        )
        .await?;
        Ok(())
    }

    /// Lists every account. Admin only.
    #[instrument(skip(self))]
    pub async fn list_users(&self) -> Result<Vec<User>, ApiError> {
        self.request_json(Method::GET, "/admin/users", None, None::<&()>, "user list")
            .await
    }

    /// Bans an account. Admin only.
    #[instrument(skip(self))]
    pub async fn ban_user(&self, user_id: &str) -> Result<User, ApiError> {
        let path = format!("/admin/users/{user_id}/ban");
        let user: User = self
            .request_json(Method::PUT, &path, None, None::<&()>, "banned user")
            .await?;
        tracing::info!(user = %user.id, "banned user");
        Ok(user)
    }

    /// Lifts a ban. Admin only.
    #[instrument(skip(self))]
    pub async fn unban_user(&self, user_id: &str) -> Result<User, ApiError> {
        let path = format!("/admin/users/{user_id}/unban");
        let user: User = self
            .request_json(Method::PUT, &path, None, None::<&()>, "unbanned user")
            .await?;
        tracing::info!(user = %user.id, "unbanned user");
        Ok(user)
    }

    /// Deletes an account. Admin only.
    #[instrument(skip(self))]
    pub async fn delete_user(&self, user_id: &str) -> Result<(), ApiError> {
        let path = format!("/admin/users/{user_id}");
        self.make_authenticated_request(Method::DELETE, &path, None, None::<&()>)
            .await?;
        tracing::info!(user = %user_id, "deleted user");
        Ok(())
    }
}
