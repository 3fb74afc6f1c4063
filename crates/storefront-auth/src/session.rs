//! Session lifecycle
//!
//! Sign-in, registration and identity-provider exchange create the credential
//! pair; sign-out and terminal refresh failure destroy it. Everything in
//! between (attaching, refreshing, retrying) is the client's job.

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::client::Client;
use crate::constants::{
    ACCESS_TOKEN_KEY, GOOGLE_AUTH_PATH, LOGIN_PATH, ME_PATH, PROFILE_COMPLETE_PATH,
    REGISTER_PATH, USER_KEY,
};
use crate::error::{Error, Result};
use crate::request::ApiRequest;

/// Storefront account, as returned by the auth endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Response from login, registration and the identity-provider exchange.
#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub message: String,
    pub user: User,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Only set by the identity-provider exchange
    #[serde(default)]
    pub is_new_user: Option<bool>,
}

/// Registration payload. Only email and password are required.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignupData {
    pub email: String,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

impl SignupData {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
            ..Self::default()
        }
    }
}

/// Customer profile completeness, used to prompt for missing checkout details.
#[derive(Debug, Deserialize)]
pub struct ProfileStatus {
    pub is_complete: bool,
    #[serde(default)]
    pub missing_fields: Vec<String>,
    #[serde(default)]
    pub customer: serde_json::Value,
}

/// Session operations on top of an authenticated `Client`.
#[derive(Clone)]
pub struct Session {
    client: Client,
}

impl Session {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Sign in with email and password.
    pub async fn login(&self, email: &str, password: &str) -> Result<AuthResponse> {
        let request = ApiRequest::post(LOGIN_PATH)
            .json(serde_json::json!({ "email": email, "password": password }));
        self.establish(request).await
    }

    /// Create an account and sign in.
    pub async fn register(&self, data: &SignupData) -> Result<AuthResponse> {
        let body = serde_json::to_value(data)
            .map_err(|e| Error::InvalidRequest(format!("encoding signup data: {e}")))?;
        self.establish(ApiRequest::post(REGISTER_PATH).json(body))
            .await
    }

    /// Exchange an identity-provider token for a storefront session.
    pub async fn google_auth(&self, id_token: &str) -> Result<AuthResponse> {
        let request =
            ApiRequest::post(GOOGLE_AUTH_PATH).json(serde_json::json!({ "token": id_token }));
        self.establish(request).await
    }

    async fn establish(&self, request: ApiRequest) -> Result<AuthResponse> {
        let auth: AuthResponse = self.client.send_json(request).await?;

        let access = Secret::non_empty(&auth.access_token)
            .ok_or_else(|| Error::Decode("auth response has an empty access_token".into()))?;
        let refresh = auth.refresh_token.as_deref().and_then(Secret::non_empty);
        let user = serde_json::to_value(&auth.user)
            .map_err(|e| Error::Decode(format!("encoding user profile: {e}")))?;

        self.client
            .coordinator()
            .begin_session(&access, refresh.as_ref(), Some(&user))?;

        info!(user_id = auth.user.id, role = %auth.user.role, "session established");
        Ok(auth)
    }

    /// Sign out: forget every credential and stop refreshing.
    pub fn logout(&self) {
        info!("signing out");
        self.client.coordinator().end_session();
    }

    /// Fetch the signed-in user and refresh the cached profile.
    pub async fn current_user(&self) -> Result<User> {
        let user: User = self.client.get_json(ME_PATH).await?;
        if let Ok(value) = serde_json::to_value(&user)
            && let Err(e) = self.client.store().set_user(&value)
        {
            warn!(error = %e, "failed to cache user profile");
        }
        Ok(user)
    }

    pub async fn check_profile_complete(&self) -> Result<ProfileStatus> {
        self.client.get_json(PROFILE_COMPLETE_PATH).await
    }

    /// Explicitly refresh the access credential.
    ///
    /// Shares the single-flight cycle with automatic refreshes and sends the
    /// stored refresh credential the same way. A rejected refresh credential
    /// ends the session.
    pub async fn refresh(&self) -> Result<Secret<String>> {
        Ok(self.client.coordinator().refresh_now().await?)
    }

    /// Restore the cached session at start-up.
    ///
    /// A cached profile that no longer decodes is discarded together with the
    /// access credential, leaving the user signed out.
    pub fn restore(&self) -> Option<User> {
        let store = self.client.store();
        store.access_token()?;
        let raw = store.user()?;

        match serde_json::from_str::<User>(&raw) {
            Ok(user) => {
                info!(user_id = user.id, "restored cached session");
                Some(user)
            }
            Err(e) => {
                warn!(error = %e, "cached user profile is corrupt, discarding session");
                if let Err(e) = store.clear(&[ACCESS_TOKEN_KEY, USER_KEY]) {
                    warn!(error = %e, "failed to clear corrupt session");
                }
                None
            }
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.client.store().access_token().is_some()
    }
}
