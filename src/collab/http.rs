//! HTTP client for the identity service (token validation and user profiles).

use async_trait::async_trait;
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::IdentityProvider;
use crate::error::{AuthError, CollabError};

#[derive(Debug, Serialize)]
struct ValidateRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResponse {
    #[serde(default)]
    user_id: Option<String>,
    valid: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserProfile {
    nick_name: Option<String>,
}

/// Calls `POST {auth_url}/auth/validate` and `GET {user_url}/users/{id}`.
#[derive(Clone)]
pub struct HttpIdentityClient {
    client: reqwest::Client,
    auth_url: String,
    user_url: String,
}

impl HttpIdentityClient {
    pub fn new(auth_url: &str, user_url: &str, timeout: Duration) -> Result<Self, CollabError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            auth_url: auth_url.trim_end_matches('/').to_string(),
            user_url: user_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl IdentityProvider for HttpIdentityClient {
    async fn validate_token(&self, token: &str) -> Result<String, AuthError> {
        let resp = self
            .client
            .post(format!("{}/auth/validate", self.auth_url))
            .json(&ValidateRequest { token })
            .send()
            .await
            .map_err(CollabError::from)?;

        // The auth service answers 401 for tokens it refuses outright.
        if resp.status() == StatusCode::UNAUTHORIZED {
            return Err(AuthError::Invalid);
        }
        if !resp.status().is_success() {
            return Err(CollabError::Status(resp.status()).into());
        }

        let body: ValidateResponse = resp.json().await.map_err(CollabError::from)?;
        match body.user_id {
            Some(user_id) if body.valid && !user_id.is_empty() => Ok(user_id),
            _ => Err(AuthError::Invalid),
        }
    }

    async fn display_name(&self, user_id: &str) -> Result<String, CollabError> {
        let resp = self
            .client
            .get(format!("{}/users/{}", self.user_url, user_id))
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => return Err(CollabError::NotFound),
            status if !status.is_success() => return Err(CollabError::Status(status)),
            _ => {}
        }

        let profile: UserProfile = resp.json().await?;
        profile
            .nick_name
            .filter(|name| !name.trim().is_empty())
            .ok_or(CollabError::NotFound)
    }
}
