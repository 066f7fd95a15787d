use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
};

use crate::error::AuthError;
use crate::state::AppState;

/// Caller authenticated through the identity service.
/// Extracted from `Authorization: Bearer <token>`.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

/// Bearer token from the Authorization header, if any.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Validate a token, bounded by the handshake timeout. No token at all is
/// `AuthError::Missing`.
pub async fn authenticate(state: &AppState, token: Option<&str>) -> Result<String, AuthError> {
    let token = token.ok_or(AuthError::Missing)?;
    let bound = state.hub.config().handshake_timeout();
    match tokio::time::timeout(bound, state.identity.validate_token(token)).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::Unavailable(crate::error::CollabError::Timeout)),
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let user_id = authenticate(state, bearer_token(&parts.headers))
            .await
            .map_err(|e| {
                tracing::debug!("Bearer authentication failed: {}", e);
                e.status()
            })?;

        Ok(AuthUser { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer tok-1"));
        assert_eq!(bearer_token(&headers), Some("tok-1"));
    }
}
