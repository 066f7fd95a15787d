//! Error types shared across the hub, the bridge and the collaborator adapters.

use axum::http::StatusCode;
use thiserror::Error;

/// Failure talking to an external collaborator (identity service, database).
#[derive(Debug, Error)]
pub enum CollabError {
    #[error("upstream request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned status {0}")]
    Status(StatusCode),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("database lock poisoned")]
    LockPoisoned,

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("timed out waiting for collaborator")]
    Timeout,

    #[error("not found")]
    NotFound,

    #[error("forbidden")]
    Forbidden,
}

impl CollabError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Timeout | Self::Http(_) | Self::Status(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Outcome of a failed bearer-token check.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,

    #[error("invalid or expired token")]
    Invalid,

    #[error("identity service unavailable: {0}")]
    Unavailable(#[from] CollabError),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Missing | Self::Invalid => StatusCode::UNAUTHORIZED,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Failure of the cross-instance publish/subscribe bridge.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("bridge is shut down")]
    Closed,

    #[error("bridge transport error: {0}")]
    Transport(String),

    #[error("bridge io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode bridge payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Failure of a chat operation (sending, marking read, history).
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message content is empty")]
    EmptyContent,

    #[error("message content exceeds {0} characters")]
    ContentTooLong(usize),

    #[error("attachment messages require a file url")]
    MissingFileUrl,

    #[error("user is not a participant of this chat")]
    NotParticipant,

    #[error(transparent)]
    Collab(#[from] CollabError),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl ChatError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::EmptyContent | Self::MissingFileUrl => StatusCode::BAD_REQUEST,
            Self::ContentTooLong(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotParticipant => StatusCode::FORBIDDEN,
            Self::Collab(err) => err.status(),
            Self::Bridge(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}
