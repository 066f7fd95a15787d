//! Tests for the HTTP identity adapter against a stub identity service.

use axum::{
    extract::Path,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpListener;

use chathub_server::collab::{HttpIdentityClient, IdentityProvider};
use chathub_server::error::{AuthError, CollabError};

async fn validate(Json(body): Json<Value>) -> Result<Json<Value>, StatusCode> {
    match body["token"].as_str() {
        Some("good") => Ok(Json(json!({ "userId": "u-1", "valid": true }))),
        Some("expired") => Ok(Json(json!({ "userId": "u-1", "valid": false }))),
        Some("boom") => Err(StatusCode::INTERNAL_SERVER_ERROR),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

async fn profile(Path(user_id): Path<String>) -> Result<Json<Value>, StatusCode> {
    match user_id.as_str() {
        "u-1" => Ok(Json(json!({ "id": "u-1", "nickName": "Nova", "email": "n@x" }))),
        "blank" => Ok(Json(json!({ "id": "blank", "nickName": "" }))),
        _ => Err(StatusCode::NOT_FOUND),
    }
}

async fn start_stub() -> String {
    let app = Router::new()
        .route("/auth/validate", post(validate))
        .route("/users/{user_id}", get(profile));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_validate_token() {
    let base = start_stub().await;
    let client = HttpIdentityClient::new(&base, &base, Duration::from_secs(2)).unwrap();

    assert_eq!(client.validate_token("good").await.unwrap(), "u-1");
    assert!(matches!(client.validate_token("expired").await, Err(AuthError::Invalid)));
    assert!(matches!(client.validate_token("nope").await, Err(AuthError::Invalid)));
    assert!(matches!(
        client.validate_token("boom").await,
        Err(AuthError::Unavailable(CollabError::Status(_)))
    ));
}

#[tokio::test]
async fn test_display_name() {
    let base = start_stub().await;
    // Trailing slash is tolerated.
    let client = HttpIdentityClient::new(&base, &format!("{base}/"), Duration::from_secs(2)).unwrap();

    assert_eq!(client.display_name("u-1").await.unwrap(), "Nova");
    assert!(matches!(client.display_name("blank").await, Err(CollabError::NotFound)));
    assert!(matches!(client.display_name("missing").await, Err(CollabError::NotFound)));
}

#[tokio::test]
async fn test_unreachable_service_is_unavailable() {
    // Bind then drop to get a port nothing listens on.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = HttpIdentityClient::new(&base, &base, Duration::from_millis(500)).unwrap();
    let err = client.validate_token("good").await.unwrap_err();
    assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(client.display_name("u-1").await.is_err());
}
