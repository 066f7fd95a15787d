//! REST view of the presence tracker.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::auth::middleware::AuthUser;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct OnlineUsersResponse {
    pub users: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusResponse {
    pub user_id: String,
    pub online: bool,
}

/// GET /presence/online
pub async fn get_online_users(State(state): State<AppState>, _user: AuthUser) -> Json<OnlineUsersResponse> {
    Json(OnlineUsersResponse {
        users: state.hub.online_users(),
    })
}

/// GET /presence/status/{user_id}
pub async fn get_user_status(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(user_id): Path<String>,
) -> Json<UserStatusResponse> {
    let online = state.hub.is_online(&user_id);
    Json(UserStatusResponse { user_id, online })
}
