use axum::{Extension, Json, extract::State};
use tracing::info;

use murmur_types::api::UpdateStatusRequest;
use murmur_types::models::{Status, User};

use crate::auth::{AppState, AppStateInner};
use crate::error::ApiError;
use crate::middleware::Identity;

/// Set a user's status and tell every connected session.
pub async fn set_status(
    state: &AppStateInner,
    username: &str,
    raw_status: &str,
) -> Result<User, ApiError> {
    let status: Status = raw_status
        .parse()
        .map_err(|e: murmur_types::models::InvalidStatus| ApiError::Validation(e.to_string()))?;

    let user = state
        .presence
        .update_status(username, status)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("user {}", username)))?;

    let notified = state.hub.broadcast_status_update(username, status).await;
    info!("{} is now {} ({} sessions notified)", username, status, notified);
    Ok(user)
}

pub async fn list_users(State(state): State<AppState>) -> Json<Vec<User>> {
    Json(state.presence.list().await)
}

pub async fn update_status(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<User>, ApiError> {
    let user = set_status(&state, &identity.user.username, &req.status).await?;
    Ok(Json(user))
}
