use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use murmur_db::Store;
use murmur_types::api::CreateChannelRequest;
use murmur_types::models::Channel;

use crate::auth::{AppState, AppStateInner};
use crate::error::{ApiError, blocking};
use crate::middleware::Identity;

/// Owner recorded on channels the server creates itself.
pub const SYSTEM_OWNER: &str = "system";

/// Channels seeded on first start. They can never be deleted.
pub const DEFAULT_CHANNELS: [(&str, &str); 3] = [
    ("general", "General discussion"),
    ("random", "Off-topic conversation"),
    ("dev-team", "Development team chat"),
];

fn is_default_channel(name: &str) -> bool {
    DEFAULT_CHANNELS.iter().any(|(default, _)| *default == name)
}

/// Create the default channels when the store has none at all.
pub fn seed_default_channels(store: &dyn Store) -> murmur_db::Result<usize> {
    if !store.list_channels()?.is_empty() {
        return Ok(0);
    }

    for (name, description) in DEFAULT_CHANNELS {
        let mut channel = Channel::new(name, description, SYSTEM_OWNER, false);
        channel.members.clear();
        store.save_channel(&channel)?;
    }
    info!("Seeded {} default channels", DEFAULT_CHANNELS.len());
    Ok(DEFAULT_CHANNELS.len())
}

pub async fn create(
    state: &AppStateInner,
    creator: &str,
    req: CreateChannelRequest,
) -> Result<Channel, ApiError> {
    let name = req.name.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::Validation("channel name is required".into()));
    }

    let store = state.store.clone();
    let channel = Channel::new(&name, &req.description, creator, req.is_private);
    let saved = channel.clone();
    let created = blocking(move || {
        if store.get_channel(&saved.name)?.is_some() {
            return Ok(false);
        }
        store.save_channel(&saved)?;
        Ok(true)
    })
    .await?;

    if !created {
        return Err(ApiError::Conflict(format!("channel {} already exists", name)));
    }
    info!("{} created channel #{}", creator, name);
    Ok(channel)
}

pub async fn delete(state: &AppStateInner, requester: &str, name: &str) -> Result<(), ApiError> {
    if is_default_channel(name) {
        return Err(ApiError::Forbidden(format!("#{} cannot be deleted", name)));
    }

    let store = state.store.clone();
    let lookup = name.to_string();
    let channel = blocking(move || store.get_channel(&lookup))
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("channel {}", name)))?;

    if channel.created_by != requester && channel.created_by != SYSTEM_OWNER {
        return Err(ApiError::Forbidden(
            "only the channel creator can delete it".into(),
        ));
    }

    let store = state.store.clone();
    let target = name.to_string();
    if !blocking(move || store.delete_channel(&target)).await? {
        return Err(ApiError::NotFound(format!("channel {}", name)));
    }
    info!("{} deleted channel #{}", requester, name);
    Ok(())
}

pub async fn join(state: &AppStateInner, username: &str, name: &str) -> Result<Channel, ApiError> {
    let store = state.store.clone();
    let lookup = name.to_string();
    let member = username.to_string();
    let joined = blocking(move || {
        let Some(mut channel) = store.get_channel(&lookup)? else {
            return Ok(None);
        };
        if channel.add_member(&member) {
            store.save_channel(&channel)?;
        }
        Ok(Some(channel))
    })
    .await?;

    joined.ok_or_else(|| ApiError::NotFound(format!("channel {}", name)))
}

// -- Handlers --

pub async fn list_channels(State(state): State<AppState>) -> Result<Json<Vec<Channel>>, ApiError> {
    let store = state.store.clone();
    let channels = blocking(move || store.list_channels()).await?;
    Ok(Json(channels))
}

pub async fn create_channel(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = create(&state, &identity.user.username, req).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn delete_channel(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    delete(&state, &identity.user.username, &name).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn join_channel(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Path(name): Path<String>,
) -> Result<Json<Channel>, ApiError> {
    let channel = join(&state, &identity.user.username, &name).await?;
    Ok(Json(channel))
}
