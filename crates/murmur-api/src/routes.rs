use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    middleware,
    response::Response,
    routing::{delete, get, post, put},
};
use serde::Deserialize;
use tracing::warn;

use murmur_gateway::session::run_session;

use crate::auth::{self, AppState};
use crate::error::ApiError;
use crate::middleware::require_auth;
use crate::{channels, messages, reactions, users};

/// Every HTTP route plus the gateway upgrade, without transport layers.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/ws", get(ws_upgrade));

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/auth/me", get(auth::me))
        .route("/users", get(users::list_users))
        .route("/users/me/status", put(users::update_status))
        .route("/channels", get(channels::list_channels).post(channels::create_channel))
        .route("/channels/{name}", delete(channels::delete_channel))
        .route("/channels/{name}/join", post(channels::join_channel))
        .route(
            "/channels/{name}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/channels/{name}/posts", post(messages::send_post))
        .route(
            "/channels/{name}/messages/{message_id}/reactions",
            post(reactions::toggle_reaction),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    pub token: String,
}

/// Browsers cannot set headers on a WebSocket handshake, so the token rides in the query.
async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let Some(user) = state.presence.resolve_token(&query.token).await else {
        warn!("Rejected gateway upgrade with an unknown token");
        return Err(ApiError::Unauthorized);
    };

    let config = state.session;
    let hub = state.hub.clone();
    let presence = state.presence.clone();
    let store = state.store.clone();
    Ok(ws
        .max_message_size(config.max_frame_size)
        .on_upgrade(move |socket| run_session(socket, user.username, hub, presence, store, config)))
}
