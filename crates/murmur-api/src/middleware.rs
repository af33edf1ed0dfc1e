use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};

use murmur_types::models::User;

use crate::auth::AppState;
use crate::error::ApiError;

/// The caller behind a bearer token, inserted as a request extension.
#[derive(Debug, Clone)]
pub struct Identity {
    pub user: User,
    pub token: String,
}

/// Resolve the bearer token against the presence directory.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(auth) = bearer.ok_or(ApiError::Unauthorized)?;
    let token = auth.token();

    let user = state
        .presence
        .resolve_token(token)
        .await
        .ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(Identity {
        user,
        token: token.to_string(),
    });
    Ok(next.run(req).await)
}
