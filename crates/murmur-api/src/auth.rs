use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{error, info, warn};

use murmur_db::Store;
use murmur_gateway::hub::Hub;
use murmur_gateway::presence::Presence;
use murmur_gateway::session::SessionConfig;
use murmur_types::api::{AuthResponse, LoginRequest, RegisterRequest};
use murmur_types::models::{Status, User};

use crate::error::{ApiError, blocking};
use crate::middleware::Identity;

pub type AppState = Arc<AppStateInner>;

/// Everything the HTTP handlers and the gateway upgrade share.
pub struct AppStateInner {
    pub store: Arc<dyn Store>,
    pub hub: Hub,
    pub presence: Presence,
    pub session: SessionConfig,
}

impl AppStateInner {
    pub fn new(store: Arc<dyn Store>, hub: Hub, presence: Presence, session: SessionConfig) -> AppState {
        Arc::new(Self {
            store,
            hub,
            presence,
            session,
        })
    }
}

const MIN_PASSWORD_LEN: usize = 6;

/// Validate an email and derive the username from its local part.
fn username_for(email: &str) -> Result<String, ApiError> {
    if !email.contains('@') {
        return Err(ApiError::Validation("invalid email format".into()));
    }
    if email.len() < 5 {
        return Err(ApiError::Validation("email is too short".into()));
    }

    match email.split('@').next() {
        Some(local) if !local.is_empty() => Ok(local.to_string()),
        _ => Err(ApiError::Validation("invalid email format".into())),
    }
}

pub async fn register_user(
    state: &AppStateInner,
    email: &str,
    password: &str,
) -> Result<AuthResponse, ApiError> {
    let username = username_for(email)?;
    if password.len() < MIN_PASSWORD_LEN {
        return Err(ApiError::Validation(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let store = state.store.clone();
    let lookup = email.to_string();
    if blocking(move || store.get_credentials(&lookup)).await?.is_some() {
        return Err(ApiError::Conflict(format!("a user with email {} already exists", email)));
    }
    ensure_username_owner(state, &username, email).await?;

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| {
            error!("Password hashing failed: {}", e);
            ApiError::Internal
        })?
        .to_string();

    let store = state.store.clone();
    let owned_email = email.to_string();
    blocking(move || store.save_credentials(&owned_email, &password_hash)).await?;

    info!("User signed up: {} ({})", username, email);
    sign_in(state, &username, email).await
}

pub async fn login_user(
    state: &AppStateInner,
    email: &str,
    password: &str,
) -> Result<AuthResponse, ApiError> {
    let username = username_for(email)?;
    if password.is_empty() {
        return Err(ApiError::Validation("password is required".into()));
    }

    let store = state.store.clone();
    let lookup = email.to_string();
    let saved_hash = blocking(move || store.get_credentials(&lookup))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&saved_hash).map_err(|e| {
        error!("Stored hash for {} is unreadable: {}", email, e);
        ApiError::Internal
    })?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| {
            warn!("Wrong password for {}", email);
            ApiError::Unauthorized
        })?;

    sign_in(state, &username, email).await
}

/// The username is the unique key, so a second email with the same local part
/// must not take it over.
async fn ensure_username_owner(
    state: &AppStateInner,
    username: &str,
    email: &str,
) -> Result<(), ApiError> {
    match state.presence.get(username).await {
        Some(existing) if existing.email != email => {
            warn!("{} tried to claim username {} owned by another email", email, username);
            Err(ApiError::Conflict(format!("username {} is already taken", username)))
        }
        _ => Ok(()),
    }
}

/// Mark the user online, hand out a token and tell every session.
async fn sign_in(
    state: &AppStateInner,
    username: &str,
    email: &str,
) -> Result<AuthResponse, ApiError> {
    // Checked again here: a concurrent signup may have taken the name since
    ensure_username_owner(state, username, email).await?;
    let user = state.presence.register_or_refresh(username, email).await;
    let token = state.presence.issue_token(username).await;
    state.hub.broadcast_status_update(username, Status::Online).await;

    info!("User logged in: {}", username);
    Ok(AuthResponse { user, token })
}

pub async fn logout_user(state: &AppStateInner, identity: &Identity) {
    let username = &identity.user.username;
    if state.presence.update_status(username, Status::Offline).await.is_some() {
        state.hub.broadcast_status_update(username, Status::Offline).await;
    }
    state.presence.revoke_token(&identity.token).await;
    info!("User logged out: {}", username);
}

// -- Handlers --

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = register_user(&state, &req.email, &req.password).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = login_user(&state, &req.email, &req.password).await?;
    Ok(Json(response))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> StatusCode {
    logout_user(&state, &identity).await;
    StatusCode::NO_CONTENT
}

pub async fn me(Extension(identity): Extension<Identity>) -> Json<User> {
    Json(identity.user)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use murmur_db::Database;

    pub(crate) fn test_state() -> AppState {
        let store: Arc<dyn Store> = Arc::new(Database::open_in_memory().unwrap());
        let presence = Presence::new(store.clone());
        AppStateInner::new(store, Hub::new(), presence, SessionConfig::default())
    }

    #[test]
    fn test_username_for() {
        assert_eq!(username_for("alice@example.com").unwrap(), "alice");
        assert!(matches!(username_for("alice"), Err(ApiError::Validation(_))));
        assert!(matches!(username_for("a@b"), Err(ApiError::Validation(_))));
        assert!(matches!(username_for("@example.com"), Err(ApiError::Validation(_))));
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let state = test_state();
        let registered = register_user(&state, "alice@example.com", "hunter22").await.unwrap();
        assert_eq!(registered.user.username, "alice");
        assert_eq!(
            state.presence.resolve_token(&registered.token).await.unwrap().username,
            "alice"
        );

        let logged_in = login_user(&state, "alice@example.com", "hunter22").await.unwrap();
        assert_eq!(logged_in.user.id, registered.user.id);
        assert_ne!(logged_in.token, registered.token);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates_and_short_passwords() {
        let state = test_state();
        assert!(matches!(
            register_user(&state, "alice@example.com", "short").await,
            Err(ApiError::Validation(_))
        ));

        register_user(&state, "alice@example.com", "hunter22").await.unwrap();
        assert!(matches!(
            register_user(&state, "alice@example.com", "hunter22").await,
            Err(ApiError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_register_cannot_take_over_an_existing_username() {
        let state = test_state();
        let owner = register_user(&state, "alice@example.com", "hunter22").await.unwrap();

        assert!(matches!(
            register_user(&state, "alice@evil.com", "attacker1").await,
            Err(ApiError::Conflict(_))
        ));
        assert!(matches!(
            login_user(&state, "alice@evil.com", "attacker1").await,
            Err(ApiError::Unauthorized)
        ));

        let alice = state.presence.get("alice").await.unwrap();
        assert_eq!(alice.id, owner.user.id);
        assert_eq!(alice.email, "alice@example.com");
        login_user(&state, "alice@example.com", "hunter22").await.unwrap();
    }

    #[tokio::test]
    async fn test_login_failures() {
        let state = test_state();
        register_user(&state, "alice@example.com", "hunter22").await.unwrap();

        assert!(matches!(
            login_user(&state, "alice@example.com", "wrong-password").await,
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            login_user(&state, "nobody@example.com", "hunter22").await,
            Err(ApiError::Unauthorized)
        ));
        assert!(matches!(
            login_user(&state, "alice@example.com", "").await,
            Err(ApiError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_login_broadcasts_online() {
        let state = test_state();
        let mut watcher = state.hub.register("bob").await;
        while watcher.outbound.try_recv().is_ok() {}

        register_user(&state, "alice@example.com", "hunter22").await.unwrap();

        let frame = watcher.outbound.try_recv().unwrap();
        let envelope: murmur_types::events::Envelope = serde_json::from_str(&frame).unwrap();
        assert_eq!(
            envelope,
            murmur_types::events::Envelope::StatusUpdate {
                username: "alice".into(),
                status: Status::Online
            }
        );
    }

    #[tokio::test]
    async fn test_logout_revokes_and_marks_offline() {
        let state = test_state();
        let auth = register_user(&state, "alice@example.com", "hunter22").await.unwrap();
        let identity = Identity {
            user: auth.user,
            token: auth.token.clone(),
        };

        logout_user(&state, &identity).await;
        assert!(state.presence.resolve_token(&auth.token).await.is_none());
        assert_eq!(state.presence.get("alice").await.unwrap().status, Status::Offline);
    }
}
