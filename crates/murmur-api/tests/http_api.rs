use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use murmur_api::auth::{AppState, AppStateInner};
use murmur_api::channels::seed_default_channels;
use murmur_api::routes::router;
use murmur_db::{Database, Store};
use murmur_gateway::hub::Hub;
use murmur_gateway::presence::Presence;
use murmur_gateway::session::SessionConfig;

fn app() -> (Router, AppState) {
    let store: Arc<dyn Store> = Arc::new(Database::open_in_memory().unwrap());
    seed_default_channels(store.as_ref()).unwrap();
    let presence = Presence::new(store.clone());
    let state = AppStateInner::new(store, Hub::new(), presence, SessionConfig::default());
    (router(state.clone()), state)
}

async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let req = match body {
        Some(body) => req
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => req.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register(app: &Router, email: &str) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "email": email, "password": "hunter22" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn register_login_and_me() {
    let (app, _) = app();
    register(&app, "alice@example.com").await;

    let (status, body) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": "alice@example.com", "password": "hunter22" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], "alice");
    assert_eq!(body["user"]["isOnline"], true);
    let token = body["token"].as_str().unwrap();

    let (status, me) = call(&app, "GET", "/auth/me", Some(token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], "alice@example.com");

    let (status, body) = call(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "email": "alice@example.com", "password": "nope-nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn protected_routes_need_a_token() {
    let (app, _) = app();

    let (status, _) = call(&app, "GET", "/channels", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/channels", Some("made-up"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_revokes_the_token() {
    let (app, state) = app();
    let token = register(&app, "alice@example.com").await;

    let (status, _) = call(&app, "POST", "/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = call(&app, "GET", "/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(!state.presence.get("alice").await.unwrap().is_online);
}

#[tokio::test]
async fn invalid_status_is_a_bad_request() {
    let (app, _) = app();
    let token = register(&app, "alice@example.com").await;

    let (status, _) = call(
        &app,
        "PUT",
        "/users/me/status",
        Some(&token),
        Some(json!({ "status": "busy" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = call(
        &app,
        "PUT",
        "/users/me/status",
        Some(&token),
        Some(json!({ "status": "away" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "away");

    let (_, users) = call(&app, "GET", "/users", Some(&token), None).await;
    assert_eq!(users[0]["status"], "away");
}

#[tokio::test]
async fn send_message_then_read_history() {
    let (app, _) = app();
    let token = register(&app, "alice@example.com").await;

    let (status, sent) = call(
        &app,
        "POST",
        "/channels/general/messages",
        Some(&token),
        Some(json!({ "text": "hello there" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(sent["user"], "alice");
    assert_eq!(sent["isPost"], false);

    let (status, log) = call(&app, "GET", "/channels/general/messages?limit=10", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log.as_array().unwrap().len(), 1);
    assert_eq!(log[0]["id"], sent["id"]);

    let (status, _) = call(
        &app,
        "POST",
        "/channels/nowhere/posts",
        Some(&token),
        Some(json!({ "text": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reaction_on_unknown_message_is_not_found() {
    let (app, _) = app();
    let token = register(&app, "alice@example.com").await;

    let uri = format!("/channels/general/messages/{}/reactions", uuid::Uuid::new_v4());
    let (status, _) = call(&app, "POST", &uri, Some(&token), Some(json!({ "emoji": "👍" }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn channel_lifecycle() {
    let (app, _) = app();
    let alice = register(&app, "alice@example.com").await;
    let bob = register(&app, "bob@example.com").await;

    let (status, created) = call(
        &app,
        "POST",
        "/channels",
        Some(&alice),
        Some(json!({ "name": "rust", "description": "crabs", "isPrivate": false })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["createdBy"], "alice");

    let (status, _) = call(&app, "POST", "/channels", Some(&bob), Some(json!({ "name": "rust" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, joined) = call(&app, "POST", "/channels/rust/join", Some(&bob), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(joined["members"], json!(["alice", "bob"]));

    let (status, _) = call(&app, "DELETE", "/channels/rust", Some(&bob), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "DELETE", "/channels/general", Some(&alice), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = call(&app, "DELETE", "/channels/rust", Some(&alice), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, channels) = call(&app, "GET", "/channels", Some(&alice), None).await;
    assert_eq!(channels.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn register_rejects_a_taken_username() {
    let (app, state) = app();
    register(&app, "alice@example.com").await;
    let owner = state.presence.get("alice").await.unwrap();

    let (status, body) = call(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "email": "alice@evil.com", "password": "attacker1" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.get("token").is_none());

    let alice = state.presence.get("alice").await.unwrap();
    assert_eq!(alice.id, owner.id);
    assert_eq!(alice.email, "alice@example.com");
}
