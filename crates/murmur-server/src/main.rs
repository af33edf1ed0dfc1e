mod config;

use std::sync::Arc;

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use murmur_api::auth::AppStateInner;
use murmur_api::channels::seed_default_channels;
use murmur_api::routes::router;
use murmur_db::{Database, Store};
use murmur_gateway::hub::Hub;
use murmur_gateway::presence::Presence;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "murmur=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let store: Arc<dyn Store> = Arc::new(Database::open(&config.db_path)?);

    // Nobody is connected yet, whatever the last run left behind
    let presence = Presence::new(store.clone());
    let loaded = presence.load_from_store().await?;
    let reset = presence.reset_all_to_offline().await;
    info!("Loaded {} users, {} reset to offline", loaded, reset);

    seed_default_channels(store.as_ref())?;

    let hub = Hub::with_capacity(config.queue_capacity);
    let state = AppStateInner::new(store, hub, presence, config.session);

    let app = router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Murmur server listening on {}", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
