mod address;
mod config;
mod db;
mod errors;
mod models;
mod routes;
mod state;

use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::address::kleber::KleberProvider;
use crate::address::persistence::AddressPersistenceManager;
use crate::address::provider::ProviderRegistry;
use crate::address::service::AddressValidationService;
use crate::address::store::PgProfileAddressStore;
use crate::config::Config;
use crate::db::create_pool;
use crate::routes::build_router;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting address API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url).await?;

    // Build the provider routing table. Constructed once here and injected;
    // tests register fakes through the same registry.
    let mut registry = ProviderRegistry::new();
    match config.kleber_request_key.clone() {
        Some(key) => {
            registry = registry.register("AU", Arc::new(KleberProvider::new(key)));
            info!("Registered Kleber provider for AU");
        }
        None => warn!("KLEBER_REQUEST_KEY not set; AU lookups will fall back to manual entry"),
    }

    let address_service = AddressValidationService::new(Arc::new(registry));
    let address_manager =
        AddressPersistenceManager::new(Arc::new(PgProfileAddressStore::new(db.clone())));

    // Build app state
    let state = AppState {
        db,
        address_service,
        address_manager,
        config: config.clone(),
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive()); // TODO: tighten CORS in production

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
