//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{ChatHub, DbAdapter, ExpoPushAdapter, GoogleGeocoder, MemoryStore},
    config::{Config, StoreBackend},
    error::ApiError,
    web::{router, AppState},
};
use axum::http::{
    header::{ACCEPT, CONTENT_TYPE},
    HeaderName, HeaderValue, Method,
};
use lemontree_core::ports::{GeocodingService, PushNotificationService};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Initialize Outbound Service Adapters ---
    if config.google_maps_api_key.is_none() {
        warn!("GOOGLE_MAPS_API_KEY is not set; geocoding requests will be rejected upstream");
    }
    let geocoder: Arc<dyn GeocodingService> = Arc::new(GoogleGeocoder::new(
        config.geocoding_url.clone(),
        config.google_maps_api_key.clone(),
    ));
    let push: Arc<dyn PushNotificationService> =
        Arc::new(ExpoPushAdapter::new(config.expo_push_url.clone()));
    let hub = ChatHub::new();

    // --- 3. Connect the Store & Build the Shared AppState ---
    let app_state = match &config.store {
        StoreBackend::Postgres { database_url } => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;
            let db_adapter = Arc::new(DbAdapter::new(db_pool));
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            AppState::build(config.clone(), db_adapter, geocoder, push, hub)
        }
        StoreBackend::Memory { seed_file } => {
            let store = match seed_file {
                Some(path) => MemoryStore::load(path).await?,
                None => MemoryStore::new(),
            };
            info!("Using the in-memory document store");
            AppState::build(config.clone(), Arc::new(store), geocoder, push, hub)
        }
    };

    // --- 4. Create the Web Router ---
    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, ACCEPT, HeaderName::from_static("x-user-id")]);

    let app = router(Arc::new(app_state)).layer(cors);

    // --- 5. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
