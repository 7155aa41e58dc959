//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, OpenAiRecipeAdapter},
    config::Config,
    error::ApiError,
    web::{rest::ApiDoc, router, state::AppState},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::{
    extract::DefaultBodyLimit,
    http::{header::{ACCEPT, CONTENT_TYPE}, HeaderName, HeaderValue, Method},
    Router,
};
use homecare_core::{AnalyticsPorts, AnalyticsService, DeliveryService, InspectionService};
use mockable::DefaultClock;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;
    let db = Arc::new(DbAdapter::new(db_pool));
    info!("Running database migrations...");
    db.run_migrations().await?;
    info!("Database migrations complete.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);
    let recipe_adapter = Arc::new(OpenAiRecipeAdapter::new(
        openai_client,
        config.recipe_model.clone(),
    ));

    // --- 4. Build the Core Services and the Shared AppState ---
    let clock = Arc::new(DefaultClock);
    let delivery = DeliveryService::new(db.clone(), db.clone(), clock.clone())
        .with_retry_limit(config.pin_retry_limit);
    let inspection = InspectionService::new(db.clone(), db.clone(), db.clone(), clock.clone());
    let analytics = AnalyticsService::new(
        AnalyticsPorts {
            history: db.clone(),
            catalog: db.clone(),
            associations: db.clone(),
            drafts: db.clone(),
            jobs: db.clone(),
            synthesizer: recipe_adapter,
        },
        clock.clone(),
        config.analytics(),
    );

    let app_state = Arc::new(AppState {
        clock,
        delivery,
        inspection,
        analytics,
    });

    // --- 5. Create the Web Router ---
    let cors_origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!("Invalid CORS_ORIGIN '{}': {}", config.cors_origin, e))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static(api_lib::web::middleware::CALLER_HEADER),
        ]);

    // Evidence photos arrive base64-encoded in the JSON body.
    let api_router = router(app_state)
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(cors);

    // Merge the API router with the Swagger UI router for a complete application.
    let app = Router::new()
        .merge(api_router)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
