//! Main Entrypoint for the Buddy API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing shared services (credentials, tool providers, speech).
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the liveness sweeper and the web server.
//! 5. Handling graceful shutdown of the server and every open session.

use anyhow::Context;
use buddy_api::{
    config::Config,
    router::create_router,
    state::AppState,
    ws::{
        connector::{VertexConnector, load_system_prompt},
        manager::SessionManager,
    },
};
use buddy_core::{
    CredentialProvider, GoogleTextToSpeech, ServiceAccountCredentials, ToolExecutor,
    tools::{ExchangeRateHost, GooglePlaces, OpenWeatherMap},
};
use std::{net::SocketAddr, sync::Arc};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

/// Waits for `Ctrl+C`, then cancels every session.
async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler.");
    }
    info!("Received shutdown signal. Shutting down gracefully...");
    shutdown.cancel();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let http = reqwest::Client::new();
    let credentials: Arc<dyn CredentialProvider> =
        Arc::new(ServiceAccountCredentials::new(config.credentials_path.clone()));

    let tools = Arc::new(ToolExecutor::standard(
        Arc::new(OpenWeatherMap::new(
            http.clone(),
            config.openweathermap_api_key.clone(),
        )),
        Arc::new(ExchangeRateHost::new(
            http.clone(),
            config.currency_api_key.clone(),
        )),
        Arc::new(GooglePlaces::new(
            http.clone(),
            config.google_place_api_key.clone(),
        )),
        config.tool_timeout,
    ));

    let prompt_template = load_system_prompt(&config.prompts_path).with_context(|| {
        format!(
            "system_prompt.md not found in {}",
            config.prompts_path.display()
        )
    })?;

    let upstream = Arc::new(VertexConnector::new(
        config.live_endpoint.clone(),
        config.model_resource(),
        credentials.clone(),
        tools.declarations(),
        prompt_template,
    ));
    let speech = Arc::new(GoogleTextToSpeech::new(http, credentials));

    let shutdown = CancellationToken::new();
    let sessions = SessionManager::new();
    let sweeper = sessions.spawn_sweeper(config.sweep_interval, shutdown.clone());

    let app_state = Arc::new(AppState {
        config: Arc::new(config.clone()),
        sessions,
        upstream,
        tools,
        speech,
        shutdown: shutdown.clone(),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        model = %config.model,
        endpoint = %config.live_endpoint,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
    .await?;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        error!(error = %e, "Liveness sweeper ended abnormally.");
    }

    info!("Server has shut down.");
    Ok(())
}
