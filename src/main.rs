mod auth;
mod config;
mod docs;
mod handlers;
mod ids;
mod models;
mod routes;
mod state;
mod store;
mod ws;

use config::Config;
use docs::ApiDoc;
use ids::IdGenerator;
use routes::create_router;
use state::AppState;
use std::panic;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use ws::Hub;

#[tokio::main]
async fn main() {
    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "tacticboard=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration; the capability secret is mandatory, so there is no
    // default to fall back to.
    let cfg = match Config::load() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return;
        }
    };

    // Initialize the store (memory or Postgres per DB_ENABLE)
    let store = match store::connect(&cfg).await {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to initialize store: {}", e);
            return;
        }
    };

    // The hub owns the room registry and the realtime fan-out. No state
    // folder is installed, so snapshot compaction stays dormant; embedders
    // wire one through Hub::new.
    let hub = Arc::new(Hub::new(cfg.clone(), store.clone(), None));
    tokio::spawn(hub.clone().run_snapshot_loop());

    let app_state = AppState {
        cfg: cfg.clone(),
        store,
        hub,
        ids: Arc::new(IdGenerator::new()),
    };

    // Combine all routes
    let app = create_router(app_state)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http());

    let listener = match tokio::net::TcpListener::bind(cfg.server_address()).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", cfg.server_address(), e);
            return;
        }
    };

    info!("🚀 Server running on http://{}", cfg.server_address());
    info!(
        "📡 WebSocket available at ws://{}/ws/room/{{id}}",
        cfg.server_address()
    );
    info!(
        "📚 Swagger UI available at http://{}/swagger",
        cfg.server_address()
    );

    if let Err(e) = axum::serve(listener, app).await {
        error!("Server failed: {}", e);
    }
}
