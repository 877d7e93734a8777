mod auth;
mod config;
mod docs;
mod handlers;
mod models;
mod routes;
mod store;
mod ws;

use axum::http::HeaderValue;
use axum::{routing::get, Router};
use std::panic;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use auth::IdentityVerifier;
use config::Config;
use docs::ApiDoc;
use routes::create_api_routes;
use store::{pg::PgStore, Store};
use ws::lifecycle::LifecycleCoordinator;
use ws::presence::PresenceTracker;
use ws::registry::SessionRegistry;
use ws::room_locks::RoomLocks;
use ws::router::EventRouter;

/// Process-wide coordination state, owned here and passed by reference into
/// every handler. Entries live exactly as long as their connections.
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub presence: Arc<PresenceTracker>,
    pub lifecycle: Arc<LifecycleCoordinator>,
    pub router: Arc<EventRouter>,
    pub verifier: IdentityVerifier,
}

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
            // Default to info level, but allow debug for our app
            "codehive=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });
    config::init_config(config.clone());

    // The coordination layer cannot run without its persistence collaborator
    // or a handshake secret.
    let Some(db_url) = &config.db_url else {
        error!("No database URL configured - set DB_URL");
        std::process::exit(1);
    };
    let store: Arc<dyn Store> = match PgStore::new(db_url).await {
        Ok(store) => {
            info!("Database initialized successfully");
            Arc::new(store)
        }
        Err(e) => {
            error!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };
    let Some(jwt_secret) = config.auth_jwt_secret.clone() else {
        error!("No JWT secret configured - set AUTH_JWT_SECRET");
        std::process::exit(1);
    };

    // Wire up the coordination layer
    let registry = Arc::new(SessionRegistry::new());
    let locks = Arc::new(RoomLocks::new());
    let presence = Arc::new(PresenceTracker::new(registry.clone(), store.clone()));
    let lifecycle = Arc::new(LifecycleCoordinator::new(
        registry.clone(),
        presence.clone(),
        store.clone(),
        locks.clone(),
    ));
    let router = Arc::new(EventRouter::new(registry.clone(), store.clone(), locks));
    let verifier = IdentityVerifier::new(jwt_secret, store);
    let state = Arc::new(AppState {
        registry,
        presence,
        lifecycle,
        router,
        verifier,
    });

    // Create API routes
    let api_routes = create_api_routes(state.clone());

    let cors = match &config.cors_origins {
        Some(origins) if !config.is_development() => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        }
        _ => CorsLayer::permissive(),
    };

    // Combine all routes
    let app_routes = Router::new()
        // The real-time endpoint
        .route("/ws", get(ws::handler::ws_handler))
        .with_state(state)
        // Mount API routes
        .nest("/api", api_routes)
        // Mount Swagger UI
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", ApiDoc::openapi()))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let listener = tokio::net::TcpListener::bind(config.server_address())
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", config.server_address()));

    info!("🚀 Server running on http://{}", config.server_address());
    info!("📡 WebSocket available at ws://{}/ws", config.server_address());
    info!(
        "📚 Swagger UI available at http://{}/swagger",
        config.server_address()
    );

    axum::serve(listener, app_routes)
        .await
        .expect("Server failed to start");
}
