//! HTTP surface of the hub
//!
//! ## Endpoints
//!
//! - `GET /api/v1/health` - Storage health, no authentication
//! - `POST /api/v1/results` - Submit a probe result (bearer token)
//! - `POST /save-result` - Same as above, path used by existing probes
//! - `POST /api/v1/monitors` - Register a monitor (bearer token)
//! - `GET /api/v1/monitors/:id` - Monitor with its open incidents (bearer token)
//! - `POST /api/v1/monitors/:id/recipients` - Add an alert recipient (bearer token)

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use state::ApiState;

use axum::{
    Router,
    routing::{get, post},
};
use std::net::SocketAddr;
use tracing::info;

/// API server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address (e.g., "0.0.0.0:8080")
    pub bind_addr: SocketAddr,

    /// Token probes present when submitting results
    pub internal_secret: String,

    /// Enable CORS for browser clients
    pub enable_cors: bool,
}

/// Build the router without binding a socket
pub fn router(config: &ApiConfig, state: ApiState) -> Router {
    use tower_http::cors::{Any, CorsLayer};
    use tower_http::trace::TraceLayer;

    let protected = Router::new()
        .route("/api/v1/results", post(routes::results::save_result))
        .route("/save-result", post(routes::results::save_result))
        .route("/api/v1/monitors", post(routes::monitors::create_monitor))
        .route("/api/v1/monitors/:id", get(routes::monitors::get_monitor))
        .route(
            "/api/v1/monitors/:id/recipients",
            post(routes::monitors::add_recipient),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            config.internal_secret.clone(),
            middleware::auth::auth_middleware,
        ));

    let mut app = Router::new()
        .route("/api/v1/health", get(routes::health::health_check))
        .merge(protected)
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    if config.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}

/// Spawn the API server
///
/// This starts an Axum HTTP server in a background task.
/// Returns the server's local address.
pub async fn spawn_api_server(config: ApiConfig, state: ApiState) -> anyhow::Result<SocketAddr> {
    info!("starting API server on {}", config.bind_addr);

    let app = router(&config, state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    let addr = listener.local_addr()?;

    info!("API server listening on {}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("API server error: {}", e);
        }
    });

    Ok(addr)
}
