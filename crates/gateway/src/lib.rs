//! HTTP API gateway for Afina.
//!
//! Serves the chat stream, document uploads and file management under
//! `/api`. Built on Axum.

pub mod api;

use afina_agent::ChatRuntime;
use afina_config::{AppConfig, GatewayConfig};
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderValue, Method, header};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub use api::{ApiState, SharedApiState, api_router};

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(%origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

/// Build the full router.
///
/// Layers: CORS restricted to the configured origins, a request body limit
/// sized for uploads, and HTTP trace logging.
pub fn build_router(state: SharedApiState, config: &GatewayConfig) -> Router {
    Router::new()
        .nest("/api", api_router(state))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(cors_layer(&config.allowed_origins))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the HTTP server.
pub async fn start(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let runtime = Arc::new(ChatRuntime::from_config(&config)?);
    let state = Arc::new(ApiState::new(runtime));
    let app = build_router(state, &config.gateway);

    info!(
        addr = %addr,
        uploads = %config.uploads.dir.display(),
        "Gateway starting"
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
