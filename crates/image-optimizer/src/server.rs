//! HTTP server for the image optimizer
//!
//! Provides `/` (process an image), `/clear-cache`, and `/health`.

use crate::error::Result;
use crate::processor::ImageProcessor;
use crate::types::HealthResponse;
use crate::validation::{validate, ImageQuery};
use axum::{
    extract::{Query, State},
    http::{header, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use image_cache::Sweeper;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

const CACHE_CONTROL: &str = "public, max-age=86400";
const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// Shared state for the HTTP server
pub struct ServerState {
    pub processor: ImageProcessor,
    pub sweeper: Sweeper,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(processor: ImageProcessor, sweeper: Sweeper) -> Self {
        Self {
            processor,
            sweeper,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// CORS for the configured origins; `*` allows any
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET])
            .allow_headers(Any)
    }
}

/// Create the HTTP router
pub fn create_router(state: SharedState, cors: CorsLayer) -> Router {
    Router::new()
        .route("/", get(get_image))
        .route("/clear-cache", get(clear_cache))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// Serve until `shutdown` is cancelled, then drain in-flight requests
pub async fn start_server(
    state: SharedState,
    port: u16,
    cors: CorsLayer,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let router = create_router(state, cors);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

/// Resize and re-encode the image named by the query
async fn get_image(
    State(state): State<SharedState>,
    Query(query): Query<ImageQuery>,
) -> Result<Response> {
    let descriptor = validate(&query)?;
    let processed = state.processor.process(&descriptor).await?;

    Ok((
        [
            (header::CONTENT_TYPE, processed.format.content_type()),
            (header::CACHE_CONTROL, CACHE_CONTROL),
            (X_CACHE, processed.status.as_str()),
        ],
        processed.data,
    )
        .into_response())
}

async fn clear_cache(State(state): State<SharedState>) -> Result<StatusCode> {
    info!("Clearing cache");
    state.processor.store().clear().await?;
    Ok(StatusCode::OK)
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        cache: state.processor.store().stats(),
        sweeper: state.sweeper.stats().await,
    })
}
