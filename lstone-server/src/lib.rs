//! LinkStone HTTP server.
//!
//! Thin axum layer over `lstone-core` that issues tokens, serves redirects
//! and manages leases, plus health and Prometheus endpoints.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod models;

use axum::{
    routing::{get, post, put},
    Router,
};
use lstone_core::{open_backend, Allocator, ShortenerConfig, StorageBackend};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub use config::{Args, BackendKind};
pub use handlers::AppError;

/// Shared handler state, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub backend: Arc<dyn StorageBackend>,
    pub allocator: Arc<Allocator>,
    pub config: Arc<ShortenerConfig>,
    /// Base for short links, without a trailing slash
    pub public_url: Arc<str>,
}

impl AppState {
    /// Open the configured backend and wire the allocator to it.
    pub fn new(config: ShortenerConfig, public_url: &str) -> lstone_core::Result<Self> {
        let backend = open_backend(&config)?;
        Self::with_backend(config, backend, public_url)
    }

    /// Use an already opened backend.
    pub fn with_backend(
        config: ShortenerConfig,
        backend: Arc<dyn StorageBackend>,
        public_url: &str,
    ) -> lstone_core::Result<Self> {
        let allocator = Allocator::from_config(&config, Arc::clone(&backend))?;
        Ok(Self {
            backend,
            allocator: Arc::new(allocator),
            config: Arc::new(config),
            public_url: Arc::from(public_url.trim_end_matches('/')),
        })
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/shorten", post(handlers::shorten_url))
        .route("/:token", get(handlers::redirect_url))
        .route(
            "/api/urls/:token",
            get(handlers::get_url).delete(handlers::delete_url),
        )
        .route(
            "/api/urls/:token/expiration",
            put(handlers::reassign_expiration),
        )
        .route("/api/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
