//! HTTP surface: metrics ingest, check queries and the reload hook.

mod handlers;

pub use handlers::*;

use crate::engine::Engine;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub struct Server {
    state: AppState,
    port: u16,
}

impl Server {
    pub fn new(engine: Arc<Engine>, port: u16) -> Self {
        Self {
            state: AppState { engine },
            port,
        }
    }

    /// Build the router with all routes.
    pub fn routes(&self) -> Router {
        let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

        Router::new()
            .route("/metrics", post(handlers::handle_ingest_metrics))
            .route("/api/targets/{id}/checks", get(handlers::handle_list_checks))
            .route("/api/targets/{id}/checks/latest", get(handlers::handle_latest_check))
            .route("/api/reload", post(handlers::handle_reload))
            .route("/healthz", get(handlers::handle_healthz))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Serve until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Web server listening on {}", addr);

        axum::serve(listener, self.routes())
            .with_graceful_shutdown(shutdown)
            .await
    }
}
