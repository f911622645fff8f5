//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with all handlers
//! - Wire up middleware (tracing, request timeout)
//! - Serve with graceful shutdown

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::executor::RotatingExecutor;
use crate::http::handlers;
use crate::ratelimit::RateLimitProbe;
use crate::tokens::{Provider, TokenManager};
use crate::upstream::ChatClient;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenManager>,
    pub executors: Arc<HashMap<Provider, Arc<RotatingExecutor>>>,
    pub probes: Arc<HashMap<Provider, Arc<dyn RateLimitProbe>>>,
    pub clients: Arc<HashMap<Provider, ChatClient>>,
    pub default_models: Arc<HashMap<Provider, String>>,
}

/// HTTP server for the token-rotation service.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        Self {
            router: Self::build_router(state),
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/status", get(handlers::get_status))
            .route("/tokens", post(handlers::register_token))
            .route("/tokens/locked", get(handlers::list_locked_tokens))
            .route("/tokens/rotation", put(handlers::rotate_token))
            .route("/tokens/{id}/lock", put(handlers::lock_token))
            .route("/tokens/{id}/unlock", put(handlers::unlock_token))
            .route("/tokens/{id}/probe", get(handlers::probe_token))
            .route("/tokens/{id}", delete(handlers::delete_token))
            .route("/ai/process", post(handlers::process))
            .with_state(state)
            .layer(TimeoutLayer::new(Duration::from_secs(300)))
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await
    }
}
