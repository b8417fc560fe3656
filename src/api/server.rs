/// HTTP server exposing the action endpoint
use crate::api::handlers::{handle_action, health_check, AppState};
use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use conclave_config::ApiConfig;
use conclave_dispatch::Orchestrator;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct ApiServer {
    config: ApiConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: ApiConfig, orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            config,
            state: AppState::new(orchestrator),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }

    /// Build the router with all routes
    pub fn router(&self) -> Router {
        let mut router = Router::new()
            .route("/health", get(health_check))
            .route("/api", post(handle_action))
            .with_state(self.state.clone());

        if self.config.enable_cors {
            let cors = CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any);
            router = router.layer(cors);
        }

        router.layer(TraceLayer::new_for_http())
    }

    /// Serve until the process is interrupted
    pub async fn run(self) -> Result<()> {
        self.run_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await
    }

    /// Serve until `shutdown_signal` resolves, then cancel in-flight work
    pub async fn run_with_shutdown(
        self,
        shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> Result<()> {
        let app = self.router();
        let bind_addr: SocketAddr = self
            .bind_address()
            .parse()
            .context("Invalid bind address")?;

        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", bind_addr))?;
        tracing::info!("Starting HTTP server on {}", bind_addr);

        let orchestrator = Arc::clone(self.state.actions.orchestrator());
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal.await;
                orchestrator.shutdown();
            })
            .await
            .context("Server error")?;

        Ok(())
    }
}
