use crate::{handlers, websocket};
use axum::{
    routing::{get, post},
    Router,
};
use robopilot_orchestrator::ControlSurface;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct ApiServer {
    control: Arc<ControlSurface>,
}

impl ApiServer {
    #[must_use]
    pub const fn new(control: Arc<ControlSurface>) -> Self {
        Self { control }
    }

    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/health", get(handlers::health))
            .route("/api/stats", get(handlers::get_stats))
            .route("/api/pause", post(handlers::pause))
            .route("/api/resume", post(handlers::resume))
            .route("/api/exit_all", post(handlers::exit_all))
            .route("/api/toggle_mode", post(handlers::toggle_mode))
            .route("/api/update_risk", post(handlers::update_risk))
            .route("/api/takeover", post(handlers::takeover))
            .route("/ws", get(websocket::websocket_handler))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
            .with_state(self.control.clone())
    }

    /// Starts the web server listening on the specified address.
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the address or serve requests.
    pub async fn serve(self, addr: &str, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("Control API listening on {}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                let _ = shutdown.changed().await;
            })
            .await?;

        Ok(())
    }
}
