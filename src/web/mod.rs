//! Web layer module
//!
//! HTTP interface for operators. Handlers stay thin and delegate to
//! [`StreamService`](crate::services::StreamService).

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::WebConfig, repositories::VideoRepository, services::StreamService,
    supervisor::ProcessSupervisor,
};

pub mod handlers;
pub mod responses;

pub use responses::{handle_error, handle_result, ApiResponse};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub streams: Arc<StreamService>,
    pub videos: Arc<VideoRepository>,
    pub supervisor: ProcessSupervisor,
}

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &WebConfig, state: AppState) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
        Ok(Self {
            app: create_router(state),
            addr,
        })
    }

    /// Serve until `shutdown` is cancelled
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("Web server listening on http://{}", self.addr);
        axum::serve(listener, self.app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;
        Ok(())
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api", api_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .route(
            "/streams",
            get(handlers::list_streams).post(handlers::create_stream),
        )
        .route(
            "/streams/:id",
            get(handlers::get_stream)
                .put(handlers::update_stream)
                .delete(handlers::delete_stream),
        )
        .route("/streams/:id/start", post(handlers::start_stream))
        .route("/streams/:id/stop", post(handlers::stop_stream))
        .route("/videos", get(handlers::list_videos))
}
