//! # hexsmith_server
//!
//! HTTP gateway for the build pipeline.
//!
//! | Method | Path        | Purpose                                   |
//! |--------|-------------|-------------------------------------------|
//! | POST   | `/build`    | plain build, or AI build when asked for   |
//! | POST   | `/ai-build` | always generate, then build               |
//! | GET    | `/download` | stream the canonical artifact             |
//! | GET    | `/code`     | read back the declared sources            |
//! | GET    | `/events`   | server-sent pipeline events               |
//! | GET    | `/`         | endpoint index                            |
//!
//! Build endpoints answer 200 on success and 500 on failure. Every response
//! carries permissive CORS headers.

pub mod error;
pub mod handlers;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    http::{header, Method},
    routing::{get, post},
    Router,
};
use hexsmith_core::BuildPipeline;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

pub use error::{ServerError, ServerResult};
pub use handlers::AppState;

/// Build the gateway router around a pipeline.
pub fn router(pipeline: Arc<BuildPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    Router::new()
        .route("/", get(handlers::index))
        .route("/build", post(handlers::build))
        .route("/ai-build", post(handlers::ai_build))
        .route("/download", get(handlers::download))
        .route("/code", get(handlers::code))
        .route("/events", get(handlers::events))
        .fallback(handlers::not_found)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(AppState::new(pipeline))
}

/// Serves the gateway on a local port.
pub struct GatewayServer {
    addr: SocketAddr,
    pipeline: Arc<BuildPipeline>,
}

impl GatewayServer {
    pub fn new(pipeline: Arc<BuildPipeline>) -> Self {
        let port = pipeline.settings().port;
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            pipeline,
        }
    }

    pub fn addr(mut self, addr: SocketAddr) -> Self {
        self.addr = addr;
        self
    }

    /// Run until the process is stopped.
    pub async fn start(self) -> ServerResult<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.addr,
                source,
            })?;

        info!("Server listening on http://localhost:{}", self.addr.port());
        info!("Project directory: {}", self.pipeline.layout().root().display());

        axum::serve(listener, router(self.pipeline)).await?;
        Ok(())
    }
}
