//! Server Implementation
//!
//! 路由装配与 HTTP 服务器启动。

use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::core::tasks::BackgroundTasks;
use crate::core::{Config, ServerState};

/// 装配全部 API 路由
pub fn build_app() -> Router<ServerState> {
    Router::<ServerState>::new()
        .merge(crate::api::health::router())
        .merge(crate::api::device::router())
        .merge(crate::api::control::router())
        .merge(crate::api::machines::router())
        .merge(crate::api::sequences::router())
        .merge(crate::api::payments::router())
        .merge(crate::api::transactions::router())
        .merge(crate::api::events::router())
}

/// HTTP Server
pub struct Server {
    config: Config,
    state: Option<ServerState>,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            state: None,
        }
    }

    /// Create server with existing state (for tests and embedding)
    pub fn with_state(config: Config, state: ServerState) -> Self {
        Self {
            config,
            state: Some(state),
        }
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        // Create application state if not provided
        let state = match &self.state {
            Some(s) => s.clone(),
            None => ServerState::initialize(&self.config).await,
        };

        // Start background tasks (event worker + orphan lock recovery)
        let mut tasks = BackgroundTasks::new();
        state.start_background_tasks(&mut tasks);

        let app = build_app()
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state);

        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        tracing::info!("Relay supervision server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutting down...");
            })
            .await?;

        // Drain background tasks after the listener stops
        tasks.shutdown().await;

        Ok(())
    }
}
