// 🌐 REST API with Axum

pub mod error;
pub mod routes;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use rusqlite::Connection;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::chat::{AssistantApi, OpenAiAssistant};
use crate::config::Config;
use crate::db::open_database;
use crate::relay::ContactRelay;

pub use error::ApiError;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: Arc<Config>,
    pub assistant: Option<Arc<dyn AssistantApi>>,
    pub relay: Option<Arc<ContactRelay>>,
}

impl AppState {
    /// Build state from config; the assistant and relay are optional and
    /// their routes answer with an error when they are not configured.
    pub fn new(conn: Connection, config: Config) -> Self {
        let assistant: Option<Arc<dyn AssistantApi>> = match OpenAiAssistant::from_config(&config) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                warn!("Assistant routes disabled: {}", e);
                None
            }
        };

        let relay = match ContactRelay::from_config(&config) {
            Ok(relay) => Some(Arc::new(relay)),
            Err(e) => {
                warn!("Contact route disabled: {}", e);
                None
            }
        };

        AppState {
            db: Arc::new(Mutex::new(conn)),
            config: Arc::new(config),
            assistant,
            relay,
        }
    }

    pub fn with_assistant(mut self, assistant: Arc<dyn AssistantApi>) -> Self {
        self.assistant = Some(assistant);
        self
    }

    /// Run `f` with the database locked. The guard never outlives the call,
    /// so handlers can await afterwards.
    pub fn with_db<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut Connection) -> Result<T, ApiError>,
    {
        let mut conn = self
            .db
            .lock()
            .map_err(|_| ApiError::Internal(anyhow::anyhow!("database lock poisoned")))?;
        f(&mut *conn)
    }
}

/// API Response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(routes::health_check))
        .route("/realtors", post(routes::create_realtor))
        .route("/realtors/:id/buyers", get(routes::realtor_buyers))
        .route("/realtors/:id/invites", get(routes::realtor_invites))
        .route("/invites", post(routes::create_invite))
        .route("/invites/:code", get(routes::validate_invite).delete(routes::revoke_invite))
        .route("/signup", post(routes::signup))
        .route("/buyers/:id", get(routes::get_buyer))
        .route("/buyers/:id/steps/:step", post(routes::complete_step))
        .route("/chat/threads", post(routes::create_thread))
        .route("/chat/threads/:thread_id/messages", post(routes::post_message).get(routes::list_messages))
        .route("/chat/threads/:thread_id/runs/:run_id", get(routes::run_status))
        .route("/contact", post(routes::contact))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
}

pub async fn serve(config: Config) -> Result<()> {
    let conn = open_database(&config.db_path)?;
    info!(path = %config.db_path.display(), "database opened");

    let address = format!("0.0.0.0:{}", config.port);
    let app = router(AppState::new(conn, config));

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind to {}", address))?;
    info!("Server running on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
