//! HTTP API served with axum.
//!
//! Endpoint names and JSON shapes follow the legacy hub API so the existing
//! web client keeps working.

pub mod handlers;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::auth::Authenticator;
use crate::chat::ChatService;
use crate::config::Config;
use crate::tools::credentials::CredentialStore;

/// Shared state of every request handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: Authenticator,
    pub chat: ChatService,
    pub credentials: Arc<CredentialStore>,
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);
    if allowed_origins.is_empty() {
        return base.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {o}");
                None
            }
        })
        .collect();
    base.allow_origin(AllowOrigin::list(origins))
}

pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.server.allowed_origins);
    Router::new()
        .route("/health", get(handlers::health))
        .route("/chat_with_agent", post(handlers::chat_with_agent))
        .route("/get_agent_configs", get(handlers::get_agent_configs))
        .route("/update_agent_config", post(handlers::update_agent_config))
        .route("/get_all_agents", get(handlers::get_all_agents))
        .route("/create_agent", post(handlers::create_agent))
        .route(
            "/update_agent",
            post(handlers::update_agent).put(handlers::update_agent),
        )
        .route(
            "/delete_agent",
            post(handlers::delete_agent).delete(handlers::delete_agent),
        )
        .route("/migrate_legacy_agents", post(handlers::migrate_legacy_agents))
        .route("/get_available_mcp_tools", get(handlers::get_available_mcp_tools))
        .route("/mcp_status", get(handlers::mcp_status))
        .route(
            "/conversations",
            get(handlers::list_conversations).post(handlers::create_conversation),
        )
        .route(
            "/conversations/:id",
            get(handlers::get_conversation).delete(handlers::delete_conversation),
        )
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn serve(state: AppState) -> Result<()> {
    let bind = state.config.server.bind.clone();
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    info!("HTTP API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("HTTP server failed")?;
    Ok(())
}
