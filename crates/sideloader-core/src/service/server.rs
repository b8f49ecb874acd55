//! Web service: axum router over a TCP listener.
//!
//! `/<name>/<revision>` sideloads a pre-staged snap, `/list` passes snapd's
//! installed-snaps listing through. Every failure is a `400` error envelope.

use std::future::Future;
use std::sync::Arc;

use axum::extract::rejection::PathRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use tokio::net::TcpListener;
use tracing::{info, warn};

use sideloader_config::ServiceConfig;

use super::types::Envelope;
use crate::snapd::SnapClient;

/// Content type of responses passed through from snapd.
pub const JSON_HEADER: &str = "application/json; charset=UTF-8";

/// Error message for requests that do not name a snap and revision.
pub const URL_FORMAT_HINT: &str = "incorrect URL format, use: /snap-name/revision";

/// Message returned once a sideload has been handed to snapd.
pub const SUBMITTED: &str = "Snap submitted";

/// Errors from running the web service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared state accessible to all route handlers.
pub struct ServiceState {
    pub client: Arc<dyn SnapClient>,
}

impl ServiceState {
    pub fn new(client: Arc<dyn SnapClient>) -> Arc<Self> {
        Arc::new(Self { client })
    }
}

/// Build the axum router with all service routes.
pub fn router(state: Arc<ServiceState>) -> axum::Router {
    axum::Router::new()
        .route("/list", any(handle_list))
        .route("/{name}/{revision}", any(handle_sideload))
        .fallback(handle_bad_path)
        .with_state(state)
}

/// Bind the listener described by the `[service]` configuration section.
pub async fn bind(config: &ServiceConfig) -> Result<TcpListener, ServiceError> {
    let addr = format!("{}:{}", config.listen_addr, config.listen_port);
    TcpListener::bind(&addr)
        .await
        .map_err(|source| ServiceError::Bind { addr, source })
}

/// Serve the router on `listener` until `shutdown` completes.
pub async fn serve(
    listener: TcpListener,
    state: Arc<ServiceState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServiceError> {
    info!(addr = %listener.local_addr()?, "web service listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("web service shutting down");
        })
        .await?;
    Ok(())
}

/// Whether `name` is a single path component, so the staged files it names
/// stay inside the download directory.
pub fn valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains(['/', '\\'])
}

/// Whether `revision` is a non-negative integer written in decimal digits.
pub fn valid_revision(revision: &str) -> bool {
    !revision.is_empty() && revision.bytes().all(|b| b.is_ascii_digit())
}

// ── Route handlers ──────────────────────────────────────────────────────

async fn handle_sideload(
    State(state): State<Arc<ServiceState>>,
    path: Result<Path<(String, String)>, PathRejection>,
) -> Envelope {
    let Ok(Path((name, revision))) = path else {
        return Envelope::error(StatusCode::BAD_REQUEST, URL_FORMAT_HINT);
    };
    if !valid_name(&name) || !valid_revision(&revision) {
        return Envelope::error(StatusCode::BAD_REQUEST, URL_FORMAT_HINT);
    }

    match state.client.sideload(&name, &revision).await {
        Ok(()) => Envelope::message(SUBMITTED),
        Err(e) => {
            warn!(name = %name, revision = %revision, error = %e, "sideload failed");
            Envelope::error(StatusCode::BAD_REQUEST, e.to_string())
        }
    }
}

async fn handle_list(State(state): State<Arc<ServiceState>>) -> Response {
    match state.client.list().await {
        Ok(body) => ([(CONTENT_TYPE, JSON_HEADER)], body).into_response(),
        Err(e) => {
            warn!(error = %e, "listing snaps failed");
            Envelope::error(StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
    }
}

async fn handle_bad_path() -> Envelope {
    Envelope::error(StatusCode::BAD_REQUEST, URL_FORMAT_HINT)
}
