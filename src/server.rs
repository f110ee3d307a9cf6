//! HTTP view endpoint serving stored tables as JSON.
//!
//! `GET /{group}/{name}` returns the rows of one table; everything else
//! is a 404. The handler is a pure projection over the viewer port — no
//! update logic is reachable from here.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::domain::TableId;
use crate::ports::{JsonViewer, Module, ModuleError, ViewError};

type Viewer = Arc<dyn JsonViewer>;

/// Central error type for the view API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what, "NOT_FOUND"),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".to_string(),
                "INTERNAL_ERROR",
            ),
        };

        let body = Json(json!({
            "error": code,
            "message": message,
        }));

        (status, body).into_response()
    }
}

pub fn router(viewer: Viewer, request_timeout: Duration) -> Router {
    Router::new()
        .route("/{group}/{name}", get(view_table))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
        .with_state(viewer)
}

async fn view_table(
    State(viewer): State<Viewer>,
    Path((group, name)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let id = TableId::new(group, name);

    let body = viewer.view_json(&id).await.map_err(|err| match err {
        ViewError::NotFound(id) => ApiError::NotFound(id.to_string()),
        ViewError::Storage(cause) => {
            warn!(%id, %cause, "view failed");
            ApiError::Internal
        }
    })?;

    Ok((
        [(header::CONTENT_TYPE, "application/json; charset=utf-8")],
        body,
    )
        .into_response())
}

/// Lifecycle wrapper around the axum listener.
pub struct Server {
    addr: SocketAddr,
    viewer: Viewer,
    request_timeout: Duration,
    shutdown: CancellationToken,
    handle: Option<tokio::task::JoinHandle<Result<(), std::io::Error>>>,
}

impl Server {
    pub fn new(addr: SocketAddr, viewer: Viewer, request_timeout: Duration) -> Self {
        Self {
            addr,
            viewer,
            request_timeout,
            shutdown: CancellationToken::new(),
            handle: None,
        }
    }
}

#[async_trait]
impl Module for Server {
    fn name(&self) -> &'static str {
        "server"
    }

    async fn start(&mut self) -> Result<(), ModuleError> {
        let listener = TcpListener::bind(self.addr)
            .await
            .map_err(|err| ModuleError::Start(format!("bind {}: {err}", self.addr)))?;
        info!(addr = %self.addr, "listening");

        let app = router(Arc::clone(&self.viewer), self.request_timeout);
        let token = self.shutdown.clone();
        self.handle = Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(token.cancelled_owned())
                .await
        }));

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), ModuleError> {
        self.shutdown.cancel();

        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle
            .await
            .map_err(|err| ModuleError::Shutdown(format!("server task panicked: {err}")))?
            .map_err(|err| ModuleError::Shutdown(err.to_string()))
    }
}
