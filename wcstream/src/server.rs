//! HTTP server exposing sessions under `/stream/{token}`.

use crate::range::{resolve_range, ByteRange};
use crate::sessions::{SessionRegistry, SessionStatus};
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};

/// Builds the streaming router over a shared session registry.
pub fn stream_router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/stream/{token}", get(serve_session))
        .with_state(registry)
}

/// Owns the listener side of the streaming plane.
pub struct StreamServer {
    registry: Arc<SessionRegistry>,
    port: u16,
}

impl StreamServer {
    pub fn new(registry: Arc<SessionRegistry>, port: u16) -> Self {
        Self { registry, port }
    }

    /// Binds and serves until the task is aborted.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.port)).await?;
        info!("Streaming server listening on port {}", self.port);
        axum::serve(listener, stream_router(self.registry)).await
    }
}

async fn serve_session(
    State(registry): State<Arc<SessionRegistry>>,
    Path(token): Path<String>,
    headers: HeaderMap,
) -> Response {
    // Ended sessions answer 404 like unknown tokens: the URL a renderer
    // cached for a superseded session must stop working.
    let session = match registry.lookup(&token) {
        Some(s) if s.status == SessionStatus::Active => s,
        _ => {
            debug!("Rejecting stream request for unknown token {}", token);
            return StatusCode::NOT_FOUND.into_response();
        }
    };

    let mut file = match tokio::fs::File::open(&session.path).await {
        Ok(f) => f,
        Err(e) => {
            error!("Session {} source {:?} unreadable: {}", token, session.path, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let (total, modified) = match file.metadata().await {
        Ok(m) => (m.len(), m.modified().ok()),
        Err(e) => {
            error!("Session {} source {:?} unreadable: {}", token, session.path, e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok());
    let range = resolve_range(range_header, total);

    let content_type = mime_guess::from_path(&session.path)
        .first_or_octet_stream()
        .to_string();

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::ACCEPT_RANGES, "bytes");
    if let Some(modified) = modified {
        builder = builder.header(
            header::LAST_MODIFIED,
            DateTime::<Utc>::from(modified)
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string(),
        );
    }

    let response = match range {
        ByteRange::Unsatisfiable => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{}", total))
                .body(Body::empty())
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response());
        }
        ByteRange::Full => builder
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, total.to_string())
            .body(Body::from_stream(ReaderStream::new(file))),
        ByteRange::Partial { start, end } => {
            if let Err(e) = file.seek(SeekFrom::Start(start)).await {
                error!("Seek failed on {:?}: {}", session.path, e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
            let length = end - start + 1;
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(header::CONTENT_LENGTH, length.to_string())
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end, total),
                )
                .body(Body::from_stream(ReaderStream::new(file.take(length))))
        }
    };

    registry.record_progress(&token, range.length(total));

    response.unwrap_or_else(|e| {
        error!("Failed to build stream response: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    })
}
