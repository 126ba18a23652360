//! HTTP chat endpoint.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/chat` | Answer the last user turn (whole JSON or NDJSON stream) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! When the request has `"stream": true` (the default) the response is
//! `application/x-ndjson`: one chunk object per line. The first line always
//! carries the retrieval trace under `choices[0].context`. Failures before
//! the stream opens get an error status. A failure after that closes the
//! body without an error line, so a client sees a clean prefix of chunks and
//! never a partial error object.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "invalid query: ..." } }
//! ```
//!
//! Error codes: `bad_request` (400), `embedding_mismatch` (502),
//! `provider_unavailable` (503), `timeout` (504), `store_unavailable` (503).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    body::{Body, Bytes},
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::StreamExt;
use serde::Serialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use catalog_rag_core::error::{ProviderError, RagError};
use catalog_rag_core::pipeline::{ChatPipeline, ChatRequest};

use crate::config::Config;
use crate::context::AppContext;

pub const NDJSON: &str = "application/x-ndjson";

/// Start the server on `[server].bind` and run until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let ctx = AppContext::from_config(config).await?;
    let listener = TcpListener::bind(&config.server.bind).await?;

    println!("Chat server listening on http://{}", config.server.bind);
    serve(listener, ctx.pipeline).await
}

/// Serve on an already-bound listener.
pub async fn serve(listener: TcpListener, pipeline: Arc<ChatPipeline>) -> anyhow::Result<()> {
    axum::serve(listener, router(pipeline)).await?;
    Ok(())
}

pub fn router(pipeline: Arc<ChatPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(handle_chat))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(pipeline)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    fn body(&self) -> ErrorBody {
        ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message.clone(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body())).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let message = err.to_string();
        let (status, code) = match &err {
            RagError::InvalidQuery(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            RagError::EmbeddingDimensionMismatch { .. } => {
                (StatusCode::BAD_GATEWAY, "embedding_mismatch")
            }
            RagError::ProviderUnavailable {
                source: ProviderError::Timeout(_),
                ..
            } => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            RagError::ProviderUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "provider_unavailable")
            }
            RagError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable")
            }
        };
        if status.is_server_error() {
            tracing::warn!(code, error = %message, "chat request failed");
        }
        AppError {
            status,
            code,
            message,
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /chat ============

async fn handle_chat(
    State(pipeline): State<Arc<ChatPipeline>>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, AppError> {
    let Json(request) = payload.map_err(|e| bad_request(e.body_text()))?;

    tracing::debug!(
        turns = request.messages.len(),
        stream = request.stream,
        mode = request.context.overrides.retrieval_mode().as_str(),
        "chat request"
    );

    if !request.stream {
        let completion = pipeline.run(&request).await?;
        return Ok(Json(completion).into_response());
    }

    let chunks = pipeline.run_stream(&request).await?;
    let lines = chunks.filter_map(|item| async move {
        match item {
            Ok(chunk) => Some(Ok::<_, Infallible>(ndjson_line(&chunk))),
            Err(err) => {
                tracing::warn!(error = %err, "chat stream closed early");
                None
            }
        }
    });

    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON)
        .body(Body::from_stream(lines))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response()))
}

fn ndjson_line<T: Serialize>(value: &T) -> Bytes {
    let mut line = serde_json::to_vec(value).unwrap_or_default();
    line.push(b'\n');
    Bytes::from(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catalog_rag_core::error::StoreError;

    #[test]
    fn test_error_mapping() {
        let cases = [
            (
                RagError::InvalidQuery("empty".into()),
                StatusCode::BAD_REQUEST,
                "bad_request",
            ),
            (
                RagError::EmbeddingDimensionMismatch {
                    expected: 3,
                    actual: 2,
                },
                StatusCode::BAD_GATEWAY,
                "embedding_mismatch",
            ),
            (
                RagError::ProviderUnavailable {
                    stage: "generation",
                    source: ProviderError::Timeout("60s".into()),
                },
                StatusCode::GATEWAY_TIMEOUT,
                "timeout",
            ),
            (
                RagError::ProviderUnavailable {
                    stage: "generation",
                    source: ProviderError::Status {
                        status: 429,
                        body: "slow down".into(),
                    },
                },
                StatusCode::SERVICE_UNAVAILABLE,
                "provider_unavailable",
            ),
            (
                RagError::StoreUnavailable(StoreError::Unavailable("pool closed".into())),
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
            ),
        ];
        for (err, status, code) in cases {
            let app = AppError::from(err);
            assert_eq!(app.status, status);
            assert_eq!(app.code, code);
        }
    }

    #[test]
    fn test_ndjson_line_is_terminated() {
        let line = ndjson_line(&serde_json::json!({"a": 1}));
        assert_eq!(&line[..], b"{\"a\":1}\n");
    }
}
