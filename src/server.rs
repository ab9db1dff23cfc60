use crate::config::{AppConfig, ResolvedProvider, StreamFormat};
use crate::logging::SharedLogger;
use crate::relay::{self, EventStream, RelayMetrics};
use crate::translate::chat_types::{ChatRequest, ChatResponse, TokenUsage};
use crate::translate::request::chat_to_completion;
use crate::translate::streaming::StreamEvent;
use crate::translate::upstream_types::CompletionRequest;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use futures::stream::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    /// Endpoint and secrets resolved once at startup; handlers never read the
    /// environment.
    pub provider: ResolvedProvider,
    pub pin: String,
    pub client: reqwest::Client,
    pub logger: SharedLogger,
    pub metrics: Arc<RelayMetrics>,
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Unmatched paths fall through to the pre-built SPA, with index.html
    // covering client-side routes.
    let index = state.config.static_dir.join("index.html");
    let spa = ServeDir::new(&state.config.static_dir).fallback(ServeFile::new(index));

    Router::new()
        .route("/api/chat", post(handle_chat))
        .route("/api/validate-pin", post(handle_validate_pin))
        .route("/health", get(handle_health))
        .fallback_service(spa)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn handle_chat(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            state
                .logger
                .error("server", format!("Failed to parse chat request: {}", e));
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid request body: {e}"),
            );
        }
    };

    let is_streaming = req.stream.unwrap_or(true);

    state.logger.info(
        "server",
        format!(
            "Chat request: messages={} streaming={}",
            req.messages.len(),
            is_streaming
        ),
    );

    let upstream = chat_to_completion(&req, &state.provider.model, is_streaming);

    if is_streaming {
        handle_streaming(state, upstream).await
    } else {
        handle_non_streaming(state, upstream).await
    }
}

async fn handle_streaming(state: Arc<AppState>, upstream: CompletionRequest) -> Response {
    let events = match relay::open_stream(
        &upstream,
        &state.provider,
        state.config.idle_read_timeout(),
        &state.client,
        &state.logger,
        &state.metrics,
    )
    .await
    {
        Ok(s) => s,
        Err(e) => {
            state
                .logger
                .error("server", format!("Relay setup error: {}", e));
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    match state.config.stream.format {
        StreamFormat::Text => text_stream_response(events),
        StreamFormat::Sse => sse_stream_response(events),
    }
}

/// Chunked plain-text body of concatenated deltas, the framing the chat
/// widget consumes. Once headers are out a failure can only terminate the
/// body.
fn text_stream_response(events: EventStream) -> Response {
    let body_stream = events.filter_map(|result| async move {
        match result {
            Ok(StreamEvent::TextDelta { text }) => {
                Some(Ok::<Bytes, std::io::Error>(Bytes::from(text)))
            }
            Ok(StreamEvent::Finish { .. }) => None,
            Err(e) => Some(Err(std::io::Error::other(e.to_string()))),
        }
    });

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(body_stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Provider-native-style framing: each relay event as a named SSE event.
fn sse_stream_response(events: EventStream) -> Response {
    let event_stream = events.map(|result| -> std::result::Result<Event, Infallible> {
        match result {
            Ok(ev) => {
                let data = serde_json::to_string(&ev).unwrap_or_else(|_| "{}".to_string());
                Ok(Event::default().event(ev.event_name()).data(data))
            }
            Err(e) => Ok(Event::default()
                .event("error")
                .data(serde_json::json!({ "error": e.to_string() }).to_string())),
        }
    });

    Sse::new(event_stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn handle_non_streaming(state: Arc<AppState>, upstream: CompletionRequest) -> Response {
    match relay::complete(&upstream, &state.provider, &state.client, &state.logger).await {
        Ok(resp) => {
            let text = resp
                .choices
                .first()
                .and_then(|c| c.message.content.clone())
                .unwrap_or_default();
            let usage = resp.usage.map(|u| TokenUsage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            });
            Json(ChatResponse {
                response: text,
                usage,
            })
            .into_response()
        }
        Err(e) => {
            state.logger.error("server", format!("Relay error: {}", e));
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Debug, Deserialize)]
struct PinRequest {
    pin: String,
}

async fn handle_validate_pin(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let req: PinRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "Invalid request".to_string());
        }
    };

    // Plain equality against the configured secret; the code itself stays out
    // of the logs.
    let valid = req.pin == state.pin;
    state
        .logger
        .info("gate", format!("PIN attempt: valid={}", valid));

    Json(serde_json::json!({ "valid": valid })).into_response()
}

async fn handle_health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "relay": state.metrics.snapshot(),
    }))
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}
