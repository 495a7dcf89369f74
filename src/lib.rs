//! Core library for the InkFlow chat proxy. This module wires together the
//! request pipeline (dispatch, multipart decoding, payload building, webhook
//! failover), the admission layer and the HTTP handlers. Static file serving
//! lives in front of this service and is not handled here.

mod config;
pub mod connections;
pub mod error;
pub mod forward;
pub mod multipart;
pub mod payload;
pub mod tempfiles;

pub use config::AppConfig;
pub use connections::{spawn_housekeeping, ConnectionGuard, ConnectionRegistry};
pub use error::ProxyError;
pub use forward::{Sleeper, TokioSleeper, WebhookForwarder};

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::to_bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use tower_http::limit::RequestBodyLimitLayer;

use crate::multipart::boundary_from_content_type;
use crate::payload::build_payload;
use crate::tempfiles::TempFileSet;

/// Shared application state: immutable configuration plus the two pieces of
/// process-wide machinery (forwarder, connection registry).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub forwarder: Arc<WebhookForwarder>,
    pub registry: ConnectionRegistry,
    pub start_instant: Instant,
}

/// Build state from environment variables. See `AppConfig::from_env` for the
/// recognized variables.
pub fn build_state_from_env() -> anyhow::Result<AppState> {
    let config = AppConfig::from_env()?;
    let forwarder = Arc::new(WebhookForwarder::new(
        config.webhook_urls.clone(),
        config.request_timeout,
    ));
    let registry = ConnectionRegistry::new(config.max_concurrent_connections);
    Ok(AppState {
        config: Arc::new(config),
        forwarder,
        registry,
        start_instant: Instant::now(),
    })
}

/// Build the Axum router. Admission runs before every handler. The configured
/// body ceiling is enforced inside the handler so oversize requests get the
/// JSON error shape with CORS headers; the outer layer sits well above it as
/// a backstop against chunked uploads that never declare a Content-Length.
pub fn app(state: AppState) -> Router {
    let backstop = state.config.max_request_bytes().saturating_mul(2) as usize;
    Router::new()
        .route("/api/chat", post(chat_handler).options(preflight_handler))
        .route("/api/health", get(health_handler))
        .layer(middleware::from_fn_with_state(state.clone(), admission))
        .layer(RequestBodyLimitLayer::new(backstop))
        .with_state(state)
}

/// Admission check: refuse the connection outright once the ceiling is
/// reached. Excess requests never reach a handler. The guard is held for the
/// whole request and releases its registry slot on drop.
async fn admission(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(_guard) = state.registry.try_acquire() else {
        tracing::warn!(
            active = state.registry.active(),
            limit = state.registry.limit(),
            "refusing connection: too many active connections"
        );
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    };
    next.run(request).await
}

async fn chat_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    let started = Instant::now();
    let (parts, body) = request.into_parts();
    let origin = header_str(&parts.headers, header::ORIGIN);
    let user_agent = header_str(&parts.headers, header::USER_AGENT)
        .unwrap_or_else(|| "Unknown".to_string());
    let content_type =
        header_str(&parts.headers, header::CONTENT_TYPE).unwrap_or_default();
    let content_length = header_str(&parts.headers, header::CONTENT_LENGTH)
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(0);

    tracing::info!(
        client_ip = %addr.ip(),
        user_agent = %truncate(&user_agent, 50),
        content_type = %content_type,
        content_length,
        "chat request"
    );

    // Scratch files registered during decoding are removed when this drops,
    // whichever exit path the request takes.
    let mut scratch = TempFileSet::new();
    let result = process_chat(
        &state,
        addr,
        &content_type,
        content_length,
        body,
        &mut scratch,
    )
    .await;
    drop(scratch);

    let response = match result {
        Ok(reply) => with_cors(
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                reply,
            )
                .into_response(),
            &state,
            origin.as_deref(),
        ),
        Err(err) => error_response(&state, origin.as_deref(), &err),
    };

    tracing::info!(
        duration_ms = started.elapsed().as_millis() as u64,
        status = response.status().as_u16(),
        "chat request completed"
    );
    response
}

/// The per-request pipeline: validate size, read the body within the request
/// timeout, dispatch on content type, forward with failover.
async fn process_chat(
    state: &AppState,
    addr: SocketAddr,
    content_type: &str,
    content_length: u64,
    body: axum::body::Body,
    scratch: &mut TempFileSet,
) -> Result<Bytes, ProxyError> {
    let total_limit = state.config.max_request_bytes();
    if content_length > total_limit {
        return Err(ProxyError::PayloadTooLarge {
            length: content_length,
            limit: total_limit,
        });
    }

    let bytes = match tokio::time::timeout(
        state.config.request_timeout,
        to_bytes(body, total_limit as usize),
    )
    .await
    {
        Err(_) => return Err(ProxyError::Timeout),
        // The collect only fails once the body outgrows the cap.
        Ok(Err(_)) => {
            return Err(ProxyError::PayloadTooLarge {
                length: content_length.max(total_limit + 1),
                limit: total_limit,
            })
        }
        Ok(Ok(bytes)) => bytes,
    };

    if content_type.starts_with("multipart/form-data") {
        let boundary = boundary_from_content_type(content_type).ok_or_else(|| {
            ProxyError::MalformedMultipart("no boundary in content-type".to_string())
        })?;
        let form = multipart::decode(
            &bytes,
            &boundary,
            state.config.max_files_per_request as usize,
            scratch,
        )?;
        if form.is_empty() {
            return Err(ProxyError::EmptyRequest);
        }
        tracing::info!(
            file_count = form.attachments.len(),
            client_ip = %addr.ip(),
            "received multipart message"
        );
        let payload = build_payload(&form, &addr.ip().to_string());
        let serialized =
            serde_json::to_vec(&payload).map_err(|e| ProxyError::Internal(e.to_string()))?;
        let reply = state.forwarder.forward(Bytes::from(serialized)).await?;
        Ok(reply.body)
    } else {
        if bytes.len() as u64 > state.config.max_file_size {
            return Err(ProxyError::PayloadTooLarge {
                length: bytes.len() as u64,
                limit: state.config.max_file_size,
            });
        }
        let text =
            std::str::from_utf8(&bytes).map_err(|_| ProxyError::InvalidEncoding)?;
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| ProxyError::InvalidJson(e.to_string()))?;
        if let Some(obj) = value.as_object() {
            // Keys only; full payloads stay out of the logs.
            tracing::debug!(keys = ?obj.keys().collect::<Vec<_>>(), "json payload");
        }
        let reply = state.forwarder.forward(bytes).await?;
        Ok(reply.body)
    }
}

/// CORS preflight: always 200 with the full header set, no body, regardless
/// of server state.
async fn preflight_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let origin = header_str(&headers, header::ORIGIN);
    with_cors(StatusCode::OK.into_response(), &state, origin.as_deref())
}

async fn health_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let origin = header_str(&headers, header::ORIGIN);
    let json = serde_json::json!({
        "status": "healthy",
        "proxy_version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.start_instant.elapsed().as_secs_f64(),
        "active_connections": state.registry.active(),
        "n8n_endpoints": state.forwarder.endpoints(),
        "config": {
            "max_file_size": state.config.max_file_size,
            "max_files_per_request": state.config.max_files_per_request,
            "max_concurrent_connections": state.config.max_concurrent_connections,
            "request_timeout_seconds": state.config.request_timeout.as_secs(),
        },
    });
    with_cors(
        (StatusCode::OK, Json(json)).into_response(),
        &state,
        origin.as_deref(),
    )
}

fn error_response(state: &AppState, origin: Option<&str>, err: &ProxyError) -> Response {
    match err {
        ProxyError::Internal(detail) => {
            tracing::error!(error = %detail, "internal fault while handling chat request");
        }
        other => {
            tracing::warn!(error = %other, "chat request rejected");
        }
    }
    let body = serde_json::json!({
        "error": err.kind(),
        "details": err.to_string(),
    });
    with_cors(
        (err.status(), Json(body)).into_response(),
        state,
        origin,
    )
}

fn with_cors(mut response: Response, state: &AppState, origin: Option<&str>) -> Response {
    for (name, value) in cors_headers(&state.config, origin) {
        response.headers_mut().insert(name, value);
    }
    response
}

/// Echo the request origin when it is allow-listed (or the list holds `*`),
/// otherwise fall back to the first configured origin.
fn cors_headers(config: &AppConfig, origin: Option<&str>) -> Vec<(HeaderName, HeaderValue)> {
    let wildcard = config.allowed_origins.iter().any(|o| o == "*");
    let allow_origin = match origin {
        Some(o) if wildcard || config.allowed_origins.iter().any(|a| a == o) => o.to_string(),
        _ => config
            .allowed_origins
            .first()
            .cloned()
            .unwrap_or_else(|| "*".to_string()),
    };
    let allow_origin =
        HeaderValue::from_str(&allow_origin).unwrap_or_else(|_| HeaderValue::from_static("*"));
    vec![
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin),
        (
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, X-Requested-With, Cache-Control"),
        ),
        (
            header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
            HeaderValue::from_static("true"),
        ),
        (
            header::ACCESS_CONTROL_MAX_AGE,
            HeaderValue::from_static("3600"),
        ),
    ]
}

fn header_str(headers: &HeaderMap, name: HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

fn truncate(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}
