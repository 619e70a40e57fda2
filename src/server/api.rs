use crate::agent::{ AgentError, Assistant, TurnEvent };
use crate::cli::Args;
use crate::models::chat::{ ChatRequestBody, ErrorBody };
use crate::models::stream::{ StreamFrame, NDJSON };
use crate::redirect::format_tag;

use std::error::Error;
use std::net::SocketAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use axum::{
    body::Body,
    extract::{ rejection::JsonRejection, DefaultBodyLimit, State },
    http::{ header, HeaderMap, HeaderName, StatusCode },
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Json,
    Router,
};
use futures::StreamExt;
use governor::{ RateLimiter, Quota, state::{ InMemoryState, NotKeyed }, clock::DefaultClock };
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::{ Any, CorsLayer };
use uuid::Uuid;
use log::{ info, warn, error };

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Clone)]
pub struct AppState {
    assistant: Arc<Assistant>,
    limiter: Arc<Limiter>,
    max_request_bytes: usize,
}

impl AppState {
    pub fn new(assistant: Arc<Assistant>, requests_per_second: u32, max_request_bytes: usize) -> Self {
        let per_second = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
        Self {
            assistant,
            limiter: Arc::new(RateLimiter::direct(Quota::per_second(per_second))),
            max_request_bytes,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")] InvalidRequest(String),
    #[error("request body exceeds {0} bytes")] PayloadTooLarge(usize),
    #[error("too many requests, please slow down")] RateLimited,
    #[error("assistant unavailable: {0}")] Upstream(String),
    #[error("assistant did not respond in time")] Timeout,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

impl From<AgentError> for ApiError {
    fn from(err: AgentError) -> Self {
        match err {
            AgentError::Upstream(msg) => ApiError::Upstream(msg),
            AgentError::TimedOut(_) => ApiError::Timeout,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    let body_limit = state.max_request_bytes;

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/health", get(health_handler))
        .layer(ServiceBuilder::new().layer(cors).layer(DefaultBodyLimit::max(body_limit)))
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

fn wants_frames(headers: &HeaderMap) -> bool {
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains(NDJSON))
        .unwrap_or(false)
}

async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequestBody>, JsonRejection>
) -> Result<Response, ApiError> {
    if state.limiter.check().is_err() {
        warn!("Global chat rate limit exceeded. Rejecting request.");
        return Err(ApiError::RateLimited);
    }

    let Json(body) = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(state.max_request_bytes)
        } else {
            ApiError::InvalidRequest(rejection.body_text())
        }
    })?;
    body.validate().map_err(ApiError::InvalidRequest)?;

    let request_id = Uuid::new_v4().to_string();
    let frames = wants_frames(&headers);
    info!(
        "[{}] Chat request with {} turns (pathname: {:?}, frames: {})",
        request_id,
        body.messages.len(),
        body.pathname,
        frames
    );

    let turn = state.assistant.start_turn(&request_id, &body.messages, body.pathname.as_deref()).await?;

    let content_type = if frames { NDJSON } else { "text/plain; charset=utf-8" };
    let stream_id = request_id.clone();
    let body = if frames {
        Body::from_stream(
            turn.map(move |event| {
                let frame = match event {
                    Ok(TurnEvent::Text(delta)) => StreamFrame::Text { delta },
                    Ok(TurnEvent::Navigate(path)) => StreamFrame::Navigate { path },
                    Err(e) => {
                        error!("[{}] Turn aborted: {}", stream_id, e);
                        StreamFrame::Error { message: e.to_string() }
                    }
                };
                Ok::<_, std::io::Error>(frame.to_line())
            })
        )
    } else {
        let mut after_space = true;
        Body::from_stream(
            turn.map(move |event| {
                match event {
                    Ok(TurnEvent::Text(delta)) => {
                        if let Some(last) = delta.chars().last() {
                            after_space = last.is_whitespace();
                        }
                        Ok(delta)
                    }
                    Ok(TurnEvent::Navigate(path)) if after_space => Ok(format_tag(&path)),
                    Ok(TurnEvent::Navigate(path)) => Ok(format!(" {}", format_tag(&path))),
                    Err(e) => {
                        error!("[{}] Turn aborted: {}", stream_id, e);
                        Err(std::io::Error::new(std::io::ErrorKind::TimedOut, e.to_string()))
                    }
                }
            })
        )
    };

    Ok(
        (
            [
                (header::CONTENT_TYPE, content_type.to_string()),
                (header::CACHE_CONTROL, "no-cache".to_string()),
                (HeaderName::from_static("x-request-id"), request_id),
            ],
            body,
        ).into_response()
    )
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

pub async fn start_http_server(
    args: &Args,
    assistant: Arc<Assistant>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = args.server_addr.parse::<SocketAddr>()?;
    let state = AppState::new(assistant, args.rate_limit_per_second, args.max_request_bytes);
    let app = router(state);

    if args.enable_tls {
        let (cert_path, key_path) = match (&args.tls_cert_path, &args.tls_key_path) {
            (Some(cert), Some(key)) => (cert, key),
            _ => {
                error!("Both --tls-cert-path and --tls-key-path must be provided to enable TLS.");
                return Err("TLS enabled without cert/key".into());
            }
        };
        info!("TLS enabled. Loading certificate from '{}' and key from '{}'", cert_path, key_path);
        let tls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(cert_path, key_path).await?;

        let handle = axum_server::Handle::new();
        let shutdown = handle.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            shutdown.graceful_shutdown(Some(Duration::from_secs(5)));
        });

        info!("HTTPS server listening on: https://{}", addr);
        axum_server::bind_rustls(addr, tls_config).handle(handle).serve(app.into_make_service()).await?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
            error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
            e
        })?;
        info!("HTTP server listening on: http://{}", addr);
        axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown_signal()).await?;
    }

    info!("Server stopped");
    Ok(())
}
