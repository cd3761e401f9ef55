//! Signal intake HTTP server (axum).

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use bridge_core::{ExecutionOutcome, Signal, TradeError};
use bridge_telemetry::metrics;

use crate::auth;
use crate::parse;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Intake configuration, validated at startup.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub port: u16,
    pub bot_name: String,
    /// HMAC secret; `None` disables signature checks.
    pub secret: Option<String>,
    /// Allowed source addresses; empty admits all.
    pub allowed_ips: Vec<IpAddr>,
    /// Quantity floor applied when an alert omits the field.
    pub default_quantity: u32,
}

/// Downstream the intake hands validated signals to.
pub trait SignalGateway: Send + Sync + 'static {
    fn submit(
        &self,
        signal: Signal,
    ) -> impl Future<Output = Result<ExecutionOutcome, TradeError>> + Send;

    /// Status payload for the `/status` endpoint.
    fn snapshot(&self) -> Value;
}

pub struct AppState<G> {
    gateway: Arc<G>,
    config: Arc<WebhookConfig>,
    started_at: DateTime<Utc>,
}

impl<G> Clone for AppState<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: self.gateway.clone(),
            config: self.config.clone(),
            started_at: self.started_at,
        }
    }
}

impl<G: SignalGateway> AppState<G> {
    pub fn new(gateway: Arc<G>, config: WebhookConfig) -> Self {
        Self {
            gateway,
            config: Arc::new(config),
            started_at: Utc::now(),
        }
    }
}

/// Build the intake router.
pub fn router<G: SignalGateway>(state: AppState<G>) -> Router {
    Router::new()
        .route("/webhook", post(handle_webhook::<G>))
        .route("/health", get(health::<G>))
        .route("/status", get(status::<G>))
        .route("/metrics", get(render_metrics))
        .with_state(state)
}

/// Bind and serve until the token is cancelled.
pub async fn serve<G: SignalGateway>(
    state: AppState<G>,
    shutdown: CancellationToken,
) -> Result<(), WebhookError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], state.config.port));
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "webhook server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;

    info!("webhook server stopped");
    Ok(())
}

async fn handle_webhook<G: SignalGateway>(
    State(state): State<AppState<G>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !auth::ip_allowed(&state.config.allowed_ips, remote.ip()) {
        warn!(remote = %remote.ip(), "rejected request from unauthorized ip");
        return error_response(StatusCode::FORBIDDEN, "unauthorized ip", None);
    }

    if let Some(secret) = state.config.secret.as_deref().filter(|s| !s.is_empty()) {
        let header = headers
            .get("x-signature")
            .and_then(|value| value.to_str().ok());
        if !auth::verify_signature(secret, &body, header) {
            warn!(remote = %remote.ip(), "invalid webhook signature");
            return error_response(StatusCode::FORBIDDEN, "invalid signature", None);
        }
    }

    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            warn!(error = %e, "malformed alert payload");
            return error_response(StatusCode::BAD_REQUEST, "malformed json", None);
        }
    };

    let signal = match parse::parse_signal(&value, state.config.default_quantity, Utc::now()) {
        Ok(signal) => signal,
        Err(e) => {
            warn!(error = %e, "alert failed validation");
            return error_response(StatusCode::BAD_REQUEST, &e.to_string(), e.field());
        }
    };

    metrics::SIGNALS_RECEIVED.inc();
    info!(
        symbol = %signal.symbol,
        action = %signal.action,
        quantity = signal.quantity,
        "alert received"
    );

    // Core rejections are 200s: the sender observes the outcome but the
    // signal is not a retriable command.
    match state.gateway.submit(signal).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "status": "accepted",
                "order_id": outcome.order_id,
                "order_type": outcome.order_type,
                "limit_price": outcome.limit_price,
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::OK,
            Json(json!({
                "status": "rejected",
                "error": { "kind": e.kind(), "message": e.to_string() },
            })),
        )
            .into_response(),
    }
}

async fn health<G: SignalGateway>(State(state): State<AppState<G>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "bot": state.config.bot_name,
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
        .into_response()
}

async fn status<G: SignalGateway>(State(state): State<AppState<G>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "running",
            "bot": state.config.bot_name,
            "started_at": state.started_at.to_rfc3339(),
            "timestamp": Utc::now().to_rfc3339(),
            "core": state.gateway.snapshot(),
        })),
    )
        .into_response()
}

async fn render_metrics() -> Response {
    match metrics::render() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

fn error_response(code: StatusCode, message: &str, field: Option<&'static str>) -> Response {
    let mut body = json!({ "error": message });
    if let Some(field) = field {
        body["field"] = json!(field);
    }
    (code, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_includes_field() {
        let response = error_response(StatusCode::BAD_REQUEST, "missing required field", Some("action"));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
