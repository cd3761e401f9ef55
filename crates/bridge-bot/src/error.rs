//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] bridge_core::CoreError),

    #[error(transparent)]
    Broker(#[from] bridge_broker::BrokerError),

    #[error(transparent)]
    Webhook(#[from] bridge_webhook::WebhookError),

    #[error(transparent)]
    Telemetry(#[from] bridge_telemetry::TelemetryError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
