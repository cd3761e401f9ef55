//! Telemetry error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("logging init failed: {0}")]
    Init(String),

    #[error("metrics encoding failed: {0}")]
    Encode(String),
}

pub type TelemetryResult<T> = Result<T, TelemetryError>;
