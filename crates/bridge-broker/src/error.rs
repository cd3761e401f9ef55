//! Broker link error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection refused: {0}")]
    ConnectionRefused(String),

    #[error("authentication failed: {0}")]
    AuthFailed(String),

    #[error("broker link lost")]
    LinkLost,

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("symbol unknown: {0}")]
    SymbolUnknown(String),

    #[error("no usable quote for {0}")]
    QuoteUnavailable(String),

    #[error("placement rejected: {0}")]
    PlacementRejected(String),

    #[error("unknown order: {0}")]
    UnknownOrder(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("wire format error: {0}")]
    Wire(#[from] serde_json::Error),
}

pub type BrokerResult<T> = Result<T, BrokerError>;
