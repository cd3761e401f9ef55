//! Error types for the trading core.

use thiserror::Error;

use crate::position::PositionState;
use crate::signal::TradeAction;

/// Construction and configuration errors.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid time: {0} (expected HH:MM)")]
    InvalidTime(String),

    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),

    #[error("session boundaries out of order: {0}")]
    BoundaryOrder(String),

    #[error("invalid symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("unknown action: {0:?}")]
    UnknownAction(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors surfaced to the signal caller.
///
/// Every rejection has an identity (kind + message). None of these are
/// retried by the bridge; the sender decides what to do with them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TradeError {
    #[error("market closed: {0}")]
    SessionClosed(String),

    #[error("invalid transition: {action} not allowed while {state}")]
    InvalidTransition {
        state: PositionState,
        action: TradeAction,
    },

    #[error("quantity {quantity} exceeds max position size {max}")]
    QuantityExceedsMax { quantity: u32, max: u32 },

    #[error("symbol unknown to broker: {0}")]
    SymbolUnknown(String),

    #[error("no usable quote for {0}")]
    QuoteUnavailable(String),

    #[error("placement rejected by broker: {0}")]
    PlacementRejected(String),

    #[error("broker link lost")]
    LinkLost,

    #[error("gateway error: {0}")]
    Gateway(String),
}

impl TradeError {
    /// Stable machine-readable kind for structured error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionClosed(_) => "session_closed",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::QuantityExceedsMax { .. } => "quantity_exceeds_max",
            Self::SymbolUnknown(_) => "symbol_unknown",
            Self::QuoteUnavailable(_) => "quote_unavailable",
            Self::PlacementRejected(_) => "placement_rejected",
            Self::LinkLost => "link_lost",
            Self::Gateway(_) => "gateway_error",
        }
    }
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
