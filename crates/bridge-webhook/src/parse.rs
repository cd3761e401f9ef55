//! Alert payload validation.
//!
//! Field-wise parsing so a rejected request can name the offending
//! field. The expected shape:
//!
//! ```json
//! {
//!   "action": "buy|sell|short|cover",
//!   "symbol": "AAPL",
//!   "quantity": 100,
//!   "price": 150.50,
//!   "message": "optional",
//!   "timestamp": "optional"
//! }
//! ```

use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use thiserror::Error;

use bridge_core::{Price, Signal, Symbol, TradeAction};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("invalid {field}: {reason}")]
    InvalidField {
        field: &'static str,
        reason: String,
    },

    #[error("unknown action: {0:?}")]
    UnknownAction(String),
}

impl ParseError {
    /// The field the error refers to, for the 400 body.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::MissingField(field) => Some(field),
            Self::InvalidField { field, .. } => Some(field),
            Self::UnknownAction(_) => Some("action"),
        }
    }
}

/// Validate an alert payload into a `Signal`.
///
/// A missing `quantity` falls back to `default_quantity` (the configured
/// safety floor); a present-but-invalid one is an error.
pub fn parse_signal(
    value: &Value,
    default_quantity: u32,
    received_at: DateTime<Utc>,
) -> Result<Signal, ParseError> {
    let object = value.as_object().ok_or(ParseError::InvalidField {
        field: "body",
        reason: "expected a JSON object".to_string(),
    })?;

    let action_raw = object
        .get("action")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("action"))?;
    let action = TradeAction::from_str(action_raw)
        .map_err(|_| ParseError::UnknownAction(action_raw.to_string()))?;

    let symbol_raw = object
        .get("symbol")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("symbol"))?;
    let symbol = Symbol::new(symbol_raw).map_err(|_| ParseError::InvalidField {
        field: "symbol",
        reason: "must be a non-empty ticker".to_string(),
    })?;

    let quantity = match object.get("quantity") {
        None | Some(Value::Null) => default_quantity,
        Some(value) => parse_quantity(value)?,
    };

    let price = match object.get("price") {
        None | Some(Value::Null) => None,
        Some(value) => Some(parse_price(value)?),
    };

    let mut signal = Signal::new(symbol, action, quantity, received_at);
    signal.price = price;
    signal.message = object
        .get("message")
        .and_then(Value::as_str)
        .map(str::to_string);
    signal.timestamp = object
        .get("timestamp")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(signal)
}

fn parse_quantity(value: &Value) -> Result<u32, ParseError> {
    let invalid = |reason: &str| ParseError::InvalidField {
        field: "quantity",
        reason: reason.to_string(),
    };

    let quantity = match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| invalid("must be a positive integer"))?,
        Value::String(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|_| invalid("must be a positive integer"))?,
        _ => return Err(invalid("must be a positive integer")),
    };

    if quantity == 0 {
        return Err(invalid("must be positive"));
    }
    u32::try_from(quantity).map_err(|_| invalid("out of range"))
}

fn parse_price(value: &Value) -> Result<Price, ParseError> {
    let invalid = || ParseError::InvalidField {
        field: "price",
        reason: "must be a number".to_string(),
    };

    match value {
        Value::Number(n) => Decimal::from_str(&n.to_string())
            .map(Price::new)
            .map_err(|_| invalid()),
        Value::String(s) => Decimal::from_str(s.trim()).map(Price::new).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}
