//! Trading signals and their building blocks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::decimal::Price;
use crate::error::CoreError;
use crate::order::OrderSide;

/// Validated uppercase ticker symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol, trimming whitespace and uppercasing.
    ///
    /// Fails on an empty result.
    pub fn new(raw: &str) -> Result<Self, CoreError> {
        let normalized = raw.trim().to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(CoreError::InvalidSymbol(raw.to_string()));
        }
        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Business action carried by a signal.
///
/// `Short` and `Cover` map to broker `Sell`/`Buy` respectively; the
/// distinction matters only for the sequential transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
    Short,
    Cover,
}

impl TradeAction {
    /// Map the business action to the broker order side.
    pub fn side(&self) -> OrderSide {
        match self {
            Self::Buy | Self::Cover => OrderSide::Buy,
            Self::Sell | Self::Short => OrderSide::Sell,
        }
    }
}

impl FromStr for TradeAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            "short" => Ok(Self::Short),
            "cover" => Ok(Self::Cover),
            other => Err(CoreError::UnknownAction(other.to_string())),
        }
    }
}

impl fmt::Display for TradeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
            Self::Short => write!(f, "short"),
            Self::Cover => write!(f, "cover"),
        }
    }
}

/// An externally generated trading signal. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub symbol: Symbol,
    pub action: TradeAction,
    /// Number of shares; always positive.
    pub quantity: u32,
    /// Advisory price from the sender; never used for execution.
    pub price: Option<Price>,
    /// Free-form message passed through from the sender.
    pub message: Option<String>,
    /// Sender-supplied timestamp passed through verbatim.
    pub timestamp: Option<String>,
    /// When the bridge accepted the signal.
    pub received_at: DateTime<Utc>,
}

impl Signal {
    pub fn new(
        symbol: Symbol,
        action: TradeAction,
        quantity: u32,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol,
            action,
            quantity,
            price: None,
            message: None,
            timestamp: None,
            received_at,
        }
    }
}
