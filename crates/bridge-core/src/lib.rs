//! Core domain types for the signal-to-broker trading bridge.
//!
//! This crate provides the fundamental types shared across the system:
//! - `Signal`, `TradeAction`, `Symbol`: validated trading intent
//! - `PositionState` and the sequential transition table
//! - `Price`: precision-safe decimal price
//! - `MarketHours`, `SessionPolicy`: session classification and order policy
//! - `TradeError`: the error taxonomy surfaced to signal callers

pub mod decimal;
pub mod error;
pub mod notice;
pub mod order;
pub mod position;
pub mod session;
pub mod signal;
pub mod transition;

pub use decimal::Price;
pub use error::{CoreError, TradeError};
pub use notice::Notice;
pub use order::{BrokerOrderId, ExecutionOutcome, OrderSide, OrderType};
pub use position::PositionState;
pub use session::{MarketHours, SessionKind, SessionPolicy, TradeDecision};
pub use signal::{Signal, Symbol, TradeAction};
pub use transition::validate_transition;
