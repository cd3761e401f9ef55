//! Operator-facing notices emitted by the trading core.
//!
//! Components publish these on a channel; the notification fan-out
//! formats and delivers them. Dropping the channel disables notices
//! without affecting trading.

use crate::decimal::Price;
use crate::order::{BrokerOrderId, OrderSide, OrderType};
use crate::signal::{Symbol, TradeAction};

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// A signal passed all gates and an order was placed.
    SignalExecuted {
        symbol: Symbol,
        action: TradeAction,
        quantity: u32,
        order_id: BrokerOrderId,
        order_type: OrderType,
        limit_price: Option<Price>,
    },
    /// A signal was rejected by the core.
    SignalRejected {
        symbol: Symbol,
        action: TradeAction,
        kind: &'static str,
        message: String,
    },
    /// The broker reported a fill.
    OrderFilled {
        symbol: Symbol,
        order_id: BrokerOrderId,
        side: OrderSide,
        shares: u32,
        price: Price,
    },
    /// A timed-out limit order was cancelled and replaced.
    OrderResubmitted {
        symbol: Symbol,
        old_order_id: BrokerOrderId,
        new_order_id: BrokerOrderId,
        limit_price: Price,
        resubmission_count: u32,
    },
    /// A pending order hit the resubmission cap and was abandoned.
    OrderAbandoned {
        symbol: Symbol,
        order_id: BrokerOrderId,
        resubmission_count: u32,
    },
    /// Broker connection established.
    LinkUp,
    /// Broker connection lost; `terminal` once reconnection gave up.
    LinkDown { terminal: bool },
    /// The ledger disagreed with the broker after a fill.
    LedgerDivergence {
        symbol: Symbol,
        cached: i64,
        broker: i64,
    },
}
