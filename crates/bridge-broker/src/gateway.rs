//! Gateway wire protocol.
//!
//! The gateway speaks newline-delimited JSON. Requests that expect a
//! reply carry a `req_id`; the gateway echoes it on the matching event.
//! Fills, order status and errors arrive unsolicited.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bridge_core::{BrokerOrderId, OrderSide, OrderType, Price, Symbol};

/// Canonical tradable handle resolved from a ticker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    pub contract_id: i64,
    pub symbol: Symbol,
    pub exchange: String,
    pub currency: String,
}

/// Order parameters submitted to the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderTicket {
    pub contract: Contract,
    pub side: OrderSide,
    pub quantity: u32,
    pub order_type: OrderType,
    pub limit_price: Option<Price>,
}

/// One account position as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    pub symbol: Symbol,
    /// Signed quantity: positive long, negative short.
    pub quantity: i64,
    pub avg_cost: Price,
}

/// One open order as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrderReport {
    pub order_id: BrokerOrderId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: u32,
    pub order_type: OrderType,
    pub limit_price: Option<Price>,
    pub status: OrderStatusKind,
}

/// Broker order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatusKind {
    PendingSubmit,
    Submitted,
    Filled,
    Cancelled,
    Rejected,
    Inactive,
}

impl OrderStatusKind {
    /// Terminal statuses end the pending-order lifecycle.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Filled | Self::Cancelled | Self::Rejected | Self::Inactive
        )
    }
}

/// Execution report for a (partial) fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillReport {
    pub order_id: BrokerOrderId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub shares: u32,
    pub price: Price,
    pub filled_at: DateTime<Utc>,
}

/// Order status update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderStatusReport {
    pub order_id: BrokerOrderId,
    pub status: OrderStatusKind,
    pub filled: u32,
    pub remaining: u32,
    pub avg_fill_price: Option<Price>,
}

/// Client-to-gateway messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayRequest {
    Auth {
        client_id: i32,
        account: String,
    },
    Qualify {
        req_id: u64,
        symbol: Symbol,
        exchange: String,
        currency: String,
    },
    MarketData {
        req_id: u64,
        contract_id: i64,
    },
    CancelMarketData {
        req_id: u64,
    },
    Place {
        req_id: u64,
        account: String,
        ticket: OrderTicket,
    },
    Cancel {
        req_id: u64,
        order_id: BrokerOrderId,
    },
    Positions {
        req_id: u64,
    },
    OpenOrders {
        req_id: u64,
    },
}

/// Gateway-to-client messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    AuthAck {
        account: String,
    },
    AuthReject {
        reason: String,
    },
    ContractDetails {
        req_id: u64,
        contract: Option<Contract>,
    },
    Tick {
        req_id: u64,
        #[serde(default)]
        mid: Option<Price>,
        #[serde(default)]
        bid: Option<Price>,
        #[serde(default)]
        ask: Option<Price>,
        #[serde(default)]
        last: Option<Price>,
    },
    OrderAck {
        req_id: u64,
        order_id: BrokerOrderId,
    },
    OrderReject {
        req_id: u64,
        reason: String,
    },
    CancelAck {
        req_id: u64,
        known: bool,
    },
    PositionList {
        req_id: u64,
        positions: Vec<PositionReport>,
    },
    OpenOrderList {
        req_id: u64,
        orders: Vec<OpenOrderReport>,
    },
    Fill(FillReport),
    OrderStatus(OrderStatusReport),
    Error {
        code: i32,
        message: String,
        #[serde(default)]
        symbol: Option<Symbol>,
    },
}

/// Gateway error codes that indicate the broker session itself was lost.
/// The link must drop the connection and reconnect when it sees one.
pub fn is_session_loss(code: i32) -> bool {
    matches!(code, 1100..=1102)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_request_wire_format() {
        let req = GatewayRequest::Qualify {
            req_id: 7,
            symbol: Symbol::new("AAPL").unwrap(),
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
        };
        let line = serde_json::to_string(&req).unwrap();
        assert!(line.contains("\"type\":\"qualify\""));
        let back: GatewayRequest = serde_json::from_str(&line).unwrap();
        assert_eq!(back, req);
    }

    #[test]
    fn test_tick_event_allows_sparse_fields() {
        let event: GatewayEvent =
            serde_json::from_str(r#"{"type":"tick","req_id":3,"last":"150.10"}"#).unwrap();
        match event {
            GatewayEvent::Tick {
                req_id, mid, last, ..
            } => {
                assert_eq!(req_id, 3);
                assert!(mid.is_none());
                assert_eq!(last, Some(Price::new(dec!(150.10))));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(OrderStatusKind::Filled.is_terminal());
        assert!(OrderStatusKind::Cancelled.is_terminal());
        assert!(OrderStatusKind::Rejected.is_terminal());
        assert!(!OrderStatusKind::Submitted.is_terminal());
        assert!(!OrderStatusKind::PendingSubmit.is_terminal());
    }

    #[test]
    fn test_session_loss_codes() {
        assert!(is_session_loss(1100));
        assert!(is_session_loss(1102));
        assert!(!is_session_loss(200));
        assert!(!is_session_loss(1103));
    }
}
