//! Supervised client for the IBKR-style trading gateway.
//!
//! The link owns the gateway connection and its state machine
//! (disconnected, connecting, connected, backoff). Callers interact
//! through a cloneable [`BrokerHandle`]; fills, order status and
//! connection changes are delivered serially on an event channel.
//!
//! Reconnection uses exponential backoff starting at the configured base
//! delay and doubling up to a ceiling, bounded by a maximum attempt
//! count. In-flight calls fail with `LinkLost` when the session drops.

pub mod config;
pub mod error;
pub mod gateway;
pub mod link;
pub mod testing;
pub mod transport;

pub use config::BrokerConfig;
pub use error::{BrokerError, BrokerResult};
pub use gateway::{
    is_session_loss, Contract, FillReport, GatewayEvent, GatewayRequest, OpenOrderReport,
    OrderStatusKind, OrderStatusReport, OrderTicket, PositionReport,
};
pub use link::{
    spawn_broker_link, BrokerEvent, BrokerHandle, BrokerLink, ConnectionEvent, ConnectionState,
};
pub use transport::{GatewayStream, GatewayTransport, TcpTransport};
