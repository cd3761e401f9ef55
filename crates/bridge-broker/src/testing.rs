//! Scripted in-process gateway for tests.
//!
//! [`StubGateway`] models a minimal broker: qualification tables, quote
//! books, an account position list and an order log. Its transport plugs
//! into [`spawn_broker_link`](crate::link::spawn_broker_link) so the whole
//! link stack (supervision, RPC correlation, event delivery) is exercised
//! by tests exactly as in production.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::mpsc;

use bridge_core::{BrokerOrderId, OrderSide, OrderType, Price, Symbol};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::gateway::{
    Contract, FillReport, GatewayEvent, GatewayRequest, OpenOrderReport, OrderStatusKind,
    OrderStatusReport, PositionReport,
};
use crate::transport::{GatewayStream, GatewayTransport};

/// Quote fields returned for a contract.
#[derive(Debug, Clone, Default)]
pub struct QuoteBook {
    pub mid: Option<Price>,
    pub bid: Option<Price>,
    pub ask: Option<Price>,
    pub last: Option<Price>,
}

impl QuoteBook {
    pub fn mid(price: Price) -> Self {
        Self {
            mid: Some(price),
            ..Self::default()
        }
    }
}

/// Record of an order the stub accepted.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub order_id: BrokerOrderId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub quantity: u32,
    pub order_type: OrderType,
    pub limit_price: Option<Price>,
    pub account: String,
}

/// Mutable gateway model; lock it through [`StubGateway::model`].
#[derive(Debug, Default)]
pub struct GatewayModel {
    /// Symbols the gateway can qualify.
    pub contracts: HashMap<Symbol, Contract>,
    /// Quote books by contract id.
    pub quotes: HashMap<i64, QuoteBook>,
    /// Account positions (signed quantities).
    pub positions: Vec<PositionReport>,
    /// Currently open orders.
    pub open_orders: Vec<OpenOrderReport>,
    /// Fill every accepted order immediately at `fill_price`.
    pub auto_fill: bool,
    /// Price applied to auto-fills; falls back to the limit price.
    pub fill_price: Option<Price>,
    /// Reject placements with this reason.
    pub reject_place: Option<String>,
    /// Reject authentication with this reason.
    pub reject_auth: Option<String>,
    /// Every accepted placement, newest last.
    pub placed: Vec<PlacedOrder>,
    /// Order ids the client asked to cancel.
    pub cancel_requests: Vec<BrokerOrderId>,
    /// Market-data req_ids the client released.
    pub released_quotes: Vec<u64>,
    /// Every request received, for call-pattern assertions.
    pub requests: Vec<GatewayRequest>,
    next_order_id: u64,
}

impl GatewayModel {
    /// Register a qualifiable symbol and return its contract.
    pub fn add_contract(&mut self, symbol: &Symbol, contract_id: i64) -> Contract {
        let contract = Contract {
            contract_id,
            symbol: symbol.clone(),
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
        };
        self.contracts.insert(symbol.clone(), contract.clone());
        contract
    }

    /// Set the signed position for a symbol.
    pub fn set_position(&mut self, symbol: &Symbol, quantity: i64, avg_cost: Price) {
        self.positions.retain(|p| &p.symbol != symbol);
        if quantity != 0 {
            self.positions.push(PositionReport {
                symbol: symbol.clone(),
                quantity,
                avg_cost,
            });
        }
    }

    fn apply_fill_to_positions(&mut self, symbol: &Symbol, side: OrderSide, shares: u32, price: Price) {
        let delta = side.sign() * shares as i64;
        let current = self
            .positions
            .iter()
            .find(|p| &p.symbol == symbol)
            .map(|p| (p.quantity, p.avg_cost))
            .unwrap_or((0, Price::ZERO));
        let new_qty = current.0 + delta;
        let avg = if current.0 == 0 || current.0.signum() != new_qty.signum() {
            price
        } else {
            current.1
        };
        self.set_position(symbol, new_qty, avg);
    }

    fn handle(&mut self, request: GatewayRequest) -> Vec<GatewayEvent> {
        self.requests.push(request.clone());
        match request {
            GatewayRequest::Auth { account, .. } => match self.reject_auth.clone() {
                Some(reason) => vec![GatewayEvent::AuthReject { reason }],
                None => vec![GatewayEvent::AuthAck { account }],
            },
            GatewayRequest::Qualify { req_id, symbol, .. } => vec![GatewayEvent::ContractDetails {
                req_id,
                contract: self.contracts.get(&symbol).cloned(),
            }],
            GatewayRequest::MarketData { req_id, contract_id } => {
                match self.quotes.get(&contract_id) {
                    Some(book) => vec![GatewayEvent::Tick {
                        req_id,
                        mid: book.mid,
                        bid: book.bid,
                        ask: book.ask,
                        last: book.last,
                    }],
                    None => Vec::new(),
                }
            }
            GatewayRequest::CancelMarketData { req_id } => {
                self.released_quotes.push(req_id);
                Vec::new()
            }
            GatewayRequest::Place {
                req_id,
                account,
                ticket,
            } => {
                if let Some(reason) = self.reject_place.clone() {
                    return vec![GatewayEvent::OrderReject { req_id, reason }];
                }
                self.next_order_id += 1;
                let order_id = BrokerOrderId::from(self.next_order_id.to_string());
                self.placed.push(PlacedOrder {
                    order_id: order_id.clone(),
                    symbol: ticket.contract.symbol.clone(),
                    side: ticket.side,
                    quantity: ticket.quantity,
                    order_type: ticket.order_type,
                    limit_price: ticket.limit_price,
                    account,
                });

                let mut events = vec![GatewayEvent::OrderAck {
                    req_id,
                    order_id: order_id.clone(),
                }];

                if self.auto_fill {
                    let price = self
                        .fill_price
                        .or(ticket.limit_price)
                        .unwrap_or(Price::ZERO);
                    self.apply_fill_to_positions(
                        &ticket.contract.symbol,
                        ticket.side,
                        ticket.quantity,
                        price,
                    );
                    events.push(GatewayEvent::Fill(FillReport {
                        order_id: order_id.clone(),
                        symbol: ticket.contract.symbol.clone(),
                        side: ticket.side,
                        shares: ticket.quantity,
                        price,
                        filled_at: chrono::Utc::now(),
                    }));
                    events.push(GatewayEvent::OrderStatus(OrderStatusReport {
                        order_id,
                        status: OrderStatusKind::Filled,
                        filled: ticket.quantity,
                        remaining: 0,
                        avg_fill_price: Some(price),
                    }));
                } else {
                    self.open_orders.push(OpenOrderReport {
                        order_id: order_id.clone(),
                        symbol: ticket.contract.symbol.clone(),
                        side: ticket.side,
                        quantity: ticket.quantity,
                        order_type: ticket.order_type,
                        limit_price: ticket.limit_price,
                        status: OrderStatusKind::Submitted,
                    });
                    events.push(GatewayEvent::OrderStatus(OrderStatusReport {
                        order_id,
                        status: OrderStatusKind::Submitted,
                        filled: 0,
                        remaining: ticket.quantity,
                        avg_fill_price: None,
                    }));
                }
                events
            }
            GatewayRequest::Cancel { req_id, order_id } => {
                self.cancel_requests.push(order_id.clone());
                let before = self.open_orders.len();
                self.open_orders.retain(|o| o.order_id != order_id);
                let known = self.open_orders.len() < before;
                let mut events = vec![GatewayEvent::CancelAck { req_id, known }];
                if known {
                    events.push(GatewayEvent::OrderStatus(OrderStatusReport {
                        order_id,
                        status: OrderStatusKind::Cancelled,
                        filled: 0,
                        remaining: 0,
                        avg_fill_price: None,
                    }));
                }
                events
            }
            GatewayRequest::Positions { req_id } => vec![GatewayEvent::PositionList {
                req_id,
                positions: self
                    .positions
                    .iter()
                    .filter(|p| p.quantity != 0)
                    .cloned()
                    .collect(),
            }],
            GatewayRequest::OpenOrders { req_id } => vec![GatewayEvent::OpenOrderList {
                req_id,
                orders: self.open_orders.clone(),
            }],
        }
    }
}

type EventSlot = Arc<Mutex<Option<mpsc::UnboundedSender<GatewayEvent>>>>;

/// Test harness around the gateway model.
#[derive(Clone, Default)]
pub struct StubGateway {
    model: Arc<Mutex<GatewayModel>>,
    slot: EventSlot,
    fail_connects: Arc<AtomicU32>,
}

impl StubGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport to hand to `spawn_broker_link`.
    pub fn transport(&self) -> StubTransport {
        StubTransport {
            model: self.model.clone(),
            slot: self.slot.clone(),
            fail_connects: self.fail_connects.clone(),
        }
    }

    /// Lock the gateway model for setup or assertions.
    pub fn model(&self) -> MutexGuard<'_, GatewayModel> {
        self.model.lock()
    }

    /// Push an unsolicited event (fill, status, error) to the client.
    /// Returns false when no connection is active.
    pub fn inject(&self, event: GatewayEvent) -> bool {
        match self.slot.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Sever the active connection; the link will observe EOF.
    pub fn drop_connection(&self) {
        self.slot.lock().take();
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.fail_connects.store(n, Ordering::SeqCst);
    }
}

/// Transport handed to the link under test.
#[derive(Clone)]
pub struct StubTransport {
    model: Arc<Mutex<GatewayModel>>,
    slot: EventSlot,
    fail_connects: Arc<AtomicU32>,
}

pub struct StubStream {
    model: Arc<Mutex<GatewayModel>>,
    slot: EventSlot,
    rx: mpsc::UnboundedReceiver<GatewayEvent>,
}

impl GatewayTransport for StubTransport {
    type Stream = StubStream;

    async fn connect(&mut self, _config: &BrokerConfig) -> BrokerResult<StubStream> {
        if self
            .fail_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(BrokerError::ConnectionRefused("stub refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *self.slot.lock() = Some(tx);
        Ok(StubStream {
            model: self.model.clone(),
            slot: self.slot.clone(),
            rx,
        })
    }
}

impl GatewayStream for StubStream {
    async fn send(&mut self, request: GatewayRequest) -> BrokerResult<()> {
        let events = self.model.lock().handle(request);
        let slot = self.slot.lock();
        let Some(tx) = slot.as_ref() else {
            return Err(BrokerError::Transport("stub gateway closed".to_string()));
        };
        for event in events {
            let _ = tx.send(event);
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<BrokerResult<GatewayEvent>> {
        self.rx.recv().await.map(Ok)
    }
}
