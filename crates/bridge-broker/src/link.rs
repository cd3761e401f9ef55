//! Broker link: connection supervisor and request multiplexer.
//!
//! A single task owns the gateway connection. Callers talk to it through
//! [`BrokerHandle`], which sends commands over a channel and awaits a
//! oneshot reply. Replies are correlated with gateway events by `req_id`.
//!
//! Invariants:
//! - socket writes happen only inside the link task,
//! - every in-flight call fails with `LinkLost` when the session drops,
//! - a quote subscription is released on every exit path,
//! - events are forwarded in arrival order on an unbounded channel so the
//!   I/O loop never blocks behind a slow consumer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bridge_core::{BrokerOrderId, Price, Symbol};

use crate::config::BrokerConfig;
use crate::error::{BrokerError, BrokerResult};
use crate::gateway::{
    is_session_loss, Contract, FillReport, GatewayEvent, GatewayRequest, OpenOrderReport,
    OrderStatusReport, OrderTicket, PositionReport,
};
use crate::transport::{GatewayStream, GatewayTransport};

/// Link connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Backoff => write!(f, "backoff"),
        }
    }
}

/// Connection transitions delivered on the event channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Up,
    Down,
    /// Reconnection gave up; the link is gone for this process lifetime.
    Lost,
}

/// Asynchronous broker events, delivered serially in arrival order.
#[derive(Debug, Clone)]
pub enum BrokerEvent {
    Fill(FillReport),
    Status(OrderStatusReport),
    Connection(ConnectionEvent),
    GatewayError {
        code: i32,
        message: String,
        symbol: Option<Symbol>,
    },
}

enum BrokerCmd {
    Qualify {
        symbol: Symbol,
        reply: oneshot::Sender<BrokerResult<Contract>>,
    },
    Quote {
        contract: Contract,
        reply: oneshot::Sender<BrokerResult<Price>>,
    },
    Place {
        ticket: OrderTicket,
        reply: oneshot::Sender<BrokerResult<BrokerOrderId>>,
    },
    Cancel {
        order_id: BrokerOrderId,
        reply: oneshot::Sender<BrokerResult<()>>,
    },
    Positions {
        reply: oneshot::Sender<BrokerResult<Vec<PositionReport>>>,
    },
    OpenOrders {
        reply: oneshot::Sender<BrokerResult<Vec<OpenOrderReport>>>,
    },
}

enum Waiter {
    Qualify {
        symbol: Symbol,
        reply: oneshot::Sender<BrokerResult<Contract>>,
    },
    Place {
        reply: oneshot::Sender<BrokerResult<BrokerOrderId>>,
    },
    Cancel {
        order_id: BrokerOrderId,
        reply: oneshot::Sender<BrokerResult<()>>,
    },
    Positions {
        reply: oneshot::Sender<BrokerResult<Vec<PositionReport>>>,
    },
    OpenOrders {
        reply: oneshot::Sender<BrokerResult<Vec<OpenOrderReport>>>,
    },
}

/// Reserved market-data subscription awaiting price population.
struct QuoteWaiter {
    symbol: Symbol,
    deadline: Instant,
    bid: Option<Price>,
    ask: Option<Price>,
    last: Option<Price>,
    reply: oneshot::Sender<BrokerResult<Price>>,
}

impl QuoteWaiter {
    /// Fallback price once the wait expires: bid/ask midpoint when both
    /// sides are positive, else last trade.
    fn fallback(&self) -> Option<Price> {
        match (self.bid, self.ask) {
            (Some(bid), Some(ask)) if bid.is_positive() && ask.is_positive() => {
                Some(Price::new((bid.inner() + ask.inner()) / rust_decimal::Decimal::TWO))
            }
            _ => self.last.filter(|p| p.is_positive()),
        }
    }
}

/// Cloneable handle to the broker link task.
#[derive(Clone)]
pub struct BrokerHandle {
    cmd_tx: mpsc::Sender<BrokerCmd>,
    state: Arc<RwLock<ConnectionState>>,
}

impl BrokerHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Resolve a ticker to a tradable contract.
    pub async fn qualify(&self, symbol: &Symbol) -> BrokerResult<Contract> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerCmd::Qualify {
            symbol: symbol.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| BrokerError::LinkLost)?
    }

    /// Best-available reference price for a contract.
    pub async fn quote(&self, contract: &Contract) -> BrokerResult<Price> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerCmd::Quote {
            contract: contract.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| BrokerError::LinkLost)?
    }

    /// Submit an order; returns the broker-assigned order id.
    pub async fn place(&self, ticket: OrderTicket) -> BrokerResult<BrokerOrderId> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerCmd::Place { ticket, reply }).await?;
        rx.await.map_err(|_| BrokerError::LinkLost)?
    }

    /// Best-effort cancel; terminal confirmation arrives asynchronously.
    pub async fn cancel(&self, order_id: &BrokerOrderId) -> BrokerResult<()> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerCmd::Cancel {
            order_id: order_id.clone(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| BrokerError::LinkLost)?
    }

    /// Current account positions with non-zero quantity.
    pub async fn positions(&self) -> BrokerResult<Vec<PositionReport>> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerCmd::Positions { reply }).await?;
        rx.await.map_err(|_| BrokerError::LinkLost)?
    }

    /// Currently open (non-terminal) orders.
    pub async fn open_orders(&self) -> BrokerResult<Vec<OpenOrderReport>> {
        let (reply, rx) = oneshot::channel();
        self.send(BrokerCmd::OpenOrders { reply }).await?;
        rx.await.map_err(|_| BrokerError::LinkLost)?
    }

    async fn send(&self, cmd: BrokerCmd) -> BrokerResult<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| BrokerError::LinkLost)
    }
}

/// The link task. Owns the transport and all connection state.
pub struct BrokerLink<T: GatewayTransport> {
    config: BrokerConfig,
    transport: T,
    cmd_rx: mpsc::Receiver<BrokerCmd>,
    event_tx: mpsc::UnboundedSender<BrokerEvent>,
    state: Arc<RwLock<ConnectionState>>,
    shutdown: CancellationToken,
    next_req_id: u64,
    waiters: HashMap<u64, Waiter>,
    quotes: HashMap<u64, QuoteWaiter>,
}

impl<T: GatewayTransport> BrokerLink<T> {
    /// Supervision loop: connect, run the session, back off and retry.
    pub async fn run(mut self) {
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.set_state(ConnectionState::Connecting);

            match self.session(&mut attempt).await {
                Ok(()) => break,
                Err(BrokerError::AuthFailed(reason)) => {
                    error!(%reason, "gateway rejected credentials; not retrying");
                    self.fail_all_waiters();
                    let _ = self.event_tx.send(BrokerEvent::Connection(ConnectionEvent::Lost));
                    break;
                }
                Err(e) => {
                    warn!(error = %e, "broker session ended");
                }
            }

            self.fail_all_waiters();
            let _ = self.event_tx.send(BrokerEvent::Connection(ConnectionEvent::Down));

            attempt += 1;
            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "max reconnect attempts reached; link lost");
                let _ = self.event_tx.send(BrokerEvent::Connection(ConnectionEvent::Lost));
                break;
            }

            self.set_state(ConnectionState::Backoff);
            let delay = backoff_delay(
                self.config.reconnect_base_delay,
                self.config.reconnect_max_delay,
                attempt,
            );
            info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting after backoff");
            if !self.backoff_wait(delay).await {
                break;
            }
        }

        self.set_state(ConnectionState::Disconnected);
        debug!("broker link task terminated");
    }

    /// One connected session: connect, authenticate, then multiplex
    /// commands and gateway events until the connection drops.
    async fn session(&mut self, attempt: &mut u32) -> BrokerResult<()> {
        info!(host = %self.config.host, port = self.config.port, "connecting to broker gateway");

        let mut stream = tokio::time::timeout(
            self.config.connect_timeout,
            self.transport.connect(&self.config),
        )
        .await
        .map_err(|_| BrokerError::Timeout("connect"))??;

        stream
            .send(GatewayRequest::Auth {
                client_id: self.config.client_id,
                account: self.config.account.clone(),
            })
            .await?;

        loop {
            let event = tokio::time::timeout(self.config.connect_timeout, stream.next_event())
                .await
                .map_err(|_| BrokerError::Timeout("auth"))?;
            match event {
                None => {
                    return Err(BrokerError::Transport(
                        "gateway closed during auth".to_string(),
                    ))
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(GatewayEvent::AuthAck { account })) => {
                    info!(%account, "broker gateway session established");
                    break;
                }
                Some(Ok(GatewayEvent::AuthReject { reason })) => {
                    return Err(BrokerError::AuthFailed(reason))
                }
                Some(Ok(other)) => debug!(?other, "ignoring pre-auth event"),
            }
        }

        self.set_state(ConnectionState::Connected);
        *attempt = 0;
        let _ = self.event_tx.send(BrokerEvent::Connection(ConnectionEvent::Up));

        // Quote deadlines are checked on a coarse timer; 250ms of slack on
        // a 2s budget is acceptable.
        let mut quote_timer = tokio::time::interval(std::time::Duration::from_millis(250));

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("shutdown requested; closing broker session");
                    return Ok(());
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        None => return Ok(()),
                        Some(cmd) => self.handle_cmd(&mut stream, cmd).await?,
                    }
                }
                event = stream.next_event() => {
                    match event {
                        None => {
                            return Err(BrokerError::Transport(
                                "gateway closed the connection".to_string(),
                            ))
                        }
                        Some(Err(e)) => return Err(e),
                        Some(Ok(event)) => self.handle_event(&mut stream, event).await?,
                    }
                }
                _ = quote_timer.tick() => {
                    self.expire_quotes(&mut stream).await?;
                }
            }
        }
    }

    async fn handle_cmd(&mut self, stream: &mut T::Stream, cmd: BrokerCmd) -> BrokerResult<()> {
        let req_id = self.next_req_id();
        match cmd {
            BrokerCmd::Qualify { symbol, reply } => {
                self.waiters.insert(
                    req_id,
                    Waiter::Qualify {
                        symbol: symbol.clone(),
                        reply,
                    },
                );
                stream
                    .send(GatewayRequest::Qualify {
                        req_id,
                        symbol,
                        exchange: "SMART".to_string(),
                        currency: "USD".to_string(),
                    })
                    .await?;
            }
            BrokerCmd::Quote { contract, reply } => {
                self.quotes.insert(
                    req_id,
                    QuoteWaiter {
                        symbol: contract.symbol.clone(),
                        deadline: Instant::now() + self.config.quote_timeout,
                        bid: None,
                        ask: None,
                        last: None,
                        reply,
                    },
                );
                stream
                    .send(GatewayRequest::MarketData {
                        req_id,
                        contract_id: contract.contract_id,
                    })
                    .await?;
            }
            BrokerCmd::Place { ticket, reply } => {
                self.waiters.insert(req_id, Waiter::Place { reply });
                stream
                    .send(GatewayRequest::Place {
                        req_id,
                        account: self.config.account.clone(),
                        ticket,
                    })
                    .await?;
            }
            BrokerCmd::Cancel { order_id, reply } => {
                self.waiters.insert(
                    req_id,
                    Waiter::Cancel {
                        order_id: order_id.clone(),
                        reply,
                    },
                );
                stream
                    .send(GatewayRequest::Cancel { req_id, order_id })
                    .await?;
            }
            BrokerCmd::Positions { reply } => {
                self.waiters.insert(req_id, Waiter::Positions { reply });
                stream.send(GatewayRequest::Positions { req_id }).await?;
            }
            BrokerCmd::OpenOrders { reply } => {
                self.waiters.insert(req_id, Waiter::OpenOrders { reply });
                stream.send(GatewayRequest::OpenOrders { req_id }).await?;
            }
        }
        Ok(())
    }

    async fn handle_event(
        &mut self,
        stream: &mut T::Stream,
        event: GatewayEvent,
    ) -> BrokerResult<()> {
        match event {
            GatewayEvent::ContractDetails { req_id, contract } => {
                if let Some(Waiter::Qualify { symbol, reply }) = self.waiters.remove(&req_id) {
                    let result = contract
                        .ok_or_else(|| BrokerError::SymbolUnknown(symbol.as_str().to_string()));
                    let _ = reply.send(result);
                }
            }
            GatewayEvent::Tick {
                req_id,
                mid,
                bid,
                ask,
                last,
            } => {
                if let Some(waiter) = self.quotes.get_mut(&req_id) {
                    if let Some(b) = bid {
                        waiter.bid = Some(b);
                    }
                    if let Some(a) = ask {
                        waiter.ask = Some(a);
                    }
                    if let Some(l) = last {
                        waiter.last = Some(l);
                    }
                    // A positive consolidated mid resolves immediately;
                    // the fallbacks wait out the population window.
                    if let Some(price) = mid.filter(Price::is_positive) {
                        if let Some(waiter) = self.quotes.remove(&req_id) {
                            let _ = waiter.reply.send(Ok(price));
                        }
                        self.release_quote(stream, req_id).await?;
                    }
                }
            }
            GatewayEvent::OrderAck { req_id, order_id } => {
                if let Some(Waiter::Place { reply }) = self.waiters.remove(&req_id) {
                    let _ = reply.send(Ok(order_id));
                }
            }
            GatewayEvent::OrderReject { req_id, reason } => {
                if let Some(Waiter::Place { reply }) = self.waiters.remove(&req_id) {
                    let _ = reply.send(Err(BrokerError::PlacementRejected(reason)));
                }
            }
            GatewayEvent::CancelAck { req_id, known } => {
                if let Some(Waiter::Cancel { order_id, reply }) = self.waiters.remove(&req_id) {
                    let result = if known {
                        Ok(())
                    } else {
                        Err(BrokerError::UnknownOrder(order_id.as_str().to_string()))
                    };
                    let _ = reply.send(result);
                }
            }
            GatewayEvent::PositionList { req_id, positions } => {
                if let Some(Waiter::Positions { reply }) = self.waiters.remove(&req_id) {
                    let _ = reply.send(Ok(positions));
                }
            }
            GatewayEvent::OpenOrderList { req_id, orders } => {
                if let Some(Waiter::OpenOrders { reply }) = self.waiters.remove(&req_id) {
                    let _ = reply.send(Ok(orders));
                }
            }
            GatewayEvent::Fill(fill) => {
                let _ = self.event_tx.send(BrokerEvent::Fill(fill));
            }
            GatewayEvent::OrderStatus(status) => {
                let _ = self.event_tx.send(BrokerEvent::Status(status));
            }
            GatewayEvent::Error {
                code,
                message,
                symbol,
            } => {
                if is_session_loss(code) {
                    warn!(code, %message, "gateway reports session loss");
                    return Err(BrokerError::LinkLost);
                }
                debug!(code, %message, "gateway error event");
                let _ = self.event_tx.send(BrokerEvent::GatewayError {
                    code,
                    message,
                    symbol,
                });
            }
            GatewayEvent::AuthAck { .. } | GatewayEvent::AuthReject { .. } => {
                debug!("ignoring auth event mid-session");
            }
        }
        Ok(())
    }

    /// Resolve quote waiters whose population window expired.
    async fn expire_quotes(&mut self, stream: &mut T::Stream) -> BrokerResult<()> {
        let now = Instant::now();
        let expired: Vec<u64> = self
            .quotes
            .iter()
            .filter(|(_, w)| now >= w.deadline)
            .map(|(id, _)| *id)
            .collect();

        for req_id in expired {
            if let Some(waiter) = self.quotes.remove(&req_id) {
                let result = waiter
                    .fallback()
                    .ok_or_else(|| BrokerError::QuoteUnavailable(waiter.symbol.as_str().to_string()));
                let _ = waiter.reply.send(result);
                self.release_quote(stream, req_id).await?;
            }
        }
        Ok(())
    }

    async fn release_quote(&mut self, stream: &mut T::Stream, req_id: u64) -> BrokerResult<()> {
        stream
            .send(GatewayRequest::CancelMarketData { req_id })
            .await
    }

    /// Sleep out the backoff window, rejecting commands that arrive
    /// meanwhile. Returns false when shutdown was requested.
    async fn backoff_wait(&mut self, delay: std::time::Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                _ = self.shutdown.cancelled() => return false,
                cmd = self.cmd_rx.recv() => match cmd {
                    None => return false,
                    Some(cmd) => reject_cmd(cmd),
                },
            }
        }
    }

    fn fail_all_waiters(&mut self) {
        for (_, waiter) in self.waiters.drain() {
            match waiter {
                Waiter::Qualify { reply, .. } => {
                    let _ = reply.send(Err(BrokerError::LinkLost));
                }
                Waiter::Place { reply } => {
                    let _ = reply.send(Err(BrokerError::LinkLost));
                }
                Waiter::Cancel { reply, .. } => {
                    let _ = reply.send(Err(BrokerError::LinkLost));
                }
                Waiter::Positions { reply } => {
                    let _ = reply.send(Err(BrokerError::LinkLost));
                }
                Waiter::OpenOrders { reply } => {
                    let _ = reply.send(Err(BrokerError::LinkLost));
                }
            }
        }
        for (_, waiter) in self.quotes.drain() {
            let _ = waiter.reply.send(Err(BrokerError::LinkLost));
        }
    }

    fn next_req_id(&mut self) -> u64 {
        self.next_req_id += 1;
        self.next_req_id
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }
}

fn reject_cmd(cmd: BrokerCmd) {
    match cmd {
        BrokerCmd::Qualify { reply, .. } => {
            let _ = reply.send(Err(BrokerError::LinkLost));
        }
        BrokerCmd::Quote { reply, .. } => {
            let _ = reply.send(Err(BrokerError::LinkLost));
        }
        BrokerCmd::Place { reply, .. } => {
            let _ = reply.send(Err(BrokerError::LinkLost));
        }
        BrokerCmd::Cancel { reply, .. } => {
            let _ = reply.send(Err(BrokerError::LinkLost));
        }
        BrokerCmd::Positions { reply } => {
            let _ = reply.send(Err(BrokerError::LinkLost));
        }
        BrokerCmd::OpenOrders { reply } => {
            let _ = reply.send(Err(BrokerError::LinkLost));
        }
    }
}

/// Exponential backoff: `base * 2^(attempt-1)` capped at `max`.
fn backoff_delay(
    base: std::time::Duration,
    max: std::time::Duration,
    attempt: u32,
) -> std::time::Duration {
    let exponent = attempt.saturating_sub(1).min(10);
    let delay = base.saturating_mul(1u32 << exponent);
    delay.min(max)
}

/// Spawn the broker link task.
///
/// Returns the handle, the serial event channel and the task join handle.
pub fn spawn_broker_link<T: GatewayTransport>(
    transport: T,
    config: BrokerConfig,
    shutdown: CancellationToken,
) -> (
    BrokerHandle,
    mpsc::UnboundedReceiver<BrokerEvent>,
    JoinHandle<()>,
) {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let state = Arc::new(RwLock::new(ConnectionState::Disconnected));

    let link = BrokerLink {
        config,
        transport,
        cmd_rx,
        event_tx,
        state: state.clone(),
        shutdown,
        next_req_id: 0,
        waiters: HashMap::new(),
        quotes: HashMap::new(),
    };

    let handle = BrokerHandle { cmd_tx, state };
    let join = tokio::spawn(link.run());

    (handle, event_rx, join)
}
