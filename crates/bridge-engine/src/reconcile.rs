//! Broker-event reconciler.
//!
//! A single task consumes the serial event channel. For each fill, under
//! the symbol lock, the order of operations is fixed: tracker terminal,
//! ledger fill, ledger refresh. The event path never raises into the
//! controller; it only logs, notifies and mutates local state.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use bridge_broker::{BrokerEvent, ConnectionEvent, FillReport, OrderStatusReport};
use bridge_core::Notice;
use bridge_telemetry::metrics;

use crate::controller::TradingCore;

pub struct Reconciler {
    core: Arc<TradingCore>,
    events: mpsc::UnboundedReceiver<BrokerEvent>,
    shutdown: CancellationToken,
    /// Whether a connection loss has been observed; distinguishes a
    /// reconnection from the initial connect.
    link_was_down: bool,
}

impl Reconciler {
    pub fn new(
        core: Arc<TradingCore>,
        events: mpsc::UnboundedReceiver<BrokerEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            core,
            events,
            shutdown,
            link_was_down: false,
        }
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.events.recv() => match event {
                    None => break,
                    Some(event) => self.handle(event).await,
                },
            }
        }
        debug!("reconciler terminated");
    }

    async fn handle(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Fill(fill) => self.on_fill(fill).await,
            BrokerEvent::Status(status) => self.on_status(status).await,
            BrokerEvent::Connection(ConnectionEvent::Up) => {
                metrics::LINK_CONNECTED.set(1);
                if self.link_was_down {
                    metrics::LINK_RECONNECTS.inc();
                    self.link_was_down = false;
                }
                info!("broker link up");
                if let Err(e) = self.core.bootstrap().await {
                    warn!(error = %e, "bootstrap after connect failed");
                }
                self.core.notify(Notice::LinkUp);
            }
            BrokerEvent::Connection(ConnectionEvent::Down) => {
                metrics::LINK_CONNECTED.set(0);
                metrics::LINK_DISCONNECTS.inc();
                self.link_was_down = true;
                warn!("broker link down; reconnecting");
                self.core.notify(Notice::LinkDown { terminal: false });
            }
            BrokerEvent::Connection(ConnectionEvent::Lost) => {
                metrics::LINK_CONNECTED.set(0);
                error!("broker link lost permanently; trading halted until restart");
                self.core.notify(Notice::LinkDown { terminal: true });
            }
            BrokerEvent::GatewayError {
                code,
                message,
                symbol,
            } => {
                warn!(code, %message, symbol = ?symbol, "gateway error");
            }
        }
    }

    async fn on_fill(&self, fill: FillReport) {
        let _guard = self.core.locks.acquire(&fill.symbol).await;

        self.core.tracker.on_terminal(&fill.order_id);
        self.core.ledger.apply_fill(&fill);
        if let Err(e) = self.core.ledger.refresh(&fill.symbol).await {
            warn!(
                symbol = %fill.symbol,
                error = %e,
                "post-fill refresh failed; ledger reconciles on next refresh"
            );
        }

        metrics::ORDERS_FILLED.inc();
        info!(
            symbol = %fill.symbol,
            order_id = %fill.order_id,
            side = %fill.side,
            shares = fill.shares,
            price = %fill.price,
            "fill reconciled"
        );
        self.core.notify(Notice::OrderFilled {
            symbol: fill.symbol,
            order_id: fill.order_id,
            side: fill.side,
            shares: fill.shares,
            price: fill.price,
        });
    }

    async fn on_status(&self, status: OrderStatusReport) {
        if !status.status.is_terminal() {
            debug!(
                order_id = %status.order_id,
                status = ?status.status,
                filled = status.filled,
                remaining = status.remaining,
                "order status update"
            );
            return;
        }

        // Only tracked (pending limit) orders need bookkeeping here;
        // fills were already handled by their own events.
        let Some(record) = self.core.tracker.get(&status.order_id) else {
            return;
        };
        let _guard = self.core.locks.acquire(&record.symbol).await;
        if self.core.tracker.on_terminal(&status.order_id).is_some() {
            info!(
                order_id = %status.order_id,
                symbol = %record.symbol,
                status = ?status.status,
                "pending order resolved"
            );
        }
    }
}
