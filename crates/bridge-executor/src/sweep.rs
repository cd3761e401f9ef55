//! Timed cancel-and-replace sweep for outstanding limit orders.
//!
//! A timer drives [`ResubmitMonitor::run`]; each pass collects records
//! whose idle window expired, then per record, under the symbol lock:
//! abandon at the cap, otherwise cancel best-effort, refresh the quote,
//! place a new limit and atomically re-key the record. The count only
//! increments on a successful replace; failed attempts retry next sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use bridge_broker::{BrokerHandle, OrderTicket};
use bridge_core::{BrokerOrderId, Notice, OrderType, Price, TradeError};
use bridge_telemetry::metrics;

use crate::executor::{buffered_limit, placement_error, trade_error_from_broker};
use crate::locks::SymbolLocks;
use crate::pending::{PendingOrder, PendingOrderTracker};

#[derive(Debug, Clone)]
pub struct SweepConfig {
    /// How often the sweep runs.
    pub interval: Duration,
    /// Idle threshold before an order is cancelled and replaced.
    pub order_timeout: Duration,
    /// Replaces allowed per original intent.
    pub max_resubmissions: u32,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            order_timeout: Duration::from_secs(300),
            max_resubmissions: 3,
        }
    }
}

pub struct ResubmitMonitor {
    broker: BrokerHandle,
    tracker: Arc<PendingOrderTracker>,
    locks: SymbolLocks,
    config: SweepConfig,
    timeout: chrono::Duration,
    notices: Option<mpsc::UnboundedSender<Notice>>,
    shutdown: CancellationToken,
}

impl ResubmitMonitor {
    pub fn new(
        broker: BrokerHandle,
        tracker: Arc<PendingOrderTracker>,
        locks: SymbolLocks,
        config: SweepConfig,
        notices: Option<mpsc::UnboundedSender<Notice>>,
        shutdown: CancellationToken,
    ) -> Self {
        let timeout = chrono::Duration::from_std(config.order_timeout)
            .unwrap_or_else(|_| chrono::Duration::minutes(5));
        Self {
            broker,
            tracker,
            locks,
            config,
            timeout,
            notices,
            shutdown,
        }
    }

    /// Timer loop. Sweeps are skipped while the link is not connected.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it so the monitor
        // waits a full interval before its first pass.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if !self.broker.is_connected() {
                debug!("sweep skipped: broker link not connected");
                continue;
            }
            self.sweep(Utc::now()).await;
        }
        debug!("resubmit monitor terminated");
    }

    /// One sweep pass over the due set.
    pub async fn sweep(&self, now: DateTime<Utc>) {
        let due = self.tracker.due(now, self.timeout);
        if due.is_empty() {
            return;
        }
        debug!(due = due.len(), "sweeping timed-out limit orders");

        for order in due {
            let _guard = self.locks.acquire(&order.symbol).await;

            // A fill or cancel may have resolved the order while we
            // waited for the lock; the record is authoritative.
            if !self.tracker.contains(&order.order_id) {
                continue;
            }

            if order.resubmission_count >= self.config.max_resubmissions {
                self.tracker.on_terminal(&order.order_id);
                metrics::ORDERS_ABANDONED.inc();
                warn!(
                    order_id = %order.order_id,
                    symbol = %order.symbol,
                    resubmissions = order.resubmission_count,
                    "max resubmissions reached; abandoning order"
                );
                self.notify(Notice::OrderAbandoned {
                    symbol: order.symbol.clone(),
                    order_id: order.order_id.clone(),
                    resubmission_count: order.resubmission_count,
                });
                continue;
            }

            match self.replace_order(&order).await {
                Ok((new_id, limit)) => {
                    if self.tracker.replace(&order.order_id, new_id.clone(), now) {
                        metrics::ORDERS_RESUBMITTED.inc();
                        info!(
                            symbol = %order.symbol,
                            old_order_id = %order.order_id,
                            new_order_id = %new_id,
                            limit = %limit,
                            resubmissions = order.resubmission_count + 1,
                            "limit order resubmitted at refreshed quote"
                        );
                        self.notify(Notice::OrderResubmitted {
                            symbol: order.symbol.clone(),
                            old_order_id: order.order_id.clone(),
                            new_order_id: new_id,
                            limit_price: limit,
                            resubmission_count: order.resubmission_count + 1,
                        });
                    } else {
                        warn!(
                            new_order_id = %new_id,
                            "pending record vanished during replace"
                        );
                    }
                }
                Err(e) => {
                    warn!(
                        order_id = %order.order_id,
                        symbol = %order.symbol,
                        error = %e,
                        "resubmission attempt failed; will retry next sweep"
                    );
                }
            }
        }
    }

    /// Cancel-and-replace one order: cancel is best-effort (the broker
    /// may already have resolved it; the later event reconciles), then
    /// a fresh quote prices the replacement.
    async fn replace_order(
        &self,
        order: &PendingOrder,
    ) -> Result<(BrokerOrderId, Price), TradeError> {
        let contract = self
            .broker
            .qualify(&order.symbol)
            .await
            .map_err(trade_error_from_broker)?;

        match self.broker.open_orders().await {
            Ok(open) => {
                if open.iter().any(|o| o.order_id == order.order_id) {
                    match self.broker.cancel(&order.order_id).await {
                        Ok(()) => metrics::ORDERS_CANCELLED.inc(),
                        Err(e) => warn!(
                            order_id = %order.order_id,
                            error = %e,
                            "cancel failed; broker may have already resolved the order"
                        ),
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "could not list open orders before replace");
            }
        }

        let quote = self
            .broker
            .quote(&contract)
            .await
            .map_err(trade_error_from_broker)?;
        let limit = buffered_limit(quote, order.action.side());

        let new_id = self
            .broker
            .place(OrderTicket {
                contract,
                side: order.action.side(),
                quantity: order.quantity,
                order_type: OrderType::Limit,
                limit_price: Some(limit),
            })
            .await
            .map_err(placement_error)?;

        Ok((new_id, limit))
    }

    fn notify(&self, notice: Notice) {
        if let Some(tx) = &self.notices {
            let _ = tx.send(notice);
        }
    }
}
