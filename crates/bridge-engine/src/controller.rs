//! Trading core controller.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use bridge_broker::{BrokerHandle, BrokerResult};
use bridge_core::{
    validate_transition, ExecutionOutcome, Notice, OrderSide, OrderType, PositionState,
    SessionPolicy, Signal, TradeAction, TradeError,
};
use bridge_executor::{
    trade_error_from_broker, OrderExecutor, PendingOrder, PendingOrderTracker, SymbolLocks,
};
use bridge_ledger::{PositionLedger, PositionRecord};
use bridge_telemetry::metrics;

/// Observability snapshot for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CoreStatus {
    pub connection: String,
    pub pending_orders: usize,
    pub positions: Vec<PositionRecord>,
}

/// The controller. Owns the ledger and tracker; all per-symbol state
/// changes happen under the keyed lock it shares with the sweep and the
/// reconciler.
pub struct TradingCore {
    pub(crate) broker: BrokerHandle,
    pub(crate) ledger: Arc<PositionLedger>,
    pub(crate) tracker: Arc<PendingOrderTracker>,
    pub(crate) executor: OrderExecutor,
    pub(crate) session: SessionPolicy,
    pub(crate) locks: SymbolLocks,
    pub(crate) notices: Option<mpsc::UnboundedSender<Notice>>,
}

impl TradingCore {
    pub fn new(
        broker: BrokerHandle,
        ledger: Arc<PositionLedger>,
        tracker: Arc<PendingOrderTracker>,
        executor: OrderExecutor,
        session: SessionPolicy,
        locks: SymbolLocks,
        notices: Option<mpsc::UnboundedSender<Notice>>,
    ) -> Self {
        Self {
            broker,
            ledger,
            tracker,
            executor,
            session,
            locks,
            notices,
        }
    }

    /// Process a signal at the current wall-clock time.
    pub async fn process_signal(&self, signal: &Signal) -> Result<ExecutionOutcome, TradeError> {
        self.process_signal_at(signal, Utc::now()).await
    }

    /// Process a signal against an explicit instant.
    ///
    /// Pipeline: session gate, link gate, ledger refresh, transition
    /// validation, execution. The per-symbol lock is held throughout.
    pub async fn process_signal_at(
        &self,
        signal: &Signal,
        now: DateTime<Utc>,
    ) -> Result<ExecutionOutcome, TradeError> {
        let _guard = self.locks.acquire(&signal.symbol).await;

        let result = self.run_pipeline(signal, now).await;
        match &result {
            Ok(outcome) => {
                info!(
                    symbol = %signal.symbol,
                    action = %signal.action,
                    quantity = signal.quantity,
                    order_id = %outcome.order_id,
                    "signal executed"
                );
                self.notify(Notice::SignalExecuted {
                    symbol: signal.symbol.clone(),
                    action: signal.action,
                    quantity: signal.quantity,
                    order_id: outcome.order_id.clone(),
                    order_type: outcome.order_type,
                    limit_price: outcome.limit_price,
                });
            }
            Err(e) => {
                metrics::SIGNALS_REJECTED.with_label_values(&[e.kind()]).inc();
                warn!(
                    symbol = %signal.symbol,
                    action = %signal.action,
                    quantity = signal.quantity,
                    kind = e.kind(),
                    error = %e,
                    "signal rejected"
                );
                self.notify(Notice::SignalRejected {
                    symbol: signal.symbol.clone(),
                    action: signal.action,
                    kind: e.kind(),
                    message: e.to_string(),
                });
            }
        }
        result
    }

    async fn run_pipeline(
        &self,
        signal: &Signal,
        now: DateTime<Utc>,
    ) -> Result<ExecutionOutcome, TradeError> {
        let decision = self.session.decide(now);
        if !decision.tradable {
            return Err(TradeError::SessionClosed(decision.reason));
        }

        // Signals are level-triggered intent: no buffering while the
        // link is down, the sender re-emits after reconnect if desired.
        if !self.broker.is_connected() {
            return Err(TradeError::LinkLost);
        }

        self.ledger
            .refresh(&signal.symbol)
            .await
            .map_err(trade_error_from_broker)?;
        let record = self.ledger.get(&signal.symbol);

        validate_transition(record.state, signal.action)?;

        self.executor
            .execute(&signal.symbol, signal.action, signal.quantity, &decision, now)
            .await
    }

    /// Rebuild local state from the broker: the ledger from current
    /// positions, the tracker from open limit orders. Rebuilt pending
    /// orders restart with a zero resubmission count and a fresh
    /// submission time, a conservative reset that may postpone their
    /// first replace by up to one timeout interval.
    pub async fn bootstrap(&self) -> BrokerResult<()> {
        let now = Utc::now();

        let positions = self.broker.positions().await?;
        let position_count = positions.len();
        self.ledger.sync(positions, now);

        let open = self.broker.open_orders().await?;
        let mut adopted = 0usize;
        for order in open.into_iter().filter(|o| !o.status.is_terminal()) {
            if order.order_type != OrderType::Limit {
                continue;
            }
            let Some(limit) = order.limit_price else {
                // A limit order without a price is a malformed gateway
                // report; it stays broker-side but untracked here.
                warn!(
                    order_id = %order.order_id,
                    symbol = %order.symbol,
                    "open limit order has no limit price; not adopting"
                );
                continue;
            };
            let state = self.ledger.get(&order.symbol).state;
            self.tracker.register(PendingOrder::new(
                order.order_id,
                order.symbol,
                action_for(order.side, state),
                order.quantity,
                limit,
                now,
            ));
            adopted += 1;
        }

        info!(
            positions = position_count,
            pending_orders = adopted,
            "state rebuilt from broker"
        );
        Ok(())
    }

    /// Snapshot for observability endpoints.
    pub fn status(&self) -> CoreStatus {
        CoreStatus {
            connection: self.broker.state().to_string(),
            pending_orders: self.tracker.len(),
            positions: self.ledger.snapshot(),
        }
    }

    pub fn session(&self) -> &SessionPolicy {
        &self.session
    }

    pub fn broker_connected(&self) -> bool {
        self.broker.is_connected()
    }

    pub(crate) fn notify(&self, notice: Notice) {
        if let Some(tx) = &self.notices {
            let _ = tx.send(notice);
        }
    }
}

/// Reconstruct the business action of an adopted open order from its
/// broker side and the current position state. A sell against a long
/// position is an exit; against anything else it is a short entry, and
/// symmetrically for buys.
fn action_for(side: OrderSide, state: PositionState) -> TradeAction {
    match (side, state) {
        (OrderSide::Sell, PositionState::Long) => TradeAction::Sell,
        (OrderSide::Sell, _) => TradeAction::Short,
        (OrderSide::Buy, PositionState::Short) => TradeAction::Cover,
        (OrderSide::Buy, _) => TradeAction::Buy,
    }
}
