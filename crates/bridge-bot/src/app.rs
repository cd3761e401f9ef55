//! Application orchestration.
//!
//! Builds the component graph and runs the task tree: the broker link,
//! the reconciler, the resubmission sweep, the webhook server and the
//! notification fan-out, all cancelled through one shutdown token.

use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use bridge_broker::{spawn_broker_link, TcpTransport};
use bridge_core::{ExecutionOutcome, Signal, TradeError};
use bridge_engine::{Reconciler, TradingCore};
use bridge_executor::{OrderExecutor, PendingOrderTracker, ResubmitMonitor, SymbolLocks};
use bridge_ledger::PositionLedger;
use bridge_notify::Notifier;
use bridge_webhook::{AppState, SignalGateway};

/// Adapter exposing the trading core to the intake server.
pub struct CoreGateway(Arc<TradingCore>);

impl SignalGateway for CoreGateway {
    fn submit(
        &self,
        signal: Signal,
    ) -> impl Future<Output = Result<ExecutionOutcome, TradeError>> + Send {
        let core = self.0.clone();
        async move { core.process_signal(&signal).await }
    }

    fn snapshot(&self) -> Value {
        serde_json::to_value(self.0.status()).unwrap_or(Value::Null)
    }
}

pub struct Application {
    config: AppConfig,
}

impl Application {
    pub fn new(config: AppConfig) -> Self {
        Self { config }
    }

    pub async fn run(self) -> AppResult<()> {
        let shutdown = CancellationToken::new();
        let session = self.config.session_policy()?;
        let (notice_tx, notice_rx) = mpsc::unbounded_channel();

        // Broker link.
        let (broker, broker_events, link_task) = spawn_broker_link(
            TcpTransport,
            self.config.broker_config(),
            shutdown.clone(),
        );

        // Core state: ledger, tracker and the per-symbol locks shared by
        // controller, reconciler and sweep.
        let ledger = Arc::new(
            PositionLedger::new(broker.clone()).with_notices(notice_tx.clone()),
        );
        let tracker = Arc::new(PendingOrderTracker::new());
        let locks = SymbolLocks::new();
        let executor = OrderExecutor::new(
            broker.clone(),
            tracker.clone(),
            self.config.trading.max_position_size,
        );
        let core = Arc::new(TradingCore::new(
            broker.clone(),
            ledger,
            tracker.clone(),
            executor,
            session,
            locks.clone(),
            Some(notice_tx.clone()),
        ));

        // Event reconciler (also bootstraps state on every connect).
        let reconciler_task = tokio::spawn(
            Reconciler::new(core.clone(), broker_events, shutdown.clone()).run(),
        );

        // Timed resubmission sweep.
        let monitor_task = tokio::spawn(
            ResubmitMonitor::new(
                broker,
                tracker,
                locks,
                self.config.sweep_config(),
                Some(notice_tx),
                shutdown.clone(),
            )
            .run(),
        );

        // Notification fan-out.
        let notifier = Notifier::new(self.config.notifier_config());
        let notify_task = tokio::spawn(notifier.run(notice_rx, shutdown.clone()));

        // Signal intake.
        let state = AppState::new(Arc::new(CoreGateway(core)), self.config.webhook_config()?);
        let server_shutdown = shutdown.clone();
        let server_task =
            tokio::spawn(async move { bridge_webhook::serve(state, server_shutdown).await });

        info!(
            bot = %self.config.bot_name,
            webhook_port = self.config.webhook_port,
            account = %self.config.ibkr.account,
            "bridge started"
        );

        tokio::signal::ctrl_c().await.map_err(AppError::Io)?;
        info!("shutdown requested");
        shutdown.cancel();

        if let Err(e) = server_task.await.map_err(join_error)? {
            error!(error = %e, "webhook server exited with error");
        }
        reconciler_task.await.map_err(join_error)?;
        monitor_task.await.map_err(join_error)?;
        notify_task.await.map_err(join_error)?;
        link_task.await.map_err(join_error)?;

        info!("bridge stopped");
        Ok(())
    }
}

fn join_error(e: tokio::task::JoinError) -> AppError {
    AppError::Config(format!("task panicked: {e}"))
}
