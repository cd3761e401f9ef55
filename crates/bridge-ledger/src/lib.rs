//! Per-symbol position ledger.
//!
//! Authoritative local view of positions, eventually consistent with the
//! broker. Records are created on first observation and live for the
//! process lifetime; the symbol set is small.
//!
//! Reconciliation policy: a `refresh` always follows `apply_fill` for the
//! same symbol before the next trading decision on it. On divergence the
//! broker view wins and the mismatch is logged.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use bridge_broker::{BrokerHandle, BrokerResult, FillReport, PositionReport};
use bridge_core::{Notice, PositionState, Price, Symbol};

/// Cached per-symbol position.
///
/// Quantity is stored as an unsigned magnitude tagged by `state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRecord {
    pub symbol: Symbol,
    pub state: PositionState,
    pub quantity: u32,
    pub avg_cost: Price,
    pub last_refreshed: DateTime<Utc>,
}

impl PositionRecord {
    pub fn flat(symbol: Symbol, now: DateTime<Utc>) -> Self {
        Self {
            symbol,
            state: PositionState::Flat,
            quantity: 0,
            avg_cost: Price::ZERO,
            last_refreshed: now,
        }
    }

    fn from_report(report: PositionReport, now: DateTime<Utc>) -> Self {
        Self {
            symbol: report.symbol,
            state: PositionState::from_signed(report.quantity),
            quantity: u32::try_from(report.quantity.unsigned_abs()).unwrap_or(u32::MAX),
            avg_cost: report.avg_cost,
            last_refreshed: now,
        }
    }

    /// Signed quantity: positive long, negative short.
    pub fn signed_quantity(&self) -> i64 {
        self.state.sign() * self.quantity as i64
    }
}

/// The ledger. Owned by the controller; mutated only under the
/// per-symbol lock or from the serial reconciler path.
pub struct PositionLedger {
    broker: BrokerHandle,
    records: DashMap<Symbol, PositionRecord>,
    notices: Option<mpsc::UnboundedSender<Notice>>,
}

impl PositionLedger {
    pub fn new(broker: BrokerHandle) -> Self {
        Self {
            broker,
            records: DashMap::new(),
            notices: None,
        }
    }

    pub fn with_notices(mut self, notices: mpsc::UnboundedSender<Notice>) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Fetch positions from the broker and update the cached record for
    /// `symbol`. Absence from the broker report means flat.
    pub async fn refresh(&self, symbol: &Symbol) -> BrokerResult<PositionRecord> {
        let reports = self.broker.positions().await?;
        let now = Utc::now();
        let record = reports
            .into_iter()
            .find(|p| &p.symbol == symbol)
            .map(|p| PositionRecord::from_report(p, now))
            .unwrap_or_else(|| PositionRecord::flat(symbol.clone(), now));

        if let Some(prev) = self.records.get(symbol) {
            let cached = prev.signed_quantity();
            let broker = record.signed_quantity();
            if cached != broker {
                warn!(
                    symbol = %symbol,
                    cached,
                    broker,
                    "ledger diverged from broker; broker view wins"
                );
                if let Some(tx) = &self.notices {
                    let _ = tx.send(Notice::LedgerDivergence {
                        symbol: symbol.clone(),
                        cached,
                        broker,
                    });
                }
            }
        }

        self.records.insert(symbol.clone(), record.clone());
        Ok(record)
    }

    /// Cached record, constructing a flat one if the symbol has never
    /// been observed. Never touches the broker.
    pub fn get(&self, symbol: &Symbol) -> PositionRecord {
        self.records
            .get(symbol)
            .map(|r| r.clone())
            .unwrap_or_else(|| PositionRecord::flat(symbol.clone(), Utc::now()))
    }

    /// Apply a fill to the cached record.
    ///
    /// Same-direction fills update the average cost by weighted average;
    /// opposite-direction fills reduce the magnitude, resetting the
    /// average cost to zero when the position goes flat and to the fill
    /// price when it flips through flat.
    pub fn apply_fill(&self, fill: &FillReport) {
        let mut entry = self
            .records
            .entry(fill.symbol.clone())
            .or_insert_with(|| PositionRecord::flat(fill.symbol.clone(), fill.filled_at));

        let signed = entry.signed_quantity();
        let delta = fill.side.sign() * fill.shares as i64;
        let new_signed = signed + delta;

        if signed == 0 || signed.signum() == delta.signum() {
            let old_notional = Decimal::from(signed.unsigned_abs()) * entry.avg_cost.inner();
            let fill_notional = Decimal::from(fill.shares) * fill.price.inner();
            let total = Decimal::from(signed.unsigned_abs() + fill.shares as u64);
            if !total.is_zero() {
                entry.avg_cost = Price::new((old_notional + fill_notional) / total);
            }
        } else if new_signed == 0 {
            entry.avg_cost = Price::ZERO;
        } else if new_signed.signum() != signed.signum() {
            entry.avg_cost = fill.price;
        }

        entry.state = PositionState::from_signed(new_signed);
        entry.quantity = u32::try_from(new_signed.unsigned_abs()).unwrap_or(u32::MAX);

        debug!(
            symbol = %fill.symbol,
            side = %fill.side,
            shares = fill.shares,
            price = %fill.price,
            state = %entry.state,
            quantity = entry.quantity,
            "fill applied to ledger"
        );
    }

    /// Replace the whole ledger with a broker position snapshot.
    /// Used at startup and after reconnects.
    pub fn sync(&self, reports: Vec<PositionReport>, now: DateTime<Utc>) {
        let fresh: Vec<PositionRecord> = reports
            .into_iter()
            .filter(|p| p.quantity != 0)
            .map(|p| PositionRecord::from_report(p, now))
            .collect();

        let keep: Vec<Symbol> = fresh.iter().map(|r| r.symbol.clone()).collect();
        for record in fresh {
            self.records.insert(record.symbol.clone(), record);
        }
        self.records.retain(|symbol, _| keep.contains(symbol));
    }

    /// Read-only view of all cached records.
    pub fn snapshot(&self) -> Vec<PositionRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    use bridge_broker::testing::StubGateway;
    use bridge_broker::{spawn_broker_link, BrokerConfig};
    use bridge_core::OrderSide;

    fn sym(s: &str) -> Symbol {
        Symbol::new(s).unwrap()
    }

    fn fill(symbol: &Symbol, side: OrderSide, shares: u32, price: Decimal) -> FillReport {
        FillReport {
            order_id: "1".into(),
            symbol: symbol.clone(),
            side,
            shares,
            price: Price::new(price),
            filled_at: Utc::now(),
        }
    }

    async fn connected_ledger(gateway: &StubGateway) -> PositionLedger {
        let (handle, _events, _join) = spawn_broker_link(
            gateway.transport(),
            BrokerConfig::default(),
            CancellationToken::new(),
        );
        for _ in 0..200 {
            if handle.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(handle.is_connected());
        PositionLedger::new(handle)
    }

    #[tokio::test]
    async fn test_fill_opens_long_position() {
        let gateway = StubGateway::new();
        let ledger = connected_ledger(&gateway).await;
        let aapl = sym("AAPL");

        ledger.apply_fill(&fill(&aapl, OrderSide::Buy, 100, dec!(150.00)));

        let record = ledger.get(&aapl);
        assert_eq!(record.state, PositionState::Long);
        assert_eq!(record.quantity, 100);
        assert_eq!(record.avg_cost, Price::new(dec!(150.00)));
        assert_eq!(record.signed_quantity(), 100);
    }

    #[tokio::test]
    async fn test_same_side_fill_updates_weighted_average() {
        let gateway = StubGateway::new();
        let ledger = connected_ledger(&gateway).await;
        let aapl = sym("AAPL");

        ledger.apply_fill(&fill(&aapl, OrderSide::Buy, 100, dec!(100.00)));
        ledger.apply_fill(&fill(&aapl, OrderSide::Buy, 100, dec!(110.00)));

        let record = ledger.get(&aapl);
        assert_eq!(record.quantity, 200);
        assert_eq!(record.avg_cost, Price::new(dec!(105.00)));
    }

    #[tokio::test]
    async fn test_closing_fill_goes_flat_and_resets_cost() {
        let gateway = StubGateway::new();
        let ledger = connected_ledger(&gateway).await;
        let msft = sym("MSFT");

        ledger.apply_fill(&fill(&msft, OrderSide::Buy, 50, dec!(300.00)));
        ledger.apply_fill(&fill(&msft, OrderSide::Sell, 50, dec!(310.00)));

        let record = ledger.get(&msft);
        assert_eq!(record.state, PositionState::Flat);
        assert_eq!(record.quantity, 0);
        assert_eq!(record.avg_cost, Price::ZERO);
    }

    #[tokio::test]
    async fn test_short_then_cover() {
        let gateway = StubGateway::new();
        let ledger = connected_ledger(&gateway).await;
        let tsla = sym("TSLA");

        ledger.apply_fill(&fill(&tsla, OrderSide::Sell, 10, dec!(250.00)));
        let record = ledger.get(&tsla);
        assert_eq!(record.state, PositionState::Short);
        assert_eq!(record.quantity, 10);
        assert_eq!(record.avg_cost, Price::new(dec!(250.00)));
        assert_eq!(record.signed_quantity(), -10);

        ledger.apply_fill(&fill(&tsla, OrderSide::Buy, 10, dec!(245.00)));
        let record = ledger.get(&tsla);
        assert_eq!(record.state, PositionState::Flat);
        assert_eq!(record.quantity, 0);
    }

    #[tokio::test]
    async fn test_refresh_absent_symbol_is_flat() {
        let gateway = StubGateway::new();
        let ledger = connected_ledger(&gateway).await;
        let nvda = sym("NVDA");

        let record = ledger.refresh(&nvda).await.unwrap();
        assert_eq!(record.state, PositionState::Flat);
        assert_eq!(record.quantity, 0);
    }

    #[tokio::test]
    async fn test_refresh_converges_to_broker_after_fill() {
        let gateway = StubGateway::new();
        let ledger = connected_ledger(&gateway).await;
        let aapl = sym("AAPL");

        // Broker says +100; the local cache thinks +90 after a lost fill.
        gateway
            .model()
            .set_position(&aapl, 100, Price::new(dec!(150.00)));
        ledger.apply_fill(&fill(&aapl, OrderSide::Buy, 90, dec!(150.00)));

        let record = ledger.refresh(&aapl).await.unwrap();
        assert_eq!(record.signed_quantity(), 100);
        assert_eq!(ledger.get(&aapl).signed_quantity(), 100);
    }

    #[tokio::test]
    async fn test_sync_replaces_stale_records() {
        let gateway = StubGateway::new();
        let ledger = connected_ledger(&gateway).await;
        let aapl = sym("AAPL");
        let msft = sym("MSFT");

        ledger.apply_fill(&fill(&aapl, OrderSide::Buy, 100, dec!(150.00)));

        ledger.sync(
            vec![PositionReport {
                symbol: msft.clone(),
                quantity: -50,
                avg_cost: Price::new(dec!(300.00)),
            }],
            Utc::now(),
        );

        assert_eq!(ledger.get(&aapl).state, PositionState::Flat);
        assert_eq!(ledger.get(&msft).state, PositionState::Short);
        assert_eq!(ledger.snapshot().len(), 1);
    }
}
