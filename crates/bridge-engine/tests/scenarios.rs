//! End-to-end scenarios for the trading core against the scripted
//! gateway: the full link, controller, executor, tracker, ledger and
//! reconciler stack.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::US::Eastern;
use rust_decimal_macros::dec;
use tokio_util::sync::CancellationToken;

use bridge_broker::testing::{QuoteBook, StubGateway};
use bridge_broker::{spawn_broker_link, BrokerConfig, GatewayEvent, GatewayRequest};
use bridge_core::{
    MarketHours, OrderSide, OrderType, PositionState, Price, SessionPolicy, Signal, Symbol,
    TradeAction, TradeError,
};
use bridge_engine::{Reconciler, TradingCore};
use bridge_executor::{OrderExecutor, PendingOrderTracker, ResubmitMonitor, SweepConfig, SymbolLocks};
use bridge_ledger::PositionLedger;

struct Harness {
    gateway: StubGateway,
    core: Arc<TradingCore>,
    tracker: Arc<PendingOrderTracker>,
    ledger: Arc<PositionLedger>,
    monitor: ResubmitMonitor,
}

fn us_policy(allow_pre: bool, allow_post: bool) -> SessionPolicy {
    let hours = MarketHours::parse("04:00", "09:30", "16:00", "20:00", "US/Eastern").unwrap();
    SessionPolicy::new(hours, allow_pre, allow_post)
}

/// January 2024: the 9th is a Tuesday, the 13th a Saturday.
fn eastern(day: u32, hour: u32, min: u32) -> DateTime<Utc> {
    Eastern
        .with_ymd_and_hms(2024, 1, day, hour, min, 0)
        .unwrap()
        .with_timezone(&Utc)
}

fn sym(s: &str) -> Symbol {
    Symbol::new(s).unwrap()
}

fn signal(symbol: &str, action: TradeAction, quantity: u32) -> Signal {
    Signal::new(sym(symbol), action, quantity, Utc::now())
}

async fn setup(gateway: StubGateway, policy: SessionPolicy) -> Harness {
    let config = BrokerConfig {
        account: "DU123456".to_string(),
        reconnect_base_delay: Duration::from_millis(20),
        reconnect_max_delay: Duration::from_millis(100),
        max_reconnect_attempts: 3,
        ..BrokerConfig::default()
    };
    let shutdown = CancellationToken::new();
    let (broker, events, _join) = spawn_broker_link(gateway.transport(), config, shutdown.clone());

    for _ in 0..200 {
        if broker.is_connected() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(broker.is_connected(), "link did not connect");

    let ledger = Arc::new(PositionLedger::new(broker.clone()));
    let tracker = Arc::new(PendingOrderTracker::new());
    let locks = SymbolLocks::new();
    let executor = OrderExecutor::new(broker.clone(), tracker.clone(), 1000);
    let core = Arc::new(TradingCore::new(
        broker.clone(),
        ledger.clone(),
        tracker.clone(),
        executor,
        policy,
        locks.clone(),
        None,
    ));
    let monitor = ResubmitMonitor::new(
        broker,
        tracker.clone(),
        locks,
        SweepConfig {
            interval: Duration::from_secs(300),
            order_timeout: Duration::from_secs(300),
            max_resubmissions: 3,
        },
        None,
        shutdown.clone(),
    );

    tokio::spawn(Reconciler::new(core.clone(), events, shutdown).run());

    // The reconciler bootstraps on the connection-up event; wait for its
    // open-orders pass so tests observe a settled starting state.
    let gw = gateway.clone();
    wait_until(
        move || {
            gw.model()
                .requests
                .iter()
                .any(|r| matches!(r, GatewayRequest::OpenOrders { .. }))
        },
        "bootstrap to finish",
    )
    .await;

    Harness {
        gateway,
        core,
        tracker,
        ledger,
        monitor,
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool, what: &str) {
    for _ in 0..500 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

// S1: FLAT -> LONG in regular hours places one market buy; the fill
// lands in the ledger and no pending order is tracked.
#[tokio::test]
async fn flat_to_long_in_regular_hours() {
    let gateway = StubGateway::new();
    let aapl = sym("AAPL");
    gateway.model().add_contract(&aapl, 265598);
    gateway.model().auto_fill = true;
    gateway.model().fill_price = Some(Price::new(dec!(150.00)));

    let h = setup(gateway, us_policy(true, true)).await;

    let outcome = h
        .core
        .process_signal_at(&signal("AAPL", TradeAction::Buy, 100), eastern(9, 10, 0))
        .await
        .unwrap();
    assert_eq!(outcome.order_type, OrderType::Market);
    assert!(outcome.limit_price.is_none());

    {
        let model = h.gateway.model();
        assert_eq!(model.placed.len(), 1);
        assert_eq!(model.placed[0].side, OrderSide::Buy);
        assert_eq!(model.placed[0].quantity, 100);
        assert_eq!(model.placed[0].order_type, OrderType::Market);
    }

    let ledger = h.ledger.clone();
    let aapl2 = aapl.clone();
    wait_until(
        move || {
            let r = ledger.get(&aapl2);
            r.state == PositionState::Long && r.quantity == 100
        },
        "position to go long",
    )
    .await;

    let record = h.ledger.get(&aapl);
    assert_eq!(record.avg_cost, Price::new(dec!(150.00)));
    assert!(h.tracker.is_empty());
}

// S2: LONG -> FLAT pre-market: limit sell at quote - 10 bps; after the
// timeout the sweep cancels and replaces at the refreshed quote until
// the resubmission cap abandons the order.
#[tokio::test]
async fn pre_market_limit_with_timeout_and_cap() {
    let gateway = StubGateway::new();
    let msft = sym("MSFT");
    gateway.model().add_contract(&msft, 272093);
    gateway.model().set_position(&msft, 50, Price::new(dec!(300.00)));
    gateway
        .model()
        .quotes
        .insert(272093, QuoteBook::mid(Price::new(dec!(310.00))));

    let h = setup(gateway, us_policy(true, true)).await;

    let t0 = eastern(9, 5, 0);
    let outcome = h
        .core
        .process_signal_at(&signal("MSFT", TradeAction::Sell, 50), t0)
        .await
        .unwrap();
    assert_eq!(outcome.order_type, OrderType::Limit);
    assert_eq!(outcome.limit_price, Some(Price::new(dec!(309.69))));

    let pending = h.tracker.snapshot();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].resubmission_count, 0);
    assert_eq!(pending[0].original_limit, Price::new(dec!(309.69)));
    assert_eq!(pending[0].submitted_at, t0);

    // First sweep after the timeout: replaced at the refreshed quote.
    h.gateway
        .model()
        .quotes
        .insert(272093, QuoteBook::mid(Price::new(dec!(308.00))));
    let t1 = t0 + chrono::Duration::minutes(6);
    h.monitor.sweep(t1).await;

    let pending = h.tracker.snapshot();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].resubmission_count, 1);
    // The age-of-intent clock survives the replace.
    assert_eq!(pending[0].submitted_at, t0);
    assert_eq!(pending[0].last_resubmission_at, Some(t1));
    {
        let model = h.gateway.model();
        assert_eq!(model.placed.len(), 2);
        assert_eq!(model.cancel_requests.len(), 1);
        // 308 * 0.999 = 307.692 -> 307.69
        assert_eq!(
            model.placed[1].limit_price,
            Some(Price::new(dec!(307.69)))
        );
        assert_eq!(model.placed[1].side, OrderSide::Sell);
        assert_eq!(model.placed[1].quantity, 50);
    }

    // Two more sweeps reach the cap of three replaces.
    let t2 = t1 + chrono::Duration::minutes(6);
    h.monitor.sweep(t2).await;
    let t3 = t2 + chrono::Duration::minutes(6);
    h.monitor.sweep(t3).await;
    assert_eq!(h.tracker.snapshot()[0].resubmission_count, 3);
    assert_eq!(h.gateway.model().placed.len(), 4);

    // The next due sweep abandons instead of placing a fifth order.
    let t4 = t3 + chrono::Duration::minutes(6);
    h.monitor.sweep(t4).await;
    assert!(h.tracker.is_empty());
    assert_eq!(h.gateway.model().placed.len(), 4);
}

// S3: invalid transition is rejected before any order-path broker call.
#[tokio::test]
async fn invalid_transition_makes_no_order_calls() {
    let gateway = StubGateway::new();
    gateway.model().add_contract(&sym("NVDA"), 4815747);

    let h = setup(gateway, us_policy(true, true)).await;

    let err = h
        .core
        .process_signal_at(&signal("NVDA", TradeAction::Sell, 100), eastern(9, 10, 0))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        TradeError::InvalidTransition {
            state: PositionState::Flat,
            action: TradeAction::Sell,
        }
    );

    let model = h.gateway.model();
    assert!(model.placed.is_empty());
    assert!(!model.requests.iter().any(|r| matches!(
        r,
        GatewayRequest::Place { .. }
            | GatewayRequest::Qualify { .. }
            | GatewayRequest::MarketData { .. }
    )));
}

// S4: weekend signals are rejected without touching the broker.
#[tokio::test]
async fn weekend_is_rejected_without_broker_calls() {
    let gateway = StubGateway::new();
    let h = setup(gateway, us_policy(true, true)).await;

    let requests_before = h.gateway.model().requests.len();
    let err = h
        .core
        .process_signal_at(&signal("AAPL", TradeAction::Buy, 100), eastern(13, 10, 0))
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "market closed: weekend");
    assert_eq!(err.kind(), "session_closed");
    assert_eq!(h.gateway.model().requests.len(), requests_before);
}

// S5, fill first: a fill that arrives before the sweep removes the
// record, and the sweep places nothing.
#[tokio::test]
async fn fill_before_sweep_prevents_replacement() {
    let gateway = StubGateway::new();
    let msft = sym("MSFT");
    gateway.model().add_contract(&msft, 272093);
    gateway.model().set_position(&msft, 50, Price::new(dec!(300.00)));
    gateway
        .model()
        .quotes
        .insert(272093, QuoteBook::mid(Price::new(dec!(310.00))));

    let h = setup(gateway, us_policy(true, true)).await;

    let t0 = eastern(9, 5, 0);
    let outcome = h
        .core
        .process_signal_at(&signal("MSFT", TradeAction::Sell, 50), t0)
        .await
        .unwrap();

    // The broker fills the resting limit before the sweep fires.
    h.gateway.model().set_position(&msft, 0, Price::ZERO);
    h.gateway.model().open_orders.clear();
    h.gateway.inject(GatewayEvent::Fill(bridge_broker::FillReport {
        order_id: outcome.order_id.clone(),
        symbol: msft.clone(),
        side: OrderSide::Sell,
        shares: 50,
        price: Price::new(dec!(309.69)),
        filled_at: Utc::now(),
    }));

    let tracker = h.tracker.clone();
    wait_until(move || tracker.is_empty(), "fill to clear the tracker").await;

    let placed_before = h.gateway.model().placed.len();
    h.monitor.sweep(t0 + chrono::Duration::minutes(6)).await;

    assert_eq!(h.gateway.model().placed.len(), placed_before);
    assert!(h.tracker.is_empty());
}

// S5, sweep first: when the broker filled the old order but the sweep
// already re-keyed the record, the late fill reconciles the ledger and
// exactly one pending record (the replacement) remains.
#[tokio::test]
async fn late_fill_after_replacement_reconciles_once() {
    let gateway = StubGateway::new();
    let msft = sym("MSFT");
    gateway.model().add_contract(&msft, 272093);
    gateway.model().set_position(&msft, 50, Price::new(dec!(300.00)));
    gateway
        .model()
        .quotes
        .insert(272093, QuoteBook::mid(Price::new(dec!(310.00))));

    let h = setup(gateway, us_policy(true, true)).await;

    let t0 = eastern(9, 5, 0);
    let outcome = h
        .core
        .process_signal_at(&signal("MSFT", TradeAction::Sell, 50), t0)
        .await
        .unwrap();

    h.monitor.sweep(t0 + chrono::Duration::minutes(6)).await;
    let pending = h.tracker.snapshot();
    assert_eq!(pending.len(), 1);
    assert_ne!(pending[0].order_id, outcome.order_id);

    // The old order had actually filled just before the cancel reached
    // the broker; its fill event arrives after the replace.
    h.gateway.model().set_position(&msft, 0, Price::ZERO);
    h.gateway.inject(GatewayEvent::Fill(bridge_broker::FillReport {
        order_id: outcome.order_id.clone(),
        symbol: msft.clone(),
        side: OrderSide::Sell,
        shares: 50,
        price: Price::new(dec!(309.69)),
        filled_at: Utc::now(),
    }));

    let ledger = h.ledger.clone();
    let msft2 = msft.clone();
    wait_until(
        move || ledger.get(&msft2).state == PositionState::Flat,
        "ledger to reconcile the late fill",
    )
    .await;

    // Exactly one record, the replacement, with one resubmission.
    let pending = h.tracker.snapshot();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].resubmission_count, 1);
    assert_ne!(pending[0].order_id, outcome.order_id);
}

// S6: short entry then cover exit through regular-hours market orders.
#[tokio::test]
async fn short_then_cover_roundtrip() {
    let gateway = StubGateway::new();
    let tsla = sym("TSLA");
    gateway.model().add_contract(&tsla, 76792991);
    gateway.model().auto_fill = true;
    gateway.model().fill_price = Some(Price::new(dec!(250.00)));

    let h = setup(gateway, us_policy(true, true)).await;

    h.core
        .process_signal_at(&signal("TSLA", TradeAction::Short, 10), eastern(9, 11, 0))
        .await
        .unwrap();

    let ledger = h.ledger.clone();
    let t = tsla.clone();
    wait_until(
        move || {
            let r = ledger.get(&t);
            r.state == PositionState::Short && r.quantity == 10
        },
        "short position",
    )
    .await;
    assert_eq!(h.ledger.get(&tsla).avg_cost, Price::new(dec!(250.00)));

    h.gateway.model().fill_price = Some(Price::new(dec!(245.00)));
    h.core
        .process_signal_at(&signal("TSLA", TradeAction::Cover, 10), eastern(9, 11, 30))
        .await
        .unwrap();

    let ledger = h.ledger.clone();
    let t = tsla.clone();
    wait_until(
        move || ledger.get(&t).state == PositionState::Flat,
        "cover to flatten",
    )
    .await;

    let model = h.gateway.model();
    assert_eq!(model.placed.len(), 2);
    assert_eq!(model.placed[0].side, OrderSide::Sell);
    assert_eq!(model.placed[1].side, OrderSide::Buy);
}

// Signals arriving while the link is down fail with LinkLost instead of
// being buffered.
#[tokio::test]
async fn signal_while_disconnected_fails_with_link_lost() {
    let gateway = StubGateway::new();
    gateway.model().add_contract(&sym("AAPL"), 265598);

    let h = setup(gateway, us_policy(true, true)).await;

    h.gateway.fail_next_connects(u32::MAX);
    h.gateway.drop_connection();
    let core = h.core.clone();
    wait_until(move || !core.broker_connected(), "link to drop").await;

    let err = h
        .core
        .process_signal_at(&signal("AAPL", TradeAction::Buy, 100), eastern(9, 10, 0))
        .await
        .unwrap_err();
    assert_eq!(err, TradeError::LinkLost);
}

// Quantity above the configured cap is rejected before qualification.
#[tokio::test]
async fn oversized_quantity_is_rejected() {
    let gateway = StubGateway::new();
    gateway.model().add_contract(&sym("AAPL"), 265598);

    let h = setup(gateway, us_policy(true, true)).await;

    let err = h
        .core
        .process_signal_at(&signal("AAPL", TradeAction::Buy, 5000), eastern(9, 10, 0))
        .await
        .unwrap_err();
    assert_eq!(err, TradeError::QuantityExceedsMax { quantity: 5000, max: 1000 });
}

// Bootstrap adopts broker state: positions into the ledger, open limit
// orders into the tracker with a reset resubmission budget.
#[tokio::test]
async fn bootstrap_rebuilds_state_from_broker() {
    let gateway = StubGateway::new();
    let msft = sym("MSFT");
    let aapl = sym("AAPL");
    gateway.model().add_contract(&msft, 272093);
    gateway.model().add_contract(&aapl, 265598);
    gateway.model().set_position(&aapl, 100, Price::new(dec!(150.00)));
    gateway.model().open_orders.push(bridge_broker::OpenOrderReport {
        order_id: "77".into(),
        symbol: msft.clone(),
        side: OrderSide::Sell,
        quantity: 50,
        order_type: OrderType::Limit,
        limit_price: Some(Price::new(dec!(309.69))),
        status: bridge_broker::OrderStatusKind::Submitted,
    });

    let h = setup(gateway, us_policy(true, true)).await;

    // The reconciler bootstraps on the connection-up event.
    let ledger = h.ledger.clone();
    let a = aapl.clone();
    wait_until(
        move || ledger.get(&a).state == PositionState::Long,
        "ledger bootstrap",
    )
    .await;

    let tracker = h.tracker.clone();
    wait_until(move || tracker.len() == 1, "tracker bootstrap").await;

    let pending = h.tracker.snapshot();
    assert_eq!(pending[0].order_id.as_str(), "77");
    assert_eq!(pending[0].resubmission_count, 0);
    // A sell with no long position reads as a short entry.
    assert_eq!(pending[0].action, TradeAction::Short);
}
