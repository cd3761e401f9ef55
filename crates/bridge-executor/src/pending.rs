//! Outstanding limit-order set.
//!
//! All mutations go through one internal mutex; the cancel-and-replace
//! re-key is a single critical section so a concurrent terminal event
//! observes either the old record or the new one, never both or neither.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use bridge_core::{BrokerOrderId, Price, Symbol, TradeAction};
use bridge_telemetry::metrics;

/// A limit order awaiting fill, subject to timed cancel-and-replace.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingOrder {
    pub order_id: BrokerOrderId,
    pub symbol: Symbol,
    pub action: TradeAction,
    pub quantity: u32,
    /// Limit price of the first submission.
    pub original_limit: Price,
    /// When the original intent was submitted. Preserved across replaces.
    pub submitted_at: DateTime<Utc>,
    pub resubmission_count: u32,
    pub last_resubmission_at: Option<DateTime<Utc>>,
}

impl PendingOrder {
    pub fn new(
        order_id: BrokerOrderId,
        symbol: Symbol,
        action: TradeAction,
        quantity: u32,
        original_limit: Price,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id,
            symbol,
            action,
            quantity,
            original_limit,
            submitted_at,
            resubmission_count: 0,
            last_resubmission_at: None,
        }
    }

    /// Start of the current idle window: the last replace, or the
    /// original submission if none happened yet.
    pub fn idle_since(&self) -> DateTime<Utc> {
        self.last_resubmission_at.unwrap_or(self.submitted_at)
    }
}

/// Tracker for outstanding limit orders, keyed by broker order id.
#[derive(Default)]
pub struct PendingOrderTracker {
    orders: Mutex<HashMap<BrokerOrderId, PendingOrder>>,
}

impl PendingOrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pending order. Idempotent by order id.
    pub fn register(&self, pending: PendingOrder) {
        let mut orders = self.orders.lock();
        orders.entry(pending.order_id.clone()).or_insert(pending);
        metrics::PENDING_ORDERS.set(orders.len() as i64);
    }

    /// Remove a record on fill/cancel/reject. Returns the removed record.
    pub fn on_terminal(&self, order_id: &BrokerOrderId) -> Option<PendingOrder> {
        let mut orders = self.orders.lock();
        let removed = orders.remove(order_id);
        metrics::PENDING_ORDERS.set(orders.len() as i64);
        removed
    }

    pub fn contains(&self, order_id: &BrokerOrderId) -> bool {
        self.orders.lock().contains_key(order_id)
    }

    pub fn get(&self, order_id: &BrokerOrderId) -> Option<PendingOrder> {
        self.orders.lock().get(order_id).cloned()
    }

    /// Atomically re-key a record to its replacement order id,
    /// incrementing the resubmission count and stamping the attempt
    /// time. `submitted_at` is preserved. Returns false when the old
    /// record no longer exists (a terminal event already removed it).
    pub fn replace(
        &self,
        old_id: &BrokerOrderId,
        new_id: BrokerOrderId,
        now: DateTime<Utc>,
    ) -> bool {
        let mut orders = self.orders.lock();
        let Some(mut record) = orders.remove(old_id) else {
            return false;
        };
        record.order_id = new_id.clone();
        record.resubmission_count += 1;
        record.last_resubmission_at = Some(now);
        orders.insert(new_id, record);
        true
    }

    /// Records whose idle window is at least `timeout` old.
    pub fn due(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<PendingOrder> {
        self.orders
            .lock()
            .values()
            .filter(|p| now - p.idle_since() >= timeout)
            .cloned()
            .collect()
    }

    /// Read-only view for observability.
    pub fn snapshot(&self) -> Vec<PendingOrder> {
        self.orders.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.orders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pending(id: &str, submitted_at: DateTime<Utc>) -> PendingOrder {
        PendingOrder::new(
            id.into(),
            Symbol::new("MSFT").unwrap(),
            TradeAction::Sell,
            50,
            Price::new(dec!(309.69)),
            submitted_at,
        )
    }

    #[test]
    fn test_register_is_idempotent() {
        let tracker = PendingOrderTracker::new();
        let now = Utc::now();
        tracker.register(pending("1", now));

        let mut altered = pending("1", now);
        altered.quantity = 999;
        tracker.register(altered);

        assert_eq!(tracker.len(), 1);
        assert_eq!(tracker.get(&"1".into()).unwrap().quantity, 50);
    }

    #[test]
    fn test_terminal_removes_record() {
        let tracker = PendingOrderTracker::new();
        tracker.register(pending("1", Utc::now()));
        assert!(tracker.on_terminal(&"1".into()).is_some());
        assert!(tracker.is_empty());
        assert!(tracker.on_terminal(&"1".into()).is_none());
    }

    #[test]
    fn test_replace_rekeys_and_counts() {
        let tracker = PendingOrderTracker::new();
        let submitted = Utc::now();
        tracker.register(pending("1", submitted));

        let now = submitted + Duration::minutes(6);
        assert!(tracker.replace(&"1".into(), "2".into(), now));

        assert!(!tracker.contains(&"1".into()));
        let record = tracker.get(&"2".into()).unwrap();
        assert_eq!(record.resubmission_count, 1);
        assert_eq!(record.last_resubmission_at, Some(now));
        // The age-of-intent clock is preserved.
        assert_eq!(record.submitted_at, submitted);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_replace_of_missing_record_fails() {
        let tracker = PendingOrderTracker::new();
        assert!(!tracker.replace(&"1".into(), "2".into(), Utc::now()));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_due_measures_idle_window() {
        let tracker = PendingOrderTracker::new();
        let submitted = Utc::now();
        tracker.register(pending("1", submitted));

        let timeout = Duration::minutes(5);
        assert!(tracker.due(submitted + Duration::minutes(4), timeout).is_empty());
        assert_eq!(tracker.due(submitted + Duration::minutes(5), timeout).len(), 1);

        // A replace resets the idle window but not submitted_at.
        let replaced_at = submitted + Duration::minutes(6);
        assert!(tracker.replace(&"1".into(), "2".into(), replaced_at));
        assert!(tracker.due(replaced_at + Duration::minutes(4), timeout).is_empty());
        assert_eq!(
            tracker.due(replaced_at + Duration::minutes(5), timeout).len(),
            1
        );
    }
}
