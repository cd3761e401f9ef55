//! Prometheus metrics for the bridge.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally: a failure means a
//! duplicate metric name, a fatal configuration error best surfaced by
//! an immediate crash during static initialization.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, Encoder, IntCounter,
    IntCounterVec, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Signals that reached the intake endpoint with a valid payload.
pub static SIGNALS_RECEIVED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("bridge_signals_received_total", "Signals received").unwrap()
});

/// Signals rejected by the trading core, labeled by error kind.
pub static SIGNALS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "bridge_signals_rejected_total",
        "Signals rejected by the core",
        &["kind"]
    )
    .unwrap()
});

/// Orders placed with the broker, labeled by order type.
pub static ORDERS_PLACED: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "bridge_orders_placed_total",
        "Orders placed with the broker",
        &["order_type"]
    )
    .unwrap()
});

/// Fills reported by the broker.
pub static ORDERS_FILLED: Lazy<IntCounter> =
    Lazy::new(|| register_int_counter!("bridge_orders_filled_total", "Order fills").unwrap());

/// Cancels the bridge issued that the broker confirmed.
pub static ORDERS_CANCELLED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("bridge_orders_cancelled_total", "Confirmed order cancels").unwrap()
});

/// Placements the broker rejected.
pub static ORDERS_REJECTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("bridge_orders_rejected_total", "Broker placement rejections").unwrap()
});

/// Limit orders cancelled and replaced by the sweep.
pub static ORDERS_RESUBMITTED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("bridge_orders_resubmitted_total", "Limit order resubmissions").unwrap()
});

/// Pending orders abandoned at the resubmission cap.
pub static ORDERS_ABANDONED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("bridge_orders_abandoned_total", "Abandoned pending orders").unwrap()
});

/// Outstanding limit orders.
pub static PENDING_ORDERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("bridge_pending_orders", "Outstanding limit orders").unwrap()
});

/// Broker link state (1 = connected).
pub static LINK_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("bridge_link_connected", "Broker link state (1=connected)").unwrap()
});

/// Broker link disconnects observed.
pub static LINK_DISCONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("bridge_link_disconnects_total", "Broker link disconnects").unwrap()
});

/// Successful reconnections after a lost session. The initial connect
/// of a process does not count.
pub static LINK_RECONNECTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("bridge_link_reconnects_total", "Broker link reconnections").unwrap()
});

/// Render the default registry in Prometheus text format.
pub fn render() -> TelemetryResult<String> {
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::Encode(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_and_render() {
        SIGNALS_RECEIVED.inc();
        SIGNALS_REJECTED.with_label_values(&["session_closed"]).inc();
        ORDERS_PLACED.with_label_values(&["market"]).inc();
        ORDERS_CANCELLED.inc();
        ORDERS_REJECTED.inc();
        LINK_RECONNECTS.inc();
        PENDING_ORDERS.set(2);

        let text = render().unwrap();
        assert!(text.contains("bridge_signals_received_total"));
        assert!(text.contains("bridge_orders_cancelled_total"));
        assert!(text.contains("bridge_orders_rejected_total"));
        assert!(text.contains("bridge_link_reconnects_total"));
        assert!(text.contains("bridge_pending_orders"));
    }
}
