//! Order executor.
//!
//! For a validated action the executor qualifies the symbol, maps the
//! business action to a broker side, chooses market or limit per the
//! session decision, and registers limit orders for resubmission
//! tracking.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use tracing::info;

use bridge_broker::{BrokerError, BrokerHandle, OrderTicket};
use bridge_core::{
    ExecutionOutcome, OrderSide, OrderType, Price, Symbol, TradeAction, TradeDecision, TradeError,
};
use bridge_telemetry::metrics;

use crate::pending::{PendingOrder, PendingOrderTracker};

/// Fractional price buffer applied to limit prices: 10 bps toward the
/// aggressive side, favoring execution over price.
const LIMIT_BUFFER: Decimal = dec!(0.001);

/// Limit price for a side at a given quote: `quote * (1 + b)` for buys,
/// `quote * (1 - b)` for sells, rounded to cents with banker's rounding.
///
/// The sweep uses the same expression so repeated attempts chase the
/// current quote, not the original.
pub fn buffered_limit(quote: Price, side: OrderSide) -> Price {
    let factor = match side {
        OrderSide::Buy => Decimal::ONE + LIMIT_BUFFER,
        OrderSide::Sell => Decimal::ONE - LIMIT_BUFFER,
    };
    Price::new(
        (quote.inner() * factor).round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven),
    )
}

/// Map a placement failure onto the caller-facing taxonomy, counting
/// broker rejections.
pub fn placement_error(error: BrokerError) -> TradeError {
    if matches!(error, BrokerError::PlacementRejected(_)) {
        metrics::ORDERS_REJECTED.inc();
    }
    trade_error_from_broker(error)
}

/// Map a broker-link error onto the caller-facing taxonomy.
pub fn trade_error_from_broker(error: BrokerError) -> TradeError {
    match error {
        BrokerError::SymbolUnknown(symbol) => TradeError::SymbolUnknown(symbol),
        BrokerError::QuoteUnavailable(symbol) => TradeError::QuoteUnavailable(symbol),
        BrokerError::PlacementRejected(reason) => TradeError::PlacementRejected(reason),
        BrokerError::LinkLost
        | BrokerError::ConnectionRefused(_)
        | BrokerError::AuthFailed(_)
        | BrokerError::Timeout(_) => TradeError::LinkLost,
        other => TradeError::Gateway(other.to_string()),
    }
}

pub struct OrderExecutor {
    broker: BrokerHandle,
    tracker: Arc<PendingOrderTracker>,
    max_position_size: u32,
}

impl OrderExecutor {
    pub fn new(broker: BrokerHandle, tracker: Arc<PendingOrderTracker>, max_position_size: u32) -> Self {
        Self {
            broker,
            tracker,
            max_position_size,
        }
    }

    /// Execute a validated action under the caller-held symbol lock.
    /// `now` stamps the pending record for limit orders.
    pub async fn execute(
        &self,
        symbol: &Symbol,
        action: TradeAction,
        quantity: u32,
        decision: &TradeDecision,
        now: DateTime<Utc>,
    ) -> Result<ExecutionOutcome, TradeError> {
        if quantity > self.max_position_size {
            return Err(TradeError::QuantityExceedsMax {
                quantity,
                max: self.max_position_size,
            });
        }

        let Some(order_type) = decision.order_type else {
            return Err(TradeError::SessionClosed(decision.reason.clone()));
        };

        let contract = self
            .broker
            .qualify(symbol)
            .await
            .map_err(trade_error_from_broker)?;
        let side = action.side();

        let (order_id, limit_price) = match order_type {
            OrderType::Market => {
                let order_id = self
                    .broker
                    .place(OrderTicket {
                        contract,
                        side,
                        quantity,
                        order_type: OrderType::Market,
                        limit_price: None,
                    })
                    .await
                    .map_err(placement_error)?;
                (order_id, None)
            }
            OrderType::Limit => {
                let quote = self
                    .broker
                    .quote(&contract)
                    .await
                    .map_err(trade_error_from_broker)?;
                let limit = buffered_limit(quote, side);
                let order_id = self
                    .broker
                    .place(OrderTicket {
                        contract,
                        side,
                        quantity,
                        order_type: OrderType::Limit,
                        limit_price: Some(limit),
                    })
                    .await
                    .map_err(placement_error)?;
                self.tracker.register(PendingOrder::new(
                    order_id.clone(),
                    symbol.clone(),
                    action,
                    quantity,
                    limit,
                    now,
                ));
                (order_id, Some(limit))
            }
        };

        let type_label = match order_type {
            OrderType::Market => "market",
            OrderType::Limit => "limit",
        };
        metrics::ORDERS_PLACED.with_label_values(&[type_label]).inc();
        info!(
            symbol = %symbol,
            action = %action,
            side = %side,
            quantity,
            order_type = %order_type,
            order_id = %order_id,
            limit = limit_price.map(|p| p.to_string()).unwrap_or_default(),
            "order placed"
        );

        Ok(ExecutionOutcome {
            order_id,
            order_type,
            limit_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buy_limit_is_buffered_upward() {
        let limit = buffered_limit(Price::new(dec!(150.00)), OrderSide::Buy);
        assert_eq!(limit, Price::new(dec!(150.15)));
    }

    #[test]
    fn test_sell_limit_is_buffered_downward() {
        let limit = buffered_limit(Price::new(dec!(310.00)), OrderSide::Sell);
        assert_eq!(limit, Price::new(dec!(309.69)));
    }

    #[test]
    fn test_limit_rounds_half_to_even() {
        // 305 * 0.999 = 304.695: the midpoint rounds to the even cent.
        let limit = buffered_limit(Price::new(dec!(305.00)), OrderSide::Sell);
        assert_eq!(limit, Price::new(dec!(304.70)));
        // 105 * 1.001 = 105.105: again a midpoint, rounds to 105.10.
        let limit = buffered_limit(Price::new(dec!(105.00)), OrderSide::Buy);
        assert_eq!(limit, Price::new(dec!(105.10)));
    }

    #[test]
    fn test_buffer_magnitude_is_ten_bps() {
        for quote in [dec!(25.00), dec!(150.00), dec!(2500.00)] {
            let q = Price::new(quote);
            let buy = buffered_limit(q, OrderSide::Buy);
            let sell = buffered_limit(q, OrderSide::Sell);
            assert!(buy >= q);
            assert!(sell <= q);
            // Tolerance covers the cent rounding on top of the 10 bps.
            let tolerance = quote * dec!(0.001) + dec!(0.005);
            assert!((buy.inner() - quote).abs() <= tolerance);
            assert!((quote - sell.inner()).abs() <= tolerance);
        }
    }

    #[test]
    fn test_placement_error_maps_rejections() {
        assert_eq!(
            placement_error(BrokerError::PlacementRejected("bad price".into())),
            TradeError::PlacementRejected("bad price".into())
        );
        assert_eq!(
            placement_error(BrokerError::LinkLost),
            TradeError::LinkLost
        );
    }

    #[test]
    fn test_broker_error_mapping() {
        assert_eq!(
            trade_error_from_broker(BrokerError::SymbolUnknown("ZZZZ".into())),
            TradeError::SymbolUnknown("ZZZZ".into())
        );
        assert_eq!(
            trade_error_from_broker(BrokerError::LinkLost),
            TradeError::LinkLost
        );
        assert_eq!(
            trade_error_from_broker(BrokerError::Timeout("connect")),
            TradeError::LinkLost
        );
        assert!(matches!(
            trade_error_from_broker(BrokerError::Transport("boom".into())),
            TradeError::Gateway(_)
        ));
    }
}
