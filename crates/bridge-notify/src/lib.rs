//! Telegram notification fan-out.
//!
//! Consumes [`Notice`] values from the core and delivers them as
//! Telegram messages. Delivery is best-effort: failures are logged and
//! never propagate into the trading path.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use bridge_core::Notice;

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub enabled: bool,
    pub bot_token: String,
    pub chat_id: String,
    /// API base, overridable for tests.
    pub api_base: String,
    pub bot_name: String,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            chat_id: String::new(),
            api_base: "https://api.telegram.org".to_string(),
            bot_name: "sigbridge".to_string(),
        }
    }
}

pub struct Notifier {
    config: NotifierConfig,
    client: reqwest::Client,
}

impl Notifier {
    pub fn new(config: NotifierConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && !self.config.bot_token.is_empty()
    }

    /// Drain the notice channel until it closes or shutdown fires.
    pub async fn run(self, mut notices: mpsc::UnboundedReceiver<Notice>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                notice = notices.recv() => match notice {
                    None => break,
                    Some(notice) => {
                        let text = self.format(&notice);
                        self.send_text(&text).await;
                    }
                },
            }
        }
        debug!("notifier terminated");
    }

    pub async fn send_text(&self, text: &str) {
        if !self.is_enabled() {
            debug!(%text, "notification (telegram disabled)");
            return;
        }

        let url = format!(
            "{}/bot{}/sendMessage",
            self.config.api_base, self.config.bot_token
        );
        let payload = serde_json::json!({
            "chat_id": self.config.chat_id,
            "text": text,
        });

        match self.client.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                warn!(status = %response.status(), "telegram rejected notification");
            }
            Err(e) => {
                warn!(error = %e, "failed to deliver notification");
            }
        }
    }

    /// Render a notice as a message.
    pub fn format(&self, notice: &Notice) -> String {
        let bot = &self.config.bot_name;
        match notice {
            Notice::SignalExecuted {
                symbol,
                action,
                quantity,
                order_id,
                order_type,
                limit_price,
            } => match limit_price {
                Some(limit) => format!(
                    "[{bot}] {action} {quantity} {symbol}: {order_type} order {order_id} at {limit}"
                ),
                None => format!(
                    "[{bot}] {action} {quantity} {symbol}: {order_type} order {order_id}"
                ),
            },
            Notice::SignalRejected {
                symbol,
                action,
                kind,
                message,
            } => format!("[{bot}] rejected {action} {symbol} ({kind}): {message}"),
            Notice::OrderFilled {
                symbol,
                order_id,
                side,
                shares,
                price,
            } => format!("[{bot}] filled {side} {shares} {symbol} at {price} (order {order_id})"),
            Notice::OrderResubmitted {
                symbol,
                old_order_id,
                new_order_id,
                limit_price,
                resubmission_count,
            } => format!(
                "[{bot}] resubmitted {symbol} order {old_order_id} -> {new_order_id} at {limit_price} (attempt {resubmission_count})"
            ),
            Notice::OrderAbandoned {
                symbol,
                order_id,
                resubmission_count,
            } => format!(
                "[{bot}] abandoned {symbol} order {order_id} after {resubmission_count} resubmissions"
            ),
            Notice::LinkUp => format!("[{bot}] broker link up"),
            Notice::LinkDown { terminal: false } => {
                format!("[{bot}] broker link down, reconnecting")
            }
            Notice::LinkDown { terminal: true } => {
                format!("[{bot}] broker link lost, trading halted until restart")
            }
            Notice::LedgerDivergence {
                symbol,
                cached,
                broker,
            } => format!(
                "[{bot}] position mismatch on {symbol}: cached {cached}, broker {broker} (broker wins)"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_core::{Symbol, TradeAction};

    fn notifier() -> Notifier {
        Notifier::new(NotifierConfig {
            bot_name: "testbot".to_string(),
            ..NotifierConfig::default()
        })
    }

    #[test]
    fn test_disabled_without_token() {
        let n = Notifier::new(NotifierConfig {
            enabled: true,
            ..NotifierConfig::default()
        });
        assert!(!n.is_enabled());
    }

    #[test]
    fn test_format_executed() {
        let text = notifier().format(&Notice::SignalExecuted {
            symbol: Symbol::new("AAPL").unwrap(),
            action: TradeAction::Buy,
            quantity: 100,
            order_id: "42".into(),
            order_type: bridge_core::OrderType::Market,
            limit_price: None,
        });
        assert_eq!(text, "[testbot] buy 100 AAPL: market order 42");
    }

    #[test]
    fn test_format_abandoned() {
        let text = notifier().format(&Notice::OrderAbandoned {
            symbol: Symbol::new("MSFT").unwrap(),
            order_id: "7".into(),
            resubmission_count: 3,
        });
        assert_eq!(text, "[testbot] abandoned MSFT order 7 after 3 resubmissions");
    }

    #[test]
    fn test_format_divergence() {
        let text = notifier().format(&Notice::LedgerDivergence {
            symbol: Symbol::new("NVDA").unwrap(),
            cached: 90,
            broker: 100,
        });
        assert!(text.contains("cached 90"));
        assert!(text.contains("broker 100"));
    }
}
