//! Application configuration.
//!
//! Loaded once from a TOML file, overridden by environment variables,
//! then validated into the typed records the components consume. The
//! core never reads configuration at runtime.

use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use bridge_broker::BrokerConfig;
use bridge_core::{MarketHours, SessionPolicy};
use bridge_executor::SweepConfig;
use bridge_notify::NotifierConfig;
use bridge_webhook::WebhookConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,
    pub ibkr: IbkrConfig,
    #[serde(default)]
    pub trading: TradingConfig,
    #[serde(default)]
    pub market_hours: MarketHoursConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub broker: BrokerTuning,
}

fn default_bot_name() -> String {
    "sigbridge".to_string()
}

fn default_webhook_port() -> u16 {
    5000
}

/// Broker gateway endpoint and session identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IbkrConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    pub account: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Quantity floor applied when an alert omits the field.
    #[serde(default = "default_quantity")]
    pub default_quantity: u32,
    /// Hard cap on any single placement.
    #[serde(default = "default_max_position_size")]
    pub max_position_size: u32,
    #[serde(default = "default_true")]
    pub enable_pre_market: bool,
    #[serde(default = "default_true")]
    pub enable_post_market: bool,
    /// Idle threshold before a limit order is cancelled and replaced.
    #[serde(default = "default_limit_order_timeout_minutes")]
    pub limit_order_timeout_minutes: u64,
    /// How often the resubmission sweep runs.
    #[serde(default = "default_sweep_interval_minutes")]
    pub sweep_interval_minutes: u64,
    /// Replaces allowed per original intent.
    #[serde(default = "default_max_resubmissions")]
    pub max_resubmissions: u32,
}

fn default_quantity() -> u32 {
    100
}

fn default_max_position_size() -> u32 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_limit_order_timeout_minutes() -> u64 {
    5
}

fn default_sweep_interval_minutes() -> u64 {
    5
}

fn default_max_resubmissions() -> u32 {
    3
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            default_quantity: default_quantity(),
            max_position_size: default_max_position_size(),
            enable_pre_market: true,
            enable_post_market: true,
            limit_order_timeout_minutes: default_limit_order_timeout_minutes(),
            sweep_interval_minutes: default_sweep_interval_minutes(),
            max_resubmissions: default_max_resubmissions(),
        }
    }
}

/// Session boundaries as HH:MM strings in the exchange timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketHoursConfig {
    #[serde(default = "default_pre_market_start")]
    pub pre_market_start: String,
    #[serde(default = "default_market_open")]
    pub market_open: String,
    #[serde(default = "default_market_close")]
    pub market_close: String,
    #[serde(default = "default_post_market_end")]
    pub post_market_end: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

fn default_pre_market_start() -> String {
    "04:00".to_string()
}

fn default_market_open() -> String {
    "09:30".to_string()
}

fn default_market_close() -> String {
    "16:00".to_string()
}

fn default_post_market_end() -> String {
    "20:00".to_string()
}

fn default_timezone() -> String {
    "US/Eastern".to_string()
}

impl Default for MarketHoursConfig {
    fn default() -> Self {
        Self {
            pre_market_start: default_pre_market_start(),
            market_open: default_market_open(),
            market_close: default_market_close(),
            post_market_end: default_post_market_end(),
            timezone: default_timezone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// HMAC secret for the intake endpoint; empty disables the check.
    #[serde(default)]
    pub webhook_secret: String,
    /// Allowed source addresses; empty admits all.
    #[serde(default)]
    pub allowed_ips: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub bot_token: String,
    #[serde(default)]
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Default log filter; `RUST_LOG` overrides.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Broker link supervision tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerTuning {
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_reconnect_base_delay_secs")]
    pub reconnect_base_delay_secs: u64,
    #[serde(default = "default_reconnect_max_delay_secs")]
    pub reconnect_max_delay_secs: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_reconnect_base_delay_secs() -> u64 {
    5
}

fn default_reconnect_max_delay_secs() -> u64 {
    60
}

fn default_max_reconnect_attempts() -> u32 {
    10
}

impl Default for BrokerTuning {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            reconnect_base_delay_secs: default_reconnect_base_delay_secs(),
            reconnect_max_delay_secs: default_reconnect_max_delay_secs(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
        }
    }
}

impl AppConfig {
    /// Load from a file and apply environment overrides.
    pub fn load(path: &str) -> AppResult<Self> {
        if !Path::new(path).exists() {
            return Err(AppError::Config(format!("config file not found: {path}")));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("failed to read {path}: {e}")))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("failed to parse {path}: {e}")))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> AppResult<()> {
        if let Ok(host) = std::env::var("IBKR_HOST") {
            self.ibkr.host = host;
        }
        if let Ok(port) = std::env::var("IBKR_PORT") {
            self.ibkr.port = parse_env("IBKR_PORT", &port)?;
        }
        if let Ok(client_id) = std::env::var("IBKR_CLIENT_ID") {
            self.ibkr.client_id = parse_env("IBKR_CLIENT_ID", &client_id)?;
        }
        if let Ok(account) = std::env::var("IBKR_ACCOUNT") {
            self.ibkr.account = account;
        }
        if let Ok(secret) = std::env::var("WEBHOOK_SECRET") {
            self.security.webhook_secret = secret;
        }
        if let Ok(port) = std::env::var("WEBHOOK_PORT") {
            self.webhook_port = parse_env("WEBHOOK_PORT", &port)?;
        }
        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            self.telegram.bot_token = token;
        }
        if let Ok(chat_id) = std::env::var("TELEGRAM_CHAT_ID") {
            self.telegram.chat_id = chat_id;
        }
        if let Ok(quantity) = std::env::var("DEFAULT_QUANTITY") {
            self.trading.default_quantity = parse_env("DEFAULT_QUANTITY", &quantity)?;
        }
        if let Ok(max) = std::env::var("MAX_POSITION_SIZE") {
            self.trading.max_position_size = parse_env("MAX_POSITION_SIZE", &max)?;
        }
        Ok(())
    }

    fn validate(&self) -> AppResult<()> {
        if self.ibkr.account.trim().is_empty() {
            return Err(AppError::Config("ibkr.account must be set".to_string()));
        }
        if self.trading.default_quantity == 0 {
            return Err(AppError::Config(
                "trading.default_quantity must be positive".to_string(),
            ));
        }
        if self.trading.max_position_size == 0 {
            return Err(AppError::Config(
                "trading.max_position_size must be positive".to_string(),
            ));
        }
        if self.trading.limit_order_timeout_minutes == 0 {
            return Err(AppError::Config(
                "trading.limit_order_timeout_minutes must be positive".to_string(),
            ));
        }
        // Fails early on bad times or timezone.
        self.session_policy()?;
        self.allowed_ips()?;
        Ok(())
    }

    pub fn session_policy(&self) -> AppResult<SessionPolicy> {
        let hours = MarketHours::parse(
            &self.market_hours.pre_market_start,
            &self.market_hours.market_open,
            &self.market_hours.market_close,
            &self.market_hours.post_market_end,
            &self.market_hours.timezone,
        )?;
        Ok(SessionPolicy::new(
            hours,
            self.trading.enable_pre_market,
            self.trading.enable_post_market,
        ))
    }

    pub fn broker_config(&self) -> BrokerConfig {
        BrokerConfig {
            host: self.ibkr.host.clone(),
            port: self.ibkr.port,
            client_id: self.ibkr.client_id,
            account: self.ibkr.account.clone(),
            connect_timeout: Duration::from_secs(self.broker.connect_timeout_secs),
            quote_timeout: Duration::from_secs(2),
            reconnect_base_delay: Duration::from_secs(self.broker.reconnect_base_delay_secs),
            reconnect_max_delay: Duration::from_secs(self.broker.reconnect_max_delay_secs),
            max_reconnect_attempts: self.broker.max_reconnect_attempts,
        }
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            interval: Duration::from_secs(self.trading.sweep_interval_minutes * 60),
            order_timeout: Duration::from_secs(self.trading.limit_order_timeout_minutes * 60),
            max_resubmissions: self.trading.max_resubmissions,
        }
    }

    pub fn webhook_config(&self) -> AppResult<WebhookConfig> {
        Ok(WebhookConfig {
            port: self.webhook_port,
            bot_name: self.bot_name.clone(),
            secret: Some(self.security.webhook_secret.clone()).filter(|s| !s.is_empty()),
            allowed_ips: self.allowed_ips()?,
            default_quantity: self.trading.default_quantity,
        })
    }

    pub fn notifier_config(&self) -> NotifierConfig {
        NotifierConfig {
            enabled: self.telegram.enabled,
            bot_token: self.telegram.bot_token.clone(),
            chat_id: self.telegram.chat_id.clone(),
            api_base: "https://api.telegram.org".to_string(),
            bot_name: self.bot_name.clone(),
        }
    }

    fn allowed_ips(&self) -> AppResult<Vec<IpAddr>> {
        self.security
            .allowed_ips
            .iter()
            .map(|raw| {
                raw.trim()
                    .parse()
                    .map_err(|_| AppError::Config(format!("invalid allowed ip: {raw}")))
            })
            .collect()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> AppResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::Config(format!("invalid {name}: {value:?}")))
}
