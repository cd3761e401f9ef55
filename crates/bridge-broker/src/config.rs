//! Broker link configuration.

use std::time::Duration;

/// Connection and supervision parameters for the gateway link.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Gateway host.
    pub host: String,
    /// Gateway port.
    pub port: u16,
    /// Client id identifying this session to the gateway.
    pub client_id: i32,
    /// Account routed on every placement.
    pub account: String,
    /// Timeout for establishing a connection (including auth).
    pub connect_timeout: Duration,
    /// Maximum wait for quote price population before falling back.
    pub quote_timeout: Duration,
    /// Initial reconnect backoff delay.
    pub reconnect_base_delay: Duration,
    /// Backoff ceiling.
    pub reconnect_max_delay: Duration,
    /// Consecutive failed attempts before the link gives up (0 = infinite).
    pub max_reconnect_attempts: u32,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4002,
            client_id: 1,
            account: String::new(),
            connect_timeout: Duration::from_secs(10),
            quote_timeout: Duration::from_secs(2),
            reconnect_base_delay: Duration::from_secs(5),
            reconnect_max_delay: Duration::from_secs(60),
            max_reconnect_attempts: 10,
        }
    }
}
