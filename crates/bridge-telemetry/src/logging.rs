//! Structured logging initialization for the bridge.
//!
//! One format decision, taken once at startup: JSON events (flattened,
//! for log shippers) when `RUST_ENV=production`, compact human-readable
//! output otherwise. `RUST_LOG` overrides the configured filter; the
//! fallback filter mutes the HTTP internals under the webhook and
//! notifier, which drown out order flow at info level.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Crates whose info-level chatter is noise next to order flow.
const QUIET_DEPS: &[&str] = &["hyper", "reqwest", "tower", "h2"];

/// Initialize logging for the bridge.
///
/// `default_filter` is the configured level (e.g. `"info"`); the service
/// name is stamped on the startup event so multi-bot deployments can
/// tell their streams apart.
pub fn init_logging(service: &str, default_filter: &str) -> TelemetryResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(quieted_filter(default_filter)));

    let production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = if production {
        registry
            .with(fmt::layer().json().flatten_event(true))
            .try_init()
    } else {
        registry
            .with(fmt::layer().compact().with_target(true))
            .try_init()
    };
    result.map_err(|e| TelemetryError::Init(e.to_string()))?;

    tracing::info!(
        %service,
        format = if production { "json" } else { "compact" },
        "logging initialized"
    );
    Ok(())
}

/// Append the quiet-dependency directives to a base filter.
fn quieted_filter(base: &str) -> String {
    let mut filter = base.to_string();
    for dep in QUIET_DEPS {
        filter.push_str(&format!(",{dep}=warn"));
    }
    filter
}
