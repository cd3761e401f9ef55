//! Signal-to-broker trading bridge entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// TradingView-to-IBKR signal bridge.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (also settable via SIGBRIDGE_CONFIG).
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = args
        .config
        .or_else(|| std::env::var("SIGBRIDGE_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let config = bridge_bot::AppConfig::load(&config_path)?;
    bridge_telemetry::init_logging(&config.bot_name, &config.telemetry.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %config_path,
        "starting sigbridge"
    );

    bridge_bot::Application::new(config).run().await?;
    Ok(())
}
