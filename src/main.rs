use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pagewatch::config::MonitorConfig;
use pagewatch::monitor::Monitor;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.json".to_string());
    let config = MonitorConfig::load(&config_path)?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.monitoring_settings.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Loaded configuration from {config_path}");

    let mut monitor = Monitor::new(config).await?;
    monitor.run().await?;

    Ok(())
}
