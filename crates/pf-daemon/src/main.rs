use std::sync::Arc;

use anyhow::{Context, Result};
use pf_adapters::{AdapterRegistry, MockAdapter};
use pf_core::config::Config;
use pf_daemon::Daemon;
use pf_telemetry::LogFormat;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("failed to load configuration")?;
    pf_telemetry::init_logging(
        "postflow",
        &config.general.log_level,
        LogFormat::from_config(&config.general.log_format),
    );

    // Vendor adapters register here. Without credentials the daemon runs
    // against the mock adapter so local schedules still flow end to end.
    let mut registry = AdapterRegistry::new();
    if config.scheduler.platforms.is_empty() {
        warn!("no platforms configured; nothing will be scheduled");
    } else {
        registry
            .register(Arc::new(MockAdapter::new(config.scheduler.platforms.clone())))
            .context("adapter registration failed")?;
    }

    let daemon = Daemon::new(config, Arc::new(registry)).await?;
    let shutdown = daemon.shutdown_handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received");
            shutdown.trigger();
        }
    });

    daemon.run().await
}
