use std::path::PathBuf;

use anyhow::Context;
use collector::{ServerLifecycle, init_metrics, shutdown_signal};
use config::DEFAULT_SETTINGS_FILE;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let settings_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE), PathBuf::from);
    tracing::info!(path = %settings_path.display(), "Starting telemetry collector");

    let metrics = init_metrics().context("Failed to install metrics recorder")?;

    let lifecycle = ServerLifecycle::builder()
        .settings_path(settings_path)
        .metrics_handle(metrics)
        .build();
    lifecycle
        .start()
        .await
        .context("Collector failed to start")?;

    shutdown_signal().await;

    let report = lifecycle.close().await;
    if !report.is_clean() {
        tracing::warn!(failures = report.failures.len(), "Shutdown finished with failures");
    }
    Ok(())
}
