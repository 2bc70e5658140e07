use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use worker::WorkerAppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_target(false).init();

    let config = WorkerAppConfig::load().context("Failed to load config")?;
    info!(
        worker_id = %config.worker.id,
        concurrency = config.worker.concurrency,
        interpreter = %config.worker.interpreter,
        "Worker starting"
    );

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
                return;
            }
            info!("Shutdown requested, finishing jobs in hand");
            shutdown.cancel();
        }
    });

    worker::pool::run(config, shutdown)
        .await
        .context("Worker stopped unexpectedly")?;

    Ok(())
}
