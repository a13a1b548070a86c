use anyhow::{Context, Result};
use tokio::signal;

/// Resolve once Ctrl+C or SIGTERM is received.
pub async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("failed to listen for Ctrl+C")?;
                tracing::info!("Received Ctrl+C signal");
            }
            _ = terminate.recv() => tracing::info!("Received SIGTERM signal"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        tracing::info!("Received Ctrl+C signal");
    }

    tracing::info!("Shutdown signal received, finalizing");
    Ok(())
}
