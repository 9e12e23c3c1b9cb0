//! Graceful shutdown signal: resolves on Ctrl+C or SIGTERM via
//! `tokio::signal`.

use tokio::signal;
use tracing::info;

pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("received SIGTERM, starting graceful shutdown");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_once_ctrl_c_style_signal_fires() {
        // Exercised indirectly: shutdown_signal never returns on its own in
        // a test harness with no real signal, so just assert it doesn't
        // panic when raced against a short timeout.
        let result = tokio::time::timeout(Duration::from_millis(50), shutdown_signal()).await;
        assert!(result.is_err(), "shutdown_signal should still be pending without a real signal");
    }
}
