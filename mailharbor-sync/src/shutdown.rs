/// Shutdown signal handling
///
/// Maps OS signals onto the scheduler's cancellation token: SIGINT always,
/// SIGTERM on unix (what the container runtime sends). The scheduler stops
/// accepting new passes and lets the current mailbox finish.

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Resolves when a shutdown signal arrives
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

/// Spawns the signal watcher
///
/// Cancels the token on the first signal. If the listener itself fails the
/// token is cancelled too: running on without a way to stop is worse than
/// stopping.
pub fn spawn_watcher(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match wait_for_signal().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
            }
            Err(e) => {
                tracing::error!(error = %e, "Signal listener failed");
            }
        }
        token.cancel();
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancellation_is_visible_through_clones() {
        // Can't raise real signals in a test; verify the token wiring the
        // watcher relies on.
        let token = CancellationToken::new();
        let observer = token.clone();
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
