use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is
/// received. Pass it to [`ExecutionController::run`](crate::ExecutionController::run)
/// to kill in-flight processes and end the run early.
#[cfg(unix)]
pub fn install_shutdown_handler() -> CancellationToken {
    use tokio::signal::unix::{signal, SignalKind};

    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!(error = %e, "Failed to install signal handlers");
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, killing running jobs");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, killing running jobs");
            }
        }

        token_clone.cancel();
    });

    token
}

#[cfg(not(unix))]
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Received Ctrl-C, killing running jobs");
                token_clone.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to install Ctrl-C handler"),
        }
    });

    token
}
