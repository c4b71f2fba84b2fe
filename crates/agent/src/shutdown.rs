use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Create a `CancellationToken` and spawn a task that cancels it on
/// SIGINT or SIGTERM. The reconcile and sweep loops each hold a clone;
/// cancellation lets the in-flight pass finish before they exit.
pub fn create_shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        let signal = wait_for_signal().await;
        info!(signal, "shutdown signal received");
        trigger.cancel();
    });

    token
}

/// Wait for the first shutdown signal and name it for the logs.
async fn wait_for_signal() -> &'static str {
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
        () = ctrl_c => "SIGINT",
        () = terminate => "SIGTERM",
    }
}
