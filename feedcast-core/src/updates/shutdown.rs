use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::feed::{Feed, OutgoingMessage};

/// Resolves with the name of the first termination signal received.
pub async fn wait_for_signal() -> std::io::Result<&'static str> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => Ok("SIGTERM"),
            _ = sigint.recv() => Ok("SIGINT"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        Ok("ctrl-c")
    }
}

/// Spawns the listener that tells the operator the process is going away and
/// exits with status 1. In-flight deliveries are not unwound.
pub fn spawn_shutdown_hook(
    feed: Arc<dyn Feed>,
    operator_chat_id: i64,
    program: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let signal = match wait_for_signal().await {
            Ok(signal) => signal,
            Err(err) => {
                warn!(error = %err, "failed to install signal handlers");
                return;
            }
        };
        info!(signal, "shutdown signal received");
        let notice = OutgoingMessage::new(operator_chat_id, shutdown_notice(&program));
        if let Err(err) = feed.send_message(notice).await {
            warn!(error = %err, "failed to notify operator about shutdown");
        }
        std::process::exit(1);
    })
}

pub fn shutdown_notice(program: &str) -> String {
    format!("{program}: sigterm")
}
