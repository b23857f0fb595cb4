use std::path::Path;
use std::process::{ExitStatus, Output, Stdio};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Seam over external executables (`yt-dlp`, `ffmpeg`) so the callers can be
/// exercised without spawning processes.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Runs the program to completion and captures stdout and stderr.
    async fn output(&self, program: &Path, args: &[String]) -> std::io::Result<Output>;

    /// Runs the program to completion, copying its stderr to ours as it is
    /// produced.
    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<ExitStatus>;
}

pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn output(&self, program: &Path, args: &[String]) -> std::io::Result<Output> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
    }

    async fn run(&self, program: &Path, args: &[String]) -> std::io::Result<ExitStatus> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;
        debug!(program = %program.display(), ?args, "started command");

        if let Some(mut stderr) = child.stderr.take() {
            let mut sink = tokio::io::stderr();
            if let Err(err) = tokio::io::copy(&mut stderr, &mut sink).await {
                warn!(error = %err, "failed to relay command stderr");
            }
        }
        child.wait().await
    }
}
