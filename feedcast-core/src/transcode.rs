use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tracing::info;

use crate::config::TranscoderSection;
use crate::process::{CommandExecutor, SystemCommandExecutor};

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("transcode needs a positive video or audio bitrate")]
    InvalidArguments,
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },
    #[error("transcoder exited with status {exit_code:?}")]
    Failed { exit_code: Option<i32> },
}

pub type TranscodeResult<T> = Result<T, TranscodeError>;

/// Re-encodes a downloaded artifact to mp4 at fixed bitrates with `ffmpeg`.
pub struct Transcoder {
    binary: PathBuf,
    global_options: Vec<String>,
    executor: Arc<dyn CommandExecutor>,
}

impl Transcoder {
    pub fn new(config: &TranscoderSection) -> Self {
        Self {
            binary: PathBuf::from(&config.ffmpeg_path),
            global_options: config.global_options.clone(),
            executor: Arc::new(SystemCommandExecutor),
        }
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    pub fn build_args(
        &self,
        input: &Path,
        output: &Path,
        video_kbps: i64,
        audio_kbps: i64,
    ) -> TranscodeResult<Vec<String>> {
        if video_kbps <= 0 && audio_kbps <= 0 {
            return Err(TranscodeError::InvalidArguments);
        }
        let mut args = self.global_options.clone();
        args.extend([
            "-i".to_string(),
            input.display().to_string(),
            "-f".to_string(),
            "mp4".to_string(),
        ]);
        if video_kbps > 0 {
            args.extend([
                "-c:v".to_string(),
                "h264".to_string(),
                "-b:v".to_string(),
                format!("{video_kbps}k"),
            ]);
        }
        if audio_kbps > 0 {
            args.extend([
                "-c:a".to_string(),
                "aac".to_string(),
                "-b:a".to_string(),
                format!("{audio_kbps}k"),
            ]);
        }
        args.push(output.display().to_string());
        Ok(args)
    }

    /// Blocks until the transcoder exits. A zero video bitrate produces an
    /// audio-only re-encode.
    pub async fn transcode(
        &self,
        input: &Path,
        output: &Path,
        video_kbps: i64,
        audio_kbps: i64,
    ) -> TranscodeResult<()> {
        let args = self.build_args(input, output, video_kbps, audio_kbps)?;
        info!(video_kbps, audio_kbps, input = %input.display(), "transcoding");

        let started = Instant::now();
        let status = self
            .executor
            .run(&self.binary, &args)
            .await
            .map_err(|source| TranscodeError::Spawn {
                program: self.binary.clone(),
                source,
            })?;
        if !status.success() {
            return Err(TranscodeError::Failed {
                exit_code: status.code(),
            });
        }
        info!(elapsed_secs = started.elapsed().as_secs(), "transcoded");
        Ok(())
    }
}
