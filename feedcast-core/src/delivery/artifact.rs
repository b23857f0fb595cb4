use std::path::{Path, PathBuf};

use chrono::Utc;
use tokio::fs::{self, File, OpenOptions};
use tracing::{debug, warn};
use uuid::Uuid;

/// Scratch file holding downloaded or transcoded media.
///
/// Nothing exists on disk until [`TemporaryArtifact::create`] is called (the
/// transcoder writes its output path itself). [`TemporaryArtifact::discard`]
/// removes the file; dropping an artifact that was never discarded removes it
/// synchronously.
#[derive(Debug)]
pub struct TemporaryArtifact {
    path: PathBuf,
    armed: bool,
}

impl TemporaryArtifact {
    pub fn new(dir: &Path, media_id: &str, label: &str, extension: &str) -> Self {
        let stamp = Utc::now().format("%y%m%d.%H%M%S");
        let nonce = Uuid::new_v4().simple().to_string();
        let name = format!("{stamp}.{media_id}.{label}.{}.{extension}", &nonce[..8]);
        Self {
            path: dir.join(name),
            armed: true,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn create(&self) -> std::io::Result<File> {
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
            .await
    }

    pub async fn discard(mut self) {
        self.armed = false;
        match fs::remove_file(&self.path).await {
            Ok(()) => debug!(path = %self.path.display(), "artifact removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to remove artifact")
            }
        }
    }
}

impl Drop for TemporaryArtifact {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to remove artifact")
            }
        }
    }
}
