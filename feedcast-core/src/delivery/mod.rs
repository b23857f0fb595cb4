//! Fetch, optionally transcode, and publish one media reference.
//!
//! Every path out of [`Orchestrator::deliver`] removes the scratch files it
//! created and the progress notices it posted.

mod artifact;
pub mod caption;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::config::FeedcastConfig;
use crate::feed::{AudioUpload, Feed, FeedError, OutgoingMessage, VideoUpload};
use crate::selector::{self, DeliveryBudget, MediaFamily, SelectError, Selection};
use crate::source::{MediaMetadata, MediaReference, MediaSource, MediaStream, SourceError};
use crate::transcode::{TranscodeError, Transcoder};

pub use artifact::TemporaryArtifact;
pub use caption::TranscodeTarget;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Selection(#[from] SelectError),
    #[error("download of {media_id} failed: {reason}")]
    Download { media_id: String, reason: String },
    #[error("transcode failed: {0}")]
    Transcode(#[from] TranscodeError),
    #[error("publish failed: {0}")]
    Publish(#[source] FeedError),
}

pub type DeliveryResult<T> = Result<T, DeliveryError>;

#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub budget: DeliveryBudget,
    pub languages: Vec<String>,
    pub work_dir: PathBuf,
    pub progress_notices: bool,
}

impl DeliverySettings {
    pub fn from_config(config: &FeedcastConfig) -> Self {
        Self {
            budget: DeliveryBudget::new(
                config.delivery.max_file_size_bytes,
                config.delivery.audio_bitrate_kbps,
            ),
            languages: config.delivery.languages.clone(),
            work_dir: PathBuf::from(&config.system.work_dir),
            progress_notices: config.feed.progress_notices,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub media_id: String,
    pub family: MediaFamily,
    pub format_id: String,
    pub target_bitrate_kbps: i64,
    pub transcoded: bool,
}

pub struct Orchestrator {
    source: Arc<dyn MediaSource>,
    feed: Arc<dyn Feed>,
    transcoder: Arc<Transcoder>,
    settings: DeliverySettings,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn MediaSource>,
        feed: Arc<dyn Feed>,
        transcoder: Arc<Transcoder>,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            source,
            feed,
            transcoder,
            settings,
        }
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.settings
    }

    /// Resolves and selects without touching the network stream or disk.
    pub async fn plan(
        &self,
        media_id: &str,
        want_video: bool,
    ) -> DeliveryResult<(MediaMetadata, Selection)> {
        let resolved = self.source.resolve(media_id).await?;
        let selection = selector::select(
            &resolved.catalog,
            MediaFamily::from_want_video(want_video),
            &self.settings.budget,
            resolved.metadata.duration_seconds,
            &self.settings.languages,
        )?;
        Ok((resolved.metadata, selection))
    }

    pub async fn deliver(
        &self,
        reference: &MediaReference,
        want_video: bool,
        chat_id: i64,
    ) -> DeliveryResult<DeliveryReport> {
        let (metadata, selection) = self.plan(&reference.id, want_video).await?;
        info!(
            media_id = %reference.id,
            family = %selection.family,
            format_id = %selection.encoding.format_id,
            bitrate_kbps = selection.encoding.bitrate_kbps(),
            target_kbps = selection.target_bitrate_kbps,
            "encoding selected"
        );

        let mut notices = ProgressNotices::new(
            Arc::clone(&self.feed),
            chat_id,
            self.settings.progress_notices,
        );
        let outcome = self
            .transfer(reference, &metadata, &selection, chat_id, &mut notices)
            .await;
        notices.clear().await;

        outcome.map(|transcoded| DeliveryReport {
            media_id: reference.id.clone(),
            family: selection.family,
            format_id: selection.encoding.format_id.clone(),
            target_bitrate_kbps: selection.target_bitrate_kbps,
            transcoded,
        })
    }

    async fn transfer(
        &self,
        reference: &MediaReference,
        metadata: &MediaMetadata,
        selection: &Selection,
        chat_id: i64,
        notices: &mut ProgressNotices,
    ) -> DeliveryResult<bool> {
        let family = selection.family;
        let extension = family.file_extension();
        let download_failed = |reason: String| DeliveryError::Download {
            media_id: metadata.id.clone(),
            reason,
        };

        let stream = self
            .source
            .open(metadata, &selection.encoding)
            .await
            .map_err(|err| download_failed(err.to_string()))?;
        if family == MediaFamily::Audio && stream.size_hint == Some(0) {
            return Err(download_failed("stream size is zero".into()));
        }

        notices
            .post(caption::downloading_notice(reference, metadata, selection))
            .await;
        let download =
            TemporaryArtifact::new(&self.settings.work_dir, &metadata.id, "download", extension);
        let started = Instant::now();
        let written = match copy_stream(stream, &download).await {
            Ok(written) => written,
            Err(reason) => {
                download.discard().await;
                return Err(download_failed(reason));
            }
        };
        if written == 0 && family == MediaFamily::Audio {
            download.discard().await;
            return Err(download_failed("stream was empty".into()));
        }
        info!(
            media_id = %metadata.id,
            bytes = written,
            elapsed_secs = started.elapsed().as_secs(),
            "downloaded"
        );

        let target =
            TranscodeTarget::for_selection(selection, self.settings.budget.reserved_audio_kbps);
        notices
            .post(caption::downloaded_notice(
                metadata,
                selection,
                started.elapsed(),
                target,
            ))
            .await;

        let artifact = match target {
            Some(target) => {
                let output = TemporaryArtifact::new(
                    &self.settings.work_dir,
                    &metadata.id,
                    &target.file_label(),
                    extension,
                );
                let result = self
                    .transcoder
                    .transcode(
                        download.path(),
                        output.path(),
                        target.video_kbps,
                        target.audio_kbps,
                    )
                    .await;
                download.discard().await;
                if let Err(err) = result {
                    output.discard().await;
                    return Err(err.into());
                }
                output
            }
            None => download,
        };

        let text = caption::caption(reference, metadata, selection, target);
        let published = self
            .publish(chat_id, text, artifact.path(), metadata, selection)
            .await;
        artifact.discard().await;
        published?;

        info!(media_id = %metadata.id, chat_id, family = %family, "published");
        Ok(target.is_some())
    }

    async fn publish(
        &self,
        chat_id: i64,
        caption: String,
        path: &Path,
        metadata: &MediaMetadata,
        selection: &Selection,
    ) -> DeliveryResult<()> {
        let result = match selection.family {
            MediaFamily::Audio => self
                .feed
                .send_audio(AudioUpload {
                    chat_id,
                    caption,
                    path: path.to_path_buf(),
                    performer: metadata.author.clone(),
                    title: metadata.title.clone(),
                    duration_seconds: metadata.duration_seconds,
                })
                .await
                .map(|_| ()),
            MediaFamily::Video => self
                .feed
                .send_video(VideoUpload {
                    chat_id,
                    caption,
                    path: path.to_path_buf(),
                    width: selection.encoding.width,
                    height: selection.encoding.height,
                    duration_seconds: metadata.duration_seconds,
                })
                .await
                .map(|_| ()),
        };
        result.map_err(DeliveryError::Publish)
    }
}

async fn copy_stream(stream: MediaStream, artifact: &TemporaryArtifact) -> Result<u64, String> {
    let mut file = artifact.create().await.map_err(|err| err.to_string())?;
    let mut bytes = stream.bytes;
    let mut written = 0u64;
    while let Some(chunk) = bytes.next().await {
        let chunk = chunk.map_err(|err| err.to_string())?;
        file.write_all(&chunk).await.map_err(|err| err.to_string())?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|err| err.to_string())?;
    Ok(written)
}

/// Transient status messages posted to the destination chat, removed once the
/// delivery outcome is known.
struct ProgressNotices {
    feed: Arc<dyn Feed>,
    chat_id: i64,
    enabled: bool,
    posted: Vec<i64>,
}

impl ProgressNotices {
    fn new(feed: Arc<dyn Feed>, chat_id: i64, enabled: bool) -> Self {
        Self {
            feed,
            chat_id,
            enabled,
            posted: Vec::new(),
        }
    }

    async fn post(&mut self, text: String) {
        if !self.enabled {
            return;
        }
        match self
            .feed
            .send_message(OutgoingMessage::new(self.chat_id, text))
            .await
        {
            Ok(message) => self.posted.push(message.message_id),
            Err(err) => {
                warn!(chat_id = self.chat_id, error = %err, "failed to post progress notice")
            }
        }
    }

    async fn clear(&mut self) {
        for message_id in self.posted.drain(..) {
            if let Err(err) = self.feed.delete_message(self.chat_id, message_id).await {
                warn!(
                    chat_id = self.chat_id,
                    message_id,
                    error = %err,
                    "failed to delete progress notice"
                );
            }
        }
    }
}
