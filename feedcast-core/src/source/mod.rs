//! Media resolution: identifier to metadata plus encoding catalog, playlist
//! expansion, and opening byte streams for a chosen encoding.

mod playlist;
mod ytdlp;

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use futures::Stream;
use serde::Serialize;
use thiserror::Error;

use crate::selector::EncodingDescriptor;

pub use playlist::YoutubeDataApi;
pub use ytdlp::YtDlpSource;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to resolve {target}: {reason}")]
    Resolution { target: String, reason: String },
    #[error("media stream failed: {0}")]
    Stream(String),
}

impl SourceError {
    pub fn resolution(target: impl Into<String>, reason: impl fmt::Display) -> Self {
        SourceError::Resolution {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

pub type SourceResult<T> = Result<T, SourceError>;

pub type ByteStream = Pin<Box<dyn Stream<Item = SourceResult<Bytes>> + Send>>;

/// Position of a media item inside the playlist it was expanded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaylistContext {
    pub playlist_id: String,
    /// Zero-based, as reported by the source.
    pub position: i64,
    pub size: i64,
    pub title: String,
}

impl PlaylistContext {
    pub fn is_complete(&self) -> bool {
        !self.playlist_id.is_empty()
            && !self.title.is_empty()
            && self.size > 0
            && self.position >= 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaReference {
    pub id: String,
    pub playlist: Option<PlaylistContext>,
}

impl MediaReference {
    pub fn single(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            playlist: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaMetadata {
    pub id: String,
    pub title: String,
    pub author: String,
    pub publish_date: Option<NaiveDate>,
    pub duration_seconds: i64,
}

impl MediaMetadata {
    pub fn canonical_url(&self) -> String {
        format!("youtu.be/{}", self.id)
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedMedia {
    pub metadata: MediaMetadata,
    pub catalog: Vec<EncodingDescriptor>,
}

pub struct MediaStream {
    pub bytes: ByteStream,
    pub size_hint: Option<u64>,
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("size_hint", &self.size_hint)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait MediaSource: Send + Sync {
    async fn resolve(&self, id: &str) -> SourceResult<ResolvedMedia>;

    async fn open(
        &self,
        metadata: &MediaMetadata,
        encoding: &EncodingDescriptor,
    ) -> SourceResult<MediaStream>;
}

/// Expands a playlist id into one reference per entry, in source order.
#[async_trait]
pub trait PlaylistResolver: Send + Sync {
    async fn expand(&self, playlist_id: &str) -> SourceResult<Vec<MediaReference>>;
}
