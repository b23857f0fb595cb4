mod kv;
mod watermark;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{StateBackend, StateSection};

pub use kv::{FileStore, HttpStore, MemoryStore};
pub use watermark::{ChannelRegistry, Watermark};

pub const WATERMARK_KEY: &str = "watermark";
pub const CHANNELS_KEY: &str = "broadcast_feeds";

#[derive(Debug, Error)]
pub enum StateError {
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("state document is malformed: {0}")]
    Malformed(String),
    #[error("state store request failed: {0}")]
    Remote(String),
    #[error("state backend misconfigured: {0}")]
    Configuration(String),
    #[error("in-memory state lock poisoned")]
    Poisoned,
}

impl From<reqwest::Error> for StateError {
    fn from(error: reqwest::Error) -> Self {
        StateError::Remote(error.to_string())
    }
}

impl From<serde_yaml::Error> for StateError {
    fn from(error: serde_yaml::Error) -> Self {
        StateError::Malformed(error.to_string())
    }
}

pub type StateResult<T> = Result<T, StateError>;

/// Minimal string key-value persistence used for the loop's bookkeeping.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> StateResult<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> StateResult<()>;
}

pub fn store_from_config(section: &StateSection) -> StateResult<Arc<dyn KeyValueStore>> {
    match section.backend {
        StateBackend::File => {
            let path = section.path.as_ref().ok_or_else(|| {
                StateError::Configuration("file backend requires state.path".into())
            })?;
            Ok(Arc::new(FileStore::new(path)))
        }
        StateBackend::Http => {
            let url = section.url.as_ref().ok_or_else(|| {
                StateError::Configuration("http backend requires state.url".into())
            })?;
            Ok(Arc::new(HttpStore::new(url, section.token.clone())?))
        }
        StateBackend::Memory => Ok(Arc::new(MemoryStore::default())),
    }
}

/// Mutable bookkeeping owned by the update loop: the processed-event window and
/// the set of broadcast feeds seen so far.
#[derive(Debug, Clone)]
pub struct LoopState {
    pub watermark: Watermark,
    pub channels: ChannelRegistry,
}

impl LoopState {
    pub fn new(cap: usize) -> Self {
        Self {
            watermark: Watermark::new(cap),
            channels: ChannelRegistry::default(),
        }
    }
}

/// Persists [`LoopState`] through a [`KeyValueStore`].
///
/// Writes are best-effort: callers log failures and keep the in-memory copy as
/// the source of truth for the rest of the process lifetime.
#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn KeyValueStore>,
    cap: usize,
}

impl StateStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, cap: usize) -> Self {
        Self { kv, cap }
    }

    pub async fn load(&self) -> StateResult<LoopState> {
        let mut state = LoopState::new(self.cap);
        if let Some(raw) = self.kv.get(WATERMARK_KEY).await? {
            state.watermark = Watermark::decode(&raw, self.cap);
        }
        if let Some(raw) = self.kv.get(CHANNELS_KEY).await? {
            state.channels = ChannelRegistry::decode(&raw);
        }
        debug!(
            watermark = state.watermark.len(),
            channels = state.channels.len(),
            "loop state loaded"
        );
        Ok(state)
    }

    pub async fn save_watermark(&self, watermark: &Watermark) -> StateResult<()> {
        self.kv.put(WATERMARK_KEY, &watermark.encode()).await
    }

    /// Writes the channel set unless the stored copy already matches.
    pub async fn save_channels(&self, channels: &ChannelRegistry) -> StateResult<()> {
        let encoded = channels.encode();
        match self.kv.get(CHANNELS_KEY).await {
            Ok(Some(current)) if current == encoded => return Ok(()),
            Ok(_) => {}
            Err(err) => warn!(error = %err, "failed to read stored broadcast feeds"),
        }
        self.kv.put(CHANNELS_KEY, &encoded).await
    }
}
