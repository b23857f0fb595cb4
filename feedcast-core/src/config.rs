use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FeedcastConfig {
    pub system: SystemSection,
    pub feed: FeedSection,
    #[serde(default)]
    pub delivery: DeliverySection,
    #[serde(default)]
    pub source: SourceSection,
    #[serde(default)]
    pub transcoder: TranscoderSection,
    #[serde(default)]
    pub state: StateSection,
}

impl FeedcastConfig {
    pub fn validate(&self) -> Result<()> {
        if self.system.interval_seconds == 0 {
            return Err(ConfigError::Invalid(
                "system.interval_seconds must be positive".into(),
            ));
        }
        if self.feed.token.trim().is_empty() {
            return Err(ConfigError::Invalid("feed.token is empty".into()));
        }
        if self.state.watermark_cap == 0 {
            return Err(ConfigError::Invalid(
                "state.watermark_cap must be positive".into(),
            ));
        }
        if self.delivery.max_file_size_bytes <= 0 {
            return Err(ConfigError::Invalid(
                "delivery.max_file_size_bytes must be positive".into(),
            ));
        }
        self.source.media_regex()?;
        self.source.playlist_regex()?;
        match self.state.backend {
            StateBackend::File if self.state.path.is_none() => Err(ConfigError::Invalid(
                "state.path is required for the file backend".into(),
            )),
            StateBackend::Http if self.state.url.is_none() => Err(ConfigError::Invalid(
                "state.url is required for the http backend".into(),
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub interval_seconds: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub json_logs: bool,
    #[serde(default = "default_work_dir")]
    pub work_dir: String,
}

impl SystemSection {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PollingStyle {
    /// Fetch everything the platform still holds and rely on the watermark.
    #[default]
    Log,
    /// Ask only for ids newer than the newest watermark entry.
    Offset,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedSection {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    pub token: String,
    pub operator_chat_id: i64,
    #[serde(default)]
    pub polling_style: PollingStyle,
    #[serde(default)]
    pub progress_notices: bool,
    #[serde(default = "default_true")]
    pub mirror_events: bool,
    #[serde(default = "default_rate_limit_attempts")]
    pub rate_limit_attempts: u32,
    #[serde(default = "default_rate_limit_sleep")]
    pub rate_limit_sleep_seconds: u64,
    #[serde(default)]
    pub commands: CommandsSection,
}

impl FeedSection {
    pub fn rate_limit_sleep(&self) -> Duration {
        Duration::from_secs(self.rate_limit_sleep_seconds)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CommandsSection {
    pub list_channels: Option<String>,
    pub promote_admin: Option<String>,
    #[serde(default)]
    pub replies: Vec<KeywordReply>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct KeywordReply {
    pub trigger: String,
    pub reply: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliverySection {
    pub max_file_size_bytes: i64,
    pub audio_bitrate_kbps: i64,
    pub languages: Vec<String>,
    pub video_title_prefix: Option<String>,
    pub playlist_pause_seconds: u64,
    pub playlist_pause_threshold: usize,
}

impl Default for DeliverySection {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 47 << 20,
            audio_bitrate_kbps: 60,
            languages: Vec::new(),
            video_title_prefix: Some("vi".to_string()),
            playlist_pause_seconds: 11,
            playlist_pause_threshold: 3,
        }
    }
}

impl DeliverySection {
    pub fn playlist_pause(&self) -> Duration {
        Duration::from_secs(self.playlist_pause_seconds)
    }
}

pub const DEFAULT_MEDIA_PATTERN: &str =
    r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/shorts/|youtube\.com/live/)([0-9A-Za-z_-]+)";
pub const DEFAULT_PLAYLIST_PATTERN: &str = r"youtube\.com/playlist\?list=([0-9A-Za-z_-]+)";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SourceSection {
    pub ytdlp_path: String,
    pub user_agent: String,
    pub proxies: Vec<String>,
    pub api_base: String,
    pub api_key: String,
    pub max_results: u32,
    pub media_pattern: String,
    pub playlist_pattern: String,
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            ytdlp_path: "yt-dlp".to_string(),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.2 Safari/605.1.15".to_string(),
            proxies: Vec::new(),
            api_base: "https://www.googleapis.com/youtube/v3".to_string(),
            api_key: String::new(),
            max_results: 50,
            media_pattern: DEFAULT_MEDIA_PATTERN.to_string(),
            playlist_pattern: DEFAULT_PLAYLIST_PATTERN.to_string(),
        }
    }
}

impl SourceSection {
    pub fn media_regex(&self) -> Result<Regex> {
        compile_pattern("source.media_pattern", &self.media_pattern)
    }

    pub fn playlist_regex(&self) -> Result<Regex> {
        compile_pattern("source.playlist_pattern", &self.playlist_pattern)
    }
}

fn compile_pattern(field: &str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| ConfigError::Pattern {
        field: field.to_string(),
        source,
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscoderSection {
    pub ffmpeg_path: String,
    pub global_options: Vec<String>,
}

impl Default for TranscoderSection {
    fn default() -> Self {
        Self {
            ffmpeg_path: "/bin/ffmpeg".to_string(),
            global_options: vec!["-v".to_string(), "error".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StateBackend {
    #[default]
    File,
    Http,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateSection {
    pub backend: StateBackend,
    pub path: Option<String>,
    pub url: Option<String>,
    pub token: Option<String>,
    pub watermark_cap: usize,
}

impl Default for StateSection {
    fn default() -> Self {
        Self {
            backend: StateBackend::File,
            path: Some("feedcast-state.yaml".to_string()),
            url: None,
            token: None,
            watermark_cap: 1080,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_work_dir() -> String {
    ".".to_string()
}

fn default_api_base() -> String {
    "https://api.telegram.org".to_string()
}

fn default_true() -> bool {
    true
}

fn default_rate_limit_attempts() -> u32 {
    3
}

fn default_rate_limit_sleep() -> u64 {
    17
}

pub fn load_feedcast_config<P: AsRef<Path>>(path: P) -> Result<FeedcastConfig> {
    load_toml(path)
}

pub fn parse_feedcast_config(content: &str) -> Result<FeedcastConfig> {
    toml::from_str(content).map_err(|source| ConfigError::Parse {
        source,
        path: PathBuf::from("<inline>"),
    })
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
