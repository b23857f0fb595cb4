use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::TryStreamExt;
use rand::seq::SliceRandom;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Proxy};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::SourceSection;
use crate::process::{CommandExecutor, SystemCommandExecutor};
use crate::selector::{EncodingDescriptor, BITS_PER_KBIT};

use super::{
    MediaMetadata, MediaSource, MediaStream, ResolvedMedia, SourceError, SourceResult,
};

/// Resolves media through `yt-dlp -J` and downloads the chosen format's URL
/// directly.
pub struct YtDlpSource {
    binary: PathBuf,
    proxy: Option<String>,
    client: Client,
    executor: Arc<dyn CommandExecutor>,
}

impl YtDlpSource {
    pub fn new(config: &SourceSection) -> SourceResult<Self> {
        let proxy = config
            .proxies
            .choose(&mut rand::thread_rng())
            .filter(|proxy| !proxy.trim().is_empty())
            .cloned();
        let mut builder = Client::builder().user_agent(config.user_agent.clone());
        if let Some(proxy) = &proxy {
            info!(proxy = %proxy, "media downloads go through proxy");
            let proxy =
                Proxy::all(proxy).map_err(|err| SourceError::resolution("proxy", err))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|err| SourceError::resolution("http client", err))?;
        Ok(Self {
            binary: PathBuf::from(&config.ytdlp_path),
            proxy,
            client,
            executor: Arc::new(SystemCommandExecutor),
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn binary(&self) -> &std::path::Path {
        &self.binary
    }

    fn build_args(&self, id: &str) -> Vec<String> {
        let mut args = vec!["-J".to_string(), "--no-playlist".to_string()];
        if let Some(proxy) = &self.proxy {
            args.push("--proxy".to_string());
            args.push(proxy.clone());
        }
        args.push(format!("https://www.youtube.com/watch?v={id}"));
        args
    }
}

#[async_trait]
impl MediaSource for YtDlpSource {
    async fn resolve(&self, id: &str) -> SourceResult<ResolvedMedia> {
        let args = self.build_args(id);
        let output = self
            .executor
            .output(&self.binary, &args)
            .await
            .map_err(|err| SourceError::resolution(id, err))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::resolution(id, stderr.trim()));
        }
        let dump: InfoDump = serde_json::from_slice(&output.stdout)
            .map_err(|err| SourceError::resolution(id, err))?;
        let resolved = dump.into_resolved(id);
        debug!(
            id,
            formats = resolved.catalog.len(),
            duration = resolved.metadata.duration_seconds,
            "resolved media"
        );
        Ok(resolved)
    }

    async fn open(
        &self,
        metadata: &MediaMetadata,
        encoding: &EncodingDescriptor,
    ) -> SourceResult<MediaStream> {
        if encoding.url.is_empty() {
            return Err(SourceError::Stream(format!(
                "format {} of {} has no url",
                encoding.format_id, metadata.id
            )));
        }
        let response = self
            .client
            .get(&encoding.url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|err| SourceError::Stream(err.to_string()))?;
        let size_hint = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.parse::<u64>().ok())
            .or_else(|| u64::try_from(encoding.content_length).ok().filter(|n| *n > 0));
        let bytes = response
            .bytes_stream()
            .map_err(|err| SourceError::Stream(err.to_string()));
        Ok(MediaStream {
            bytes: Box::pin(bytes),
            size_hint,
        })
    }
}

#[derive(Debug, Deserialize)]
struct InfoDump {
    #[serde(default)]
    title: String,
    uploader: Option<String>,
    channel: Option<String>,
    upload_date: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    formats: Vec<FormatDump>,
}

#[derive(Debug, Deserialize)]
struct FormatDump {
    #[serde(default)]
    format_id: String,
    url: Option<String>,
    #[serde(default)]
    ext: String,
    protocol: Option<String>,
    acodec: Option<String>,
    vcodec: Option<String>,
    format_note: Option<String>,
    /// kbit/s, taken as binary kilobits
    tbr: Option<f64>,
    abr: Option<f64>,
    filesize: Option<i64>,
    filesize_approx: Option<i64>,
    language: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
}

impl InfoDump {
    fn into_resolved(self, id: &str) -> ResolvedMedia {
        let publish_date = self
            .upload_date
            .as_deref()
            .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y%m%d").ok());
        let metadata = MediaMetadata {
            id: id.to_string(),
            title: self.title,
            author: self.uploader.or(self.channel).unwrap_or_default(),
            publish_date,
            duration_seconds: self.duration.unwrap_or(0.0) as i64,
        };
        let catalog = self
            .formats
            .into_iter()
            .filter_map(FormatDump::into_descriptor)
            .collect();
        ResolvedMedia { metadata, catalog }
    }
}

impl FormatDump {
    /// Segmented (HLS/DASH manifest) formats cannot be fetched with a single
    /// GET and are dropped.
    fn into_descriptor(self) -> Option<EncodingDescriptor> {
        let url = self.url?;
        let protocol = self.protocol.as_deref().unwrap_or("https");
        if !protocol.starts_with("http") || protocol.contains("dash") {
            return None;
        }
        let has_audio = codec_present(self.acodec.as_deref());
        let has_video = codec_present(self.vcodec.as_deref());
        let mime_type = match (has_video, self.ext.as_str()) {
            (true, "mp4") => format!(
                "video/mp4; codecs=\"{}\"",
                codecs(self.vcodec.as_deref(), self.acodec.as_deref())
            ),
            (false, "m4a" | "mp4") if has_audio => {
                format!("audio/mp4; codecs=\"{}\"", self.acodec.as_deref().unwrap_or(""))
            }
            (true, ext) => format!("video/{ext}"),
            (false, ext) => format!("audio/{ext}"),
        };
        let quality_label = if has_video {
            self.format_note
                .clone()
                .filter(|note| !note.is_empty())
                .or_else(|| self.height.map(|height| format!("{height}p")))
        } else {
            None
        };
        let kbps = self.tbr.or(self.abr).unwrap_or(0.0);
        Some(EncodingDescriptor {
            format_id: self.format_id,
            mime_type,
            has_audio,
            has_video,
            quality_label,
            bitrate: (kbps * BITS_PER_KBIT as f64) as i64,
            content_length: self.filesize.or(self.filesize_approx).unwrap_or(0),
            language: self.language.as_deref().map(language_display_name),
            width: self.width.unwrap_or(0),
            height: self.height.unwrap_or(0),
            url,
        })
    }
}

fn codec_present(codec: Option<&str>) -> bool {
    matches!(codec, Some(codec) if !codec.is_empty() && codec != "none")
}

fn codecs(vcodec: Option<&str>, acodec: Option<&str>) -> String {
    [vcodec, acodec]
        .into_iter()
        .flatten()
        .filter(|codec| *codec != "none")
        .collect::<Vec<_>>()
        .join(", ")
}

/// Expands a language code into "name (code)" so that both the English name
/// and the bare code match as substrings.
fn language_display_name(code: &str) -> String {
    let primary = code.split(['-', '_']).next().unwrap_or(code);
    let name = match primary.to_ascii_lowercase().as_str() {
        "en" => "english",
        "de" => "german",
        "ru" => "russian",
        "uk" => "ukrainian",
        "fr" => "french",
        "es" => "spanish",
        "it" => "italian",
        "pt" => "portuguese",
        "pl" => "polish",
        "ja" => "japanese",
        "zh" => "chinese",
        "ko" => "korean",
        "ar" => "arabic",
        "hi" => "hindi",
        "tr" => "turkish",
        _ => return code.to_string(),
    };
    format!("{name} ({code})")
}
