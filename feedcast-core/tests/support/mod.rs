#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::process::{ExitStatus, Output};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use futures::stream;
use regex::Regex;

#[cfg(unix)]
use std::os::unix::process::ExitStatusExt;

use feedcast_core::config::{
    CommandsSection, KeywordReply, TranscoderSection, DEFAULT_MEDIA_PATTERN,
    DEFAULT_PLAYLIST_PATTERN,
};
use feedcast_core::delivery::{DeliverySettings, Orchestrator};
use feedcast_core::feed::{
    Audio, AudioUpload, Chat, ChatMember, Feed, FeedError, FeedResult, Message, OutgoingMessage,
    Update, User, Video, VideoUpload,
};
use feedcast_core::process::CommandExecutor;
use feedcast_core::selector::{DeliveryBudget, EncodingDescriptor};
use feedcast_core::state::{KeyValueStore, StateError, StateResult};
use feedcast_core::source::{
    MediaMetadata, MediaReference, MediaSource, MediaStream, PlaylistResolver, ResolvedMedia,
    SourceError, SourceResult,
};
use feedcast_core::transcode::Transcoder;
use feedcast_core::updates::LoopSettings;
use feedcast_core::PollingStyle;

pub const OPERATOR: i64 = 42;
pub const MB: i64 = 1 << 20;

#[derive(Default)]
pub struct FakeFeed {
    pub batches: Mutex<Vec<Vec<Update>>>,
    pub offsets: Mutex<Vec<Option<i64>>>,
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub deleted: Mutex<Vec<(i64, i64)>>,
    pub audio: Mutex<Vec<(AudioUpload, Vec<u8>)>>,
    pub video: Mutex<Vec<(VideoUpload, Vec<u8>)>>,
    pub admins: Mutex<HashMap<i64, Vec<ChatMember>>>,
    pub chats: Mutex<HashMap<i64, Chat>>,
    pub promoted: Mutex<Vec<(i64, i64)>>,
    pub fail_publish: AtomicBool,
    pub unreachable: AtomicBool,
    next_message_id: AtomicI64,
}

impl FakeFeed {
    pub fn with_batches(batches: Vec<Vec<Update>>) -> Arc<Self> {
        let feed = Self::default();
        *feed.batches.lock().unwrap() = batches;
        Arc::new(feed)
    }

    pub fn texts_to(&self, chat_id: i64) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|message| message.chat_id == chat_id)
            .map(|message| message.text.clone())
            .collect()
    }

    fn next_id(&self) -> i64 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst) + 5000
    }

    fn publish_error(&self, method: &str) -> FeedResult<()> {
        if self.fail_publish.load(Ordering::SeqCst) {
            return Err(FeedError::Api {
                method: method.to_string(),
                description: "Bad Request: file too large".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Feed for FakeFeed {
    async fn get_updates(&self, offset: Option<i64>) -> FeedResult<Vec<Update>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(FeedError::Unreachable("connection refused".into()));
        }
        self.offsets.lock().unwrap().push(offset);
        let mut batches = self.batches.lock().unwrap();
        if batches.is_empty() {
            Ok(Vec::new())
        } else {
            Ok(batches.remove(0))
        }
    }

    async fn send_message(&self, message: OutgoingMessage) -> FeedResult<Message> {
        let sent = Message {
            message_id: self.next_id(),
            chat: Chat {
                id: message.chat_id,
                ..Chat::default()
            },
            text: Some(message.text.clone()),
            ..Message::default()
        };
        self.sent.lock().unwrap().push(message);
        Ok(sent)
    }

    async fn send_audio(&self, upload: AudioUpload) -> FeedResult<Audio> {
        self.publish_error("sendAudio")?;
        let payload =
            std::fs::read(&upload.path).map_err(|err| FeedError::Upload(err.to_string()))?;
        self.audio.lock().unwrap().push((upload, payload));
        Ok(Audio {
            file_id: format!("audio-{}", self.next_id()),
            ..Audio::default()
        })
    }

    async fn send_video(&self, upload: VideoUpload) -> FeedResult<Video> {
        self.publish_error("sendVideo")?;
        let payload =
            std::fs::read(&upload.path).map_err(|err| FeedError::Upload(err.to_string()))?;
        self.video.lock().unwrap().push((upload, payload));
        Ok(Video {
            file_id: format!("video-{}", self.next_id()),
            ..Video::default()
        })
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> FeedResult<()> {
        self.deleted.lock().unwrap().push((chat_id, message_id));
        Ok(())
    }

    async fn get_chat(&self, chat_id: i64) -> FeedResult<Chat> {
        self.chats
            .lock()
            .unwrap()
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| FeedError::Api {
                method: "getChat".into(),
                description: "Bad Request: chat not found".into(),
            })
    }

    async fn get_chat_administrators(&self, chat_id: i64) -> FeedResult<Vec<ChatMember>> {
        self.admins
            .lock()
            .unwrap()
            .get(&chat_id)
            .cloned()
            .ok_or_else(|| FeedError::Api {
                method: "getChatAdministrators".into(),
                description: "Bad Request: member list is inaccessible".into(),
            })
    }

    async fn promote_chat_member(&self, chat_id: i64, user_id: i64) -> FeedResult<bool> {
        self.promoted.lock().unwrap().push((chat_id, user_id));
        Ok(true)
    }
}

/// Reads as empty and refuses every write.
#[derive(Default)]
pub struct FailingStore {
    pub attempted_writes: AtomicUsize,
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, _key: &str) -> StateResult<Option<String>> {
        Ok(None)
    }

    async fn put(&self, key: &str, _value: &str) -> StateResult<()> {
        self.attempted_writes.fetch_add(1, Ordering::SeqCst);
        Err(StateError::Remote(format!("{key}: store offline")))
    }
}

pub struct FakeSource {
    pub catalog: Vec<EncodingDescriptor>,
    pub duration_seconds: i64,
    pub payload: Vec<u8>,
    pub fail_midway: bool,
    pub resolved: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(catalog: Vec<EncodingDescriptor>, duration_seconds: i64) -> Self {
        Self {
            catalog,
            duration_seconds,
            payload: b"media-bytes".repeat(64),
            fail_midway: false,
            resolved: Mutex::new(Vec::new()),
        }
    }

    pub fn resolved(&self) -> Vec<String> {
        self.resolved.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaSource for FakeSource {
    async fn resolve(&self, id: &str) -> SourceResult<ResolvedMedia> {
        self.resolved.lock().unwrap().push(id.to_string());
        if id == "missing" {
            return Err(SourceError::resolution(id, "video unavailable"));
        }
        Ok(ResolvedMedia {
            metadata: MediaMetadata {
                id: id.to_string(),
                title: format!("Title {id}"),
                author: "Author".into(),
                publish_date: NaiveDate::from_ymd_opt(2024, 3, 9),
                duration_seconds: self.duration_seconds,
            },
            catalog: self.catalog.clone(),
        })
    }

    async fn open(
        &self,
        _metadata: &MediaMetadata,
        _encoding: &EncodingDescriptor,
    ) -> SourceResult<MediaStream> {
        let half = self.payload.len() / 2;
        let mut chunks: Vec<SourceResult<Bytes>> = vec![
            Ok(Bytes::copy_from_slice(&self.payload[..half])),
            Ok(Bytes::copy_from_slice(&self.payload[half..])),
        ];
        if self.fail_midway {
            chunks[1] = Err(SourceError::Stream("connection reset".into()));
        }
        Ok(MediaStream {
            bytes: Box::pin(stream::iter(chunks)),
            size_hint: Some(self.payload.len() as u64),
        })
    }
}

#[derive(Default)]
pub struct FakePlaylists {
    pub playlists: HashMap<String, Vec<MediaReference>>,
}

#[async_trait]
impl PlaylistResolver for FakePlaylists {
    async fn expand(&self, playlist_id: &str) -> SourceResult<Vec<MediaReference>> {
        self.playlists
            .get(playlist_id)
            .cloned()
            .ok_or_else(|| SourceError::resolution(playlist_id, "no playlists found with this id"))
    }
}

type RecordedCalls = Arc<Mutex<Vec<Vec<String>>>>;

/// Stands in for ffmpeg: writes the output path (last argument) unless told
/// to fail, then reports the configured exit code.
pub struct ScriptedExecutor {
    pub calls: RecordedCalls,
    exit_code: i32,
    write_output: bool,
}

impl ScriptedExecutor {
    pub fn build(exit_code: i32, write_output: bool) -> (Arc<dyn CommandExecutor>, RecordedCalls) {
        let calls: RecordedCalls = Arc::new(Mutex::new(Vec::new()));
        let executor: Arc<dyn CommandExecutor> = Arc::new(Self {
            calls: Arc::clone(&calls),
            exit_code,
            write_output,
        });
        (executor, calls)
    }
}

#[async_trait]
impl CommandExecutor for ScriptedExecutor {
    async fn output(&self, _program: &Path, _args: &[String]) -> std::io::Result<Output> {
        unreachable!("only the transcoder runs in these tests")
    }

    async fn run(&self, _program: &Path, args: &[String]) -> std::io::Result<ExitStatus> {
        self.calls.lock().unwrap().push(args.to_vec());
        if self.write_output {
            if let Some(output) = args.last() {
                std::fs::write(output, b"transcoded")?;
            }
        }
        Ok(ExitStatus::from_raw(self.exit_code << 8))
    }
}

pub fn audio_encoding(bitrate: i64, content_length: i64) -> EncodingDescriptor {
    EncodingDescriptor {
        format_id: format!("a{bitrate}"),
        mime_type: "audio/mp4; codecs=\"mp4a.40.2\"".into(),
        has_audio: true,
        bitrate,
        content_length,
        url: format!("https://cdn.example/a{bitrate}"),
        ..EncodingDescriptor::default()
    }
}

pub fn video_encoding(bitrate: i64, content_length: i64) -> EncodingDescriptor {
    EncodingDescriptor {
        format_id: format!("v{bitrate}"),
        mime_type: "video/mp4; codecs=\"avc1.4d401f, mp4a.40.2\"".into(),
        has_audio: true,
        has_video: true,
        quality_label: Some("720p".into()),
        bitrate,
        content_length,
        width: 1280,
        height: 720,
        url: format!("https://cdn.example/v{bitrate}"),
        ..EncodingDescriptor::default()
    }
}

pub fn settings(work_dir: &Path, max_size_bytes: i64, progress_notices: bool) -> DeliverySettings {
    DeliverySettings {
        budget: DeliveryBudget::new(max_size_bytes, 60),
        languages: vec!["english".into()],
        work_dir: work_dir.to_path_buf(),
        progress_notices,
    }
}

pub fn orchestrator(
    source: Arc<FakeSource>,
    feed: Arc<FakeFeed>,
    executor: Arc<dyn CommandExecutor>,
    settings: DeliverySettings,
) -> Arc<Orchestrator> {
    let transcoder = Transcoder::new(&TranscoderSection::default()).with_executor(executor);
    Arc::new(Orchestrator::new(
        source,
        feed,
        Arc::new(transcoder),
        settings,
    ))
}

pub fn loop_settings() -> LoopSettings {
    LoopSettings {
        operator_chat_id: OPERATOR,
        polling_style: PollingStyle::Log,
        interval: Duration::from_secs(1),
        mirror_events: true,
        commands: CommandsSection {
            list_channels: Some("/channels".into()),
            promote_admin: Some("/promote".into()),
            replies: vec![KeywordReply {
                trigger: "/ping".into(),
                reply: "pong".into(),
            }],
        },
        video_title_prefix: Some("vi".into()),
        playlist_pause: Duration::ZERO,
        playlist_pause_threshold: 3,
        media_pattern: Regex::new(DEFAULT_MEDIA_PATTERN).unwrap(),
        playlist_pattern: Regex::new(DEFAULT_PLAYLIST_PATTERN).unwrap(),
    }
}

pub fn text_update(update_id: i64, chat: Chat, sender_id: i64, text: &str) -> Update {
    let message = Message {
        message_id: update_id * 10,
        from: Some(User {
            id: sender_id,
            username: Some(format!("user{sender_id}")),
            ..User::default()
        }),
        chat,
        text: Some(text.to_string()),
        ..Message::default()
    };
    let is_channel = message.chat.kind == "channel";
    Update {
        update_id,
        message: (!is_channel).then(|| message.clone()),
        channel_post: is_channel.then_some(message),
        ..Update::default()
    }
}

pub fn group(id: i64, title: &str) -> Chat {
    Chat {
        id,
        kind: "group".into(),
        title: Some(title.into()),
        ..Chat::default()
    }
}

pub fn channel(id: i64, title: &str) -> Chat {
    Chat {
        id,
        kind: "channel".into(),
        title: Some(title.into()),
        ..Chat::default()
    }
}

pub fn dir_is_empty(path: &Path) -> bool {
    std::fs::read_dir(path).unwrap().next().is_none()
}
