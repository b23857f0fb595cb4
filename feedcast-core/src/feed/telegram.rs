use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::config::FeedSection;

use super::{
    Audio, AudioUpload, Chat, ChatMember, Feed, FeedError, FeedResult, Message,
    OutgoingMessage, Update, Video, VideoUpload,
};

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;
const UPLOAD_CHANNEL_DEPTH: usize = 8;
const RATE_LIMIT_PREFIX: &str = "Too Many Requests";

/// Telegram Bot API client.
///
/// Reads (`getUpdates`, `getChat`, `getChatAdministrators`) are retried when
/// the platform answers "Too Many Requests"; anything that publishes or
/// mutates is sent exactly once.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    base: String,
    client: Client,
    rate_limit_attempts: u32,
    rate_limit_sleep: Duration,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    ok: bool,
    #[serde(default)]
    description: String,
    result: Option<T>,
}

impl TelegramClient {
    pub fn new(config: &FeedSection) -> FeedResult<Self> {
        let client = Client::builder()
            .user_agent("feedcast/1.0")
            .build()
            .map_err(|err| FeedError::Unreachable(err.to_string()))?;
        Ok(Self {
            base: format!(
                "{}/bot{}",
                config.api_base.trim_end_matches('/'),
                config.token
            ),
            client,
            rate_limit_attempts: config.rate_limit_attempts.max(1),
            rate_limit_sleep: config.rate_limit_sleep(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/{method}", self.base)
    }

    async fn read<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> FeedResult<T> {
        let mut attempt = 1;
        loop {
            let response = self
                .client
                .get(self.method_url(method))
                .query(query)
                .send()
                .await
                .map_err(|err| FeedError::Unreachable(err.to_string()))?;
            match decode(method, response).await {
                Err(FeedError::RateLimited { description, .. })
                    if attempt < self.rate_limit_attempts =>
                {
                    warn!(
                        method,
                        attempt,
                        sleep_secs = self.rate_limit_sleep.as_secs(),
                        %description,
                        "rate limited, retrying"
                    );
                    sleep(self.rate_limit_sleep).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> FeedResult<T> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .map_err(|err| FeedError::Unreachable(err.to_string()))?;
        decode(method, response).await
    }

    /// Streams the file at `path` into a multipart body through a bounded
    /// channel fed by a spawned reader task.
    async fn upload<T: DeserializeOwned>(
        &self,
        method: &str,
        fields: Vec<(&'static str, String)>,
        file_field: &'static str,
        path: &Path,
        file_name: String,
    ) -> FeedResult<T> {
        let length = tokio::fs::metadata(path)
            .await
            .map_err(|err| FeedError::Upload(format!("{}: {err}", path.display())))?
            .len();

        let (tx, rx) = mpsc::channel(UPLOAD_CHANNEL_DEPTH);
        let writer = tokio::spawn(pump_file(path.to_path_buf(), tx));
        let part = Part::stream_with_length(Body::wrap_stream(ReceiverStream::new(rx)), length)
            .file_name(file_name);
        let form = fields
            .into_iter()
            .fold(Form::new(), |form, (name, value)| form.text(name, value))
            .part(file_field, part);

        let started = Instant::now();
        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await;
        let pumped = writer
            .await
            .map_err(|err| FeedError::Upload(err.to_string()))?;
        if let Err(PumpError::Read(err)) = &pumped {
            return Err(FeedError::Upload(format!("{}: {err}", path.display())));
        }
        let response = response.map_err(|err| FeedError::Unreachable(err.to_string()))?;
        if let Err(PumpError::Closed) = pumped {
            return Err(FeedError::Upload(
                "request finished before the file was sent".into(),
            ));
        }
        let result = decode(method, response).await?;
        info!(
            method,
            bytes = length,
            elapsed_secs = started.elapsed().as_secs(),
            "uploaded"
        );
        Ok(result)
    }
}

async fn decode<T: DeserializeOwned>(method: &str, response: Response) -> FeedResult<T> {
    let status = response.status();
    let envelope: Envelope<T> = response.json().await.map_err(|err| FeedError::Decode {
        method: method.to_string(),
        reason: format!("{status}: {err}"),
    })?;
    unwrap_envelope(method, envelope)
}

fn unwrap_envelope<T>(method: &str, envelope: Envelope<T>) -> FeedResult<T> {
    if !envelope.ok {
        let description = envelope.description;
        if description.starts_with(RATE_LIMIT_PREFIX) {
            return Err(FeedError::RateLimited {
                method: method.to_string(),
                description,
            });
        }
        return Err(FeedError::Api {
            method: method.to_string(),
            description,
        });
    }
    envelope.result.ok_or_else(|| FeedError::Decode {
        method: method.to_string(),
        reason: "ok response without result".into(),
    })
}

#[derive(Debug)]
enum PumpError {
    Read(std::io::Error),
    Closed,
}

async fn pump_file(
    path: PathBuf,
    tx: mpsc::Sender<Result<Bytes, std::io::Error>>,
) -> Result<u64, PumpError> {
    let mut file = match File::open(&path).await {
        Ok(file) => file,
        Err(err) => {
            let _ = tx.send(Err(std::io::Error::new(err.kind(), err.to_string()))).await;
            return Err(PumpError::Read(err));
        }
    };
    let mut sent = 0u64;
    loop {
        let mut chunk = BytesMut::with_capacity(UPLOAD_CHUNK_BYTES);
        match file.read_buf(&mut chunk).await {
            Ok(0) => return Ok(sent),
            Ok(read) => {
                sent += read as u64;
                if tx.send(Ok(chunk.freeze())).await.is_err() {
                    return Err(PumpError::Closed);
                }
            }
            Err(err) => {
                let _ = tx.send(Err(std::io::Error::new(err.kind(), err.to_string()))).await;
                return Err(PumpError::Read(err));
            }
        }
    }
}

/// Escapes text for `MarkdownV2` messages.
pub fn escape_markdown(text: &str) -> String {
    const SPECIAL: &[char] = &[
        '`', '.', '-', '_', '#', '*', '~', '>', '+', '=', '|', '!', '{', '}', '[', ']', '(', ')',
    ];
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if SPECIAL.contains(&ch) {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

/// Non-alphanumeric characters become dots; capped at 40 characters.
fn upload_file_name(raw: &str) -> String {
    raw.chars()
        .map(|ch| if ch.is_alphanumeric() { ch } else { '.' })
        .take(40)
        .collect()
}

#[async_trait]
impl Feed for TelegramClient {
    async fn get_updates(&self, offset: Option<i64>) -> FeedResult<Vec<Update>> {
        let query: Vec<(&str, String)> = offset
            .map(|offset| vec![("offset", offset.to_string())])
            .unwrap_or_default();
        let values: Vec<serde_json::Value> = self.read("getUpdates", &query).await?;
        let mut updates = Vec::with_capacity(values.len());
        for value in values {
            match Update::from_raw(value) {
                Some(update) => updates.push(update),
                None => warn!("dropping update without an id"),
            }
        }
        debug!(count = updates.len(), ?offset, "fetched updates");
        Ok(updates)
    }

    async fn send_message(&self, message: OutgoingMessage) -> FeedResult<Message> {
        let mut body = json!({
            "chat_id": message.chat_id,
            "text": message.text,
            "disable_web_page_preview": true,
        });
        if let Some(mode) = message.parse_mode {
            body["parse_mode"] = json!(mode.as_str());
        }
        if let Some(reply_to) = message.reply_to {
            body["reply_to_message_id"] = json!(reply_to);
        }
        self.call("sendMessage", &body).await
    }

    async fn send_audio(&self, upload: AudioUpload) -> FeedResult<Audio> {
        let file_name = upload_file_name(&format!("{}.{}", upload.performer, upload.title));
        let fields = vec![
            ("chat_id", upload.chat_id.to_string()),
            ("performer", upload.performer),
            ("title", upload.title),
            ("caption", upload.caption),
            ("duration", upload.duration_seconds.to_string()),
        ];
        let message: Message = self
            .upload("sendAudio", fields, "audio", &upload.path, file_name)
            .await?;
        message
            .audio
            .filter(|audio| !audio.file_id.is_empty())
            .ok_or_else(|| FeedError::MissingAttachment {
                method: "sendAudio".into(),
            })
    }

    async fn send_video(&self, upload: VideoUpload) -> FeedResult<Video> {
        let file_name = upload_file_name(&upload.caption);
        let fields = vec![
            ("chat_id", upload.chat_id.to_string()),
            ("caption", upload.caption),
            ("width", upload.width.to_string()),
            ("height", upload.height.to_string()),
            ("duration", upload.duration_seconds.to_string()),
            ("supports_streaming", "true".to_string()),
        ];
        let message: Message = self
            .upload("sendVideo", fields, "video", &upload.path, file_name)
            .await?;
        message
            .video
            .filter(|video| !video.file_id.is_empty())
            .ok_or_else(|| FeedError::MissingAttachment {
                method: "sendVideo".into(),
            })
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> FeedResult<()> {
        let body = json!({ "chat_id": chat_id, "message_id": message_id });
        let _: bool = self.call("deleteMessage", &body).await?;
        Ok(())
    }

    async fn get_chat(&self, chat_id: i64) -> FeedResult<Chat> {
        self.read("getChat", &[("chat_id", chat_id.to_string())])
            .await
    }

    async fn get_chat_administrators(&self, chat_id: i64) -> FeedResult<Vec<ChatMember>> {
        self.read("getChatAdministrators", &[("chat_id", chat_id.to_string())])
            .await
    }

    async fn promote_chat_member(&self, chat_id: i64, user_id: i64) -> FeedResult<bool> {
        let body = json!({
            "chat_id": chat_id,
            "user_id": user_id,
            "is_anonymous": false,
            "can_manage_chat": true,
            "can_post_messages": true,
            "can_edit_messages": true,
            "can_delete_messages": true,
            "can_change_info": true,
            "can_restrict_members": true,
            "can_promote_members": true,
            "can_invite_users": true,
            "can_manage_video_chats": true,
        });
        self.call("promoteChatMember", &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::config::{CommandsSection, PollingStyle};
    use tempfile::tempdir;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    const RATE_LIMITED: &str = r#"{"ok": false, "error_code": 429, "description": "Too Many Requests: retry after 0"}"#;

    fn section(api_base: String, rate_limit_attempts: u32) -> FeedSection {
        FeedSection {
            api_base,
            token: "123:abc".into(),
            operator_chat_id: 1,
            polling_style: PollingStyle::Log,
            progress_notices: false,
            mirror_events: true,
            rate_limit_attempts,
            rate_limit_sleep_seconds: 0,
            commands: CommandsSection::default(),
        }
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut request = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let read = socket.read(&mut chunk).await.unwrap();
            if read == 0 {
                return;
            }
            request.extend_from_slice(&chunk[..read]);
            let text = String::from_utf8_lossy(&request);
            if let Some(head_end) = text.find("\r\n\r\n") {
                let body_len = text[..head_end]
                    .lines()
                    .filter_map(|line| line.split_once(':'))
                    .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
                    .and_then(|(_, value)| value.trim().parse::<usize>().ok())
                    .unwrap_or(0);
                if request.len() >= head_end + 4 + body_len {
                    return;
                }
            }
        }
    }

    /// Answers one connection per canned body, in order, and counts requests.
    async fn serve(bodies: Vec<&'static str>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        tokio::spawn(async move {
            for body in bodies {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                counter.fetch_add(1, Ordering::SeqCst);
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.ok();
            }
        });
        (format!("http://{addr}"), hits)
    }

    #[tokio::test]
    async fn reads_retry_after_rate_limit() {
        let (base, hits) = serve(vec![
            RATE_LIMITED,
            r#"{"ok": true, "result": {"id": -100, "type": "channel", "title": "vids"}}"#,
        ])
        .await;
        let client = TelegramClient::new(&section(base, 3)).unwrap();

        let chat = client.get_chat(-100).await.unwrap();

        assert_eq!(chat.title(), "vids");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn reads_give_up_after_configured_attempts() {
        let (base, hits) = serve(vec![RATE_LIMITED, RATE_LIMITED, RATE_LIMITED]).await;
        let client = TelegramClient::new(&section(base, 2)).unwrap();

        let err = client.get_chat_administrators(-100).await.unwrap_err();

        assert!(matches!(err, FeedError::RateLimited { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn publishes_are_never_retried() {
        let (base, hits) = serve(vec![
            RATE_LIMITED,
            r#"{"ok": true, "result": {"message_id": 5, "chat": {"id": 1}}}"#,
        ])
        .await;
        let client = TelegramClient::new(&section(base, 3)).unwrap();

        let err = client
            .send_message(OutgoingMessage::new(1, "hello"))
            .await
            .unwrap_err();

        assert!(matches!(err, FeedError::RateLimited { .. }));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undecodable_update_is_kept_by_id() {
        let (base, _hits) = serve(vec![
            r#"{"ok": true, "result": [
                {"update_id": 1, "message": {"message_id": "x", "chat": {"id": 1}}},
                {"update_id": 2, "message": {"message_id": 3, "chat": {"id": 1}, "text": "hi"}}
            ]}"#,
        ])
        .await;
        let client = TelegramClient::new(&section(base, 1)).unwrap();

        let updates = client.get_updates(None).await.unwrap();

        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].classify(), crate::feed::Event::Unrecognized);
        assert_eq!(updates[1].message.as_ref().map(|m| m.body()), Some("hi"));
    }

    #[test]
    fn escapes_markdown_specials() {
        assert_eq!(escape_markdown("a.b (c)!"), "a\\.b \\(c\\)\\!");
        assert_eq!(escape_markdown("plain"), "plain");
    }

    #[test]
    fn rate_limit_description_is_classified() {
        let envelope: Envelope<Chat> = serde_json::from_str(
            r#"{"ok": false, "error_code": 429, "description": "Too Many Requests: retry after 14"}"#,
        )
        .unwrap();
        assert!(matches!(
            unwrap_envelope("getChat", envelope),
            Err(FeedError::RateLimited { .. })
        ));

        let envelope: Envelope<Chat> = serde_json::from_str(
            r#"{"ok": false, "error_code": 400, "description": "Bad Request: chat not found"}"#,
        )
        .unwrap();
        let err = unwrap_envelope("getChat", envelope).unwrap_err();
        assert!(err.is_chat_not_found());
    }

    #[test]
    fn upload_file_name_is_sanitized() {
        assert_eq!(upload_file_name("Rick.Never Gonna/Give"), "Rick.Never.Gonna.Give");
        assert_eq!(upload_file_name(&"x".repeat(90)).len(), 40);
    }

    #[tokio::test]
    async fn pump_streams_whole_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("artifact.m4a");
        std::fs::write(&path, vec![7u8; UPLOAD_CHUNK_BYTES * 2 + 10]).unwrap();

        let (tx, mut rx) = mpsc::channel(UPLOAD_CHANNEL_DEPTH);
        let writer = tokio::spawn(pump_file(path, tx));
        let mut received = 0usize;
        while let Some(chunk) = rx.recv().await {
            received += chunk.unwrap().len();
        }
        assert_eq!(writer.await.unwrap().unwrap(), received as u64);
        assert_eq!(received, UPLOAD_CHUNK_BYTES * 2 + 10);
    }

    #[tokio::test]
    async fn pump_reports_missing_file() {
        let dir = tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(UPLOAD_CHANNEL_DEPTH);
        let writer = tokio::spawn(pump_file(dir.path().join("gone.mp4"), tx));
        assert!(rx.recv().await.unwrap().is_err());
        assert!(matches!(writer.await.unwrap(), Err(PumpError::Read(_))));
    }
}
