//! The messaging feed the loop consumes and publishes to.

mod telegram;
mod types;

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

pub use telegram::{escape_markdown, TelegramClient};
pub use types::{
    Audio, Chat, ChatMember, ChatMemberUpdated, Event, Message, Update, User, Video,
};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed unreachable: {0}")]
    Unreachable(String),
    #[error("{method} rate limited: {description}")]
    RateLimited { method: String, description: String },
    #[error("{method}: {description}")]
    Api { method: String, description: String },
    #[error("{method}: malformed response: {reason}")]
    Decode { method: String, reason: String },
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("{method}: response carries no attachment id")]
    MissingAttachment { method: String },
}

impl FeedError {
    pub fn is_chat_not_found(&self) -> bool {
        matches!(self, FeedError::Api { description, .. } if description.contains("chat not found"))
    }
}

pub type FeedResult<T> = Result<T, FeedError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    MarkdownV2,
}

impl ParseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ParseMode::MarkdownV2 => "MarkdownV2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub chat_id: i64,
    pub text: String,
    pub parse_mode: Option<ParseMode>,
    pub reply_to: Option<i64>,
}

impl OutgoingMessage {
    pub fn new(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            parse_mode: None,
            reply_to: None,
        }
    }

    pub fn markdown(mut self) -> Self {
        self.parse_mode = Some(ParseMode::MarkdownV2);
        self
    }

    pub fn reply_to(mut self, message_id: i64) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioUpload {
    pub chat_id: i64,
    pub caption: String,
    pub path: PathBuf,
    pub performer: String,
    pub title: String,
    pub duration_seconds: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoUpload {
    pub chat_id: i64,
    pub caption: String,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub duration_seconds: i64,
}

#[async_trait]
pub trait Feed: Send + Sync {
    /// Everything the platform still holds, or only ids at or above `offset`.
    async fn get_updates(&self, offset: Option<i64>) -> FeedResult<Vec<Update>>;

    async fn send_message(&self, message: OutgoingMessage) -> FeedResult<Message>;

    async fn send_audio(&self, upload: AudioUpload) -> FeedResult<Audio>;

    async fn send_video(&self, upload: VideoUpload) -> FeedResult<Video>;

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> FeedResult<()>;

    async fn get_chat(&self, chat_id: i64) -> FeedResult<Chat>;

    async fn get_chat_administrators(&self, chat_id: i64) -> FeedResult<Vec<ChatMember>>;

    /// Grants `user_id` administrator rights in `chat_id`.
    async fn promote_chat_member(&self, chat_id: i64, user_id: i64) -> FeedResult<bool>;
}
