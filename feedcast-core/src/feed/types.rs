use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Update {
    pub update_id: i64,
    pub message: Option<Message>,
    pub edited_message: Option<Message>,
    pub channel_post: Option<Message>,
    pub edited_channel_post: Option<Message>,
    pub my_chat_member: Option<ChatMemberUpdated>,
    /// The update as received, kept for forwarding shapes we do not model.
    #[serde(skip)]
    pub raw: serde_json::Value,
}

/// What an update carries, after picking the first populated payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Event<'a> {
    Text {
        message: &'a Message,
        edited: bool,
        channel_post: bool,
    },
    MembershipChange(&'a ChatMemberUpdated),
    Unrecognized,
}

impl Update {
    /// Decodes one raw update. A payload we cannot model still yields an
    /// update carrying only its id, which classifies as unrecognized.
    /// `None` when even the id is missing.
    pub fn from_raw(value: serde_json::Value) -> Option<Self> {
        match serde_json::from_value::<Update>(value.clone()) {
            Ok(mut update) => {
                update.raw = value;
                Some(update)
            }
            Err(_) => {
                let update_id = value.get("update_id")?.as_i64()?;
                Some(Update {
                    update_id,
                    raw: value,
                    ..Update::default()
                })
            }
        }
    }

    pub fn classify(&self) -> Event<'_> {
        let payloads = [
            (&self.message, false, false),
            (&self.edited_message, true, false),
            (&self.channel_post, false, true),
            (&self.edited_channel_post, true, true),
        ];
        for (payload, edited, channel_post) in payloads {
            if let Some(message) = payload {
                return Event::Text {
                    message,
                    edited,
                    channel_post: channel_post || message.chat.is_channel(),
                };
            }
        }
        match &self.my_chat_member {
            Some(change) => Event::MembershipChange(change),
            None => Event::Unrecognized,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Message {
    pub message_id: i64,
    pub from: Option<User>,
    pub chat: Chat,
    #[serde(default)]
    pub date: i64,
    pub text: Option<String>,
    pub audio: Option<Audio>,
    pub video: Option<Video>,
}

impl Message {
    pub fn body(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    pub fn sender_id(&self) -> i64 {
        self.from.as_ref().map_or(0, |user| user.id)
    }

    pub fn sender_username(&self) -> &str {
        self.from
            .as_ref()
            .and_then(|user| user.username.as_deref())
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
    pub title: Option<String>,
    pub username: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub invite_link: Option<String>,
}

impl Chat {
    pub fn is_channel(&self) -> bool {
        self.kind == "channel"
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("")
    }

    /// `https://t.me/<username>` for public chats, the invite link otherwise.
    pub fn public_link(&self) -> Option<String> {
        match (&self.username, &self.invite_link) {
            (Some(username), _) if !username.is_empty() => {
                Some(format!("https://t.me/{username}"))
            }
            (_, Some(link)) if !link.is_empty() => Some(link.clone()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatMember {
    pub user: User,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub from: User,
    #[serde(default)]
    pub date: i64,
    pub old_chat_member: ChatMember,
    pub new_chat_member: ChatMember,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Audio {
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub file_unique_id: String,
    #[serde(default)]
    pub duration: i64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct Video {
    #[serde(default)]
    pub file_id: String,
    #[serde(default)]
    pub file_unique_id: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}
