//! MarkdownV2 reports sent to the operator chat.

use std::fmt::Write as _;

use crate::feed::{escape_markdown, ChatMember, ChatMemberUpdated, Message, Update, User};

/// Inside code spans and blocks only the backtick and backslash are special.
fn escape_code(text: &str) -> String {
    text.replace('\\', "\\\\").replace('`', "\\`")
}

fn handle(user: &User) -> String {
    escape_markdown(user.username.as_deref().unwrap_or(""))
}

pub fn membership_change(change: &ChatMemberUpdated) -> String {
    let chat = &change.chat;
    let mut text = String::from("*MyChatMemberUpdated*\n");
    let _ = writeln!(text, "from:");
    let _ = writeln!(text, "  username: @{}", handle(&change.from));
    let _ = writeln!(text, "  id: `{}`", change.from.id);
    let _ = writeln!(text, "chat:");
    let _ = writeln!(text, "  id: `{}`", chat.id);
    let _ = writeln!(
        text,
        "  username: @{}",
        escape_markdown(chat.username.as_deref().unwrap_or(""))
    );
    let _ = writeln!(text, "  type: {}", escape_markdown(&chat.kind));
    let _ = writeln!(text, "  title: {}", escape_markdown(chat.title()));
    for (label, member) in [
        ("old member", &change.old_chat_member),
        ("new member", &change.new_chat_member),
    ] {
        let _ = writeln!(text, "{label}:");
        let _ = writeln!(text, "  username: @{}", handle(&member.user));
        let _ = writeln!(text, "  id: `{}`", member.user.id);
        let _ = writeln!(text, "  status: {}", escape_markdown(&member.status));
    }
    text
}

pub fn unrecognized(update: &Update) -> String {
    let raw = serde_json::to_string_pretty(&update.raw).unwrap_or_else(|_| update.raw.to_string());
    format!(
        "{}\n```\n{}\n```",
        escape_markdown(&format!(
            "unsupported type of update (id:{}) received:",
            update.update_id
        )),
        escape_code(&raw)
    )
}

pub fn mirrored_message(message: &Message, admins: &[ChatMember], edited: bool) -> String {
    let chat = &message.chat;
    let admins = admins
        .iter()
        .map(|admin| {
            format!(
                "username:@{} id:{} status:{}",
                handle(&admin.user),
                escape_markdown(&admin.user.id.to_string()),
                escape_markdown(&admin.status)
            )
        })
        .collect::<Vec<_>>()
        .join("  ");
    format!(
        "*Message*\nfrom: username:@{} id:`{}`\nchat: username:@{} id:{} type:{} title:{}\nchat admins: {}\niseditmessage:{}\ntext:\n```\n{}\n```",
        escape_markdown(message.sender_username()),
        message.sender_id(),
        escape_markdown(chat.username.as_deref().unwrap_or("")),
        escape_markdown(&chat.id.to_string()),
        escape_markdown(&chat.kind),
        escape_markdown(chat.title()),
        admins,
        edited,
        escape_code(message.body()),
    )
}

pub fn id_reply(message: &Message) -> String {
    format!(
        "username `{}`\nuser id `{}`\nchat id `{}`",
        escape_code(message.sender_username()),
        message.sender_id(),
        message.chat.id
    )
}
