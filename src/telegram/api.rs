//! Telegram Bot API wire types.
//!
//! Field names match the API documents; the field set is trimmed to what
//! the client consumes.

use serde::Deserialize;

/// Envelope wrapping every Bot API response.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub(super) struct Response<T> {
    pub ok: bool,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub result: Option<T>,
}

/// One update from `getUpdates`. At most one of the payload fields is set.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct Update {
    /// Unique identifier; ids increase sequentially.
    pub update_id: u64,
    #[serde(default)]
    pub message: Option<Message>,
    #[serde(default)]
    pub edited_message: Option<Message>,
}

/// A message sent on Telegram.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct Message {
    /// Unique identifier within the chat.
    pub message_id: u64,
    /// The sender. Absent for messages sent to channels.
    #[serde(default)]
    pub from: Option<User>,
    /// Unix time the message was sent.
    #[serde(default)]
    pub date: i64,
    pub chat: Chat,
    /// The message this one replies to, when it is a reply.
    #[serde(default)]
    pub reply_to_message: Option<Box<Message>>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub document: Option<Document>,
    #[serde(default)]
    pub photo: Option<Vec<PhotoSize>>,
    #[serde(default)]
    pub sticker: Option<Sticker>,
    /// A member just added to the group.
    #[serde(default)]
    pub new_chat_member: Option<User>,
    /// A member who just left the group.
    #[serde(default)]
    pub left_chat_member: Option<User>,
}

/// A Telegram user or bot.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct User {
    pub id: i64,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub username: String,
}

/// A group, supergroup, channel, or private chat.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct Chat {
    pub id: i64,
    /// Set for supergroups, channels, and group chats; absent for private
    /// chats. Its presence is what marks a chat as a multi-party room.
    #[serde(default)]
    pub title: Option<String>,
}

/// One size of a photo or thumbnail.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct PhotoSize {
    pub file_id: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub file_size: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct Document {
    pub file_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(super) struct Sticker {
    pub file_id: String,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub thumb: Option<PhotoSize>,
}

/// Response of `getUserProfilePhotos`.
#[derive(Debug, Clone, Deserialize)]
pub(super) struct UserProfilePhotos {
    #[serde(default)]
    pub photos: Vec<Vec<PhotoSize>>,
}
