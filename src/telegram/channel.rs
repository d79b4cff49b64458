//! One joined Telegram chat, adapted to the [`Channel`] contract.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::api;
use super::client::{ClientInner, largest_photo};
use super::text;
use crate::chat::inbox::Inbox;
use crate::chat::{Channel, ChannelHandle, Event, Message, MessageId, User, UserId};
use crate::error::ChannelError;

/// A Telegram group, supergroup, or channel joined by the client.
pub struct TelegramChannel {
    inner: Arc<ClientInner>,
    chat: api::Chat,
    name: String,
    /// Updates routed here by the client's demux task.
    inbox: Inbox<api::Update>,
    /// Updates pulled from the inbox but not yet consumed by `receive`.
    pending: Mutex<VecDeque<api::Update>>,
    created: DateTime<Utc>,
    this: OnceLock<Weak<TelegramChannel>>,
}

impl TelegramChannel {
    pub(super) fn new(inner: Arc<ClientInner>, chat: api::Chat) -> Arc<Self> {
        let channel = Arc::new(Self {
            inner,
            name: chat.title.clone().unwrap_or_default(),
            chat,
            inbox: Inbox::new(),
            pending: Mutex::new(VecDeque::new()),
            created: Utc::now(),
            this: OnceLock::new(),
        });
        let _ = channel.this.set(Arc::downgrade(&channel));
        channel
    }

    pub(super) fn handle(&self) -> ChannelHandle {
        let weak = self.this.get().expect("channel handle not initialized");
        ChannelHandle::new(weak.upgrade().expect("channel dropped while in use"))
    }

    pub(super) fn push_update(&self, update: api::Update) {
        self.inbox.push([update]);
    }

    pub(super) fn close_inbox(&self) {
        self.inbox.close();
    }

    /// Map an update to an event, or `None` for updates this channel
    /// ignores: anything predating the join, messages without a sender,
    /// and media the client cannot link to.
    fn event_for(&self, update: &api::Update) -> Option<Event> {
        if let Some(msg) = &update.message {
            if message_time(msg) < self.created {
                return None;
            }
            let from = msg.from.as_ref()?;

            if let Some(reply_to) = msg.reply_to_message.as_deref()
                && reply_to.from.is_some()
            {
                let mut message = self.chat_message(msg);
                message.reply_to = Some(Box::new(self.chat_message(reply_to)));
                return Some(Event::Message(message));
            }

            if let Some(who) = &msg.new_chat_member {
                return Some(Event::Join {
                    who: self.chat_user(who),
                });
            }

            if let Some(who) = &msg.left_chat_member {
                return Some(Event::Leave {
                    who: self.chat_user(who),
                });
            }

            if let Some(document) = &msg.document {
                let url = self.inner.media_url(&document.file_id)?;
                return Some(Event::Message(Message {
                    id: message_id(msg),
                    from: Some(self.chat_user(from)),
                    text: format!("/me shared a file: {url}"),
                    reply_to: None,
                }));
            }

            if let Some(photo) = &msg.photo {
                let url = self.inner.media_url(&largest_photo(photo))?;
                return Some(Event::Message(Message {
                    id: message_id(msg),
                    from: Some(self.chat_user(from)),
                    text: format!("/me shared a photo: {url}"),
                    reply_to: None,
                }));
            }

            if let Some(sticker) = &msg.sticker {
                let text = self.sticker_text(sticker)?;
                return Some(Event::Message(Message {
                    id: message_id(msg),
                    from: Some(self.chat_user(from)),
                    text,
                    reply_to: None,
                }));
            }

            if msg.text.is_some() {
                return Some(Event::Message(self.chat_message(msg)));
            }
            return None;
        }

        if let Some(msg) = &update.edited_message {
            if message_time(msg) < self.created || msg.from.is_none() {
                return None;
            }
            let new = self.chat_message(msg);
            return Some(Event::Edit {
                orig_id: new.id.clone(),
                new,
            });
        }

        None
    }

    fn sticker_text(&self, sticker: &api::Sticker) -> Option<String> {
        let file_id = sticker
            .thumb
            .as_ref()
            .map(|thumb| thumb.file_id.as_str())
            .unwrap_or(&sticker.file_id);
        let icon = sticker.emoji.as_deref().unwrap_or_default();
        let url = match self.inner.media_url(file_id) {
            // Some services refuse to unfurl a URL they saw recently; a
            // nonce makes each posting unique so stickers always render.
            Some(url) => format!(
                "{url}?nonce={:x}",
                Utc::now().timestamp_nanos_opt().unwrap_or_default()
            ),
            None => String::new(),
        };
        match (icon.is_empty(), url.is_empty()) {
            (false, false) => Some(format!("/me sent a sticker {icon}: {url}")),
            (false, true) => Some(format!("/me sent a sticker {icon}")),
            (true, false) => Some(format!("/me sent a sticker: {url}")),
            (true, true) => None,
        }
    }

    /// Assumes `msg.from` is set; callers check first.
    fn chat_message(&self, msg: &api::Message) -> Message {
        Message {
            id: message_id(msg),
            from: msg.from.as_ref().map(|user| self.chat_user(user)),
            text: msg.text.clone().unwrap_or_default(),
            reply_to: None,
        }
    }

    fn chat_user(&self, user: &api::User) -> User {
        let name = format!("{} {}", user.first_name, user.last_name)
            .trim()
            .to_string();
        let nick = if user.username.is_empty() {
            name.clone()
        } else {
            user.username.clone()
        };
        User {
            id: UserId(user.id.to_string()),
            nick,
            full_name: name.clone(),
            display_name: name,
            photo_url: self.inner.user_photo_url(user.id),
            channel: Some(self.handle()),
        }
    }
}

fn message_id(msg: &api::Message) -> MessageId {
    MessageId(msg.message_id.to_string())
}

fn message_time(msg: &api::Message) -> DateTime<Utc> {
    DateTime::from_timestamp(msg.date, 0).unwrap_or_default()
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn service_name(&self) -> &str {
        "Telegram"
    }

    async fn receive(&self) -> Result<Event, ChannelError> {
        loop {
            let next = self.pending.lock().unwrap().pop_front();
            match next {
                Some(update) => {
                    if let Some(event) = self.event_for(&update) {
                        return Ok(event);
                    }
                }
                None => match self.inbox.pull().await {
                    Some(batch) => self.pending.lock().unwrap().extend(batch),
                    None => return Err(ChannelError::Closed),
                },
            }
        }
    }

    async fn send(&self, msg: Message) -> Result<Message, ChannelError> {
        let mut request = json!({
            "chat_id": self.chat.id,
            "text": text::format_html(msg.from.as_ref(), &msg.text),
            "parse_mode": "HTML",
        });
        if let Some(reply_to) = msg.reply_to.as_deref()
            && let Ok(reply_id) = reply_to.id.as_str().parse::<u64>()
        {
            request["reply_to_message_id"] = json!(reply_id);
        }
        let response: api::Message = self.inner.rpc("sendMessage", &request).await?;
        Ok(Message {
            id: message_id(&response),
            ..msg
        })
    }

    async fn edit(&self, msg: Message) -> Result<Message, ChannelError> {
        let message_id_num: u64 = msg.id.as_str().parse().map_err(|_| ChannelError::Api {
            service: "Telegram".to_string(),
            description: format!("invalid message id: {}", msg.id),
        })?;
        let request = json!({
            "chat_id": self.chat.id,
            "message_id": message_id_num,
            "text": text::format_html(msg.from.as_ref(), &msg.text),
            "parse_mode": "HTML",
        });
        let response: api::Message = self.inner.rpc("editMessageText", &request).await?;
        Ok(Message {
            id: message_id(&response),
            ..msg
        })
    }

    /// A no-op: the bot API does not let this client delete messages.
    async fn delete(&self, _msg: Message) -> Result<(), ChannelError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::client::test_inner;
    use super::*;

    fn channel() -> Arc<TelegramChannel> {
        TelegramChannel::new(
            test_inner(),
            api::Chat {
                id: -100,
                title: Some("rust-hq".to_string()),
            },
        )
    }

    fn update(value: serde_json::Value) -> api::Update {
        serde_json::from_value(value).unwrap()
    }

    fn now() -> i64 {
        Utc::now().timestamp()
    }

    #[test]
    fn test_name_and_service() {
        let ch = channel();
        assert_eq!(ch.name(), "rust-hq");
        assert_eq!(ch.service_name(), "Telegram");
    }

    #[test]
    fn test_text_message_maps_to_message_event() {
        let ch = channel();
        let ev = ch.event_for(&update(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 42,
                "from": {"id": 7, "first_name": "Alice", "last_name": "Smith", "username": "alice"},
                "chat": {"id": -100, "title": "rust-hq"},
                "date": now(),
                "text": "hello"
            }
        })));

        let Some(Event::Message(msg)) = ev else {
            panic!("expected a message event, got {ev:?}");
        };
        assert_eq!(msg.id.as_str(), "42");
        assert_eq!(msg.text, "hello");
        let from = msg.from.unwrap();
        assert_eq!(from.name(), "Alice Smith");
        assert_eq!(from.nick, "alice");
        assert_eq!(from.channel.unwrap(), ch.handle());
    }

    #[test]
    fn test_message_predating_join_is_ignored() {
        let ch = channel();
        let ev = ch.event_for(&update(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 42,
                "from": {"id": 7, "first_name": "Alice"},
                "chat": {"id": -100, "title": "rust-hq"},
                "date": now() - 3600,
                "text": "old news"
            }
        })));
        assert!(ev.is_none());
    }

    #[test]
    fn test_message_without_sender_is_ignored() {
        let ch = channel();
        let ev = ch.event_for(&update(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 42,
                "chat": {"id": -100, "title": "rust-hq"},
                "date": now(),
                "text": "channel post"
            }
        })));
        assert!(ev.is_none());
    }

    #[test]
    fn test_reply_carries_immediate_parent() {
        let ch = channel();
        let ev = ch.event_for(&update(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 43,
                "from": {"id": 7, "first_name": "Alice"},
                "chat": {"id": -100, "title": "rust-hq"},
                "date": now(),
                "text": "r",
                "reply_to_message": {
                    "message_id": 42,
                    "from": {"id": 8, "first_name": "Bob"},
                    "chat": {"id": -100, "title": "rust-hq"},
                    "date": now() - 10,
                    "text": "q"
                }
            }
        })));

        let Some(Event::Message(msg)) = ev else {
            panic!("expected a message event, got {ev:?}");
        };
        let reply_to = msg.reply_to.unwrap();
        assert_eq!(reply_to.id.as_str(), "42");
        assert_eq!(reply_to.text, "q");
        assert_eq!(reply_to.from.unwrap().name(), "Bob");
    }

    #[test]
    fn test_member_changes_map_to_join_and_leave() {
        let ch = channel();
        let joined = ch.event_for(&update(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 44,
                "from": {"id": 7, "first_name": "Alice"},
                "chat": {"id": -100, "title": "rust-hq"},
                "date": now(),
                "new_chat_member": {"id": 9, "first_name": "Carol"}
            }
        })));
        let Some(Event::Join { who }) = joined else {
            panic!("expected a join event, got {joined:?}");
        };
        assert_eq!(who.name(), "Carol");

        let left = ch.event_for(&update(serde_json::json!({
            "update_id": 2,
            "message": {
                "message_id": 45,
                "from": {"id": 7, "first_name": "Alice"},
                "chat": {"id": -100, "title": "rust-hq"},
                "date": now(),
                "left_chat_member": {"id": 10, "first_name": "Dave"}
            }
        })));
        let Some(Event::Leave { who }) = left else {
            panic!("expected a leave event, got {left:?}");
        };
        // The user who left, not whoever reported it.
        assert_eq!(who.name(), "Dave");
    }

    #[test]
    fn test_edited_message_maps_to_edit() {
        let ch = channel();
        let ev = ch.event_for(&update(serde_json::json!({
            "update_id": 1,
            "edited_message": {
                "message_id": 42,
                "from": {"id": 7, "first_name": "Alice"},
                "chat": {"id": -100, "title": "rust-hq"},
                "date": now(),
                "text": "fixed"
            }
        })));

        let Some(Event::Edit { orig_id, new }) = ev else {
            panic!("expected an edit event, got {ev:?}");
        };
        assert_eq!(orig_id.as_str(), "42");
        assert_eq!(new.text, "fixed");
    }

    #[test]
    fn test_media_needs_a_base_url() {
        let document = serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 46,
                "from": {"id": 7, "first_name": "Alice"},
                "chat": {"id": -100, "title": "rust-hq"},
                "date": now(),
                "document": {"file_id": "doc-1"}
            }
        });

        let ch = channel();
        assert!(ch.event_for(&update(document.clone())).is_none());

        let ch = channel();
        ch.inner
            .set_media_base(url::Url::parse("http://localhost:8888/media").unwrap());
        let ev = ch.event_for(&update(document));
        let Some(Event::Message(msg)) = ev else {
            panic!("expected a message event, got {ev:?}");
        };
        assert_eq!(
            msg.text,
            "/me shared a file: http://localhost:8888/media/doc-1"
        );
    }

    #[test]
    fn test_sticker_text_includes_nonce() {
        let ch = channel();
        ch.inner
            .set_media_base(url::Url::parse("http://localhost:8888/media").unwrap());
        let ev = ch.event_for(&update(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 47,
                "from": {"id": 7, "first_name": "Alice"},
                "chat": {"id": -100, "title": "rust-hq"},
                "date": now(),
                "sticker": {"file_id": "stk-1", "emoji": "🎉"}
            }
        })));

        let Some(Event::Message(msg)) = ev else {
            panic!("expected a message event, got {ev:?}");
        };
        assert!(msg.text.starts_with("/me sent a sticker 🎉: "));
        assert!(msg.text.contains("http://localhost:8888/media/stk-1?nonce="));
    }

    #[test]
    fn test_sticker_without_media_base_keeps_emoji() {
        let ch = channel();
        let ev = ch.event_for(&update(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 48,
                "from": {"id": 7, "first_name": "Alice"},
                "chat": {"id": -100, "title": "rust-hq"},
                "date": now(),
                "sticker": {"file_id": "stk-1", "emoji": "🎉"}
            }
        })));

        let Some(Event::Message(msg)) = ev else {
            panic!("expected a message event, got {ev:?}");
        };
        assert_eq!(msg.text, "/me sent a sticker 🎉");
    }

    #[tokio::test]
    async fn test_receive_drains_inbox_and_ends_on_close() {
        let ch = channel();
        ch.push_update(update(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 50,
                "from": {"id": 7, "first_name": "Alice"},
                "chat": {"id": -100, "title": "rust-hq"},
                "date": now(),
                "text": "one"
            }
        })));
        ch.push_update(update(serde_json::json!({
            "update_id": 2,
            "message": {
                "message_id": 51,
                "chat": {"id": -100, "title": "rust-hq"},
                "date": now(),
                "text": "skipped, no sender"
            }
        })));
        ch.push_update(update(serde_json::json!({
            "update_id": 3,
            "message": {
                "message_id": 52,
                "from": {"id": 7, "first_name": "Alice"},
                "chat": {"id": -100, "title": "rust-hq"},
                "date": now(),
                "text": "two"
            }
        })));
        ch.close_inbox();

        let Ok(Event::Message(first)) = ch.receive().await else {
            panic!("expected a message");
        };
        assert_eq!(first.text, "one");
        let Ok(Event::Message(second)) = ch.receive().await else {
            panic!("expected a message");
        };
        assert_eq!(second.text, "two");
        assert!(matches!(ch.receive().await, Err(ChannelError::Closed)));
    }
}
