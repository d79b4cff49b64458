//! Common contract for chat service clients.
//!
//! A [`Client`] is a connection to one chat service; it hands out
//! [`Channel`]s for the rooms the bot has joined. Channels produce a stream
//! of [`Event`]s and accept send/edit/delete requests. The bridge consumes
//! this contract and also satisfies it, so a bot can treat a whole bridged
//! set as one channel.

pub mod inbox;

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::ChannelError;

/// A handle to a client connection to a chat service.
#[async_trait]
pub trait Client: Send + Sync {
    /// Join a channel, returning a handle to it.
    ///
    /// Joining the same identifier twice returns the same handle. For some
    /// services bots remain in their joined channels across reconnects, in
    /// which case this may not change the joined state at all.
    async fn join(&self, channel: &str) -> Result<ChannelHandle, ChannelError>;

    /// Close the client, reporting any pending background error.
    async fn close(&self) -> Result<(), ChannelError>;
}

/// A channel joined by a [`Client`].
///
/// Implementations are used through [`ChannelHandle`], which compares by
/// identity: two handles are equal iff they refer to the same adapter.
#[async_trait]
pub trait Channel: Send + Sync {
    /// The channel's name. Stable for the life of the channel.
    fn name(&self) -> &str;

    /// The name of the channel's chat service, e.g. `"Telegram"`.
    /// Anything that distinguishes the service from others will do.
    fn service_name(&self) -> &str;

    /// Receive the next event from the channel.
    ///
    /// Blocks until an event is available and returns
    /// [`ChannelError::Closed`] once the stream has ended. There is a single
    /// consumer. Cancellation is done by dropping the future; the
    /// implementation must not lose an event when that happens.
    async fn receive(&self) -> Result<Event, ChannelError>;

    /// Send a message, returning it with its service-assigned id.
    ///
    /// The id of the given message is ignored. The returned message carries
    /// the logical text (not any service-specific rendering of it), so that
    /// later edits can be compared against it.
    ///
    /// If `from` is set, the message is sent on behalf of that user and what
    /// is sent must clearly indicate them, e.g. by prefixing the text with
    /// the user's name. If `reply_to` is set and its id names a message
    /// previously sent on this channel, the message is sent as a native
    /// reply where the service supports one; quoting the replied-to text is
    /// an acceptable fallback, as is ignoring the reply entirely.
    ///
    /// Text beginning with `"/me "` is rendered as an emote in whatever form
    /// the service has for that.
    async fn send(&self, msg: Message) -> Result<Message, ChannelError>;

    /// Change the text of a previously sent message.
    ///
    /// The returned message carries the possibly renumbered id (some
    /// services assign a fresh id on edit). Services without edit support
    /// return the input unchanged.
    async fn edit(&self, msg: Message) -> Result<Message, ChannelError>;

    /// Delete a previously sent message. Services without delete support
    /// treat this as a no-op.
    async fn delete(&self, msg: Message) -> Result<(), ChannelError>;
}

/// Send a plain text message to a channel.
pub async fn say(channel: &ChannelHandle, text: &str) -> Result<Message, ChannelError> {
    channel.send(Message::new(text)).await
}

/// An equality-comparable, cloneable handle to a [`Channel`].
///
/// Equality is identity: two handles compare equal iff they point at the
/// same adapter instance. The bridge relies on this to tell an event's
/// origin apart from its siblings.
#[derive(Clone)]
pub struct ChannelHandle(Arc<dyn Channel>);

impl ChannelHandle {
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        Self(channel)
    }
}

impl Deref for ChannelHandle {
    type Target = dyn Channel;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl PartialEq for ChannelHandle {
    fn eq(&self, other: &Self) -> bool {
        // Compare the data pointers only; the vtable pointer of a fat
        // pointer is not guaranteed unique per type.
        std::ptr::addr_eq(Arc::as_ptr(&self.0), Arc::as_ptr(&other.0))
    }
}

impl Eq for ChannelHandle {}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on {}", self.0.name(), self.0.service_name())
    }
}

/// A unique string identifier for a sent message, scoped to its channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for MessageId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A unique string identifier for a user, scoped to its service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// A user of a chat service.
#[derive(Debug, Clone, Default)]
pub struct User {
    pub id: UserId,
    /// The user's nickname.
    pub nick: String,
    /// The user's full name.
    pub full_name: String,
    /// The name the service prefers to display for the user.
    pub display_name: String,
    /// URL of the user's profile photo, when known.
    pub photo_url: Option<String>,
    /// The channel in whose context this user was observed. A user may
    /// belong to many channels; this is the one relevant to the event at
    /// hand, and is only used to route replies back to it.
    pub channel: Option<ChannelHandle>,
}

impl User {
    /// A name suitable for display, preferring the service's display name.
    pub fn name(&self) -> &str {
        if !self.display_name.is_empty() {
            &self.display_name
        } else if !self.nick.is_empty() {
            &self.nick
        } else if !self.full_name.is_empty() {
            &self.full_name
        } else if !self.id.as_str().is_empty() {
            self.id.as_str()
        } else {
            "unknown"
        }
    }
}

/// A message posted to a channel.
#[derive(Debug, Clone, Default)]
pub struct Message {
    pub id: MessageId,
    /// The sender. `None` for system-generated notifications.
    pub from: Option<User>,
    pub text: String,
    /// The message this one replies to, if any. Only the immediate parent
    /// is tracked; reply chains are not preserved.
    pub reply_to: Option<Box<Message>>,
}

impl Message {
    /// A plain text message with no sender and no id.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// The channel this message was observed on, when derivable.
    pub fn origin(&self) -> Option<&ChannelHandle> {
        self.from.as_ref().and_then(|user| user.channel.as_ref())
    }
}

/// Something happening on a channel.
///
/// Events may be forwarded, for example through a bridge, but
/// [`origin`](Event::origin) is always the channel the event started on.
#[derive(Debug, Clone)]
pub enum Event {
    /// A user posted a message.
    Message(Message),
    /// A user edited a message. `new.id` may differ from `orig_id`; some
    /// services renumber messages on edit.
    Edit { orig_id: MessageId, new: Message },
    /// A user deleted a message.
    Delete {
        id: MessageId,
        channel: ChannelHandle,
    },
    /// A user joined the channel.
    Join { who: User },
    /// A user left the channel.
    Leave { who: User },
    /// A user's display information changed.
    Rename { from: User, to: User },
}

impl Event {
    /// The channel that originated the event.
    ///
    /// Panics if the event carries no origin; adapters must attach the
    /// channel to every event they produce.
    pub fn origin(&self) -> &ChannelHandle {
        let origin = match self {
            Event::Message(msg) => msg.origin(),
            Event::Edit { new, .. } => new.origin(),
            Event::Delete { channel, .. } => Some(channel),
            Event::Join { who } | Event::Leave { who } => who.channel.as_ref(),
            Event::Rename { to, .. } => to.channel.as_ref(),
        };
        match origin {
            Some(channel) => channel,
            None => panic!("event has no origin channel"),
        }
    }
}
