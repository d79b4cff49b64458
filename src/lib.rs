//! Multi-service chat bridge.
//!
//! Connects to several chat services, joins one channel on each, and relays
//! every message, edit, deletion, join/leave, and rename to every other
//! joined channel, so all participants share one logical conversation.
//!
//! The pieces:
//!
//! - [`chat`] — the [`Channel`]/[`Client`] contract adapters implement, the
//!   [`Event`] union, and the inbox queue every adapter feeds.
//! - [`bridge`] — the fan-out engine. A [`Bridge`] relays between its
//!   channels and is itself a [`Channel`], so a bot can drive a whole
//!   bridged set as one channel.
//! - [`telegram`] — the Telegram Bot API adapter, ingesting via long-poll.
//!
//! ```no_run
//! use ironbridge::chat::{self, Channel as _, Client as _};
//! use ironbridge::{Bridge, telegram};
//!
//! # async fn run() -> ironbridge::Result<()> {
//! let client = telegram::Client::dial("bot-token").await?;
//! let group = client.join("-1001234567890").await?;
//!
//! let bridge = Bridge::new(vec![group]);
//! chat::say(&bridge.handle(), "Hello, World!").await?;
//! while let Ok(event) = bridge.receive().await {
//!     println!("{event:?}");
//! }
//! bridge.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod chat;
pub mod config;
pub mod error;
pub mod telegram;

pub use bridge::Bridge;
pub use bridge::history::{History, LogEntry, MessageCopy};
pub use chat::{Channel, ChannelHandle, Client, Event, Message, MessageId, User, UserId};
pub use config::{BridgeConfig, TelegramConfig};
pub use error::{BridgeError, ChannelError, ConfigError, Error, Result};
