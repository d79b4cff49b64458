//! Telegram Bot API adapter.
//!
//! Ingestion is long-poll driven: a poll task walks `getUpdates` with a
//! monotonically advancing offset, and a demux task routes each update into
//! the owning channel's inbox. No Telegram crate is used — just `reqwest`
//! against the Bot API, for full control over retry and error handling.

mod api;
mod channel;
mod client;
mod text;

pub use channel::TelegramChannel;
pub use client::Client;
