//! Telegram client: connection state, the long-poll ingestion loop, and the
//! demux task that feeds per-channel inboxes.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use url::Url;

use super::api;
use super::channel::TelegramChannel;
use crate::chat::{self, ChannelHandle};
use crate::config::TelegramConfig;
use crate::error::ChannelError;

const SERVICE_NAME: &str = "Telegram";

/// Timeout for ordinary (non-long-poll) API calls.
const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Transient 5xx responses are retried this many times, 250 ms apart,
/// before the last response is taken as-is.
const MAX_RETRY: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(250);

/// Telegram's file-size limit for bots is 20 megabytes.
const FILE_SIZE_LIMIT: u64 = 20 * 1_000_000;

/// Connection state shared between the client, its channels, and the
/// background tasks.
pub(super) struct ClientInner {
    http: reqwest::Client,
    token: String,
    pub(super) config: TelegramConfig,
    state: Mutex<ClientState>,
}

struct ClientState {
    channels: HashMap<i64, Arc<TelegramChannel>>,
    users: HashMap<i64, CachedUser>,
    /// Base URL that media file ids are appended to. Photo and media URLs
    /// are only produced once this is set; serving the files is somebody
    /// else's job.
    media_base: Option<Url>,
}

struct CachedUser {
    /// File id of the user's profile photo; empty when none is known.
    photo: String,
    /// When the photo was last refreshed.
    photo_time: Option<Instant>,
}

impl ClientInner {
    /// Call a Bot API method, retrying transient server errors.
    pub(super) async fn rpc<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &serde_json::Value,
    ) -> Result<T, ChannelError> {
        self.rpc_with_timeout(method, params, RPC_TIMEOUT).await
    }

    async fn rpc_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        params: &serde_json::Value,
        timeout: Duration,
    ) -> Result<T, ChannelError> {
        let url = format!("https://api.telegram.org/bot{}/{}", self.token, method);
        let mut attempt = 0;
        let response = loop {
            let response = self
                .http
                .post(&url)
                .json(params)
                .timeout(timeout)
                .send()
                .await?;
            let status = response.status();
            if !status.is_server_error() {
                break response;
            }
            attempt += 1;
            if attempt == MAX_RETRY {
                warn!("Telegram {method} got {status} response, giving up");
                break response;
            }
            warn!("Telegram {method} got {status} response, retrying");
            tokio::time::sleep(RETRY_DELAY).await;
        };

        let status = response.status();
        let envelope: api::Response<T> = response.json().await?;
        if let Some(result) = envelope.result
            && envelope.ok
        {
            return Ok(result);
        }
        let description = match envelope.description {
            Some(description) => description,
            None if !status.is_success() => status.to_string(),
            None => "request failed".to_string(),
        };
        Err(ChannelError::Api {
            service: SERVICE_NAME.to_string(),
            description,
        })
    }

    /// URL of a media file, or `None` when no media base is configured.
    pub(super) fn media_url(&self, file_id: &str) -> Option<String> {
        if file_id.is_empty() {
            return None;
        }
        let state = self.state.lock().unwrap();
        join_media_url(state.media_base.as_ref()?, file_id)
    }

    /// URL of a user's profile photo, when one is known and a media base is
    /// configured.
    pub(super) fn user_photo_url(&self, user_id: i64) -> Option<String> {
        let state = self.state.lock().unwrap();
        let base = state.media_base.as_ref()?;
        let cached = state.users.get(&user_id)?;
        if cached.photo.is_empty() {
            return None;
        }
        join_media_url(base, &cached.photo)
    }
}

fn join_media_url(base: &Url, file_id: &str) -> Option<String> {
    let mut url = base.clone();
    url.path_segments_mut().ok()?.push(file_id);
    Some(url.to_string())
}

/// A client connection to the Telegram Bot API.
pub struct Client {
    inner: Arc<ClientInner>,
    shutdown: watch::Sender<bool>,
    /// Single-slot channel carrying the first polling error to `close`.
    poll_error: Mutex<Option<mpsc::Receiver<ChannelError>>>,
}

impl Client {
    /// Connect with the given bot token and the default configuration.
    pub async fn dial(token: impl Into<String>) -> Result<Self, ChannelError> {
        Self::dial_with_config(token, TelegramConfig::default()).await
    }

    /// Connect with the given bot token.
    ///
    /// Validates the token with `getMe` before spawning the poll and demux
    /// tasks, so a bad token fails fast.
    pub async fn dial_with_config(
        token: impl Into<String>,
        config: TelegramConfig,
    ) -> Result<Self, ChannelError> {
        let inner = Arc::new(ClientInner {
            http: reqwest::Client::new(),
            token: token.into(),
            config,
            state: Mutex::new(ClientState {
                channels: HashMap::new(),
                users: HashMap::new(),
                media_base: None,
            }),
        });

        let me: api::User = inner.rpc("getMe", &json!({})).await?;
        info!("connected to Telegram as @{}", me.username);

        let (shutdown, _) = watch::channel(false);
        let (poll_error_tx, poll_error_rx) = mpsc::channel(1);
        let (updates_tx, updates_rx) = mpsc::channel(1);
        tokio::spawn(poll(
            inner.clone(),
            updates_tx,
            poll_error_tx,
            shutdown.subscribe(),
        ));
        tokio::spawn(demux(inner.clone(), updates_rx, shutdown.subscribe()));

        Ok(Self {
            inner,
            shutdown,
            poll_error: Mutex::new(Some(poll_error_rx)),
        })
    }

    /// Enable media URL generation, using the given URL as a prefix.
    ///
    /// Once set, user photo URLs and shared-media links are formed by
    /// appending the Telegram file id to this base. The bridge only builds
    /// the URLs; serving the files behind them is external.
    pub fn set_media_base_url(&self, base: Url) {
        self.inner.state.lock().unwrap().media_base = Some(base);
    }
}

#[async_trait]
impl chat::Client for Client {
    /// Join the group, supergroup, or channel with the given base-10 chat
    /// id. Joining the same id again returns the same handle.
    async fn join(&self, channel: &str) -> Result<ChannelHandle, ChannelError> {
        let chat_id: i64 = channel
            .parse()
            .map_err(|_| ChannelError::InvalidIdentifier(channel.to_string()))?;
        let chat: api::Chat = self
            .inner
            .rpc("getChat", &json!({ "chat_id": chat_id }))
            .await?;
        Ok(channel_for(&self.inner, &chat).handle())
    }

    async fn close(&self) -> Result<(), ChannelError> {
        let _ = self.shutdown.send(true);
        let Some(mut poll_error) = self.poll_error.lock().unwrap().take() else {
            return Ok(());
        };
        match poll_error.try_recv() {
            Ok(err) => Err(err),
            Err(_) => Ok(()),
        }
    }
}

/// Long-poll `getUpdates`, handing each non-empty batch to the demux task.
///
/// The offset advances past the last update of each batch, so every update
/// is seen once. Exits silently on shutdown; any poll failure lands in the
/// single-slot error channel and ends the loop.
async fn poll(
    inner: Arc<ClientInner>,
    updates: mpsc::Sender<Vec<api::Update>>,
    poll_error: mpsc::Sender<ChannelError>,
    mut shutdown: watch::Receiver<bool>,
) {
    let long_poll = inner.config.long_poll_seconds;
    let request_timeout = Duration::from_secs(long_poll + 10);
    let mut offset: u64 = 0;
    loop {
        let request = json!({ "offset": offset, "timeout": long_poll });
        let result = tokio::select! {
            _ = shutdown.changed() => return,
            result = inner.rpc_with_timeout::<Vec<api::Update>>(
                "getUpdates",
                &request,
                request_timeout,
            ) => result,
        };
        match result {
            Ok(batch) => {
                if let Some(last) = batch.last() {
                    offset = last.update_id + 1;
                    if updates.send(batch).await.is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                // Only the first error is reported.
                let _ = poll_error.try_send(err);
                return;
            }
        }
    }
}

/// Route updates to the owning channel's inbox and keep the user registry
/// fresh. On exit, closes every channel inbox so receivers drain and end.
async fn demux(
    inner: Arc<ClientInner>,
    mut updates: mpsc::Receiver<Vec<api::Update>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let batch = tokio::select! {
            _ = shutdown.changed() => break,
            batch = updates.recv() => match batch {
                Some(batch) => batch,
                None => break,
            },
        };
        for update in batch {
            route_update(&inner, update).await;
        }
    }

    let state = inner.state.lock().unwrap();
    for channel in state.channels.values() {
        channel.close_inbox();
    }
}

async fn route_update(inner: &Arc<ClientInner>, update: api::Update) {
    let Some(msg) = update.message.as_ref().or(update.edited_message.as_ref()) else {
        return;
    };
    // Only multi-party rooms are bridged; a chat without a title is a
    // direct message.
    if msg.chat.title.is_none() {
        debug!("ignoring update {} outside a group chat", update.update_id);
        return;
    }
    if let Some(from) = &msg.from {
        refresh_user(inner, from.id).await;
    }
    let chat = msg.chat.clone();
    let channel = channel_for(inner, &chat);
    channel.push_update(update);
}

/// The channel for a chat, created on first sight.
fn channel_for(inner: &Arc<ClientInner>, chat: &api::Chat) -> Arc<TelegramChannel> {
    let mut state = inner.state.lock().unwrap();
    state
        .channels
        .entry(chat.id)
        .or_insert_with(|| TelegramChannel::new(inner.clone(), chat.clone()))
        .clone()
}

/// Refresh the user's profile photo, at most once per configured interval.
///
/// Skipped entirely until a media base URL is configured, since the photo
/// file id is only used to build URLs against it.
async fn refresh_user(inner: &Arc<ClientInner>, user_id: i64) {
    let due = {
        let mut state = inner.state.lock().unwrap();
        if state.media_base.is_none() {
            return;
        }
        let interval = inner.config.min_photo_update_interval();
        let cached = state.users.entry(user_id).or_insert_with(|| CachedUser {
            photo: String::new(),
            photo_time: None,
        });
        match cached.photo_time {
            Some(at) => at.elapsed() >= interval,
            None => true,
        }
    };
    if !due {
        return;
    }

    match profile_photo(inner, user_id).await {
        Ok(photo) => {
            let mut state = inner.state.lock().unwrap();
            if let Some(cached) = state.users.get_mut(&user_id) {
                cached.photo = photo;
                cached.photo_time = Some(Instant::now());
            }
        }
        Err(err) => warn!("failed to get profile photo for user {user_id}: {err}"),
    }
}

/// File id of the user's current profile photo, or empty if none.
async fn profile_photo(inner: &ClientInner, user_id: i64) -> Result<String, ChannelError> {
    let photos: api::UserProfilePhotos = inner
        .rpc(
            "getUserProfilePhotos",
            &json!({ "user_id": user_id, "limit": 1 }),
        )
        .await?;
    Ok(photos
        .photos
        .first()
        .map(|sizes| largest_photo(sizes))
        .unwrap_or_default())
}

/// Pick the largest rendition that fits the bot file-size limit, falling
/// back to the first one.
pub(super) fn largest_photo(photos: &[api::PhotoSize]) -> String {
    let mut best = "";
    let mut best_size: i64 = -1;
    for photo in photos {
        if photo.file_size.is_some_and(|size| size >= FILE_SIZE_LIMIT) {
            continue;
        }
        let size = i64::from(photo.width) * i64::from(photo.height);
        if size > best_size {
            best = &photo.file_id;
            best_size = size;
        }
    }
    if best.is_empty()
        && let Some(first) = photos.first()
    {
        return first.file_id.clone();
    }
    best.to_string()
}

#[cfg(test)]
impl ClientInner {
    pub(super) fn set_media_base(&self, base: Url) {
        self.state.lock().unwrap().media_base = Some(base);
    }
}

/// A detached [`ClientInner`] for tests; makes no network calls on its own.
#[cfg(test)]
pub(super) fn test_inner() -> Arc<ClientInner> {
    Arc::new(ClientInner {
        http: reqwest::Client::new(),
        token: "test-token".to_string(),
        config: TelegramConfig::default(),
        state: Mutex::new(ClientState {
            channels: HashMap::new(),
            users: HashMap::new(),
            media_base: None,
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photo(file_id: &str, width: u32, height: u32, file_size: Option<u64>) -> api::PhotoSize {
        api::PhotoSize {
            file_id: file_id.to_string(),
            width,
            height,
            file_size,
        }
    }

    #[test]
    fn test_largest_photo_picks_biggest_area() {
        let photos = vec![
            photo("small", 90, 90, Some(1_000)),
            photo("big", 800, 600, Some(100_000)),
            photo("medium", 320, 240, Some(20_000)),
        ];
        assert_eq!(largest_photo(&photos), "big");
    }

    #[test]
    fn test_largest_photo_skips_oversized_files() {
        let photos = vec![
            photo("ok", 90, 90, Some(1_000)),
            photo("huge", 4000, 3000, Some(FILE_SIZE_LIMIT)),
        ];
        assert_eq!(largest_photo(&photos), "ok");
    }

    #[test]
    fn test_largest_photo_falls_back_to_first() {
        let photos = vec![photo("only", 0, 0, Some(FILE_SIZE_LIMIT))];
        assert_eq!(largest_photo(&photos), "only");
        assert_eq!(largest_photo(&[]), "");
    }

    #[test]
    fn test_media_url_requires_base() {
        let inner = test_inner();
        assert_eq!(inner.media_url("file-1"), None);

        inner.state.lock().unwrap().media_base =
            Some(Url::parse("http://localhost:8888/telegram/media").unwrap());
        assert_eq!(
            inner.media_url("file-1").as_deref(),
            Some("http://localhost:8888/telegram/media/file-1")
        );
        assert_eq!(inner.media_url(""), None);
    }

    #[test]
    fn test_user_photo_url_requires_known_photo() {
        let inner = test_inner();
        {
            let mut state = inner.state.lock().unwrap();
            state.media_base = Some(Url::parse("http://localhost:8888/media").unwrap());
            state.users.insert(
                7,
                CachedUser {
                    photo: "photo-7".to_string(),
                    photo_time: Some(Instant::now()),
                },
            );
            state.users.insert(
                8,
                CachedUser {
                    photo: String::new(),
                    photo_time: None,
                },
            );
        }

        assert_eq!(
            inner.user_photo_url(7).as_deref(),
            Some("http://localhost:8888/media/photo-7")
        );
        assert_eq!(inner.user_photo_url(8), None);
        assert_eq!(inner.user_photo_url(9), None);
    }

    #[tokio::test]
    async fn test_route_update_ignores_direct_chats() {
        let inner = test_inner();
        let update: api::Update = serde_json::from_value(serde_json::json!({
            "update_id": 1,
            "message": {
                "message_id": 1,
                "from": {"id": 7, "first_name": "Alice"},
                "chat": {"id": 7, "type": "private"},
                "date": 1700000000,
                "text": "dm"
            }
        }))
        .unwrap();

        route_update(&inner, update).await;
        assert!(inner.state.lock().unwrap().channels.is_empty());
    }

    #[tokio::test]
    async fn test_route_update_creates_channel_once() {
        let inner = test_inner();
        let update = |id: u64| -> api::Update {
            serde_json::from_value(serde_json::json!({
                "update_id": id,
                "message": {
                    "message_id": id,
                    "from": {"id": 7, "first_name": "Alice"},
                    "chat": {"id": -100, "title": "rust-hq", "type": "supergroup"},
                    "date": 1700000000,
                    "text": "hi"
                }
            }))
            .unwrap()
        };

        route_update(&inner, update(1)).await;
        route_update(&inner, update(2)).await;
        assert_eq!(inner.state.lock().unwrap().channels.len(), 1);
    }
}
