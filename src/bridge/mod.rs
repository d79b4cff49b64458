//! A channel that relays between other channels.
//!
//! A [`Bridge`] is built over a fixed set of channels. Every event produced
//! by one of them is relayed to all the others and multiplexed onto the
//! bridge's own receive stream, so the bridged rooms behave as one logical
//! conversation. The bridge itself satisfies the [`Channel`] contract — its
//! send-style methods fan out to every bridged channel — which lets a bot
//! drive a whole bridged set as a single channel, or even nest bridges.
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                            Bridge                             │
//! │                                                               │
//! │  channel A ──pump──┐                                          │
//! │  channel B ──pump──┼──▶ events_mux ──▶ mux ──▶ relay to       │
//! │  channel C ──pump──┘       (bounded)    │      siblings       │
//! │                                         ▼                     │
//! │                                      recv inbox ──▶ receive() │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The mux task is serial: one event's relay completes before the next
//! event from any channel is processed. That is what gives history-log
//! ordering its meaning. Events from a single channel keep their order;
//! events across channels interleave.

pub mod history;
mod relay;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tracing::debug;

use crate::chat::inbox::Inbox;
use crate::chat::{Channel, ChannelHandle, Event, Message, MessageId};
use crate::config::BridgeConfig;
use crate::error::{BridgeError, ChannelError, ConfigError};
use history::{History, LogEntry, MessageCopy};

/// A [`Channel`] bridging a fixed set of other channels.
pub struct Bridge {
    channels: Vec<ChannelHandle>,
    config: BridgeConfig,
    history: History,
    /// Next id for messages sent through the bridge itself.
    next_id: AtomicU64,
    /// Relayed events on their way to `receive`; the mux publishes here
    /// without blocking so a slow consumer never stalls relaying.
    recv_in: Inbox<Event>,
    recv_out: Mutex<mpsc::Receiver<Event>>,
    /// Taken by the first `close` call; resolves when the mux task exits.
    close_error: Mutex<Option<oneshot::Receiver<BridgeError>>>,
    /// Root shutdown signal for all background tasks.
    shutdown: watch::Sender<bool>,
    this: OnceLock<Weak<Bridge>>,
}

impl Bridge {
    /// Bridge the given channels with the default configuration.
    pub fn new(channels: Vec<ChannelHandle>) -> Arc<Self> {
        match Self::with_config(channels, BridgeConfig::default()) {
            Ok(bridge) => bridge,
            Err(_) => unreachable!("default bridge configuration is valid"),
        }
    }

    /// Bridge the given channels. The bridged set is fixed for the life of
    /// the bridge.
    pub fn with_config(
        channels: Vec<ChannelHandle>,
        config: BridgeConfig,
    ) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;

        let (shutdown, _) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(config.mux_buffer_size);
        let (poll_error_tx, poll_error_rx) = mpsc::channel(1);
        let (recv_tx, recv_rx) = mpsc::channel(1);
        let (close_tx, close_rx) = oneshot::channel();

        let bridge = Arc::new(Self {
            history: History::new(config.max_history),
            channels,
            config,
            next_id: AtomicU64::new(0),
            recv_in: Inbox::new(),
            recv_out: Mutex::new(recv_rx),
            close_error: Mutex::new(Some(close_rx)),
            shutdown,
            this: OnceLock::new(),
        });
        let _ = bridge.this.set(Arc::downgrade(&bridge));

        for channel in &bridge.channels {
            tokio::spawn(pump(
                channel.clone(),
                events_tx.clone(),
                poll_error_tx.clone(),
                bridge.shutdown.subscribe(),
            ));
        }
        tokio::spawn(run_mux(bridge.clone(), events_rx, poll_error_rx, close_tx));
        tokio::spawn(run_recv(bridge.clone(), recv_tx));

        Ok(bridge)
    }

    /// A [`ChannelHandle`] for this bridge, usable alongside real adapters
    /// (including inside another bridge).
    pub fn handle(&self) -> ChannelHandle {
        let weak = self.this.get().expect("bridge handle not initialized");
        ChannelHandle::new(weak.upgrade().expect("bridge dropped while in use"))
    }

    /// Stop bridging and shut down all background tasks.
    ///
    /// Returns the first background error encountered: a poll failure on a
    /// bridged channel or a fatal relay error. A second call returns
    /// [`BridgeError::Closed`].
    pub async fn close(&self) -> Result<(), BridgeError> {
        let Some(close_error) = self.close_error.lock().await.take() else {
            return Err(BridgeError::Closed);
        };
        let _ = self.shutdown.send(true);
        match close_error.await {
            Ok(err) => Err(err),
            // The mux dropped the sender without an error: clean close.
            Err(_) => Ok(()),
        }
    }
}

#[async_trait]
impl Channel for Bridge {
    fn name(&self) -> &str {
        "bridge"
    }

    fn service_name(&self) -> &str {
        "bridge"
    }

    /// The next event from any of the bridged channels, after it has been
    /// relayed to the siblings.
    async fn receive(&self) -> Result<Event, ChannelError> {
        let mut recv_out = self.recv_out.lock().await;
        recv_out.recv().await.ok_or(ChannelError::Closed)
    }

    /// Send to every bridged channel and log the fan-out, so later edits and
    /// replies through the bridge track their copies.
    async fn send(&self, mut msg: Message) -> Result<Message, ChannelError> {
        let targets: Vec<&ChannelHandle> = self.channels.iter().collect();
        let reply_entry = relay::locate_reply(&self.history, &msg, None);
        let mut copies = relay::send_to(
            &targets,
            &msg,
            reply_entry.as_deref(),
            self.config.relay_timeout(),
        )
        .await?;

        msg.id = MessageId(self.next_id.fetch_add(1, Ordering::Relaxed).to_string());
        copies.push(MessageCopy {
            channel: self.handle(),
            message: msg.clone(),
        });
        self.history.record(LogEntry { copies });
        Ok(msg)
    }

    /// A no-op: the bridge does not track edits of its own sends.
    async fn edit(&self, msg: Message) -> Result<Message, ChannelError> {
        Ok(msg)
    }

    /// A no-op.
    async fn delete(&self, _msg: Message) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Drain one channel's events into the multiplexer queue.
///
/// Exits silently on shutdown. Any receive failure — including an
/// unexpected end of stream — is deposited on the single-slot poll-error
/// channel; errors after the first are dropped.
async fn pump(
    channel: ChannelHandle,
    events: mpsc::Sender<Event>,
    poll_error: mpsc::Sender<BridgeError>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => return,
            result = channel.receive() => match result {
                Ok(event) => event,
                Err(err) => {
                    let _ = poll_error.try_send(BridgeError::Poll {
                        name: channel.name().to_string(),
                        service: channel.service_name().to_string(),
                        source: err,
                    });
                    return;
                }
            },
        };
        // The queue is bounded; blocking here while the relay is saturated
        // stops this channel's receive loop, which flow-controls the
        // upstream service.
        if events.send(event).await.is_err() {
            return;
        }
    }
}

/// The serialization point: pull one event, relay it, then hand it to the
/// receive stream. Forwards the first poll error to `close` and shuts the
/// bridge down on it; a relay failure does the same.
async fn run_mux(
    bridge: Arc<Bridge>,
    mut events: mpsc::Receiver<Event>,
    mut poll_error: mpsc::Receiver<BridgeError>,
    close_tx: oneshot::Sender<BridgeError>,
) {
    let mut shutdown = bridge.shutdown.subscribe();
    let deadline = bridge.config.relay_timeout();
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                // Close requested: report no error by dropping close_tx.
                debug!("bridge closing");
                return;
            }
            Some(err) = poll_error.recv() => {
                let _ = close_tx.send(err);
                let _ = bridge.shutdown.send(true);
                return;
            }
            Some(event) = events.recv() => {
                match relay::relay(&bridge.channels, &bridge.history, deadline, &event).await {
                    Ok(()) => bridge.recv_in.push([event]),
                    Err(err) => {
                        let _ = close_tx.send(BridgeError::Relay { source: err });
                        let _ = bridge.shutdown.send(true);
                        return;
                    }
                }
            }
        }
    }
}

/// Forward relayed events from the inbox to the `receive` stream. Keeping
/// this off the mux task separates relay latency from consumer latency.
/// On shutdown, unreceived events are dropped.
async fn run_recv(bridge: Arc<Bridge>, out: mpsc::Sender<Event>) {
    let mut shutdown = bridge.shutdown.subscribe();
    loop {
        let batch = tokio::select! {
            _ = shutdown.changed() => return,
            batch = bridge.recv_in.pull() => match batch {
                Some(batch) => batch,
                None => return,
            },
        };
        for event in batch {
            tokio::select! {
                _ = shutdown.changed() => return,
                result = out.send(event) => {
                    if result.is_err() {
                        return;
                    }
                }
            }
        }
    }
}
