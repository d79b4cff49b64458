//! Fan-out of one inbound event to the sibling channels.
//!
//! Every sibling operation runs concurrently under the relay deadline. A
//! deadline overrun is a benign drop (the stalled service just misses this
//! update); any other failure aborts the event with the first error, which
//! the multiplexer treats as fatal to the bridge.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio::time::timeout;
use tracing::warn;

use super::history::{History, LogEntry, MessageCopy};
use crate::chat::{ChannelHandle, Event, Message, MessageId};
use crate::error::ChannelError;

/// Relay one event to every bridged channel except its origin, recording
/// message fan-outs in the history log.
pub(super) async fn relay(
    channels: &[ChannelHandle],
    history: &History,
    deadline: Duration,
    event: &Event,
) -> Result<(), ChannelError> {
    let origin = event.origin();
    match event {
        Event::Message(msg) => {
            let targets = siblings(channels, origin);
            let reply_entry = locate_reply(history, msg, Some(origin));
            let mut copies = send_to(&targets, msg, reply_entry.as_deref(), deadline).await?;
            copies.push(MessageCopy {
                channel: origin.clone(),
                message: msg.clone(),
            });
            history.record(LogEntry { copies });
            Ok(())
        }

        Event::Edit { orig_id, new } => {
            let Some(entry) = history.find(origin, orig_id) else {
                // The message fell off the end of the history log.
                warn!("edited message {orig_id} from {origin:?} not found in history");
                return Ok(());
            };
            let copies = edit_copies(origin, &entry, new, deadline).await?;
            history.replace(&entry, LogEntry { copies });
            Ok(())
        }

        Event::Delete { id, .. } => {
            let Some(entry) = history.find(origin, id) else {
                warn!("deleted message {id} from {origin:?} not found in history");
                return Ok(());
            };
            // The entry stays in the log so a later edit of the deleted
            // message still resolves to its tombstoned copies.
            delete_copies(origin, &entry, deadline).await
        }

        Event::Join { who } => {
            let text = format!("{} joined {}", who.name(), origin_label(origin));
            notify_siblings(channels, origin, &text, deadline).await
        }

        Event::Leave { who } => {
            let text = format!("{} left {}", who.name(), origin_label(origin));
            notify_siblings(channels, origin, &text, deadline).await
        }

        Event::Rename { from, to } => {
            if from.name() == to.name() {
                return Ok(());
            }
            let text = format!(
                "{} renamed to {} in {}",
                from.name(),
                to.name(),
                origin_label(origin)
            );
            notify_siblings(channels, origin, &text, deadline).await
        }
    }
}

/// Resolve the history entry for a message's reply, if it is one.
///
/// The lookup keys on the reply's own origin, falling back to
/// `fallback_origin` when the reply carries no sender.
pub(super) fn locate_reply(
    history: &History,
    msg: &Message,
    fallback_origin: Option<&ChannelHandle>,
) -> Option<Arc<LogEntry>> {
    let reply = msg.reply_to.as_deref()?;
    let origin = reply.origin().or(fallback_origin)?;
    history.find(origin, &reply.id)
}

/// Send a message to each target concurrently, returning the copies that
/// were delivered within the deadline.
///
/// If the message is a reply, each target's copy replies to that target's
/// own copy of the replied-to message, taken from `reply_entry`; targets
/// without a copy get a plain send.
pub(super) async fn send_to(
    targets: &[&ChannelHandle],
    msg: &Message,
    reply_entry: Option<&LogEntry>,
    deadline: Duration,
) -> Result<Vec<MessageCopy>, ChannelError> {
    let sends = targets.iter().map(|channel| {
        let mut outbound = msg.clone();
        outbound.id = MessageId::default();
        outbound.reply_to = reply_entry
            .and_then(|entry| entry.copy_for(channel))
            .map(|copy| Box::new(copy.message.clone()));
        async move {
            match timeout(deadline, channel.send(outbound)).await {
                Ok(Ok(sent)) => Ok(Some(MessageCopy {
                    channel: (*channel).clone(),
                    message: sent,
                })),
                Ok(Err(err)) => Err(ChannelError::SendFailed {
                    name: channel.name().to_string(),
                    service: channel.service_name().to_string(),
                    reason: err.to_string(),
                }),
                Err(_) => {
                    warn!("send to {channel:?} exceeded the relay deadline, dropping this copy");
                    Ok(None)
                }
            }
        }
    });

    Ok(try_join_all(sends).await?.into_iter().flatten().collect())
}

/// Apply an edit to every copy of an entry, concurrently.
///
/// The origin's copy takes the new id and text directly (the originating
/// service already applied the edit). Siblings whose stored text already
/// equals the new text are skipped: some services reject no-op edits, while
/// others generate edit events for them, so they must be absorbed here
/// without dropping the id update. A sibling that misses the deadline keeps
/// its stale copy so later edits can still reach it.
async fn edit_copies(
    origin: &ChannelHandle,
    entry: &LogEntry,
    new: &Message,
    deadline: Duration,
) -> Result<Vec<MessageCopy>, ChannelError> {
    let edits = entry.copies.iter().map(|copy| async move {
        if copy.channel == *origin {
            let mut message = copy.message.clone();
            message.id = new.id.clone();
            message.text = new.text.clone();
            return Ok(MessageCopy {
                channel: copy.channel.clone(),
                message,
            });
        }

        if copy.message.text == new.text {
            return Ok(copy.clone());
        }

        let mut outbound = copy.message.clone();
        outbound.text = new.text.clone();
        match timeout(deadline, copy.channel.edit(outbound)).await {
            Ok(Ok(edited)) => Ok(MessageCopy {
                channel: copy.channel.clone(),
                message: edited,
            }),
            Ok(Err(err)) => Err(ChannelError::SendFailed {
                name: copy.channel.name().to_string(),
                service: copy.channel.service_name().to_string(),
                reason: format!("edit failed: {err}"),
            }),
            Err(_) => {
                warn!("edit on {:?} exceeded the relay deadline", copy.channel);
                Ok(copy.clone())
            }
        }
    });

    try_join_all(edits).await
}

/// Delete every sibling copy of an entry, concurrently.
async fn delete_copies(
    origin: &ChannelHandle,
    entry: &LogEntry,
    deadline: Duration,
) -> Result<(), ChannelError> {
    let deletes = entry
        .copies
        .iter()
        .filter(|copy| copy.channel != *origin)
        .map(|copy| async move {
            match timeout(deadline, copy.channel.delete(copy.message.clone())).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(ChannelError::SendFailed {
                    name: copy.channel.name().to_string(),
                    service: copy.channel.service_name().to_string(),
                    reason: format!("delete failed: {err}"),
                }),
                Err(_) => {
                    warn!("delete on {:?} exceeded the relay deadline", copy.channel);
                    Ok(())
                }
            }
        });

    try_join_all(deletes).await.map(|_| ())
}

/// Send a system notification to every channel except the origin.
/// Notifications are not logged: they are not addressable by later edits.
async fn notify_siblings(
    channels: &[ChannelHandle],
    origin: &ChannelHandle,
    text: &str,
    deadline: Duration,
) -> Result<(), ChannelError> {
    let targets = siblings(channels, origin);
    send_to(&targets, &Message::new(text), None, deadline)
        .await
        .map(|_| ())
}

fn origin_label(origin: &ChannelHandle) -> String {
    format!("{} on {}", origin.name(), origin.service_name())
}

fn siblings<'a>(
    channels: &'a [ChannelHandle],
    origin: &ChannelHandle,
) -> Vec<&'a ChannelHandle> {
    channels
        .iter()
        .filter(|channel| *channel != origin)
        .collect()
}
