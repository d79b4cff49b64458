//! History of relayed messages.
//!
//! Each relayed message becomes one [`LogEntry`]: the set of per-channel
//! copies that together make up one conceptual message. Later edits,
//! deletions, and replies use the log to find the copy that belongs to each
//! channel. The log is bounded; the oldest entry is dropped first, and an
//! edit or delete referring to an evicted message becomes a no-op.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::chat::{ChannelHandle, Message, MessageId};

/// One channel's copy of a relayed message.
#[derive(Debug, Clone)]
pub struct MessageCopy {
    pub channel: ChannelHandle,
    pub message: Message,
}

/// One conceptual message, distributed across channels.
///
/// Contains the originating channel's message plus a copy for every channel
/// the relay succeeded in sending to; each channel appears at most once.
/// Entries are immutable once recorded — updates swap in a whole new entry.
#[derive(Debug)]
pub struct LogEntry {
    pub copies: Vec<MessageCopy>,
}

impl LogEntry {
    /// The copy belonging to the given channel, if any.
    pub fn copy_for(&self, channel: &ChannelHandle) -> Option<&MessageCopy> {
        self.copies.iter().find(|copy| copy.channel == *channel)
    }
}

/// Bounded, FIFO-evicted log of relayed messages.
///
/// A single mutex guards the list; entries are shared out as `Arc`s, so
/// readers never hold the lock while using one and never observe a
/// partially updated entry.
pub struct History {
    max: usize,
    entries: Mutex<VecDeque<Arc<LogEntry>>>,
}

impl History {
    pub fn new(max: usize) -> Self {
        Self {
            max,
            entries: Mutex::new(VecDeque::new()),
        }
    }

    /// Append an entry, dropping the oldest once over capacity.
    pub fn record(&self, entry: LogEntry) {
        let mut entries = self.entries.lock().unwrap();
        entries.push_back(Arc::new(entry));
        while entries.len() > self.max {
            entries.pop_front();
        }
    }

    /// Find the entry holding the copy `(origin, id)`.
    ///
    /// Scans newest-first: ids are unique within a channel, so after a
    /// renumbering edit the most recent entry is the live one.
    pub fn find(&self, origin: &ChannelHandle, id: &MessageId) -> Option<Arc<LogEntry>> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .rev()
            .find(|entry| {
                entry
                    .copies
                    .iter()
                    .any(|copy| copy.channel == *origin && copy.message.id == *id)
            })
            .cloned()
    }

    /// Swap `old` for `new` in place, preserving the entry's position.
    ///
    /// Used by the edit path when message ids are renumbered. If `old` has
    /// been evicted in the meantime the new entry is discarded.
    pub fn replace(&self, old: &Arc<LogEntry>, new: LogEntry) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(slot) = entries.iter_mut().find(|entry| Arc::ptr_eq(entry, old)) {
            *slot = Arc::new(new);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::chat::{Channel, Event};
    use crate::error::ChannelError;

    struct NullChannel;

    #[async_trait]
    impl Channel for NullChannel {
        fn name(&self) -> &str {
            "null"
        }

        fn service_name(&self) -> &str {
            "null"
        }

        async fn receive(&self) -> Result<Event, ChannelError> {
            Err(ChannelError::Closed)
        }

        async fn send(&self, msg: Message) -> Result<Message, ChannelError> {
            Ok(msg)
        }

        async fn edit(&self, msg: Message) -> Result<Message, ChannelError> {
            Ok(msg)
        }

        async fn delete(&self, _msg: Message) -> Result<(), ChannelError> {
            Ok(())
        }
    }

    fn handle() -> ChannelHandle {
        ChannelHandle::new(Arc::new(NullChannel))
    }

    fn copy(channel: &ChannelHandle, id: &str, text: &str) -> MessageCopy {
        MessageCopy {
            channel: channel.clone(),
            message: Message {
                id: id.into(),
                ..Message::new(text)
            },
        }
    }

    #[test]
    fn test_find_by_any_copy() {
        let (a, b) = (handle(), handle());
        let history = History::new(10);
        history.record(LogEntry {
            copies: vec![copy(&a, "a1", "hi"), copy(&b, "b1", "hi")],
        });

        let entry = history.find(&a, &"a1".into()).unwrap();
        assert_eq!(entry.copy_for(&b).unwrap().message.id.as_str(), "b1");

        // The sibling's pair resolves to the same entry.
        let entry = history.find(&b, &"b1".into()).unwrap();
        assert_eq!(entry.copy_for(&a).unwrap().message.id.as_str(), "a1");
    }

    #[test]
    fn test_find_misses_wrong_channel_or_id() {
        let (a, b) = (handle(), handle());
        let history = History::new(10);
        history.record(LogEntry {
            copies: vec![copy(&a, "a1", "hi")],
        });

        assert!(history.find(&b, &"a1".into()).is_none());
        assert!(history.find(&a, &"a2".into()).is_none());
    }

    #[test]
    fn test_fifo_eviction_drops_oldest() {
        let a = handle();
        let history = History::new(2);
        for i in 0..5 {
            history.record(LogEntry {
                copies: vec![copy(&a, &format!("a{i}"), "x")],
            });
        }

        assert_eq!(history.len(), 2);
        assert!(history.find(&a, &"a0".into()).is_none());
        assert!(history.find(&a, &"a2".into()).is_none());
        assert!(history.find(&a, &"a3".into()).is_some());
        assert!(history.find(&a, &"a4".into()).is_some());
    }

    #[test]
    fn test_replace_swaps_in_place() {
        let a = handle();
        let history = History::new(10);
        history.record(LogEntry {
            copies: vec![copy(&a, "a1", "hi")],
        });

        let entry = history.find(&a, &"a1".into()).unwrap();
        history.replace(
            &entry,
            LogEntry {
                copies: vec![copy(&a, "a2", "ho")],
            },
        );

        assert_eq!(history.len(), 1);
        assert!(history.find(&a, &"a1".into()).is_none());
        let replaced = history.find(&a, &"a2".into()).unwrap();
        assert_eq!(replaced.copy_for(&a).unwrap().message.text, "ho");
    }

    #[test]
    fn test_replace_of_evicted_entry_is_noop() {
        let a = handle();
        let history = History::new(1);
        history.record(LogEntry {
            copies: vec![copy(&a, "a1", "hi")],
        });
        let evicted = history.find(&a, &"a1".into()).unwrap();
        history.record(LogEntry {
            copies: vec![copy(&a, "a2", "newer")],
        });

        history.replace(
            &evicted,
            LogEntry {
                copies: vec![copy(&a, "a3", "stale")],
            },
        );

        assert_eq!(history.len(), 1);
        assert!(history.find(&a, &"a3".into()).is_none());
        assert!(history.find(&a, &"a2".into()).is_some());
    }

    #[test]
    fn test_find_prefers_newest_entry() {
        let a = handle();
        let history = History::new(10);
        history.record(LogEntry {
            copies: vec![copy(&a, "a1", "old")],
        });
        history.record(LogEntry {
            copies: vec![copy(&a, "a1", "new")],
        });

        let entry = history.find(&a, &"a1".into()).unwrap();
        assert_eq!(entry.copy_for(&a).unwrap().message.text, "new");
    }
}
