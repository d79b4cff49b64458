//! The inbox queue every adapter feeds its channel events through.
//!
//! An [`Inbox`] sits between a producer that must never block (a polling or
//! demultiplexing task holding upstream state) and a single consumer that
//! drains it (`receive`). Pushes append to a staging buffer under a mutex;
//! the consumer takes the whole buffer in one pull. The queue is unbounded
//! in effect, ordered, and the producer side is always non-blocking.

use std::mem;
use std::sync::Mutex;

use tokio::sync::Notify;

struct State<T> {
    items: Vec<T>,
    closed: bool,
}

/// Single-producer, single-consumer ordered event queue with a
/// non-blocking producer side.
pub struct Inbox<T> {
    state: Mutex<State<T>>,
    notify: Notify,
}

impl<T> Inbox<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                items: Vec::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Append items to the staging buffer. Never blocks.
    ///
    /// Panics if the inbox has been closed; pushing after close is a
    /// programming error.
    pub fn push(&self, items: impl IntoIterator<Item = T>) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            panic!("push to a closed inbox");
        }
        state.items.extend(items);
        drop(state);
        self.notify.notify_one();
    }

    /// Wait for items and take the whole staging buffer.
    ///
    /// Returns `None` once the inbox is closed and drained. Cancellation
    /// safe: dropping the future before it resolves consumes nothing.
    pub async fn pull(&self) -> Option<Vec<T>> {
        loop {
            // Arm the notification before checking state so a push between
            // the check and the await is not missed.
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().unwrap();
                if !state.items.is_empty() {
                    return Some(mem::take(&mut state.items));
                }
                if state.closed {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Close the inbox. Pending items remain pullable; after they drain,
    /// `pull` returns `None`. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.notify.notify_one();
    }
}

impl<T> Default for Inbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_pull_returns_pushed_items_in_order() {
        let inbox = Inbox::new();
        inbox.push([1, 2]);
        inbox.push([3]);

        assert_eq!(inbox.pull().await, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn test_pull_empties_the_buffer() {
        let inbox = Inbox::new();
        inbox.push([1]);
        assert_eq!(inbox.pull().await, Some(vec![1]));

        inbox.push([2]);
        assert_eq!(inbox.pull().await, Some(vec![2]));
    }

    #[tokio::test]
    async fn test_pull_blocks_until_push() {
        let inbox = Arc::new(Inbox::new());
        let producer = inbox.clone();
        let puller = tokio::spawn(async move { inbox.pull().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!puller.is_finished());

        producer.push(["hello"]);
        assert_eq!(puller.await.unwrap(), Some(vec!["hello"]));
    }

    #[tokio::test]
    async fn test_push_never_blocks_without_consumer() {
        let inbox = Inbox::new();
        for i in 0..10_000 {
            inbox.push([i]);
        }
        assert_eq!(inbox.pull().await.unwrap().len(), 10_000);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let inbox = Inbox::new();
        inbox.push([1, 2]);
        inbox.close();

        assert_eq!(inbox.pull().await, Some(vec![1, 2]));
        assert_eq!(inbox.pull().await, None);
    }

    #[tokio::test]
    async fn test_close_wakes_pending_pull() {
        let inbox: Arc<Inbox<i32>> = Arc::new(Inbox::new());
        let closer = inbox.clone();
        let puller = tokio::spawn(async move { inbox.pull().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        closer.close();
        assert_eq!(puller.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let inbox: Inbox<i32> = Inbox::new();
        inbox.close();
        inbox.close();
        assert_eq!(inbox.pull().await, None);
    }

    #[test]
    #[should_panic(expected = "closed inbox")]
    fn test_push_after_close_panics() {
        let inbox = Inbox::new();
        inbox.close();
        inbox.push([1]);
    }
}
