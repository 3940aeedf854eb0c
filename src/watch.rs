//! Mutation fan-out for watch streams.
//!
//! The reducer reports every accepted mutation to a [`MutationObserver`].
//! [`WatchSender`] is the observer the adapter installs: it broadcasts each
//! mutation as a [`WatchEvent`] to every [`WatchStream`] whose pattern
//! matches the key.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;

use crate::item::{Item, RevisionedItem};
use crate::revision::Revision;

/// etcd watch event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WatchEventType {
    /// Key was created or updated.
    Put,
    /// Key was deleted.
    Delete,
}

/// A change to one key, as seen by watchers.
#[derive(Debug)]
pub struct WatchEvent<T> {
    /// Type of change.
    pub event_type: WatchEventType,
    /// The item after the change. For deletes, the tombstone: the last value
    /// with `modify_revision` set to the delete revision.
    pub item: Arc<RevisionedItem<T>>,
    /// The item before the change (updates and deletes).
    pub prev_item: Option<Arc<RevisionedItem<T>>>,
}

impl<T> Clone for WatchEvent<T> {
    fn clone(&self) -> Self {
        Self {
            event_type: self.event_type,
            item: Arc::clone(&self.item),
            prev_item: self.prev_item.clone(),
        }
    }
}

impl<T: Item> WatchEvent<T> {
    /// Create a Put event.
    pub fn put(item: Arc<RevisionedItem<T>>, prev_item: Option<Arc<RevisionedItem<T>>>) -> Self {
        Self {
            event_type: WatchEventType::Put,
            item,
            prev_item,
        }
    }

    /// Create a Delete event.
    pub fn delete(tombstone: Arc<RevisionedItem<T>>, prev_item: Arc<RevisionedItem<T>>) -> Self {
        Self {
            event_type: WatchEventType::Delete,
            item: tombstone,
            prev_item: Some(prev_item),
        }
    }

    /// The key that changed.
    pub fn key(&self) -> &str {
        self.item.key()
    }

    /// The revision of the change.
    pub fn revision(&self) -> Revision {
        self.item.modify_revision()
    }
}

/// Hook invoked synchronously after each accepted cache write.
pub trait MutationObserver<T: Item>: Send + Sync {
    fn on_mutation(&self, event: &WatchEvent<T>);
}

/// A stream of watch events for a specific pattern.
///
/// Pattern can be an exact key or end with `*` for prefix matching.
pub struct WatchStream<T> {
    inner: BroadcastStream<WatchEvent<T>>,
    pattern: String,
}

impl<T: Item> WatchStream<T> {
    /// Create a new watch stream for the given pattern.
    pub fn new(receiver: broadcast::Receiver<WatchEvent<T>>, pattern: impl Into<String>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
            pattern: pattern.into(),
        }
    }

    /// Get the pattern this stream is watching.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    fn matches(&self, key: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => key.starts_with(prefix),
            None => key == self.pattern,
        }
    }
}

impl<T: Item> Stream for WatchStream<T> {
    type Item = WatchEvent<T>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if self.matches(event.key()) {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    tracing::warn!(
                        pattern = %self.pattern,
                        skipped,
                        "watch stream lagged, events dropped"
                    );
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Handle for sending watch events to subscribers.
pub struct WatchSender<T> {
    sender: broadcast::Sender<WatchEvent<T>>,
}

impl<T> Clone for WatchSender<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<T: Item> WatchSender<T> {
    /// Create a new watch sender with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all subscribers.
    pub fn send(&self, event: WatchEvent<T>) {
        // No subscribers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self, pattern: impl Into<String>) -> WatchStream<T> {
        WatchStream::new(self.sender.subscribe(), pattern)
    }

    /// Get the number of current subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Item> Default for WatchSender<T> {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl<T: Item> MutationObserver<T> for WatchSender<T> {
    fn on_mutation(&self, event: &WatchEvent<T>) {
        self.send(event.clone());
    }
}
