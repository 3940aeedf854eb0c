//! Inbound events and the unbuffered conduit that carries them.
//!
//! The conduit is a rendezvous: [`EventSender::send`] returns only after the
//! reducer has taken the event. A stalled reducer therefore stalls its
//! producer instead of letting events pile up.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{AdapterError, Result};

/// Kind of change carried by an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// Items are new.
    Add,
    /// Items replace existing ones.
    Update,
    /// Items are removed.
    Delete,
}

/// A batch of items sharing one event type.
///
/// Items are applied in order and independently of each other.
#[derive(Debug, Clone)]
pub struct Event<T> {
    /// The event entities.
    pub items: Vec<T>,
    /// What happened to them.
    pub event_type: EventType,
}

impl<T> Event<T> {
    pub fn new(event_type: EventType, items: Vec<T>) -> Self {
        Self { items, event_type }
    }

    /// Create an Add event.
    pub fn add(items: Vec<T>) -> Self {
        Self::new(EventType::Add, items)
    }

    /// Create an Update event.
    pub fn update(items: Vec<T>) -> Self {
        Self::new(EventType::Update, items)
    }

    /// Create a Delete event.
    pub fn delete(items: Vec<T>) -> Self {
        Self::new(EventType::Delete, items)
    }
}

struct Envelope<T> {
    event: Event<T>,
    taken: oneshot::Sender<()>,
}

/// Create a connected sender/receiver pair.
pub fn channel<T>() -> (EventSender<T>, EventReceiver<T>) {
    // A single slot; the acknowledgement is what makes the send unbuffered.
    let (tx, rx) = mpsc::channel(1);
    (EventSender { tx }, EventReceiver { rx })
}

/// Producer side of the conduit.
pub struct EventSender<T> {
    tx: mpsc::Sender<Envelope<T>>,
}

impl<T> Clone for EventSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> EventSender<T> {
    /// Hand an event to the reducer.
    ///
    /// Completes once the reducer has taken ownership of the event. If this
    /// future is dropped before then, the event is discarded rather than
    /// applied. Fails with [`AdapterError::ChannelClosed`] if the reducer has
    /// stopped.
    pub async fn send(&self, event: Event<T>) -> Result<()> {
        let (taken, ack) = oneshot::channel();
        self.tx
            .send(Envelope { event, taken })
            .await
            .map_err(|_| AdapterError::ChannelClosed)?;
        ack.await.map_err(|_| AdapterError::ChannelClosed)
    }

    /// Check whether the receiving side has been dropped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of the conduit. Owned by the reducer.
pub struct EventReceiver<T> {
    rx: mpsc::Receiver<Envelope<T>>,
}

impl<T> EventReceiver<T> {
    /// Take the next event.
    ///
    /// Returns `None` once every sender has been dropped.
    pub async fn recv(&mut self) -> Option<Event<T>> {
        loop {
            let envelope = self.rx.recv().await?;
            if envelope.taken.send(()).is_ok() {
                return Some(envelope.event);
            }
            tracing::debug!(
                items = envelope.event.items.len(),
                "producer abandoned event before hand-off"
            );
        }
    }
}
