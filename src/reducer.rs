//! Event reduction: turns producer events into revisioned cache writes.
//!
//! For every item of an event a revision is allocated first, then the item
//! is accepted or rejected:
//!
//! | Event  | Key cached                       | Key absent        |
//! |--------|----------------------------------|-------------------|
//! | Add    | overwrite, new create revision   | insert            |
//! | Update | overwrite, keep create revision  | reject            |
//! | Delete | remove                           | reject            |
//!
//! A rejected item still consumes its revision, so rejections show up as
//! gaps in the revision sequence. Rejections are logged and never abort the
//! rest of the batch.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::cache::Cache;
use crate::event::{Event, EventReceiver, EventType};
use crate::item::{Item, RevisionedItem};
use crate::revision::{Revision, RevisionAllocator};
use crate::watch::{MutationObserver, WatchEvent};

/// Result of reducing one item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The item was written to the cache at `revision`.
    Applied { key: String, revision: Revision },
    /// The item referenced a key that is not cached and was dropped.
    Rejected { key: String, revision: Revision },
}

impl Outcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied { .. })
    }
}

/// The single writer of the cache.
pub struct Reducer<T: Item> {
    revisions: Arc<RevisionAllocator>,
    cache: Arc<dyn Cache<T>>,
    observer: Option<Arc<dyn MutationObserver<T>>>,
}

impl<T: Item> Reducer<T> {
    pub fn new(revisions: Arc<RevisionAllocator>, cache: Arc<dyn Cache<T>>) -> Self {
        Self {
            revisions,
            cache,
            observer: None,
        }
    }

    /// Register the hook notified after each accepted write.
    pub fn with_observer(mut self, observer: Arc<dyn MutationObserver<T>>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Drain `events` until `cancel` fires or every producer is gone.
    ///
    /// Nothing is written after cancellation is observed.
    pub async fn run(self, mut events: EventReceiver<T>, cancel: CancellationToken) {
        debug!("event reducer started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => {
                        self.apply(event);
                    }
                    None => {
                        debug!("all event producers dropped");
                        break;
                    }
                },
            }
        }
        debug!(revision = self.revisions.current(), "event reducer stopped");
    }

    /// Apply one event, item by item, in order.
    #[instrument(
        name = "apply_event",
        skip_all,
        fields(event_type = ?event.event_type, items = event.items.len())
    )]
    pub fn apply(&self, event: Event<T>) -> Vec<Outcome> {
        let event_type = event.event_type;
        event
            .items
            .into_iter()
            .map(|item| self.apply_item(event_type, item))
            .collect()
    }

    fn apply_item(&self, event_type: EventType, item: T) -> Outcome {
        let revision = self.revisions.next();
        let key = item.key().to_string();

        match event_type {
            EventType::Add => {
                let prev = self.cache.get(&key);
                let record = Arc::new(RevisionedItem::created(item, revision));
                self.cache.put(Arc::clone(&record));
                debug!(
                    key = %key,
                    create_revision = revision,
                    modify_revision = revision,
                    value = %record.log_value(),
                    "add event received"
                );
                self.publish(WatchEvent::put(record, prev));
                Outcome::Applied { key, revision }
            }
            EventType::Update => match self.cache.get(&key) {
                Some(prev) => {
                    let record = Arc::new(RevisionedItem::modified(item, &prev, revision));
                    self.cache.put(Arc::clone(&record));
                    debug!(
                        key = %key,
                        create_revision = record.create_revision(),
                        modify_revision = revision,
                        value = %record.log_value(),
                        "update event received"
                    );
                    self.publish(WatchEvent::put(record, Some(prev)));
                    Outcome::Applied { key, revision }
                }
                None => {
                    warn!(
                        key = %key,
                        revision,
                        "ignore update event as object is not found from the cache"
                    );
                    Outcome::Rejected { key, revision }
                }
            },
            EventType::Delete => match self.cache.get(&key) {
                Some(prev) => {
                    let tombstone = Arc::new(RevisionedItem::modified(item, &prev, revision));
                    self.cache.delete(&tombstone);
                    debug!(
                        key = %key,
                        create_revision = tombstone.create_revision(),
                        modify_revision = revision,
                        "delete event received"
                    );
                    self.publish(WatchEvent::delete(tombstone, prev));
                    Outcome::Applied { key, revision }
                }
                None => {
                    warn!(
                        key = %key,
                        revision,
                        "ignore delete event as object is not found from the cache"
                    );
                    Outcome::Rejected { key, revision }
                }
            },
        }
    }

    fn publish(&self, event: WatchEvent<T>) {
        if let Some(observer) = &self.observer {
            observer.on_mutation(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::BTreeCache;
    use crate::event;
    use crate::item::KeyValue;
    use crate::watch::WatchEventType;
    use parking_lot::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(WatchEventType, String, Revision, Revision)>>,
    }

    impl MutationObserver<KeyValue> for Recorder {
        fn on_mutation(&self, event: &WatchEvent<KeyValue>) {
            self.seen.lock().push((
                event.event_type,
                event.key().to_string(),
                event.item.create_revision(),
                event.revision(),
            ));
        }
    }

    fn kv(key: &str, value: &str) -> KeyValue {
        KeyValue::new(key, value)
    }

    fn setup() -> (Reducer<KeyValue>, Arc<BTreeCache<KeyValue>>, Arc<Recorder>) {
        let cache = Arc::new(BTreeCache::<KeyValue>::new());
        let recorder = Arc::new(Recorder::default());
        let reducer = Reducer::<KeyValue>::new(Arc::new(RevisionAllocator::new()), cache.clone())
            .with_observer(recorder.clone());
        (reducer, cache, recorder)
    }

    #[test]
    fn test_add() {
        let (reducer, cache, _) = setup();

        let outcomes = reducer.apply(Event::add(vec![kv("/a", "1"), kv("/b", "2")]));
        assert!(outcomes.iter().all(Outcome::is_applied));

        let a = cache.get("/a").unwrap();
        assert_eq!(a.create_revision(), 1);
        assert_eq!(a.modify_revision(), 1);
        let b = cache.get("/b").unwrap();
        assert_eq!(b.create_revision(), 2);
    }

    #[test]
    fn test_update_keeps_create_revision() {
        let (reducer, cache, _) = setup();

        reducer.apply(Event::add(vec![kv("/a", "v0")]));
        let mut last = 1;
        for i in 1..=5 {
            reducer.apply(Event::update(vec![kv("/a", &format!("v{i}"))]));
            let record = cache.get("/a").unwrap();
            assert_eq!(record.create_revision(), 1);
            assert!(record.modify_revision() > last);
            last = record.modify_revision();
        }
        assert_eq!(cache.get("/a").unwrap().item().value, b"v5");
    }

    #[test]
    fn test_update_unknown_key_is_rejected() {
        let (reducer, cache, recorder) = setup();
        reducer.apply(Event::add(vec![kv("/a", "1")]));
        let before: Vec<_> = cache.range("").iter().map(|r| r.log_value()).collect();

        let outcomes = reducer.apply(Event::update(vec![kv("/missing", "x")]));
        assert_eq!(
            outcomes,
            vec![Outcome::Rejected {
                key: "/missing".to_string(),
                revision: 2
            }]
        );

        let after: Vec<_> = cache.range("").iter().map(|r| r.log_value()).collect();
        assert_eq!(before, after);
        assert!(cache.get("/missing").is_none());
        assert_eq!(recorder.seen.lock().len(), 1);
    }

    #[test]
    fn test_delete_unknown_key_is_rejected() {
        let (reducer, cache, _) = setup();

        let outcomes = reducer.apply(Event::delete(vec![kv("/missing", "")]));
        assert!(!outcomes[0].is_applied());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_rejected_items_consume_revisions() {
        let (reducer, cache, _) = setup();

        reducer.apply(Event::update(vec![kv("/missing", "x")]));
        reducer.apply(Event::add(vec![kv("/a", "1")]));

        assert_eq!(cache.get("/a").unwrap().create_revision(), 2);
    }

    #[test]
    fn test_delete_then_add_resets_lineage() {
        let (reducer, cache, _) = setup();

        reducer.apply(Event::add(vec![kv("/a", "1")]));
        reducer.apply(Event::update(vec![kv("/a", "2")]));
        let deleted = reducer.apply(Event::delete(vec![kv("/a", "")]));
        assert!(deleted[0].is_applied());
        assert!(cache.get("/a").is_none());

        reducer.apply(Event::add(vec![kv("/a", "3")]));
        let record = cache.get("/a").unwrap();
        assert_eq!(record.create_revision(), 4);
        assert!(record.create_revision() > 1);
        assert_eq!(record.modify_revision(), 4);
    }

    #[test]
    fn test_batch_independence_either_order() {
        for batch in [
            vec![kv("/a", "2"), kv("/ghost", "x")],
            vec![kv("/ghost", "x"), kv("/a", "2")],
        ] {
            let (reducer, cache, _) = setup();
            reducer.apply(Event::add(vec![kv("/a", "1")]));

            let outcomes = reducer.apply(Event::update(batch));
            assert_eq!(outcomes.iter().filter(|o| o.is_applied()).count(), 1);
            assert_eq!(cache.get("/a").unwrap().item().value, b"2");
            assert!(cache.get("/ghost").is_none());
        }
    }

    #[test]
    fn test_add_survives_neighbouring_invalid_update() {
        for add_first in [true, false] {
            let (reducer, cache, _) = setup();
            let add = Event::add(vec![kv("/a", "1")]);
            let bad = Event::update(vec![kv("/ghost", "x")]);
            if add_first {
                reducer.apply(add);
                reducer.apply(bad);
            } else {
                reducer.apply(bad);
                reducer.apply(add);
            }
            assert!(cache.get("/a").is_some());
            assert!(cache.get("/ghost").is_none());
            assert_eq!(cache.len(), 1);
        }
    }

    #[test]
    fn test_rejection_does_not_abort_siblings() {
        let (reducer, cache, _) = setup();
        reducer.apply(Event::add(vec![kv("/a", "1"), kv("/b", "1")]));

        let outcomes = reducer.apply(Event::update(vec![
            kv("/a", "2"),
            kv("/ghost", "x"),
            kv("/b", "2"),
        ]));
        let applied: Vec<bool> = outcomes.iter().map(Outcome::is_applied).collect();
        assert_eq!(applied, vec![true, false, true]);
        assert_eq!(cache.get("/a").unwrap().item().value, b"2");
        assert_eq!(cache.get("/b").unwrap().item().value, b"2");
    }

    #[test]
    fn test_observer_sees_accepted_mutations_only() {
        let (reducer, _, recorder) = setup();

        reducer.apply(Event::add(vec![kv("/a", "1")]));
        reducer.apply(Event::update(vec![kv("/a", "2"), kv("/ghost", "x")]));
        reducer.apply(Event::delete(vec![kv("/a", ""), kv("/ghost", "")]));

        let seen = recorder.seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                (WatchEventType::Put, "/a".to_string(), 1, 1),
                (WatchEventType::Put, "/a".to_string(), 1, 2),
                (WatchEventType::Delete, "/a".to_string(), 1, 4),
            ]
        );
    }

    #[test]
    fn test_modify_revisions_strictly_increase() {
        let (reducer, _, recorder) = setup();

        for i in 0..20 {
            let key = format!("/k{}", i % 3);
            reducer.apply(Event::add(vec![kv(&key, "a")]));
            reducer.apply(Event::update(vec![kv(&key, "b")]));
            if i % 4 == 0 {
                reducer.apply(Event::delete(vec![kv(&key, "")]));
            }
        }

        let revs: Vec<Revision> = recorder.seen.lock().iter().map(|s| s.3).collect();
        assert!(revs.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_run_applies_in_arrival_order() {
        let (reducer, cache, _) = setup();
        let (tx, rx) = event::channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reducer.run(rx, cancel.clone()));

        tx.send(Event::add(vec![kv("/a", "1")])).await.unwrap();
        tx.send(Event::update(vec![kv("/a", "2")])).await.unwrap();
        tx.send(Event::update(vec![kv("/a", "3")])).await.unwrap();

        cancel.cancel();
        task.await.unwrap();

        let record = cache.get("/a").unwrap();
        assert_eq!(record.item().value, b"3");
        assert_eq!(record.modify_revision(), 3);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (reducer, cache, _) = setup();
        let (tx, rx) = event::channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(reducer.run(rx, cancel.clone()));

        tx.send(Event::add(vec![kv("/a", "1")])).await.unwrap();
        cancel.cancel();
        task.await.unwrap();

        let err = tx.send(Event::add(vec![kv("/b", "1")])).await.unwrap_err();
        assert!(matches!(err, crate::AdapterError::ChannelClosed));
        assert!(cache.get("/b").is_none());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_stalled_reducer_blocks_producer() {
        let (reducer, cache, _) = setup();
        let (tx, rx) = event::channel();

        let blocked =
            tokio::time::timeout(Duration::from_millis(50), tx.send(Event::add(vec![kv("/a", "1")])))
                .await;
        assert!(blocked.is_err());
        assert!(cache.is_empty());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(reducer.run(rx, cancel.clone()));
        tx.send(Event::add(vec![kv("/b", "1")])).await.unwrap();
        cancel.cancel();
        task.await.unwrap();

        // The abandoned send was never handed off.
        assert!(cache.get("/a").is_none());
        assert!(cache.get("/b").is_some());
    }

    #[tokio::test]
    async fn test_run_exits_when_producers_drop() {
        let (reducer, _, _) = setup();
        let (tx, rx) = event::channel::<KeyValue>();
        drop(tx);
        reducer.run(rx, CancellationToken::new()).await;
    }
}
