//! # etcd-adapter
//!
//! Present an externally produced object set as an etcd v3 node.
//!
//! A producer (a configuration manager, a controller, anything that knows
//! the truth) streams [`Event`]s of added, updated and deleted items into the
//! adapter. The adapter reduces them into an ordered in-memory cache, giving
//! every mutation a global MVCC revision, so that clients that already speak
//! etcd can read and watch the set without knowing where it comes from.
//!
//! - **Revisions**: one global, strictly increasing counter; each item keeps
//!   its create revision across updates
//! - **Ordered cache**: bytewise key order for range and prefix reads
//! - **Unbuffered ingestion**: a slow reducer throttles the producer
//! - **Watch fan-out**: every accepted mutation is broadcast to subscribers
//!
//! The adapter is in-memory and single-process. It does not cluster and it
//! forgets everything on restart.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use etcd_adapter::{Adapter, AdapterOptions, EtcdAdapter, Event, KeyValue};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> etcd_adapter::Result<()> {
//!     let adapter = Arc::new(EtcdAdapter::<KeyValue>::new(AdapterOptions::default()));
//!     let listener = etcd_adapter::bind("127.0.0.1:12379".parse().unwrap()).await?;
//!
//!     let server = {
//!         let adapter = Arc::clone(&adapter);
//!         tokio::spawn(async move { adapter.serve(CancellationToken::new(), listener).await })
//!     };
//!
//!     let events = adapter.event_sender();
//!     events
//!         .send(Event::add(vec![KeyValue::new("/routes/1", b"{}".to_vec())]))
//!         .await?;
//!
//!     adapter.shutdown(std::time::Duration::from_secs(5)).await?;
//!     server.await.expect("server task panicked")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Custom Items
//!
//! ```rust
//! use etcd_adapter::Item;
//! use serde::Serialize;
//!
//! #[derive(Serialize)]
//! struct Route {
//!     id: String,
//!     uri: String,
//! }
//!
//! impl Item for Route {
//!     fn key(&self) -> &str {
//!         &self.id
//!     }
//! }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod event;
pub mod item;
pub mod reducer;
pub mod revision;
pub mod server;
pub mod watch;

// Re-export main types
pub use cache::{BTreeCache, Cache};
pub use config::AdapterOptions;
pub use error::{AdapterError, Result};
pub use event::{Event, EventReceiver, EventSender, EventType};
pub use item::{Item, KeyValue, RevisionedItem};
pub use reducer::{Outcome, Reducer};
pub use revision::{Revision, RevisionAllocator};
pub use server::{bind, router, router_with_logger, Adapter, EtcdAdapter, VERSION};
pub use watch::{MutationObserver, WatchEvent, WatchEventType, WatchSender, WatchStream};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::cache::Cache;
    pub use crate::error::{AdapterError, Result};
    pub use crate::event::{Event, EventSender, EventType};
    pub use crate::item::{Item, KeyValue, RevisionedItem};
    pub use crate::server::{Adapter, EtcdAdapter};
    pub use crate::watch::{WatchEvent, WatchEventType};
}
