//! Adapter options.

use std::fmt;

use tracing::Dispatch;

/// Default broadcast buffer for watch subscribers.
pub const DEFAULT_WATCH_CAPACITY: usize = 1024;

/// Options accepted by [`crate::EtcdAdapter::new`].
#[derive(Clone)]
pub struct AdapterOptions {
    /// Structured logging sink for the adapter's tasks. When unset, the
    /// caller's default dispatcher is used (a no-op unless the host process
    /// installed a subscriber).
    pub logger: Option<Dispatch>,
    /// How many watch events a slow subscriber may fall behind before it
    /// starts losing them.
    pub watch_capacity: usize,
}

impl AdapterOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route the adapter's log output to `subscriber`.
    pub fn with_logger(mut self, logger: impl Into<Dispatch>) -> Self {
        self.logger = Some(logger.into());
        self
    }

    pub fn with_watch_capacity(mut self, capacity: usize) -> Self {
        self.watch_capacity = capacity.max(1);
        self
    }

    /// The dispatcher the adapter's tasks run under.
    pub(crate) fn dispatch(&self) -> Dispatch {
        self.logger
            .clone()
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone))
    }
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            logger: None,
            watch_capacity: DEFAULT_WATCH_CAPACITY,
        }
    }
}

impl fmt::Debug for AdapterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdapterOptions")
            .field("logger", &self.logger.is_some())
            .field("watch_capacity", &self.watch_capacity)
            .finish()
    }
}
