//! The etcd-facing facade.
//!
//! [`EtcdAdapter`] owns the cache, the revision allocator and the reducer
//! task, and serves the HTTP surface etcd clients probe before they talk
//! gRPC. The full KV/Watch/Lease RPC services are expected to be layered on
//! top through [`EtcdAdapter::cache`] and [`EtcdAdapter::watch`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::instrument::WithSubscriber;
use tracing::{error, info, warn, Dispatch};

use crate::cache::{BTreeCache, Cache};
use crate::config::AdapterOptions;
use crate::error::{AdapterError, Result};
use crate::event::{self, EventReceiver, EventSender};
use crate::item::Item;
use crate::reducer::Reducer;
use crate::revision::{Revision, RevisionAllocator};
use crate::watch::{WatchSender, WatchStream};

/// Version reported as `etcdserver`.
pub const ETCD_SERVER_VERSION: &str = "3.5.0-pre";
/// Version reported as `etcdcluster`.
pub const ETCD_CLUSTER_VERSION: &str = "3.5.0";

/// Body of `GET /version`. Field order is part of the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct VersionInfo {
    pub etcdserver: &'static str,
    pub etcdcluster: &'static str,
}

pub const VERSION: VersionInfo = VersionInfo {
    etcdserver: ETCD_SERVER_VERSION,
    etcdcluster: ETCD_CLUSTER_VERSION,
};

/// Lifecycle of an etcd-compatible facade fed by producer events.
#[async_trait]
pub trait Adapter<T: Item>: Send + Sync {
    /// Producer handle. Sends are unbuffered: see [`EventSender::send`].
    fn event_sender(&self) -> EventSender<T>;

    /// Serve on `listener` until `cancel` fires or [`Adapter::shutdown`] is
    /// called. Also runs the event reducer for as long as it serves.
    async fn serve(&self, cancel: CancellationToken, listener: TcpListener) -> Result<()>;

    /// Stop serving and wait up to `timeout` for in-flight requests to drain.
    async fn shutdown(&self, timeout: Duration) -> Result<()>;
}

/// Bind a listener for [`Adapter::serve`].
pub async fn bind(addr: SocketAddr) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| AdapterError::Bind { addr, source })
}

/// HTTP routes served next to the gRPC surface.
pub fn router() -> Router {
    Router::new()
        .route("/version", get(show_version))
        .layer(TraceLayer::new_for_http())
}

/// [`router`] with every request, its span included, handled under `logger`.
pub fn router_with_logger(logger: Dispatch) -> Router {
    router().layer(middleware::from_fn_with_state(logger, with_logger))
}

async fn with_logger(State(logger): State<Dispatch>, request: Request, next: Next) -> Response {
    next.run(request).with_subscriber(logger).await
}

async fn show_version() -> Response {
    match serde_json::to_vec(&VERSION) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = %err, "failed to send version info");
            AdapterError::internal(err.to_string()).into_response()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServeState {
    Idle,
    Serving,
    Stopped,
}

/// In-memory etcd v3 facade.
pub struct EtcdAdapter<T: Item> {
    options: AdapterOptions,
    revisions: Arc<RevisionAllocator>,
    cache: Arc<BTreeCache<T>>,
    watcher: WatchSender<T>,
    sender: EventSender<T>,
    receiver: Mutex<Option<EventReceiver<T>>>,
    shutdown: CancellationToken,
    state: watch::Sender<ServeState>,
}

impl<T: Item> EtcdAdapter<T> {
    pub fn new(options: AdapterOptions) -> Self {
        let (sender, receiver) = event::channel();
        let (state, _) = watch::channel(ServeState::Idle);
        Self {
            watcher: WatchSender::new(options.watch_capacity),
            options,
            revisions: Arc::new(RevisionAllocator::new()),
            cache: Arc::new(BTreeCache::new()),
            sender,
            receiver: Mutex::new(Some(receiver)),
            shutdown: CancellationToken::new(),
            state,
        }
    }

    /// Read access to the current state.
    pub fn cache(&self) -> Arc<dyn Cache<T>> {
        self.cache.clone()
    }

    /// Subscribe to accepted mutations. `*` suffix matches by prefix.
    pub fn watch(&self, pattern: impl Into<String>) -> WatchStream<T> {
        self.watcher.subscribe(pattern)
    }

    /// The last revision handed out.
    pub fn current_revision(&self) -> Revision {
        self.revisions.current()
    }
}

impl<T: Item> Default for EtcdAdapter<T> {
    fn default() -> Self {
        Self::new(AdapterOptions::default())
    }
}

#[async_trait]
impl<T: Item> Adapter<T> for EtcdAdapter<T> {
    fn event_sender(&self) -> EventSender<T> {
        self.sender.clone()
    }

    async fn serve(&self, cancel: CancellationToken, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        // Claimed and published together so shutdown never sees a claimed
        // receiver while the state still reads Idle.
        let receiver = {
            let mut slot = self.receiver.lock();
            let receiver = slot.take().ok_or(AdapterError::AlreadyServing)?;
            self.state.send_replace(ServeState::Serving);
            receiver
        };

        let dispatch = self.options.dispatch();
        let reducer_stop = CancellationToken::new();
        let reducer = Reducer::<T>::new(self.revisions.clone(), self.cache.clone())
            .with_observer(Arc::new(self.watcher.clone()));
        let reducer_task = tokio::spawn(
            reducer
                .run(receiver, reducer_stop.clone())
                .with_subscriber(dispatch.clone()),
        );

        let stop = self.shutdown.clone();
        let signal = async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = stop.cancelled() => {}
            }
        };
        let routes = router_with_logger(dispatch.clone());
        let served = async move {
            info!(%addr, "etcd adapter serving");
            let served = axum::serve(listener, routes)
                .with_graceful_shutdown(signal)
                .await;
            info!(%addr, "etcd adapter stopped serving");
            served
        }
        .with_subscriber(dispatch.clone())
        .await;

        reducer_stop.cancel();
        let reduced = reducer_task.await;
        self.state.send_replace(ServeState::Stopped);

        let result = served.map_err(AdapterError::from).and_then(|()| {
            reduced.map_err(|err| AdapterError::internal(format!("event reducer failed: {err}")))
        });
        if let Err(err) = &result {
            if err.is_fatal() {
                tracing::dispatcher::with_default(&dispatch, || {
                    error!(%addr, error = ?err, "etcd adapter failed");
                });
            }
        }
        result
    }

    async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.shutdown.cancel();

        let mut state = {
            let slot = self.receiver.lock();
            let state = self.state.subscribe();
            let idle = *state.borrow() == ServeState::Idle && slot.is_some();
            if idle {
                self.state.send_replace(ServeState::Stopped);
                return Ok(());
            }
            state
        };

        let stopped = state.wait_for(|s| *s == ServeState::Stopped);
        let result = match tokio::time::timeout(timeout, stopped).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(_)) => Err(AdapterError::ChannelClosed),
            Err(_) => Err(AdapterError::ShutdownTimeout(timeout)),
        };
        result
    }
}
