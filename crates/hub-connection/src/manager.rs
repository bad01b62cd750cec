//! Connection manager: the hub client façade.
//!
//! Owns the transport, serialises connect/disconnect behind one async mutex,
//! reconnects after unexpected closures, and tracks every subscription and
//! outbound queue it hands out so that [`ConnectionManager::stop`] and
//! [`ConnectionManager::dispose`] can tear them down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, MutexGuard, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::HubError;
use crate::options::ClientOptions;
use crate::outbound::{OutboundQueue, QueueWorker};
use crate::reconnection::closed_handler;
use crate::subscription::{self, BufferedSubscription};
use crate::transport::{HubTransport, InboundCallback, Subscription};
use crate::types::ConnectionState;

/// Who asked for a connection start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartOrigin {
    /// Application code. Clears a previous `stop`.
    Caller,
    /// The reconnect task. Yields to a `stop` that happened meanwhile.
    Reconnect,
}

/// State shared between the manager, its closed-notification handler and
/// reconnect tasks.
pub(crate) struct ManagerCore {
    pub(crate) options: ClientOptions,
    pub(crate) transport: Arc<dyn HubTransport>,
    pub(crate) runtime: Handle,
    /// Guards connect/disconnect transitions.
    lifecycle: Mutex<()>,
    pub(crate) state: watch::Sender<ConnectionState>,
    pub(crate) reconnecting: Arc<AtomicBool>,
    /// Bumped by every closed notification, under the state lock.
    pub(crate) closed_epoch: AtomicU64,
    /// Set by `stop`, cleared by a caller-initiated start.
    pub(crate) stopped_by_user: AtomicBool,
    /// Cancelled on dispose/drop; aborts pending reconnects.
    pub(crate) shutdown: CancellationToken,
    disposed: AtomicBool,
    subscriptions: std::sync::Mutex<Vec<Subscription>>,
    queues: std::sync::Mutex<Vec<Arc<QueueWorker>>>,
}

/// Resilient client for one hub endpoint.
pub struct ConnectionManager {
    core: Arc<ManagerCore>,
}

impl ConnectionManager {
    /// Creates a manager over `transport` and binds automatic reconnection
    /// to the transport's closed notification.
    ///
    /// Must be called from within a tokio runtime; background work is
    /// spawned onto it.
    pub fn new(
        options: ClientOptions,
        transport: Arc<dyn HubTransport>,
    ) -> Result<Self, HubError> {
        let runtime = Handle::try_current().map_err(|_| HubError::NoRuntime)?;
        let (state, _) = watch::channel(ConnectionState::Disconnected);

        let core = Arc::new(ManagerCore {
            options,
            transport,
            runtime,
            lifecycle: Mutex::new(()),
            state,
            reconnecting: Arc::new(AtomicBool::new(false)),
            closed_epoch: AtomicU64::new(0),
            stopped_by_user: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            disposed: AtomicBool::new(false),
            subscriptions: std::sync::Mutex::new(Vec::new()),
            queues: std::sync::Mutex::new(Vec::new()),
        });
        core.transport
            .on_closed(closed_handler(Arc::downgrade(&core)));

        debug!(endpoint = %core.options.endpoint(), "connection manager created");
        Ok(Self { core })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.core.options
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.core.state()
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.core.state.subscribe()
    }

    /// Whether a reconnect attempt is scheduled or running.
    pub fn is_reconnecting(&self) -> bool {
        self.core.reconnecting.load(Ordering::Acquire)
    }

    /// Connects if not already connected.
    ///
    /// Concurrent callers share one underlying connect; all of them see its
    /// outcome. Returns [`HubError::Cancelled`] if `cancel` fires first.
    pub async fn ensure_started(&self, cancel: &CancellationToken) -> Result<(), HubError> {
        self.core.ensure_started(cancel, StartOrigin::Caller).await
    }

    /// Stops all outbound queues, then disconnects.
    ///
    /// Disconnect failures are logged, not returned. Closed notifications
    /// that follow do not trigger reconnection until the next
    /// [`ensure_started`](Self::ensure_started).
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<(), HubError> {
        self.core.stop(cancel).await
    }

    /// Calls `handler` with every non-null payload pushed for `method`.
    pub fn register_handler<T, F>(&self, method: &str, handler: F)
    where
        T: DeserializeOwned + 'static,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe(method, subscription::direct(method, handler));
    }

    /// Buffers every non-null payload pushed for `method` until the caller
    /// drains it.
    pub fn register_buffered<T>(&self, method: &str) -> BufferedSubscription<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (callback, buffered) = subscription::buffered(method);
        self.subscribe(method, callback);
        buffered
    }

    /// Starts a background sender for `method`. The queue is stopped by
    /// [`stop`](Self::stop). After [`dispose`](Self::dispose) the returned
    /// queue is already stopped.
    pub fn create_outgoing_queue<T: Serialize>(&self, method: &str) -> OutboundQueue<T> {
        if self.core.disposed.load(Ordering::Acquire) {
            debug!(method = %method, "manager disposed, outbound queue not started");
            return OutboundQueue::stopped(method);
        }
        let queue = OutboundQueue::spawn(&self.core.runtime, self.core.transport.clone(), method);
        if let Ok(mut queues) = self.core.queues.lock() {
            queues.push(queue.worker());
        }
        queue
    }

    /// Stops the manager and releases subscriptions and the transport.
    ///
    /// Never fails: teardown errors are logged. Idempotent.
    pub async fn dispose(&self) {
        if self.core.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.shutdown.cancel();

        if let Err(e) = self.core.stop(&CancellationToken::new()).await {
            warn!(error = %e, "stop failed during dispose");
        }

        let subscriptions = match self.core.subscriptions.lock() {
            Ok(mut subs) => std::mem::take(&mut *subs),
            Err(_) => Vec::new(),
        };
        for sub in subscriptions {
            debug!(method = %sub.method(), "disposing subscription");
            sub.dispose();
        }

        if let Err(e) = self.core.transport.dispose().await {
            warn!(error = %e, "transport dispose failed");
        }
        info!(endpoint = %self.core.options.endpoint(), "connection manager disposed");
    }

    fn subscribe(&self, method: &str, callback: InboundCallback) {
        let sub = self.core.transport.subscribe(method, callback);
        debug!(method = %method, "subscribed");
        if let Ok(mut subs) = self.core.subscriptions.lock() {
            subs.push(sub);
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.core.shutdown.cancel();
        if let Ok(queues) = self.core.queues.lock() {
            for worker in queues.iter() {
                worker.cancel();
            }
        }
    }
}

impl ManagerCore {
    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn lock_lifecycle(
        &self,
        cancel: &CancellationToken,
    ) -> Result<MutexGuard<'_, ()>, HubError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HubError::Cancelled),
            guard = self.lifecycle.lock() => Ok(guard),
        }
    }

    pub(crate) async fn ensure_started(
        &self,
        cancel: &CancellationToken,
        origin: StartOrigin,
    ) -> Result<(), HubError> {
        if self.state().is_connected() {
            return Ok(());
        }

        let _lock = self.lock_lifecycle(cancel).await?;
        if self.state().is_connected() {
            return Ok(());
        }
        match origin {
            StartOrigin::Caller => self.stopped_by_user.store(false, Ordering::Release),
            StartOrigin::Reconnect => {
                if self.stopped_by_user.load(Ordering::Acquire) {
                    debug!("stopped while waiting to reconnect, skipping");
                    return Ok(());
                }
            }
        }

        self.state.send_replace(ConnectionState::Connecting);
        let epoch = self.closed_epoch.load(Ordering::Acquire);
        debug!(endpoint = %self.options.endpoint(), "connecting to hub");

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(HubError::Cancelled),
            r = self.transport.connect() => r,
        };

        match result {
            Ok(()) => {
                // A closed notification that raced the connect wins.
                let connected = self.state.send_if_modified(|state| {
                    if self.closed_epoch.load(Ordering::Acquire) != epoch {
                        return false;
                    }
                    *state = ConnectionState::Connected;
                    true
                });
                if !connected {
                    warn!(endpoint = %self.options.endpoint(), "connection closed while connecting");
                    return Err(HubError::Closed);
                }
                info!(endpoint = %self.options.endpoint(), "connected to hub");
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(ConnectionState::Disconnected);
                warn!(endpoint = %self.options.endpoint(), error = %e, "connect failed");
                Err(e)
            }
        }
    }

    pub(crate) async fn stop(&self, cancel: &CancellationToken) -> Result<(), HubError> {
        let _lock = self.lock_lifecycle(cancel).await?;
        self.stopped_by_user.store(true, Ordering::Release);

        self.stop_queues().await;

        if self.state() != ConnectionState::Disconnected {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(HubError::Cancelled),
                r = self.transport.disconnect() => r,
            };
            match result {
                Ok(()) => info!(endpoint = %self.options.endpoint(), "disconnected from hub"),
                Err(HubError::Cancelled) => {
                    self.state.send_replace(ConnectionState::Disconnected);
                    return Err(HubError::Cancelled);
                }
                Err(e) => warn!(error = %e, "disconnect failed, continuing"),
            }
        }

        self.state.send_replace(ConnectionState::Disconnected);
        Ok(())
    }

    /// Stops every registered queue concurrently; each stop is bounded.
    async fn stop_queues(&self) {
        let workers = match self.queues.lock() {
            Ok(mut queues) => std::mem::take(&mut *queues),
            Err(_) => Vec::new(),
        };
        if workers.is_empty() {
            return;
        }

        let mut stops = JoinSet::new();
        for worker in workers {
            debug!(method = %worker.method(), "stopping outbound queue");
            stops.spawn_on(async move { worker.stop().await }, &self.runtime);
        }
        while let Some(result) = stops.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "outbound queue stop task failed");
            }
        }
    }
}
