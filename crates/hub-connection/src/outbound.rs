//! Outbound send queues.
//!
//! Producers enqueue without blocking; one background pump per queue owns
//! the network I/O. Shutdown is bounded: [`OutboundQueue::stop`] cancels the
//! pump, waits at most [`STOP_TIMEOUT`], then aborts it.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::pumps::send::send_pump;
use crate::transport::HubTransport;

/// How long `stop` waits for the pump before aborting it.
pub const STOP_TIMEOUT: Duration = Duration::from_millis(250);

/// Enqueue-only handle to a background sender for one hub method.
///
/// Cloning yields another producer for the same queue.
pub struct OutboundQueue<T> {
    tx: mpsc::UnboundedSender<Value>,
    pending: Arc<AtomicUsize>,
    worker: Arc<QueueWorker>,
    _item: PhantomData<fn(T)>,
}

/// Lifecycle half of a queue, shared with the owning manager so it can stop
/// every queue without knowing item types.
pub(crate) struct QueueWorker {
    method: String,
    cancel: CancellationToken,
    task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<T: Serialize> OutboundQueue<T> {
    /// Spawns the send pump for `method` on `runtime`.
    pub(crate) fn spawn(runtime: &Handle, transport: Arc<dyn HubTransport>, method: &str) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let task = runtime.spawn(send_pump(
            transport,
            method.to_string(),
            rx,
            pending.clone(),
            cancel.clone(),
        ));
        debug!(method = %method, "outbound queue started");

        Self {
            tx,
            pending,
            worker: Arc::new(QueueWorker {
                method: method.to_string(),
                cancel,
                task: std::sync::Mutex::new(Some(task)),
            }),
            _item: PhantomData,
        }
    }

    /// Appends `item` to the queue. Never blocks.
    ///
    /// Items that fail to serialize, or arrive after the queue was stopped,
    /// are dropped.
    pub fn enqueue(&self, item: T) {
        if self.worker.is_stopped() {
            trace!(method = %self.worker.method, "queue stopped, dropping item");
            return;
        }
        let payload = match serde_json::to_value(&item) {
            Ok(v) => v,
            Err(e) => {
                warn!(method = %self.worker.method, error = %e, "failed to serialize outbound item");
                return;
            }
        };
        self.pending.fetch_add(1, Ordering::AcqRel);
        if self.tx.send(payload).is_err() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            trace!(method = %self.worker.method, "send pump gone, dropping item");
        }
    }
}

impl<T> OutboundQueue<T> {
    /// A queue with no pump behind it. Everything enqueued is dropped.
    pub(crate) fn stopped(method: &str) -> Self {
        let (tx, _) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        Self {
            tx,
            pending: Arc::new(AtomicUsize::new(0)),
            worker: Arc::new(QueueWorker {
                method: method.to_string(),
                cancel,
                task: std::sync::Mutex::new(None),
            }),
            _item: PhantomData,
        }
    }

    pub fn method(&self) -> &str {
        &self.worker.method
    }

    /// Number of items waiting to be picked up by the pump. Zero once the
    /// queue is stopped, since leftovers are discarded.
    pub fn pending(&self) -> usize {
        if self.worker.is_stopped() {
            return 0;
        }
        self.pending.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.worker.is_stopped()
    }

    /// Stops the pump. See [`STOP_TIMEOUT`].
    pub async fn stop(&self) {
        self.worker.stop().await;
    }

    pub(crate) fn worker(&self) -> Arc<QueueWorker> {
        self.worker.clone()
    }
}

impl<T> Clone for OutboundQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            pending: self.pending.clone(),
            worker: self.worker.clone(),
            _item: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for OutboundQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundQueue")
            .field("method", &self.worker.method)
            .field("pending", &self.pending())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

impl QueueWorker {
    pub(crate) fn method(&self) -> &str {
        &self.method
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Signals the pump to exit without waiting for it.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels the pump and waits up to [`STOP_TIMEOUT`] for it to exit,
    /// aborting it if it does not. Idempotent.
    pub(crate) async fn stop(&self) {
        self.cancel.cancel();

        let handle = match self.task.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(mut handle) = handle else {
            return;
        };

        match tokio::time::timeout(STOP_TIMEOUT, &mut handle).await {
            Ok(_) => debug!(method = %self.method, "outbound queue stopped"),
            Err(_) => {
                warn!(
                    method = %self.method,
                    timeout_ms = STOP_TIMEOUT.as_millis() as u64,
                    "send pump did not stop in time, aborting"
                );
                handle.abort();
            }
        }
    }
}

impl Drop for QueueWorker {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Ok(mut guard) = self.task.lock()
            && let Some(handle) = guard.take()
        {
            handle.abort();
        }
    }
}
