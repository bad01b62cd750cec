//! Inbound delivery: direct handlers and buffered subscriptions.
//!
//! Both paths decode the raw push payload into the consumer's type and
//! drop null payloads before the consumer sees them.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::transport::InboundCallback;

/// Polling view over push payloads received for one hub method.
///
/// The transport callback fills an unbounded FIFO; the consumer drains it
/// at its own pace, typically once per application tick.
#[derive(Debug)]
pub struct BufferedSubscription<T> {
    method: String,
    rx: mpsc::UnboundedReceiver<T>,
}

impl<T> BufferedSubscription<T> {
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Pops the oldest buffered item, or `None` if nothing is waiting.
    pub fn try_dequeue(&mut self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    /// Drains everything currently buffered, oldest first.
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        std::iter::from_fn(move || self.try_dequeue())
    }
}

/// Builds the transport callback and the consumer half of a buffered
/// subscription.
pub(crate) fn buffered<T>(method: &str) -> (InboundCallback, BufferedSubscription<T>)
where
    T: DeserializeOwned + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let name = method.to_string();
    let callback: InboundCallback = Arc::new(move |payload: Value| {
        if let Some(item) = decode::<T>(&name, payload) {
            // The consumer may have dropped its handle; nothing to deliver to.
            let _ = tx.send(item);
        }
    });
    let subscription = BufferedSubscription {
        method: method.to_string(),
        rx,
    };
    (callback, subscription)
}

/// Wraps a typed handler as a pass-through transport callback.
pub(crate) fn direct<T, F>(method: &str, handler: F) -> InboundCallback
where
    T: DeserializeOwned + 'static,
    F: Fn(T) + Send + Sync + 'static,
{
    let name = method.to_string();
    Arc::new(move |payload: Value| {
        if let Some(item) = decode::<T>(&name, payload) {
            handler(item);
        }
    })
}

fn decode<T: DeserializeOwned>(method: &str, payload: Value) -> Option<T> {
    if payload.is_null() {
        trace!(method = %method, "dropping null payload");
        return None;
    }
    match serde_json::from_value(payload) {
        Ok(item) => Some(item),
        Err(e) => {
            warn!(method = %method, error = %e, "failed to decode push payload");
            None
        }
    }
}
