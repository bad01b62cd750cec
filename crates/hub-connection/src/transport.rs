//! Abstract transport seam.
//!
//! The hub client coordinates an already-implemented bidirectional
//! connection. Anything that can connect, disconnect, send a named payload,
//! deliver named push payloads and report closure can back a
//! [`ConnectionManager`](crate::ConnectionManager).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::HubError;

/// Callback invoked for every push payload on a subscribed method.
///
/// May be called from any thread.
pub type InboundCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Callback invoked when the connection closes. Carries the error that
/// caused the closure, if any.
pub type ClosedCallback = Arc<dyn Fn(Option<&HubError>) + Send + Sync>;

/// A bidirectional hub connection.
#[async_trait]
pub trait HubTransport: Send + Sync + 'static {
    /// Opens the connection.
    async fn connect(&self) -> Result<(), HubError>;

    /// Closes the connection.
    async fn disconnect(&self) -> Result<(), HubError>;

    /// Invokes `method` on the hub with `payload`.
    async fn send(&self, method: &str, payload: Value) -> Result<(), HubError>;

    /// Routes push payloads for `method` to `callback` until the returned
    /// [`Subscription`] is disposed.
    fn subscribe(&self, method: &str, callback: InboundCallback) -> Subscription;

    /// Registers the closed-notification callback. Replaces any previous one.
    fn on_closed(&self, callback: ClosedCallback);

    /// Releases transport resources. Called once, after disconnect.
    async fn dispose(&self) -> Result<(), HubError> {
        Ok(())
    }
}

/// Handle for a method subscription registered with a transport.
///
/// Disposing runs the transport's unsubscribe action. Dropping without
/// disposing leaves the callback registered.
pub struct Subscription {
    method: String,
    unsubscribe: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Creates a handle whose disposal runs `unsubscribe`.
    pub fn new(method: impl Into<String>, unsubscribe: impl FnOnce() + Send + 'static) -> Self {
        Self {
            method: method.into(),
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// Creates a handle with nothing to undo.
    pub fn detached(method: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            unsubscribe: None,
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Unregisters the callback from the transport.
    pub fn dispose(mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("method", &self.method)
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn dispose_runs_unsubscribe_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::new("Ping", move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(sub.method(), "Ping");
        sub.dispose();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_does_not_unsubscribe() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let sub = Subscription::new("Ping", move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn detached_dispose_is_noop() {
        let sub = Subscription::detached("Notify");
        assert!(format!("{sub:?}").contains("active: false"));
        sub.dispose();
    }
}
