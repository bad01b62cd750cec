//! In-memory transport.
//!
//! [`LoopbackTransport`] never touches the network. It records every call,
//! lets the caller inject push payloads and closed notifications, and can be
//! told to fail or stall connects and sends. Useful for demos and for
//! exercising a [`ConnectionManager`](crate::ConnectionManager) end to end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::HubError;
use crate::transport::{ClosedCallback, HubTransport, InboundCallback, Subscription};

type Handlers = Arc<Mutex<HashMap<String, Vec<(u64, InboundCallback)>>>>;

/// Scriptable in-memory [`HubTransport`].
#[derive(Default)]
pub struct LoopbackTransport {
    connected: AtomicBool,
    disposed: AtomicBool,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
    send_attempts: AtomicUsize,
    sent: Mutex<Vec<(String, Value)>>,
    handlers: Handlers,
    next_handler_id: AtomicU64,
    on_closed: Mutex<Option<ClosedCallback>>,
    fail_connects: AtomicBool,
    fail_disconnect: AtomicBool,
    fail_sends: AtomicBool,
    connect_delay: Mutex<Duration>,
    send_delay: Mutex<Duration>,
}

impl LoopbackTransport {
    /// A disconnected transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that is already connected, for driving sends directly.
    pub fn connected() -> Self {
        let transport = Self::default();
        transport.connected.store(true, Ordering::SeqCst);
        transport
    }

    pub fn set_fail_connects(&self, fail: bool) {
        self.fail_connects.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_disconnect(&self, fail: bool) {
        self.fail_disconnect.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        if let Ok(mut d) = self.connect_delay.lock() {
            *d = delay;
        }
    }

    pub fn set_send_delay(&self, delay: Duration) {
        if let Ok(mut d) = self.send_delay.lock() {
            *d = delay;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }

    /// Sends attempted, successful or not.
    pub fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    /// Successfully sent `(method, payload)` pairs, oldest first.
    pub fn sent(&self) -> Vec<(String, Value)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Number of live callbacks for `method`.
    pub fn subscriber_count(&self, method: &str) -> usize {
        self.handlers
            .lock()
            .map(|h| h.get(method).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    /// Delivers a push payload to every callback subscribed to `method`.
    /// Returns how many callbacks ran.
    pub fn push(&self, method: &str, payload: Value) -> usize {
        let callbacks: Vec<InboundCallback> = match self.handlers.lock() {
            Ok(h) => h
                .get(method)
                .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        };
        trace!(method = %method, receivers = callbacks.len(), "loopback push");
        for cb in &callbacks {
            cb(payload.clone());
        }
        callbacks.len()
    }

    /// Drops the connection and fires the closed notification.
    pub fn close(&self, error: Option<HubError>) {
        self.connected.store(false, Ordering::SeqCst);
        let callback = self.on_closed.lock().ok().and_then(|c| c.clone());
        debug!(error = ?error, "loopback closed");
        if let Some(cb) = callback {
            cb(error.as_ref());
        }
    }

    fn delay(slot: &Mutex<Duration>) -> Duration {
        slot.lock().map(|d| *d).unwrap_or_default()
    }
}

#[async_trait]
impl HubTransport for LoopbackTransport {
    async fn connect(&self) -> Result<(), HubError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let delay = Self::delay(&self.connect_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_connects.load(Ordering::SeqCst) {
            return Err(HubError::transport("loopback connect refused"));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), HubError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if self.fail_disconnect.load(Ordering::SeqCst) {
            return Err(HubError::transport("loopback disconnect failed"));
        }
        Ok(())
    }

    async fn send(&self, method: &str, payload: Value) -> Result<(), HubError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let delay = Self::delay(&self.send_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(HubError::transport("loopback send refused"));
        }
        if !self.is_connected() {
            return Err(HubError::Closed);
        }
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((method.to_string(), payload));
        }
        Ok(())
    }

    fn subscribe(&self, method: &str, callback: InboundCallback) -> Subscription {
        let id = self.next_handler_id.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut h) = self.handlers.lock() {
            h.entry(method.to_string()).or_default().push((id, callback));
        }

        let handlers = self.handlers.clone();
        let name = method.to_string();
        Subscription::new(method, move || {
            if let Ok(mut h) = handlers.lock()
                && let Some(list) = h.get_mut(&name)
            {
                list.retain(|(entry, _)| *entry != id);
            }
        })
    }

    fn on_closed(&self, callback: ClosedCallback) {
        if let Ok(mut c) = self.on_closed.lock() {
            *c = Some(callback);
        }
    }

    async fn dispose(&self) -> Result<(), HubError> {
        self.disposed.store(true, Ordering::SeqCst);
        if let Ok(mut h) = self.handlers.lock() {
            h.clear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn connect_and_disconnect_are_counted() {
        let t = LoopbackTransport::new();
        assert!(!t.is_connected());
        t.connect().await.unwrap();
        assert!(t.is_connected());
        t.disconnect().await.unwrap();
        assert!(!t.is_connected());
        assert_eq!(t.connect_calls(), 1);
        assert_eq!(t.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn send_requires_connection() {
        let t = LoopbackTransport::new();
        let result = t.send("Ping", json!(1)).await;
        assert!(matches!(result, Err(HubError::Closed)));
        assert_eq!(t.send_attempts(), 1);
        assert!(t.sent().is_empty());
    }

    #[test]
    fn push_reaches_subscribers_until_disposed() {
        let t = LoopbackTransport::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let sub = t.subscribe(
            "Ping",
            Arc::new(move |_: Value| {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert_eq!(t.push("Ping", json!("P")), 1);
        assert_eq!(t.push("Other", json!("P")), 0);
        sub.dispose();
        assert_eq!(t.push("Ping", json!("P")), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(t.subscriber_count("Ping"), 0);
    }

    #[test]
    fn close_fires_callback_with_error() {
        let t = LoopbackTransport::connected();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        t.on_closed(Arc::new(move |err: Option<&HubError>| {
            *s.lock().unwrap() = Some(err.map(|e| e.to_string()));
        }));

        t.close(Some(HubError::transport("reset")));

        assert!(!t.is_connected());
        assert_eq!(
            *seen.lock().unwrap(),
            Some(Some("transport error: reset".to_string()))
        );
    }
}
