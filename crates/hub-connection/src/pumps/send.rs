//! Outbound send pump: forwards queued payloads to the transport.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::HubError;
use crate::transport::HubTransport;

/// Sends queued payloads for `method` until cancelled.
///
/// Delivery is at-most-once: a failed send is logged and the payload
/// dropped. Cancellation abandons any in-flight send.
pub(crate) async fn send_pump(
    transport: Arc<dyn HubTransport>,
    method: String,
    mut rx: mpsc::UnboundedReceiver<Value>,
    pending: Arc<AtomicUsize>,
    cancel: CancellationToken,
) {
    loop {
        let payload = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(p) => p,
                None => break,
            },
        };
        pending.fetch_sub(1, Ordering::AcqRel);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(method = %method, "in-flight send abandoned");
                break;
            }
            result = transport.send(&method, payload) => match result {
                Ok(()) => {
                    trace!(method = %method, "sent");
                    tokio::task::yield_now().await;
                }
                Err(HubError::Cancelled) => break,
                Err(e) => warn!(method = %method, error = %e, "send failed, dropping item"),
            },
        }
    }

    debug!(method = %method, "send pump stopped");
}
