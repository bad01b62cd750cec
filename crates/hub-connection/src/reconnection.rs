//! Reconnection driven by the transport's closed notification.
//!
//! There is no retry loop. Each closed notification schedules at most one
//! backoff-delayed reconnect attempt; if that attempt fails, the transport's
//! next closed notification schedules the next one. [`ReconnectGuard`]
//! keeps overlapping notifications from starting a second attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::{debug, info, warn};

use crate::error::HubError;
use crate::manager::{ManagerCore, StartOrigin};
use crate::transport::ClosedCallback;
use crate::types::ConnectionState;

/// Held while a reconnect attempt is in flight. Releases the flag on drop,
/// whatever the outcome of the attempt.
#[derive(Debug)]
pub(crate) struct ReconnectGuard {
    flag: Arc<AtomicBool>,
}

impl ReconnectGuard {
    /// Takes the flag, or returns `None` if another attempt holds it.
    pub(crate) fn try_acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for ReconnectGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Builds the closed-notification callback for a manager.
///
/// Holds the manager weakly: the transport owns the callback and the
/// manager owns the transport.
pub(crate) fn closed_handler(core: Weak<ManagerCore>) -> ClosedCallback {
    Arc::new(move |error: Option<&HubError>| {
        if let Some(core) = core.upgrade() {
            on_closed(&core, error);
        }
    })
}

fn on_closed(core: &Arc<ManagerCore>, error: Option<&HubError>) {
    core.state.send_modify(|state| {
        core.closed_epoch.fetch_add(1, Ordering::AcqRel);
        *state = ConnectionState::Disconnected;
    });
    match error {
        Some(e) => warn!(endpoint = %core.options.endpoint(), error = %e, "hub connection closed"),
        None => info!(endpoint = %core.options.endpoint(), "hub connection closed"),
    }

    if core.shutdown.is_cancelled() || core.stopped_by_user.load(Ordering::Acquire) {
        debug!("connection stopped deliberately, not reconnecting");
        return;
    }

    let Some(guard) = ReconnectGuard::try_acquire(&core.reconnecting) else {
        debug!("reconnect already in progress");
        return;
    };

    core.runtime.spawn(reconnect(core.clone(), guard));
}

/// Backoff, then a start. Failures are logged and swallowed. A closed
/// notification that lands while the start is in flight finds the guard
/// taken, so this task retries on its behalf.
async fn reconnect(core: Arc<ManagerCore>, _guard: ReconnectGuard) {
    loop {
        let delay = core.options.sample_backoff();
        info!(
            endpoint = %core.options.endpoint(),
            delay_ms = delay.as_millis() as u64,
            "reconnecting"
        );

        tokio::select! {
            biased;
            _ = core.shutdown.cancelled() => {
                debug!("reconnect cancelled");
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let epoch = core.closed_epoch.load(Ordering::Acquire);
        match core
            .ensure_started(&core.shutdown, StartOrigin::Reconnect)
            .await
        {
            Ok(()) => {
                if core.state().is_connected() {
                    info!(endpoint = %core.options.endpoint(), "reconnected");
                }
            }
            Err(e) => warn!(
                endpoint = %core.options.endpoint(),
                error = %e,
                "reconnect attempt failed"
            ),
        }

        let closed_meanwhile = core.closed_epoch.load(Ordering::Acquire) != epoch;
        if !closed_meanwhile
            || core.shutdown.is_cancelled()
            || core.stopped_by_user.load(Ordering::Acquire)
        {
            return;
        }
        debug!("connection closed during reconnect, retrying");
    }
}
