//! Disconnect fallback poller
//!
//! While the push channel is down the joined scopes are refreshed over
//! REST on a fixed cadence, so the portal degrades to polling instead of
//! freezing. Arming and disarming key off [`ConnectionState`] transitions
//! observed on the watch channel, never off per-request error guesses: a
//! failed poll proves nothing about the socket.

use async_trait::async_trait;
use pharmalink_core::{Result, Scope};
use pharmalink_networking::{ConnectionState, PortalClient};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::membership::ScopeMembership;

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 60;

/// One round of REST refresh for whatever needs refreshing
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(&self) -> Result<()>;
}

/// Refreshes every currently-joined scope through the portal REST API.
///
/// Results land in the store through the same reconciliation rules as
/// push events, so a poll response can never clobber fresher data.
pub struct ScopeRefresher {
    client: Arc<PortalClient>,
    membership: Arc<ScopeMembership>,
}

impl ScopeRefresher {
    pub fn new(client: Arc<PortalClient>, membership: Arc<ScopeMembership>) -> Self {
        Self { client, membership }
    }
}

#[async_trait]
impl Refresher for ScopeRefresher {
    async fn refresh(&self) -> Result<()> {
        let scopes = self.membership.current();
        debug!(scopes = scopes.len(), "Fallback poll refreshing joined scopes");

        for scope in scopes {
            // One failed scope must not starve the rest
            let result = match &scope {
                Scope::Pharmacy(id) => self.client.get_room_list(id).await.map(|_| ()),
                Scope::Order(id) => self.client.get_order(id).await.map(|_| ()),
                Scope::Dispatch(id) => self.client.get_dispatch(id).await.map(|_| ()),
            };
            if let Err(e) = result {
                warn!(scope = %scope, error = %e, "Fallback refresh failed for scope");
            }
        }
        Ok(())
    }
}

/// Handle for the fallback poller task
pub struct FallbackPollerHandle {
    cancel: CancellationToken,
}

impl FallbackPollerHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for FallbackPollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawn the fallback poller.
///
/// The task sleeps whenever the connection is up and polls on `interval`
/// whenever it is not. The state is re-checked right before each refresh
/// so a reconnect that lands during the sleep suppresses the poll.
pub fn spawn_fallback_poller(
    refresher: Arc<dyn Refresher>,
    mut state_rx: watch::Receiver<ConnectionState>,
    interval: Duration,
) -> FallbackPollerHandle {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    tokio::spawn(async move {
        'armed: loop {
            if state_rx.borrow().is_connected() {
                // Armed only by a transition away from Connected
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                }
            }

            // The deadline is fixed when the poll cycle starts: state-watch
            // wakeups that still read not-Connected (reconnect attempts
            // cycling through Reconnecting) must not push it back, or a
            // flapping connection starves the poll entirely.
            let deadline = Instant::now() + interval;
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break 'armed,
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            break 'armed;
                        }
                        if state_rx.borrow().is_connected() {
                            continue 'armed;
                        }
                    }
                    _ = sleep_until(deadline) => {
                        if !state_rx.borrow().is_connected() {
                            if let Err(e) = refresher.refresh().await {
                                warn!(error = %e, "Fallback poll round failed");
                            }
                        }
                        continue 'armed;
                    }
                }
            }
        }
        debug!("Fallback poller exited");
    });

    FallbackPollerHandle { cancel }
}
