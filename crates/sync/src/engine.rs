//! Sync engine: wires the connection manager, membership tracker, event
//! dispatcher, store, and fallback poller into one session-scoped facade

use pharmalink_core::{DispatchId, OrderId, PharmacyId, Result, RoomId, Scope, TypingSignal, UserId};
use pharmalink_networking::{
    ConnectionCallback, ConnectionManager, ConnectionState, PortalClient, TokenSupplier, WsConfig,
};
use pharmalink_store::SyncStore;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use crate::dispatcher::EventDispatcher;
use crate::membership::{MembershipMessage, ScopeMembership};
use crate::poller::{
    spawn_fallback_poller, FallbackPollerHandle, ScopeRefresher, DEFAULT_POLL_INTERVAL_SECS,
};

/// Configuration for one portal sync session
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub ws: WsConfig,
    pub api_base_url: String,
    pub poll_interval_secs: u64,
}

impl SyncConfig {
    pub fn new(ws: WsConfig, api_base_url: impl Into<String>) -> Self {
        Self {
            ws,
            api_base_url: api_base_url.into(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

/// The client-side real-time layer for one authenticated portal session.
///
/// Owns the WebSocket connection, the scope membership set, the shared
/// cache, and the disconnect fallback poller. Consumers read through
/// [`SyncEngine::store`] and mutate through the [`PortalClient`].
pub struct SyncEngine {
    connection: Arc<ConnectionManager>,
    membership: Arc<ScopeMembership>,
    dispatcher: Arc<EventDispatcher>,
    store: Arc<SyncStore>,
    client: Arc<PortalClient>,
    poll_interval: Duration,
    poller: Mutex<Option<FallbackPollerHandle>>,
}

impl SyncEngine {
    pub fn new(config: SyncConfig, token_supplier: Arc<dyn TokenSupplier>) -> Arc<Self> {
        let store = Arc::new(SyncStore::new());
        let client = Arc::new(
            PortalClient::new(config.api_base_url, Arc::clone(&token_supplier))
                .with_store(Arc::clone(&store)),
        );
        let membership = Arc::new(ScopeMembership::new());
        let dispatcher = Arc::new(EventDispatcher::new(Arc::clone(&store)));
        let connection = Arc::new(ConnectionManager::new(config.ws, token_supplier));

        connection.set_callback(Arc::new(EngineCallback {
            connection: Arc::downgrade(&connection),
            membership: Arc::clone(&membership),
            dispatcher: Arc::clone(&dispatcher),
        }));

        Arc::new(Self {
            connection,
            membership,
            dispatcher,
            store,
            client,
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            poller: Mutex::new(None),
        })
    }

    /// Start the session: connect the push channel and arm the fallback
    /// poller off the connection state watch
    pub async fn start(&self) -> Result<()> {
        if let Ok(mut guard) = self.poller.lock() {
            if guard.is_none() {
                let refresher = Arc::new(ScopeRefresher::new(
                    Arc::clone(&self.client),
                    Arc::clone(&self.membership),
                ));
                *guard = Some(spawn_fallback_poller(
                    refresher,
                    self.connection.state_watch(),
                    self.poll_interval,
                ));
            }
        }
        self.connection.connect(false).await
    }

    /// Tear the session down: connection, reconnect timer, and poller
    pub async fn stop(&self) {
        self.connection.disconnect().await;
        if let Ok(mut guard) = self.poller.lock() {
            if let Some(handle) = guard.take() {
                handle.stop();
            }
        }
        info!("Sync engine stopped");
    }

    /// Manual retry: force a fresh connection attempt immediately
    pub async fn retry(&self) -> Result<()> {
        self.connection.connect(true).await
    }

    /// Join the pharmacy-wide scope. Sticky for the session: the room
    /// list and order feed depend on it, so there is no leave counterpart.
    pub async fn join_pharmacy(&self, pharmacy: PharmacyId) {
        self.join(Scope::Pharmacy(pharmacy)).await;
    }

    pub async fn join_order(&self, order: OrderId) {
        self.join(Scope::Order(order)).await;
    }

    pub async fn join_dispatch(&self, dispatch: DispatchId) {
        self.join(Scope::Dispatch(dispatch)).await;
    }

    pub async fn leave_order(&self, order: OrderId) {
        self.leave(Scope::Order(order)).await;
    }

    pub async fn leave_dispatch(&self, dispatch: DispatchId) {
        self.leave(Scope::Dispatch(dispatch)).await;
    }

    async fn join(&self, scope: Scope) {
        let message = self.membership.join(scope, self.connection.is_connected());
        self.send_membership(message).await;
    }

    async fn leave(&self, scope: Scope) {
        let message = self.membership.leave(&scope, self.connection.is_connected());
        self.send_membership(message).await;
    }

    /// Membership sends are fire-and-forget: a failed send is repaired by
    /// the full rejoin on the next transition into Connected
    async fn send_membership(&self, message: Option<MembershipMessage>) {
        if let Some(message) = message {
            if let Err(e) = self.connection.send_json(&message).await {
                warn!(event = message.event, error = %e, "Membership send failed; will rejoin on reconnect");
            }
        }
    }

    /// Record the authenticated user so their own message echoes never
    /// count as unread
    pub fn set_session_user(&self, user: UserId) {
        self.store.set_session_user(user);
    }

    pub fn mark_read(&self, room: &RoomId) {
        self.store.mark_read(room);
    }

    pub fn store(&self) -> &Arc<SyncStore> {
        &self.store
    }

    pub fn client(&self) -> &Arc<PortalClient> {
        &self.client
    }

    pub fn membership(&self) -> &Arc<ScopeMembership> {
        &self.membership
    }

    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Watch channel for the connectivity indicator
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.connection.state_watch()
    }

    pub fn subscribe_typing(&self) -> broadcast::Receiver<TypingSignal> {
        self.dispatcher.subscribe_typing()
    }
}

/// Bridges connection lifecycle into membership rejoin and event dispatch.
///
/// Holds the connection weakly; the manager owns this callback, and a
/// strong reference back would leak both.
struct EngineCallback {
    connection: Weak<ConnectionManager>,
    membership: Arc<ScopeMembership>,
    dispatcher: Arc<EventDispatcher>,
}

#[async_trait::async_trait]
impl ConnectionCallback for EngineCallback {
    async fn on_connected(&self) {
        let Some(connection) = self.connection.upgrade() else {
            return;
        };
        let rejoin = self.membership.rejoin_all();
        info!(scopes = rejoin.len(), "Connected; rejoining scopes");
        for message in rejoin {
            if let Err(e) = connection.send_json(&message).await {
                warn!(event = message.event, error = %e, "Rejoin send failed");
            }
        }
    }

    async fn on_disconnected(&self, reason: Option<String>) {
        warn!(reason = reason.as_deref().unwrap_or("unknown"), "Push channel lost");
    }

    async fn on_event(&self, raw: String) {
        self.dispatcher.on_raw(&raw);
    }

    async fn on_reconnecting(&self, attempt: u32) {
        info!(attempt, "Reconnecting to push channel");
    }
}
