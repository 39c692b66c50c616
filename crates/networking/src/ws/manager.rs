//! Portal WebSocket connection manager with automatic reconnection
//!
//! One persistent connection per authenticated session. The manager owns
//! the reconnect loop; consumers observe only the [`ConnectionState`]
//! watch channel and the callback hooks. The bearer token is re-read from
//! the supplier on every attempt, and a missing token parks the loop
//! (fatal-for-now) instead of hammering the server.

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pharmalink_core::{Error, Result};

use super::config::WsConfig;
use super::state::ConnectionState;
use crate::token::TokenSupplier;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Callback hooks for connection lifecycle and inbound frames
#[async_trait]
pub trait ConnectionCallback: Send + Sync {
    /// Called on every transition into Connected, including reconnections.
    /// Scope rejoin happens here.
    async fn on_connected(&self);

    /// Called when the connection is lost or closed
    async fn on_disconnected(&self, reason: Option<String>);

    /// Called with each raw text frame from the server
    async fn on_event(&self, raw: String);

    /// Called before each reconnection attempt
    async fn on_reconnecting(&self, attempt: u32) {
        let _ = attempt;
    }
}

/// Manages the single portal WebSocket connection for a session.
///
/// `connect` is idempotent unless forced; `disconnect` cancels the
/// supervisor task along with any pending reconnect timer, so no zombie
/// reconnect can fire after intentional teardown.
pub struct ConnectionManager {
    config: WsConfig,
    token_supplier: Arc<dyn TokenSupplier>,
    callback: RwLock<Option<Arc<dyn ConnectionCallback>>>,
    state_tx: watch::Sender<ConnectionState>,
    send_tx: Mutex<Option<mpsc::Sender<String>>>,
    supervisor: Mutex<Option<CancellationToken>>,
    reconnect_attempts: AtomicU32,
}

impl ConnectionManager {
    pub fn new(config: WsConfig, token_supplier: Arc<dyn TokenSupplier>) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            config,
            token_supplier,
            callback: RwLock::new(None),
            state_tx,
            send_tx: Mutex::new(None),
            supervisor: Mutex::new(None),
            reconnect_attempts: AtomicU32::new(0),
        }
    }

    /// Set the callback for lifecycle events and inbound frames
    pub fn set_callback(&self, callback: Arc<dyn ConnectionCallback>) {
        if let Ok(mut guard) = self.callback.write() {
            *guard = Some(callback);
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    /// Watch channel for state transitions; the fallback poller arms and
    /// disarms off this, never off ad-hoc boolean flags.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Start the connection supervisor.
    ///
    /// Idempotent while a supervisor is running; `force` tears the current
    /// connection down first (manual "Retry" actions). Returns
    /// `TokenExpired` without starting anything when the supplier has no
    /// token: that is a logged-out session, not an outage.
    pub async fn connect(self: &Arc<Self>, force: bool) -> Result<()> {
        if force {
            self.disconnect().await;
        }

        // Idempotence is keyed on the supervisor slot, not the state enum:
        // a token-parked supervisor reads Disconnected but is still alive,
        // and starting a second one would orphan its cancellation token.
        let cancel = CancellationToken::new();
        {
            let Ok(mut guard) = self.supervisor.lock() else {
                return Err(Error::Unknown("supervisor lock poisoned".to_string()));
            };
            if guard.is_some() {
                return Ok(());
            }
            if self.current_token().is_none() {
                return Err(Error::TokenExpired);
            }
            *guard = Some(cancel.clone());
        }
        self.set_state(ConnectionState::Connecting);

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_supervisor(cancel).await;
        });

        Ok(())
    }

    /// Tear down the connection and cancel any pending reconnect timer
    pub async fn disconnect(&self) {
        let cancel = self.supervisor.lock().ok().and_then(|mut g| g.take());
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        if let Ok(mut guard) = self.send_tx.lock() {
            *guard = None;
        }
        self.reconnect_attempts.store(0, Ordering::SeqCst);

        let was_connected = self.is_connected();
        self.set_state(ConnectionState::Disconnected);
        if was_connected {
            if let Some(cb) = self.callback() {
                cb.on_disconnected(Some("client disconnected".to_string()))
                    .await;
            }
            info!("WebSocket disconnected");
        }
    }

    /// Send a JSON message over the live connection (fire-and-forget from
    /// the caller's perspective; membership messages need no ack)
    pub async fn send_json<T: serde::Serialize>(&self, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        let tx = self
            .send_tx
            .lock()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or_else(|| Error::ConnectionClosed("not connected".to_string()))?;
        tx.send(text)
            .await
            .map_err(|_| Error::ConnectionClosed("send channel closed".to_string()))
    }

    fn callback(&self) -> Option<Arc<dyn ConnectionCallback>> {
        self.callback.read().ok().and_then(|guard| guard.clone())
    }

    /// Publish a state transition. Only real changes notify watchers; the
    /// supervisor re-asserts `Reconnecting` on every attempt and watchers
    /// (the fallback poller in particular) must not be woken for that.
    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }

    fn current_token(&self) -> Option<String> {
        self.token_supplier.token().filter(|t| !t.is_empty())
    }

    /// Connection supervisor: dial, pump until the connection drops, wait
    /// out the jittered interval, repeat. Exits only on cancellation or
    /// when reconnection is disabled.
    async fn run_supervisor(self: Arc<Self>, cancel: CancellationToken) {
        let mut first_attempt = true;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            // Token re-read on every attempt so a session refresh is
            // honored mid-flight. No token parks the loop: the supplier is
            // re-checked each interval but the transport is not dialed.
            let Some(token) = self.current_token() else {
                debug!("No session token; parking until the supplier observes one");
                self.set_state(ConnectionState::Disconnected);
                if wait_or_cancelled(&cancel, &self.config).await {
                    break;
                }
                continue;
            };

            if !first_attempt {
                let attempt = self.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                self.set_state(ConnectionState::Reconnecting);
                if let Some(cb) = self.callback() {
                    cb.on_reconnecting(attempt).await;
                }
            }
            first_attempt = false;

            match self.dial(&token).await {
                Ok(stream) => {
                    self.reconnect_attempts.store(0, Ordering::SeqCst);
                    let reason = self.run_connection(stream, &cancel).await;
                    if let Ok(mut guard) = self.send_tx.lock() {
                        *guard = None;
                    }
                    if cancel.is_cancelled() {
                        break;
                    }
                    self.set_state(ConnectionState::Reconnecting);
                    if let Some(cb) = self.callback() {
                        cb.on_disconnected(reason).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Connection attempt failed");
                    if cancel.is_cancelled() {
                        break;
                    }
                }
            }

            if !self.config.reconnect_enabled {
                self.set_state(ConnectionState::Disconnected);
                break;
            }
            if wait_or_cancelled(&cancel, &self.config).await {
                break;
            }
        }

        // Free the slot on self-termination (reconnect disabled). A
        // cancelled supervisor leaves it alone: `disconnect` already took
        // it, or a forced reconnect has stored its replacement.
        if let Ok(mut guard) = self.supervisor.lock() {
            if !cancel.is_cancelled() {
                guard.take();
            }
        }
        debug!("Connection supervisor exited");
    }

    async fn dial(&self, token: &str) -> Result<WsStream> {
        let mut request = self
            .config
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| Error::TransportError(e.to_string()))?;
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| Error::AuthenticationError("token contains invalid bytes".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, value);

        let (stream, _) = timeout(self.config.connect_timeout(), connect_async(request))
            .await
            .map_err(|_| {
                Error::NetworkError(format!(
                    "connect timed out after {}ms",
                    self.config.connect_timeout_ms
                ))
            })?
            .map_err(|e| Error::TransportError(e.to_string()))?;

        Ok(stream)
    }

    /// Pump one established connection until it drops or is cancelled.
    /// Returns the disconnect reason, or None on intentional teardown.
    async fn run_connection(&self, stream: WsStream, cancel: &CancellationToken) -> Option<String> {
        let (mut sink, mut source): (WsSink, WsSource) = stream.split();

        let (send_tx, mut send_rx) = mpsc::channel::<String>(64);
        if let Ok(mut guard) = self.send_tx.lock() {
            *guard = Some(send_tx);
        }

        self.set_state(ConnectionState::Connected);
        if let Some(cb) = self.callback() {
            cb.on_connected().await;
        }
        info!(url = %self.config.url, "WebSocket connected");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = sink.close().await;
                    return None;
                }

                Some(text) = send_rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        warn!(error = %e, "Failed to send message");
                        return Some(e.to_string());
                    }
                }

                result = source.next() => {
                    match result {
                        Some(Ok(Message::Text(text))) => {
                            if let Some(cb) = self.callback() {
                                cb.on_event(text).await;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = sink.send(Message::Pong(data)).await {
                                warn!(error = %e, "Failed to send pong");
                            }
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Server closed connection");
                            return Some("server closed connection".to_string());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "WebSocket error");
                            return Some(e.to_string());
                        }
                        None => {
                            return Some("stream ended".to_string());
                        }
                    }
                }
            }
        }
    }
}

/// Sleep the jittered reconnect interval; true if cancelled meanwhile
async fn wait_or_cancelled(cancel: &CancellationToken, config: &WsConfig) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(config.jittered_reconnect_delay()) => false,
    }
}
