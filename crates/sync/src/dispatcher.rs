//! Inbound event dispatch
//!
//! Single entry point for everything the push channel delivers. Events
//! are normalized at this boundary ([`EventKind::parse`]) and routed to
//! the store's reconciliation methods; anything malformed or unrecognized
//! is logged and dropped without disturbing the pipeline. Note that room
//! membership is not consulted here: it gates what the server sends, not
//! what the client accepts, so an event for an already-cached entity
//! still applies after a leave.

use pharmalink_core::{
    ChatMessage, DispatchRecord, EventKind, OrderRecord, TypingSignal, WireEvent,
};
use pharmalink_store::SyncStore;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Buffered typing signals per subscriber before lagging drops the oldest
const TYPING_CHANNEL_CAPACITY: usize = 64;

/// Routes raw wire events into the shared store
pub struct EventDispatcher {
    store: Arc<SyncStore>,
    /// Typing indicators are ephemeral: fanned out to UI subscribers,
    /// never written to the store
    typing_tx: broadcast::Sender<TypingSignal>,
}

impl EventDispatcher {
    pub fn new(store: Arc<SyncStore>) -> Self {
        let (typing_tx, _) = broadcast::channel(TYPING_CHANNEL_CAPACITY);
        Self { store, typing_tx }
    }

    pub fn store(&self) -> &Arc<SyncStore> {
        &self.store
    }

    /// Subscribe to live typing indicators
    pub fn subscribe_typing(&self) -> broadcast::Receiver<TypingSignal> {
        self.typing_tx.subscribe()
    }

    /// Handle one raw frame off the socket
    pub fn on_raw(&self, raw: &str) {
        match serde_json::from_str::<WireEvent>(raw) {
            Ok(event) => self.dispatch(event),
            Err(e) => {
                warn!("Dropping malformed event frame: {}", e);
            }
        }
    }

    /// Route a parsed envelope by its normalized kind
    pub fn dispatch(&self, event: WireEvent) {
        let Some(kind) = EventKind::parse(&event.kind) else {
            debug!(kind = %event.kind, "Ignoring unknown event kind");
            return;
        };

        match kind {
            // Transport lifecycle is handled by the connection manager;
            // servers that echo these as events get a no-op.
            EventKind::Connect | EventKind::Disconnect => {}
            EventKind::ChatMessage => {
                if let Some(message) = self.parse_payload::<ChatMessage>(&event) {
                    self.store.apply_chat_message(message);
                }
            }
            EventKind::OrderNew => {
                if let Some(order) = self.parse_payload::<OrderRecord>(&event) {
                    debug!(order = %order.id, "New order received");
                    self.store.apply_order_new(order);
                }
            }
            EventKind::OrderUpdated => {
                if let Some(order) = self.parse_payload::<OrderRecord>(&event) {
                    self.store.apply_order_updated(order);
                }
            }
            EventKind::DispatchUpdated => {
                if let Some(dispatch) = self.parse_payload::<DispatchRecord>(&event) {
                    self.store.apply_dispatch_updated(dispatch);
                }
            }
            EventKind::Typing => {
                if let Some(signal) = self.parse_payload::<TypingSignal>(&event) {
                    // Nobody listening is fine
                    let _ = self.typing_tx.send(signal);
                }
            }
        }
    }

    fn parse_payload<T: DeserializeOwned>(&self, event: &WireEvent) -> Option<T> {
        match serde_json::from_value(event.payload.clone()) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                warn!(kind = %event.kind, "Dropping event with malformed payload: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmalink_core::{OrderId, OrderStatus, RoomId};

    fn dispatcher() -> EventDispatcher {
        EventDispatcher::new(Arc::new(SyncStore::new()))
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let d = dispatcher();
        d.on_raw("not json at all");
        d.on_raw(r#"{"payload":{}}"#);
        assert!(d.store().room_messages(&RoomId::new("R1")).is_empty());
    }

    #[test]
    fn test_unknown_kind_is_ignored() {
        let d = dispatcher();
        d.on_raw(r#"{"kind":"inventory.recount","payload":{"anything":true}}"#);
    }

    #[test]
    fn test_chat_message_routes_to_store() {
        let d = dispatcher();
        d.on_raw(
            r#"{"kind":"chat.message","payload":{
                "id":"M1","roomId":"R1","senderId":"patient-7",
                "body":"hello","sentAt":"2026-08-24T10:00:00Z"}}"#,
        );
        let messages = d.store().room_messages(&RoomId::new("R1"));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "hello");
    }

    #[test]
    fn test_order_event_aliases_are_equivalent() {
        let payload = r#"{
            "id":"O1","pharmacyId":"P1","status":"ready",
            "updatedAt":"2026-08-24T10:00:00Z"}"#;

        let dotted = dispatcher();
        dotted.on_raw(&format!(r#"{{"kind":"order.updated","payload":{payload}}}"#));
        let colon = dispatcher();
        colon.on_raw(&format!(r#"{{"kind":"order:updated","payload":{payload}}}"#));

        let a = dotted.store().order(&OrderId::new("O1")).unwrap();
        let b = colon.store().order(&OrderId::new("O1")).unwrap();
        assert_eq!(a.status, OrderStatus::Ready);
        assert_eq!(a.status, b.status);
    }

    #[test]
    fn test_malformed_payload_for_known_kind_is_dropped() {
        let d = dispatcher();
        d.on_raw(r#"{"kind":"order.new","payload":{"id":"O1"}}"#);
        assert!(d.store().order(&OrderId::new("O1")).is_none());
    }

    #[tokio::test]
    async fn test_typing_signal_fans_out_without_caching() {
        let d = dispatcher();
        let mut rx = d.subscribe_typing();
        d.on_raw(r#"{"kind":"typing","payload":{"roomId":"R1","userId":"patient-7"}}"#);

        let signal = rx.recv().await.unwrap();
        assert_eq!(signal.room_id, RoomId::new("R1"));
        assert!(signal.typing);
        // Nothing persisted for the room
        assert!(d.store().room(&RoomId::new("R1")).is_none());
    }
}
