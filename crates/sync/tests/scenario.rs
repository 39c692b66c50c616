//! End-to-end reconciliation scenario: a session joins its pharmacy
//! scope before the connection is up, receives pushed events (including
//! duplicates, aliased kinds, and out-of-order delivery), drops and
//! reconnects, and ends with a consistent cache and an exact rejoin set.

use pharmalink_core::{MessageId, OrderId, OrderStatus, PharmacyId, RoomId, Scope};
use pharmalink_store::SyncStore;
use pharmalink_sync::{EventDispatcher, ScopeMembership};
use std::sync::Arc;

fn chat_event(id: &str, room: &str, sent_at: &str) -> String {
    format!(
        r#"{{"kind":"chat.message","payload":{{
            "id":"{id}","roomId":"{room}","pharmacyId":"P1",
            "senderId":"patient-7","senderName":"Alex",
            "body":"msg {id}","sentAt":"{sent_at}"}}}}"#
    )
}

#[test]
fn full_session_converges_after_reconnect() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let store = Arc::new(SyncStore::new());
    let dispatcher = EventDispatcher::new(Arc::clone(&store));
    let membership = ScopeMembership::new();

    // Pharmacy scope requested before the socket is up: buffered, not lost
    assert!(membership
        .join(Scope::Pharmacy(PharmacyId::new("P1")), false)
        .is_none());

    // Connection comes up: exactly one joinPharmacy for P1
    let rejoin = membership.rejoin_all();
    assert_eq!(rejoin.len(), 1);
    assert_eq!(rejoin[0].event, "joinPharmacy");
    assert_eq!(rejoin[0].id, "P1");

    // New order arrives over the push channel
    dispatcher.on_raw(
        r#"{"kind":"order.new","payload":{
            "id":"O1","pharmacyId":"P1","status":"received",
            "roomId":"R1","patientName":"Alex",
            "updatedAt":"2026-08-24T10:00:00Z"}}"#,
    );
    assert_eq!(
        store.order(&OrderId::new("O1")).unwrap().status,
        OrderStatus::Received
    );

    // First message for a room the room list has never seen: the room
    // self-heals into the list with the message as its preview
    dispatcher.on_raw(&chat_event("M1", "R1", "2026-08-24T10:01:00Z"));
    let list = store.room_list(&PharmacyId::new("P1"));
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, RoomId::new("R1"));
    assert_eq!(list[0].unread_count, 1);
    assert_eq!(
        list[0].last_message.as_ref().unwrap().id,
        MessageId::new("M1")
    );

    // At-least-once delivery: the duplicate is a no-op
    dispatcher.on_raw(&chat_event("M1", "R1", "2026-08-24T10:01:00Z"));
    assert_eq!(store.room_messages(&RoomId::new("R1")).len(), 1);
    assert_eq!(store.room(&RoomId::new("R1")).unwrap().unread_count, 1);

    // Out-of-order delivery: M3 lands before M2, collection re-sorts and
    // the summary keeps the newest message
    dispatcher.on_raw(&chat_event("M3", "R1", "2026-08-24T10:03:00Z"));
    dispatcher.on_raw(&chat_event("M2", "R1", "2026-08-24T10:02:00Z"));
    let messages = store.room_messages(&RoomId::new("R1"));
    let ids: Vec<&str> = messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["M1", "M2", "M3"]);
    let summary = store.room(&RoomId::new("R1")).unwrap();
    assert_eq!(summary.last_message.as_ref().unwrap().id, MessageId::new("M3"));
    assert_eq!(summary.unread_count, 3);

    // Colon-delimited alias updates the order; a later stale duplicate of
    // the older state is rejected
    dispatcher.on_raw(
        r#"{"kind":"order:updated","payload":{
            "id":"O1","pharmacyId":"P1","status":"ready",
            "updatedAt":"2026-08-24T10:05:00Z"}}"#,
    );
    dispatcher.on_raw(
        r#"{"kind":"order.updated","payload":{
            "id":"O1","pharmacyId":"P1","status":"preparing",
            "updatedAt":"2026-08-24T10:04:00Z"}}"#,
    );
    assert_eq!(
        store.order(&OrderId::new("O1")).unwrap().status,
        OrderStatus::Ready
    );

    // Unknown and malformed frames pass through without damage
    dispatcher.on_raw(r#"{"kind":"loyalty.points","payload":{"points":9}}"#);
    dispatcher.on_raw("garbage");
    assert_eq!(store.room_messages(&RoomId::new("R1")).len(), 3);

    // Connection drops and comes back: the rejoin set is still exactly
    // the pre-disconnect membership
    let rejoin = membership.rejoin_all();
    assert_eq!(rejoin.len(), 1);
    assert_eq!(rejoin[0].event, "joinPharmacy");
    assert_eq!(rejoin[0].id, "P1");

    // Post-reconnect REST hydration with a stale room summary does not
    // regress the event-driven cache
    let stale_rooms = store.room_list(&PharmacyId::new("P1"));
    store.hydrate_rooms(
        stale_rooms
            .into_iter()
            .map(|mut s| {
                s.updated_at = s.updated_at - chrono::Duration::minutes(10);
                s.last_message = None;
                s
            })
            .collect(),
    );
    let summary = store.room(&RoomId::new("R1")).unwrap();
    assert_eq!(summary.last_message.as_ref().unwrap().id, MessageId::new("M3"));
}
