//! Room summary models

use crate::models::ChatMessage;
use crate::types::{OrderId, PharmacyId, RoomId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived summary of an order chat room.
///
/// `updated_at` never moves backwards; the reconciler guards every write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    /// May be unknown for a self-healed room whose event carried no scope
    #[serde(default)]
    pub pharmacy_id: Option<PharmacyId>,
    #[serde(default)]
    pub order_id: Option<OrderId>,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub last_message: Option<ChatMessage>,
    #[serde(default)]
    pub unread_count: u32,
    pub updated_at: DateTime<Utc>,
}

impl RoomSummary {
    /// Minimal summary synthesized from a message event for a room the
    /// client has never seen (the room list self-heals without a refetch).
    pub fn from_message(message: &ChatMessage) -> Self {
        RoomSummary {
            id: message.room_id.clone(),
            pharmacy_id: message.pharmacy_id.clone(),
            order_id: None,
            patient_name: None,
            last_message: None,
            unread_count: 0,
            updated_at: message.sent_at,
        }
    }
}

/// Response from GET /pharmacies/{id}/rooms
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomListResponse {
    pub rooms: Vec<RoomSummary>,
}
