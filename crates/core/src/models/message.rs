//! Chat message models

use crate::types::{MessageId, PharmacyId, RoomId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chat message within an order room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    /// Pharmacy the room belongs to, when the event carries it.
    /// Needed so a self-healed room lands in the right room list.
    #[serde(default)]
    pub pharmacy_id: Option<PharmacyId>,
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    /// True while this is an optimistic local copy awaiting the server echo
    #[serde(default, skip_serializing)]
    pub pending: bool,
}

/// Response from GET /rooms/{id}/messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessagesResponse {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub has_more: bool,
}

/// Request body for POST /rooms/{id}/messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub body: String,
}

/// Response from POST /rooms/{id}/messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message: ChatMessage,
}
