//! Order models

use crate::types::{OrderId, PharmacyId, RoomId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Order lifecycle status as reported by the portal backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderStatus {
    Received,
    Preparing,
    Ready,
    InDelivery,
    Completed,
    Cancelled,
    /// Forward-compatible: statuses this client version does not know yet
    #[serde(other)]
    Unknown,
}

/// An order record, write-through cached by id.
///
/// `updated_at` is the server-side modification timestamp used by the
/// recency guard (last-writer-wins by recency, not arrival order).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: OrderId,
    pub pharmacy_id: PharmacyId,
    pub status: OrderStatus,
    #[serde(default)]
    pub room_id: Option<RoomId>,
    #[serde(default)]
    pub patient_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}
