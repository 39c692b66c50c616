//! Dispatch models

use crate::types::{DispatchId, OrderId, PharmacyId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dispatch (courier delivery) status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DispatchStatus {
    Pending,
    Assigned,
    PickedUp,
    Delivered,
    Failed,
    #[serde(other)]
    Unknown,
}

impl DispatchStatus {
    /// Whether this dispatch counts towards active-dispatch aggregates
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            DispatchStatus::Pending | DispatchStatus::Assigned | DispatchStatus::PickedUp
        )
    }
}

/// A dispatch record, write-through cached by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRecord {
    pub id: DispatchId,
    pub pharmacy_id: PharmacyId,
    #[serde(default)]
    pub order_id: Option<OrderId>,
    pub status: DispatchStatus,
    #[serde(default)]
    pub courier_name: Option<String>,
    pub updated_at: DateTime<Utc>,
}
