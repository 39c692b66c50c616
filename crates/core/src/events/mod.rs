//! Inbound wire events and kind normalization
//!
//! The portal backend is inconsistent about event names: older services
//! emit dotted kinds (`order.updated`), newer ones colon-delimited
//! (`order:updated`). Both are normalized into one [`EventKind`] at the
//! boundary so nothing downstream ever branches on wire spelling.

use crate::types::{RoomId, UserId};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Raw event envelope as pushed by the portal backend.
///
/// Transient: consumed once by the dispatcher and never stored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    pub kind: String,
    #[serde(default)]
    pub scope_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, deserialize_with = "deserialize_ts_lenient")]
    pub server_timestamp: Option<DateTime<Utc>>,
}

/// Normalized inbound event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Connect,
    Disconnect,
    ChatMessage,
    OrderNew,
    OrderUpdated,
    DispatchUpdated,
    Typing,
}

impl EventKind {
    /// Parse a wire event name, accepting dotted, colon-delimited, and
    /// hyphenated aliases. Returns None for kinds this client does not
    /// recognize; unknown kinds must never crash the pipeline.
    pub fn parse(raw: &str) -> Option<Self> {
        let canonical = raw.replace([':', '-'], ".");
        match canonical.as_str() {
            "connect" => Some(EventKind::Connect),
            "disconnect" => Some(EventKind::Disconnect),
            "chat.message" | "message.new" => Some(EventKind::ChatMessage),
            "order.new" => Some(EventKind::OrderNew),
            "order.updated" => Some(EventKind::OrderUpdated),
            "dispatch.updated" => Some(EventKind::DispatchUpdated),
            "typing" => Some(EventKind::Typing),
            _ => None,
        }
    }
}

/// Ephemeral typing indicator signal.
///
/// Forwarded straight to UI subscribers, never cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    pub room_id: RoomId,
    pub user_id: UserId,
    #[serde(default = "default_typing")]
    pub typing: bool,
}

fn default_typing() -> bool {
    true
}

/// Deserialize a server timestamp that may arrive as an RFC 3339 string,
/// epoch milliseconds, or be absent entirely
fn deserialize_ts_lenient<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::de;

    struct TsLenient;

    impl<'de> de::Visitor<'de> for TsLenient {
        type Value = Option<DateTime<Utc>>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("an RFC 3339 timestamp, epoch milliseconds, or null")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Self::Value, E> {
            DateTime::parse_from_rfc3339(v)
                .map(|dt| Some(dt.with_timezone(&Utc)))
                .map_err(de::Error::custom)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Self::Value, E> {
            Ok(Utc.timestamp_millis_opt(v).single())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Self::Value, E> {
            self.visit_i64(v as i64)
        }

        fn visit_none<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> std::result::Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2>(self, deserializer: D2) -> std::result::Result<Self::Value, D2::Error>
        where
            D2: serde::Deserializer<'de>,
        {
            deserializer.deserialize_any(TsLenient)
        }
    }

    deserializer.deserialize_option(TsLenient)
}
