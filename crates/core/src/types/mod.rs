//! Shared identifier newtypes and scope definitions

use serde::{Deserialize, Serialize};

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                $name(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Pharmacy identifier (the session-wide channel scope)
    PharmacyId
);
id_type!(
    /// Order identifier
    OrderId
);
id_type!(
    /// Dispatch identifier
    DispatchId
);
id_type!(
    /// Chat room identifier (one room per order conversation)
    RoomId
);
id_type!(
    /// Chat message identifier
    MessageId
);
id_type!(
    /// Portal user identifier
    UserId
);

/// A logical push channel the client can be joined to.
///
/// The pharmacy scope is session-wide and sticky; order and dispatch
/// scopes follow the lifetime of their detail views.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", content = "id", rename_all = "camelCase")]
pub enum Scope {
    Pharmacy(PharmacyId),
    Order(OrderId),
    Dispatch(DispatchId),
}

impl Scope {
    pub fn is_pharmacy(&self) -> bool {
        matches!(self, Scope::Pharmacy(_))
    }

    /// Wire name of the outbound join message for this scope
    pub fn join_event(&self) -> &'static str {
        match self {
            Scope::Pharmacy(_) => "joinPharmacy",
            Scope::Order(_) => "joinOrder",
            Scope::Dispatch(_) => "joinDispatch",
        }
    }

    /// Wire name of the outbound leave message for this scope
    pub fn leave_event(&self) -> &'static str {
        match self {
            Scope::Pharmacy(_) => "leavePharmacy",
            Scope::Order(_) => "leaveOrder",
            Scope::Dispatch(_) => "leaveDispatch",
        }
    }

    pub fn id_str(&self) -> &str {
        match self {
            Scope::Pharmacy(id) => id.as_str(),
            Scope::Order(id) => id.as_str(),
            Scope::Dispatch(id) => id.as_str(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Pharmacy(id) => write!(f, "pharmacy:{}", id),
            Scope::Order(id) => write!(f, "order:{}", id),
            Scope::Dispatch(id) => write!(f, "dispatch:{}", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_wire_names() {
        let scope = Scope::Order(OrderId::new("O1"));
        assert_eq!(scope.join_event(), "joinOrder");
        assert_eq!(scope.leave_event(), "leaveOrder");
        assert_eq!(scope.id_str(), "O1");
        assert!(!scope.is_pharmacy());
        assert!(Scope::Pharmacy(PharmacyId::new("P1")).is_pharmacy());
    }

    #[test]
    fn test_id_serde_transparent() {
        let id: RoomId = serde_json::from_str("\"R42\"").unwrap();
        assert_eq!(id, RoomId::new("R42"));
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"R42\"");
    }
}
