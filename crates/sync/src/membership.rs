//! Scope membership tracking with reconnect-safe rejoin
//!
//! The server holds no membership state across a dropped connection, so
//! the client keeps the intended scope set explicit and inspectable here
//! instead of scattering join calls through view lifecycles. On every
//! transition into Connected the full current set is rejoined, not just
//! scopes added since the last connect.

use pharmalink_core::Scope;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Mutex;

/// Outbound join/leave message, fire-and-forget on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MembershipMessage {
    pub event: &'static str,
    pub id: String,
}

impl MembershipMessage {
    fn join(scope: &Scope) -> Self {
        MembershipMessage {
            event: scope.join_event(),
            id: scope.id_str().to_string(),
        }
    }

    fn leave(scope: &Scope) -> Self {
        MembershipMessage {
            event: scope.leave_event(),
            id: scope.id_str().to_string(),
        }
    }
}

/// The set of scopes this client intends to be joined to
pub struct ScopeMembership {
    inner: Mutex<Inner>,
}

struct Inner {
    scopes: HashSet<Scope>,
    /// Joins requested before the connection reached Connected; flushed on
    /// connect rather than dropped
    pending: Vec<Scope>,
}

impl ScopeMembership {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                scopes: HashSet::new(),
                pending: Vec::new(),
            }),
        }
    }

    /// Add a scope to the membership set. Idempotent: joining a scope
    /// already in the set returns nothing to send.
    ///
    /// When `connected` the join message is returned for immediate
    /// dispatch; otherwise it is buffered until the next connect.
    pub fn join(&self, scope: Scope, connected: bool) -> Option<MembershipMessage> {
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };
        if !inner.scopes.insert(scope.clone()) {
            return None;
        }
        if connected {
            Some(MembershipMessage::join(&scope))
        } else {
            inner.pending.push(scope);
            None
        }
    }

    /// Remove a scope. Soft: only called when a consumer explicitly no
    /// longer needs it. The pharmacy scope is sticky for the session (the
    /// room list depends on it at all times) and is never left.
    pub fn leave(&self, scope: &Scope, connected: bool) -> Option<MembershipMessage> {
        if scope.is_pharmacy() {
            return None;
        }
        let Ok(mut inner) = self.inner.lock() else {
            return None;
        };
        if !inner.scopes.remove(scope) {
            return None;
        }
        inner.pending.retain(|s| s != scope);
        connected.then(|| MembershipMessage::leave(scope))
    }

    pub fn current(&self) -> HashSet<Scope> {
        self.inner
            .lock()
            .map(|inner| inner.scopes.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, scope: &Scope) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.scopes.contains(scope))
            .unwrap_or(false)
    }

    /// Join messages for the entire current set, to be issued on every
    /// transition into Connected. Drains the pending buffer: buffered
    /// scopes are already in the set and covered by the full rejoin.
    pub fn rejoin_all(&self) -> Vec<MembershipMessage> {
        let Ok(mut inner) = self.inner.lock() else {
            return Vec::new();
        };
        inner.pending.clear();
        inner.scopes.iter().map(MembershipMessage::join).collect()
    }
}

impl Default for ScopeMembership {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pharmalink_core::{DispatchId, OrderId, PharmacyId};

    fn pharmacy(id: &str) -> Scope {
        Scope::Pharmacy(PharmacyId::new(id))
    }

    fn order(id: &str) -> Scope {
        Scope::Order(OrderId::new(id))
    }

    #[test]
    fn test_join_is_idempotent() {
        let membership = ScopeMembership::new();
        assert!(membership.join(order("O1"), true).is_some());
        assert!(membership.join(order("O1"), true).is_none());
        assert_eq!(membership.current().len(), 1);
    }

    #[test]
    fn test_joins_before_connect_are_buffered_not_dropped() {
        let membership = ScopeMembership::new();
        // Not connected yet: nothing to send now
        assert!(membership.join(pharmacy("P1"), false).is_none());
        assert!(membership.join(order("O1"), false).is_none());

        // Connect: the full set is issued
        let rejoin = membership.rejoin_all();
        assert_eq!(rejoin.len(), 2);
        assert!(rejoin
            .iter()
            .any(|m| m.event == "joinPharmacy" && m.id == "P1"));
        assert!(rejoin.iter().any(|m| m.event == "joinOrder" && m.id == "O1"));
    }

    #[test]
    fn test_rejoin_issues_entire_set() {
        let membership = ScopeMembership::new();
        membership.join(pharmacy("P1"), true);
        membership.join(order("O1"), true);
        membership.join(Scope::Dispatch(DispatchId::new("D1")), true);

        // Reconnect must reproduce the exact pre-disconnect set
        let rejoin = membership.rejoin_all();
        assert_eq!(rejoin.len(), 3);
        let events: HashSet<&str> = rejoin.iter().map(|m| m.event).collect();
        assert_eq!(
            events,
            HashSet::from(["joinPharmacy", "joinOrder", "joinDispatch"])
        );
    }

    #[test]
    fn test_pharmacy_scope_is_sticky() {
        let membership = ScopeMembership::new();
        membership.join(pharmacy("P1"), true);
        assert!(membership.leave(&pharmacy("P1"), true).is_none());
        assert!(membership.contains(&pharmacy("P1")));
    }

    #[test]
    fn test_leave_removes_scope() {
        let membership = ScopeMembership::new();
        membership.join(order("O1"), true);

        let msg = membership.leave(&order("O1"), true).unwrap();
        assert_eq!(msg.event, "leaveOrder");
        assert_eq!(msg.id, "O1");
        assert!(!membership.contains(&order("O1")));

        // Leaving again is a no-op
        assert!(membership.leave(&order("O1"), true).is_none());
    }

    #[test]
    fn test_leave_while_disconnected_clears_pending() {
        let membership = ScopeMembership::new();
        membership.join(order("O1"), false);
        membership.leave(&order("O1"), false);
        assert!(membership.rejoin_all().is_empty());
    }
}
