//! PharmaLink Sync - Scope membership, event dispatch, and fallback polling

pub mod dispatcher;
pub mod engine;
pub mod membership;
pub mod poller;

pub use dispatcher::EventDispatcher;
pub use engine::{SyncConfig, SyncEngine};
pub use membership::{MembershipMessage, ScopeMembership};
pub use poller::{spawn_fallback_poller, FallbackPollerHandle, Refresher, ScopeRefresher};
