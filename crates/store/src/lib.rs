//! PharmaLink Store - Shared query-addressable cache and reconciliation rules

pub mod store;

pub use store::{MessageApplied, SyncStore};
