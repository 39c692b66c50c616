//! PharmaLink Core - Shared data models, types, events, and errors

pub mod errors;
pub mod events;
pub mod models;
pub mod types;

pub use errors::{Error, Result};
pub use events::*;
pub use models::*;
pub use types::*;
