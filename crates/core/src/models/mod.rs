//! Data models for PharmaLink entities

mod dispatch;
mod message;
mod order;
mod room;

pub use dispatch::*;
pub use message::*;
pub use order::*;
pub use room::*;
