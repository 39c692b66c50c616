//! WebSocket connection management for the portal push channel

mod config;
mod manager;
mod state;

pub use config::{WsConfig, WsConfigBuilder};
pub use manager::{ConnectionCallback, ConnectionManager};
pub use state::ConnectionState;
