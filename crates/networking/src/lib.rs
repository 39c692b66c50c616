//! PharmaLink Networking - REST portal client and WebSocket connection manager

pub mod http;
pub mod token;
pub mod ws;

pub use http::PortalClient;
pub use token::{StaticToken, TokenSupplier};
pub use ws::{ConnectionCallback, ConnectionManager, ConnectionState, WsConfig};
