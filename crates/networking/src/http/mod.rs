//! REST client for hydration, fallback refresh, and user mutations

mod client;

pub use client::PortalClient;
