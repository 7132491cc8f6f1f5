//! # im-gateway
//!
//! Long-connection gateway: authenticates WebSocket clients, keeps a
//! per-user registry of their platform connections, resolves login conflicts,
//! and distributes presence between gateway instances.

pub mod connection;
pub mod handlers;
pub mod policy;
pub mod presence;
pub mod protocol;
pub mod registry;
pub mod server;

pub use handlers::{GatewayError, GatewayResult, HttpMessageService};
pub use server::{create_app, create_router, run, HttpPeerGateway, WsServer, WsServerBuilder};
