//! Integration test utilities for the gateway
//!
//! This crate starts a real gateway on a loopback port and provides
//! WebSocket and HTTP clients to drive it end to end.

pub mod fixtures;
pub mod helpers;

pub use fixtures::*;
pub use helpers::*;
