//! # im-core
//!
//! Domain layer for the messaging gateway: platform identifiers and terminal
//! classes, the multi-login policy selector, presence events, business errors,
//! and the ports through which the gateway reaches its collaborators.
//! This crate has no dependencies on infrastructure (transport, cache, HTTP).

pub mod error;
pub mod events;
pub mod traits;
pub mod value_objects;

// Re-export commonly used types at crate root
pub use error::{DomainError, DomainResult};
pub use events::{PresenceChange, PresenceEvent};
pub use traits::{
    AuthService, MessageService, OperationContext, PeerGateway, PresenceStore, TokenClaims,
};
pub use value_objects::{MultiLoginPolicy, PlatformId, PolicyParseError, TerminalClass};
