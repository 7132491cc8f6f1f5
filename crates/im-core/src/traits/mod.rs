//! Collaborator ports

mod collaborators;

pub use collaborators::{
    AuthService, MessageService, OperationContext, PeerGateway, PresenceStore, TokenClaims,
};
