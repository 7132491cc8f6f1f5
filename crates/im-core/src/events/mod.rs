//! Presence events emitted when connection membership changes

mod presence_event;

pub use presence_event::{PresenceChange, PresenceEvent};
