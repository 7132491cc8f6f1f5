//! Value objects - immutable types that represent domain concepts

mod platform;
mod policy;

pub use platform::{PlatformId, TerminalClass};
pub use policy::{MultiLoginPolicy, PolicyParseError};
