//! Login conflict policy

mod multi_terminal;

pub use multi_terminal::{KickDirective, MultiTerminalPolicy};
