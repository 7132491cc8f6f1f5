//! Multi-terminal login policy selector

use std::fmt;
use std::str::FromStr;

/// How a new login treats the user's existing connections
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum MultiLoginPolicy {
    /// Old and new connections coexist
    #[default]
    DoNotKick = 1,
    /// A mobile login evicts other mobile sessions; PC sessions survive
    PcAndOtherKick = 2,
    /// Every other session is evicted and its token invalidated
    AllLoginButSameTerminalKick = 3,
    /// Sessions of the same terminal class are evicted, tokens stay valid
    AllLoginButSameClassKick = 4,
}

impl MultiLoginPolicy {
    /// Create a policy from its numeric selector
    #[must_use]
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::DoNotKick),
            2 => Some(Self::PcAndOtherKick),
            3 => Some(Self::AllLoginButSameTerminalKick),
            4 => Some(Self::AllLoginButSameClassKick),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::DoNotKick => "do_not_kick",
            Self::PcAndOtherKick => "pc_and_other_kick",
            Self::AllLoginButSameTerminalKick => "all_login_but_same_terminal_kick",
            Self::AllLoginButSameClassKick => "all_login_but_same_class_kick",
        }
    }
}

impl fmt::Display for MultiLoginPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when a policy selector cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown multi-login policy: {0}")]
pub struct PolicyParseError(pub String);

impl FromStr for MultiLoginPolicy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(value) = trimmed.parse::<u8>() {
            return Self::from_u8(value).ok_or_else(|| PolicyParseError(s.to_string()));
        }

        match trimmed.to_lowercase().replace('-', "_").as_str() {
            "do_not_kick" => Ok(Self::DoNotKick),
            "pc_and_other_kick" => Ok(Self::PcAndOtherKick),
            "all_login_but_same_terminal_kick" => Ok(Self::AllLoginButSameTerminalKick),
            "all_login_but_same_class_kick" => Ok(Self::AllLoginButSameClassKick),
            _ => Err(PolicyParseError(s.to_string())),
        }
    }
}
