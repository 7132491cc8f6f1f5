//! Platform identifiers and terminal classes
//!
//! A platform is the client device type a connection was opened from. Login
//! conflict rules group platforms into coarser terminal classes.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Client platform identifier (small integer on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlatformId(i32);

impl PlatformId {
    pub const IOS: Self = Self(1);
    pub const ANDROID: Self = Self(2);
    pub const WINDOWS: Self = Self(3);
    pub const MACOS: Self = Self(4);
    pub const WEB: Self = Self(5);
    pub const MINI_WEB: Self = Self(6);
    pub const LINUX: Self = Self(7);
    pub const ANDROID_PAD: Self = Self(8);
    pub const IPAD: Self = Self(9);
    pub const ADMIN: Self = Self(10);
    pub const HARMONY_OS: Self = Self(11);

    /// Create a platform ID from its raw wire value
    #[inline]
    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    /// Get the raw wire value
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// Human-readable platform name, `"Unknown"` for unmapped values
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0 {
            1 => "IOS",
            2 => "Android",
            3 => "Windows",
            4 => "OSX",
            5 => "Web",
            6 => "MiniWeb",
            7 => "Linux",
            8 => "AndroidPad",
            9 => "IPad",
            10 => "Admin",
            11 => "HarmonyOS",
            _ => "Unknown",
        }
    }

    /// Terminal class this platform belongs to
    #[must_use]
    pub const fn terminal_class(self) -> TerminalClass {
        match self.0 {
            3 | 4 | 5 | 6 | 7 => TerminalClass::Pc,
            1 | 2 | 8 | 9 | 11 => TerminalClass::Mobile,
            _ => TerminalClass::Unclassified(self),
        }
    }

    /// Whether the platform is one of the mobile push terminals (iOS, Android)
    #[must_use]
    pub const fn is_push_terminal(self) -> bool {
        matches!(self.0, 1 | 2)
    }
}

impl From<i32> for PlatformId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl From<PlatformId> for i32 {
    fn from(id: PlatformId) -> Self {
        id.0
    }
}

impl fmt::Display for PlatformId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Coarse platform grouping used by login-conflict policies
///
/// A platform outside the lookup table forms its own singleton class, so two
/// connections only share an unclassified class when they share the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminalClass {
    Pc,
    Mobile,
    Unclassified(PlatformId),
}

impl TerminalClass {
    #[must_use]
    pub const fn is_pc(self) -> bool {
        matches!(self, Self::Pc)
    }
}

impl fmt::Display for TerminalClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pc => write!(f, "PC"),
            Self::Mobile => write!(f, "Mobile"),
            Self::Unclassified(id) => write!(f, "Platform({id})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_class_table() {
        assert_eq!(PlatformId::WEB.terminal_class(), TerminalClass::Pc);
        assert_eq!(PlatformId::WINDOWS.terminal_class(), TerminalClass::Pc);
        assert_eq!(PlatformId::LINUX.terminal_class(), TerminalClass::Pc);
        assert_eq!(PlatformId::IOS.terminal_class(), TerminalClass::Mobile);
        assert_eq!(PlatformId::ANDROID.terminal_class(), TerminalClass::Mobile);
    }

    #[test]
    fn test_unmapped_platform_is_singleton_class() {
        let admin = PlatformId::ADMIN.terminal_class();
        let unknown = PlatformId::new(42).terminal_class();

        assert_eq!(admin, TerminalClass::Unclassified(PlatformId::ADMIN));
        assert_ne!(admin, unknown);
        assert_eq!(unknown, PlatformId::new(42).terminal_class());
        assert!(!admin.is_pc());
    }

    #[test]
    fn test_platform_names() {
        assert_eq!(PlatformId::IOS.name(), "IOS");
        assert_eq!(PlatformId::MACOS.name(), "OSX");
        assert_eq!(PlatformId::new(0).name(), "Unknown");
    }

    #[test]
    fn test_push_terminals() {
        assert!(PlatformId::IOS.is_push_terminal());
        assert!(PlatformId::ANDROID.is_push_terminal());
        assert!(!PlatformId::WEB.is_push_terminal());
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&PlatformId::WEB).unwrap();
        assert_eq!(json, "5");
        let parsed: PlatformId = serde_json::from_str("2").unwrap();
        assert_eq!(parsed, PlatformId::ANDROID);
    }
}
