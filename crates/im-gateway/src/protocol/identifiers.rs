//! Frame identifiers
//!
//! Every envelope carries a `reqIdentifier`. Client requests and server pushes
//! use disjoint value ranges.

use std::fmt;

/// Request kinds a client may send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RequestKind {
    /// Latest sequence numbers of the user's conversations
    GetNewestSeq = 1001,
    /// Pull messages by explicit sequence list
    PullMsgBySeqList = 1002,
    /// Send a message
    SendMsg = 1003,
    /// Send a signalling message (calls)
    SendSignalMsg = 1004,
    /// Pull messages by sequence range
    PullMsg = 1005,
    /// Read and max sequence per conversation
    GetConvMaxReadSeq = 1006,
    /// Log the session out; the connection closes after the reply
    Logout = 2003,
    /// Report app foreground/background state
    SetBackgroundStatus = 2004,
    /// Subscribe to / unsubscribe from other users' presence
    SubUserOnlineStatus = 2005,
}

impl RequestKind {
    /// Create a `RequestKind` from its wire value
    #[must_use]
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            1001 => Some(Self::GetNewestSeq),
            1002 => Some(Self::PullMsgBySeqList),
            1003 => Some(Self::SendMsg),
            1004 => Some(Self::SendSignalMsg),
            1005 => Some(Self::PullMsg),
            1006 => Some(Self::GetConvMaxReadSeq),
            2003 => Some(Self::Logout),
            2004 => Some(Self::SetBackgroundStatus),
            2005 => Some(Self::SubUserOnlineStatus),
            _ => None,
        }
    }

    /// Get the wire value
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Path segment used when forwarding to the message service
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::GetNewestSeq => "get_newest_seq",
            Self::PullMsgBySeqList => "pull_msg_by_seq_list",
            Self::SendMsg => "send_msg",
            Self::SendSignalMsg => "send_signal_msg",
            Self::PullMsg => "pull_msg",
            Self::GetConvMaxReadSeq => "get_conv_max_read_seq",
            Self::Logout => "logout",
            Self::SetBackgroundStatus => "set_background_status",
            Self::SubUserOnlineStatus => "sub_user_online_status",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.path(), self.as_i32())
    }
}

/// Frames the server sends without a preceding request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum PushKind {
    PushMsg = 2001,
    KickOnlineMsg = 2002,
    OnlineStatusChanged = 2006,
}

impl PushKind {
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }
}
