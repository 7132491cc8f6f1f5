//! Payloads the gateway itself produces or interprets

use im_core::PlatformId;
use serde::{Deserialize, Serialize};

/// `SubUserOnlineStatus` request payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubUserOnlineStatus {
    #[serde(rename = "subscribeUserID", default)]
    pub subscribe_user_ids: Vec<String>,
    #[serde(rename = "unsubscribeUserID", default)]
    pub unsubscribe_user_ids: Vec<String>,
}

/// Current platforms of one subscribed user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubUserOnlineStatusElem {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "onlinePlatformIDs")]
    pub online_platform_ids: Vec<PlatformId>,
}

/// `SubUserOnlineStatus` reply payload
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubUserOnlineStatusTips {
    pub subscribers: Vec<SubUserOnlineStatusElem>,
}

/// Payload of an `OnlineStatusChanged` push
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlineStatusPush {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "platformIDs")]
    pub platform_ids: Vec<PlatformId>,
    /// Unix milliseconds
    pub send_time: i64,
}

impl OnlineStatusPush {
    #[must_use]
    pub fn new(user_id: impl Into<String>, platform_ids: Vec<PlatformId>) -> Self {
        Self {
            user_id: user_id.into(),
            platform_ids,
            send_time: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// `{errCode, errMsg}` body used by handshake replies and RPC acknowledgements
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub err_code: i32,
    pub err_msg: String,
}

impl StatusReply {
    #[must_use]
    pub fn ok() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn error(err_code: i32, err_msg: impl Into<String>) -> Self {
        Self {
            err_code,
            err_msg: err_msg.into(),
        }
    }
}
