//! Presence events
//!
//! `PresenceEvent` is the local delta a gateway reports to the presence store.
//! `PresenceChange` is the resulting state the store broadcasts back to every
//! gateway so subscribers can be notified.

use serde::{Deserialize, Serialize};

use crate::value_objects::PlatformId;

/// Platforms that came online or went offline for one user on this node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEvent {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "onlinePlatformIDs", default)]
    pub online: Vec<PlatformId>,
    #[serde(rename = "offlinePlatformIDs", default)]
    pub offline: Vec<PlatformId>,
}

impl PresenceEvent {
    /// Create an event with the given online and offline platforms
    #[must_use]
    pub fn new(user_id: impl Into<String>, online: Vec<PlatformId>, offline: Vec<PlatformId>) -> Self {
        Self {
            user_id: user_id.into(),
            online,
            offline,
        }
    }

    /// Fold a later event for the same user into this one.
    ///
    /// The later online set wins; platforms reported offline by either event
    /// stay offline unless the later event brought them back online.
    pub fn merge(&mut self, later: PresenceEvent) {
        debug_assert_eq!(self.user_id, later.user_id);

        let mut offline = std::mem::take(&mut self.offline);
        offline.extend(later.offline);
        offline.retain(|p| !later.online.contains(p));
        offline.sort_unstable();
        offline.dedup();

        self.online = later.online;
        self.offline = offline;
    }

    /// Whether the user has no online platform after this event
    #[must_use]
    pub fn is_offline(&self) -> bool {
        self.online.is_empty()
    }
}

/// The complete set of online platforms for a user, as seen by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChange {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "platformIDs", default)]
    pub platform_ids: Vec<PlatformId>,
}

impl PresenceChange {
    #[must_use]
    pub fn new(user_id: impl Into<String>, platform_ids: Vec<PlatformId>) -> Self {
        Self {
            user_id: user_id.into(),
            platform_ids,
        }
    }
}
