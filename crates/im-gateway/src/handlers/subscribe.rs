//! `SubUserOnlineStatus` handling

use futures::future::try_join_all;
use im_core::{DomainError, DomainResult};
use std::sync::Arc;

use super::MessageDispatcher;
use crate::connection::Connection;
use crate::protocol::{SubUserOnlineStatus, SubUserOnlineStatusElem, SubUserOnlineStatusTips};

impl MessageDispatcher {
    /// Update `conn`'s presence subscriptions and reply with the current
    /// platforms of each newly watched user
    pub(crate) async fn sub_user_online_status(&self, conn: &Arc<Connection>, data: &[u8]) -> DomainResult<Vec<u8>> {
        let req: SubUserOnlineStatus =
            serde_json::from_slice(data).map_err(|e| DomainError::Args(e.to_string()))?;

        self.subscription
            .sub(conn, &req.subscribe_user_ids, &req.unsubscribe_user_ids);

        let subscribers = try_join_all(req.subscribe_user_ids.iter().map(|user_id| async move {
            let online_platform_ids =
                tokio::time::timeout(self.call_timeout, self.presence.get_user_online_platforms(user_id))
                    .await
                    .map_err(|_| DomainError::Timeout {
                        service: "presence store",
                    })??;
            Ok::<_, DomainError>(SubUserOnlineStatusElem {
                user_id: user_id.clone(),
                online_platform_ids,
            })
        }))
        .await?;

        serde_json::to_vec(&SubUserOnlineStatusTips { subscribers }).map_err(DomainError::internal)
    }
}
