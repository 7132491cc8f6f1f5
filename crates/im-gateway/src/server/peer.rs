//! HTTP adapter announcing local logins to peer gateways

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use im_common::{AppError, AppResult};
use im_core::{DomainResult, PeerGateway, PlatformId};
use std::time::Duration;

use super::rpc::LoginCheckReq;

/// Peers contacted concurrently per announcement
const MAX_IN_FLIGHT: usize = 3;

/// [`PeerGateway`] over the peers' `/rpc` surface
#[derive(Debug, Clone)]
pub struct HttpPeerGateway {
    http: reqwest::Client,
    peers: Vec<String>,
}

impl HttpPeerGateway {
    /// `advertise_addr` is this node's own base URL and is left out of the
    /// fan-out.
    pub fn new(peers: &[String], advertise_addr: Option<&str>, timeout: Duration) -> AppResult<Self> {
        let own = advertise_addr.map(|addr| addr.trim_end_matches('/'));
        let peers = peers
            .iter()
            .map(|peer| peer.trim_end_matches('/').to_string())
            .filter(|peer| Some(peer.as_str()) != own)
            .collect();

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ExternalService(e.to_string()))?;

        Ok(Self { http, peers })
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    async fn notify(&self, peer: &str, req: &LoginCheckReq) -> Result<(), reqwest::Error> {
        self.http
            .post(format!("{peer}/rpc/multi_terminal_login_check"))
            .json(req)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl PeerGateway for HttpPeerGateway {
    /// Best effort: failures are logged per peer and never returned
    async fn multi_terminal_login_check(&self, user_id: &str, platform_id: PlatformId, token: &str) -> DomainResult<()> {
        let req = LoginCheckReq {
            user_id: user_id.to_string(),
            platform_id,
            token: token.to_string(),
        };

        stream::iter(&self.peers)
            .for_each_concurrent(MAX_IN_FLIGHT, |peer| {
                let req = &req;
                async move {
                    if let Err(e) = self.notify(peer, req).await {
                        tracing::warn!(peer = %peer, user_id = %req.user_id, error = %e, "Peer notification failed");
                    }
                }
            })
            .await;
        Ok(())
    }
}
