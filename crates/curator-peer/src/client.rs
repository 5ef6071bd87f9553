//! HTTP peer client
//!
//! The outbound half of the inter-server push protocol over reqwest.
//! Every call reconstructs the peer's plaintext authenticator from its
//! encrypted blob, attaches it as basic auth, and drops it with the
//! request builder.
//!
//! All endpoints live under `/api/v1/`; bodies are JSON both ways.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use curator_core::domain::{BatchId, Peer, TransferId};
use curator_core::ports::{
    CallbackRequest, IPeerClient, IncomingReport, InstanceInfo, PingInfo, QueryIncomingRequest,
    SetStagedRequest, StageBatchGrant, StageBatchRequest, StageSpec,
};

use crate::credentials::CredentialCipher;
use crate::PeerError;

/// Default deadline for one peer call
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Reqwest-backed implementation of the peer client port
pub struct HttpPeerClient {
    http: Client,
    cipher: Arc<CredentialCipher>,
    /// This instance's federation name, reported in staging requests
    local_name: String,
}

impl HttpPeerClient {
    /// Creates a new client
    pub fn new(cipher: Arc<CredentialCipher>, local_name: impl Into<String>) -> Self {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Self {
            http,
            cipher,
            local_name: local_name.into(),
        }
    }

    /// Builds an authenticated request against a peer endpoint
    fn request(
        &self,
        peer: &Peer,
        method: reqwest::Method,
        endpoint: &str,
    ) -> Result<RequestBuilder, PeerError> {
        let url = format!("{}/api/v1/{endpoint}", peer.api_root());
        let plaintext = self.cipher.decrypt(&peer.authenticator_enc)?;
        let (user, password) = CredentialCipher::split_authenticator(&plaintext)?;
        Ok(self
            .http
            .request(method, url)
            .basic_auth(user, Some(password)))
    }

    /// Checks the status and decodes the JSON body
    async fn decode<T: DeserializeOwned>(
        peer: &Peer,
        endpoint: &str,
        response: Response,
    ) -> anyhow::Result<T> {
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            anyhow::bail!(PeerError::Rejected {
                peer: peer.name.to_string(),
                status: status.as_u16(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(peer = %peer.name, endpoint, status = %status, "Peer returned an error");
            anyhow::bail!(PeerError::Protocol(format!(
                "{endpoint} returned {status}: {body}"
            )));
        }
        response
            .json::<T>()
            .await
            .with_context(|| format!("peer {} returned an unexpected {endpoint} body", peer.name))
    }
}

#[async_trait::async_trait]
impl IPeerClient for HttpPeerClient {
    async fn ping(&self, peer: &Peer) -> anyhow::Result<PingInfo> {
        let response = self
            .request(peer, reqwest::Method::GET, "ping")?
            .send()
            .await
            .with_context(|| format!("ping to {} failed", peer.name))?;
        let info: PingInfo = Self::decode(peer, "ping", response).await?;

        // The name a peer declares must match our record; a mismatch means
        // the address points at the wrong instance.
        if info.name != peer.name.as_str() {
            anyhow::bail!(PeerError::NameMismatch {
                expected: peer.name.to_string(),
                declared: info.name,
            });
        }
        debug!(peer = %peer.name, "Ping verified");
        Ok(info)
    }

    async fn stage_batch(
        &self,
        peer: &Peer,
        batch_id: BatchId,
        files: &[StageSpec],
    ) -> anyhow::Result<StageBatchGrant> {
        let body = StageBatchRequest {
            batch_id,
            source: self.local_name.clone(),
            files: files.to_vec(),
        };
        let response = self
            .request(peer, reqwest::Method::POST, "stage_batch")?
            .json(&body)
            .send()
            .await
            .with_context(|| format!("stage_batch to {} failed", peer.name))?;
        Self::decode(peer, "stage_batch", response).await
    }

    async fn set_staged(&self, peer: &Peer, outgoing_ids: &[TransferId]) -> anyhow::Result<()> {
        let body = SetStagedRequest {
            outgoing_ids: outgoing_ids.to_vec(),
        };
        let response = self
            .request(peer, reqwest::Method::POST, "set_staged")?
            .json(&body)
            .send()
            .await
            .with_context(|| format!("set_staged to {} failed", peer.name))?;
        let _: serde_json::Value = Self::decode(peer, "set_staged", response).await?;
        Ok(())
    }

    async fn callback_succeeded(
        &self,
        peer: &Peer,
        outgoing_id: TransferId,
        instance: &InstanceInfo,
    ) -> anyhow::Result<()> {
        let body = CallbackRequest {
            outgoing_id,
            instance: instance.clone(),
        };
        let response = self
            .request(peer, reqwest::Method::POST, "callback_succeeded")?
            .json(&body)
            .send()
            .await
            .with_context(|| format!("callback_succeeded to {} failed", peer.name))?;
        let _: serde_json::Value = Self::decode(peer, "callback_succeeded", response).await?;
        Ok(())
    }

    async fn query_incoming(
        &self,
        peer: &Peer,
        outgoing_id: TransferId,
    ) -> anyhow::Result<IncomingReport> {
        let body = QueryIncomingRequest { outgoing_id };
        let response = self
            .request(peer, reqwest::Method::POST, "query_incoming")?
            .json(&body)
            .send()
            .await
            .with_context(|| format!("query_incoming to {} failed", peer.name))?;
        Self::decode(peer, "query_incoming", response).await
    }
}
