//! Peer client port (driven/secondary port)
//!
//! The outbound half of the inter-server push protocol. Every method takes
//! the peer record; the adapter reconstructs the plaintext authenticator
//! from the encrypted blob at call time and discards it after the request.
//!
//! ## Design Notes
//!
//! - All mutating calls carry the source's outgoing transfer id; the peer
//!   treats it as the idempotency key and answers replays with the prior
//!   outcome, so these methods are safe to retry.
//! - `ping` is also the name-verification handshake: callers compare the
//!   declared name against the local record and refuse the interaction on
//!   mismatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    BatchId, ContentHash, FileName, IncomingState, Peer, StoreName, StorePath, TransferId,
};

/// Identity a peer declares over ping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingInfo {
    pub name: String,
    pub description: String,
}

/// One staging slot request within a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    /// The source's outgoing transfer id for this file
    pub outgoing_id: TransferId,
    pub name: FileName,
    pub size: u64,
    pub hash: ContentHash,
}

/// The destination's answer to a batch staging request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageBatchGrant {
    /// Transport endpoint identifier the source submits the batch to
    pub destination_endpoint: String,
    /// Staging directory on the destination, for diagnostics
    pub staging_dir: String,
}

/// Instance details delivered with a success callback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub store: StoreName,
    pub path: StorePath,
}

/// The destination's report of an incoming transfer's state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingReport {
    /// Current state; `None` when the destination does not know the id
    pub state: Option<IncomingState>,
    /// When that state was entered
    pub since: Option<DateTime<Utc>>,
}

/// Wire body of a `stage_batch` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageBatchRequest {
    pub batch_id: BatchId,
    /// The requesting instance's federation name
    pub source: String,
    pub files: Vec<StageSpec>,
}

/// Wire body of a `set_staged` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStagedRequest {
    pub outgoing_ids: Vec<TransferId>,
}

/// Wire body of a `callback_succeeded` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub outgoing_id: TransferId,
    pub instance: InstanceInfo,
}

/// Wire body of a `query_incoming` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryIncomingRequest {
    pub outgoing_id: TransferId,
}

/// Port trait for outbound peer calls
#[async_trait::async_trait]
pub trait IPeerClient: Send + Sync {
    /// Identity handshake; requires no authorisation on the remote side
    async fn ping(&self, peer: &Peer) -> anyhow::Result<PingInfo>;

    /// Requests staging slots for a batch of files
    async fn stage_batch(
        &self,
        peer: &Peer,
        batch_id: BatchId,
        files: &[StageSpec],
    ) -> anyhow::Result<StageBatchGrant>;

    /// Tells the destination the listed transfers' bytes are on its staging
    /// area
    async fn set_staged(&self, peer: &Peer, outgoing_ids: &[TransferId]) -> anyhow::Result<()>;

    /// Destination→source: the file was ingested; the source records the
    /// RemoteInstance and completes the outgoing transfer
    async fn callback_succeeded(
        &self,
        peer: &Peer,
        outgoing_id: TransferId,
        instance: &InstanceInfo,
    ) -> anyhow::Result<()>;

    /// Asks the destination for the current state of an incoming transfer
    /// (hypervisor reconciliation)
    async fn query_incoming(
        &self,
        peer: &Peer,
        outgoing_id: TransferId,
    ) -> anyhow::Result<IncomingReport>;
}
