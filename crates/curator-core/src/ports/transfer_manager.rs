//! Transfer manager ports (driven/secondary ports)
//!
//! Two families of byte movers:
//!
//! - **Synchronous**: client→server ingest and intra-server copies. `submit`
//!   blocks until the bytes are in place; there is nothing to poll.
//! - **Asynchronous**: peer-to-peer bulk transport. `submit` returns an
//!   opaque handle immediately; the caller polls until a terminal status
//!   and never blocks on byte transfer.
//!
//! Concrete managers are selected by tag at configuration time
//! (`transfer_manager_type`); each store declares which managers it
//! supports and from which endpoints they can be initiated.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Status of an asynchronous transport submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    /// Bytes still in flight
    Active,
    /// All paths delivered
    Succeeded,
    /// Transport gave up; reason attached
    Failed { reason: String },
    /// The transport no longer knows the handle
    Unknown,
}

impl TransportStatus {
    /// Whether this status is terminal
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportStatus::Active)
    }
}

/// A batched transport submission: parallel source and destination paths
///
/// `dest_endpoint` is the opaque endpoint identifier granted by the
/// destination peer (a transport-specific address such as
/// `host:/staging/batch-dir`); `dest_paths` are relative to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub src_paths: Vec<PathBuf>,
    pub dest_endpoint: String,
    pub dest_paths: Vec<String>,
}

/// Port trait for synchronous (blocking) transfer managers
#[async_trait::async_trait]
pub trait ISyncTransferManager: Send + Sync {
    /// Copies one payload (file or directory tree), returning bytes moved
    ///
    /// Returns only after the destination holds the complete payload.
    async fn submit(&self, src: &std::path::Path, dst: &std::path::Path) -> anyhow::Result<u64>;

    /// Human-readable tag of this manager
    fn describe(&self) -> &str;
}

/// Port trait for asynchronous transfer managers
///
/// Implementations handle a bounded number of concurrently live handles;
/// the global cap across all queues is enforced by the consume-queue task,
/// not here.
#[async_trait::async_trait]
pub trait IAsyncTransferManager: Send + Sync {
    /// Submits a batch, returning the opaque transport handle
    async fn submit(&self, request: &TransportRequest) -> anyhow::Result<String>;

    /// Reports the current status of a handle
    ///
    /// A handle the transport has forgotten reports `Unknown`, never an
    /// error; errors are reserved for failures to ask.
    async fn poll(&self, external_id: &str) -> anyhow::Result<TransportStatus>;

    /// Best-effort cancellation of a handle
    async fn cancel(&self, external_id: &str) -> anyhow::Result<()>;

    /// Human-readable tag of this manager
    fn describe(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!TransportStatus::Active.is_terminal());
        assert!(TransportStatus::Succeeded.is_terminal());
        assert!(TransportStatus::Unknown.is_terminal());
        assert!(TransportStatus::Failed {
            reason: "x".to_string()
        }
        .is_terminal());
    }
}
