//! Store backend port (driven/secondary port)
//!
//! The capability set every storage backend provides: staged write, atomic
//! commit with hash verification, deletion, capacity reporting, and a full
//! enumeration for reconciliation. Concrete backends are selected by the
//! `store_type` tag at configuration time; the orchestration layer programs
//! against this trait only.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ContentHash, FileName, StoreName, StorePath};

/// Why bytes are being staged
///
/// Fresh uploads require an ingestible store; clones (local replication and
/// receipt of a physically transported store) do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagePurpose {
    /// A fresh upload from a client or a peer push
    Ingest,
    /// A copy of bytes this federation already holds
    Clone,
}

/// Handle to an allocated staging slot
///
/// The slot is a unique directory under the staging root; `path` is the
/// absolute target the writer fills. Dropping the handle does not release
/// the slot; commit or abort does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageHandle {
    /// Unique token naming the slot directory
    pub token: String,
    /// Absolute path the payload is written to
    pub path: PathBuf,
}

/// Capacity report for a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreReport {
    pub capacity: u64,
    pub used: u64,
    pub free: u64,
}

/// One entry found by a reconciliation scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub path: StorePath,
    pub size: u64,
    pub hash: ContentHash,
}

/// Classified store backend failures
///
/// These surface through the API with distinct status codes, so they are
/// typed rather than flattened into `anyhow`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store is disabled, unavailable, or not ingestible for the purpose
    #[error("Store {store} cannot accept the payload: {reason}")]
    NotAccepting { store: String, reason: String },

    /// Committing the payload would exceed the full threshold
    #[error("Store {store} is full ({needed} bytes needed, {free} free)")]
    Full {
        store: String,
        needed: u64,
        free: u64,
    },

    /// Digest of the staged bytes does not match the expectation
    #[error("Hash mismatch for {name}: expected {expected}, computed {computed}")]
    HashMismatch {
        name: String,
        expected: String,
        computed: String,
    },

    /// The commit target already exists; the adapter never overwrites
    #[error("Target already exists: {0}")]
    TargetExists(String),

    /// The staged payload is missing or unreadable
    #[error("Staged payload missing for {0}")]
    StagedPayloadMissing(String),

    /// Underlying filesystem failure
    #[error("I/O failure on store {store}: {source}")]
    Io {
        store: String,
        #[source]
        source: std::io::Error,
    },
}

/// Port trait for storage backends
#[async_trait::async_trait]
pub trait IStoreBackend: Send + Sync {
    /// The store's name
    fn name(&self) -> &StoreName;

    /// Absolute staging root, where peers and transports may write
    fn staging_root(&self) -> &Path;

    /// Absolute on-disk location of a committed payload
    fn absolute_path(&self, path: &StorePath) -> PathBuf;

    /// Allocates a unique staging slot for `name`
    ///
    /// # Errors
    /// Fails when the store cannot accept the payload for `purpose` or when
    /// `expected_size` would exceed the full threshold.
    async fn stage(
        &self,
        name: &FileName,
        expected_size: u64,
        purpose: StagePurpose,
    ) -> Result<StageHandle, StoreError>;

    /// Allocates one shared staging directory for a peer batch
    ///
    /// The transport delivers every payload of the batch into this
    /// directory under its file name; acceptance is checked against the
    /// batch's total size. Returns the absolute directory path.
    async fn stage_batch_dir(
        &self,
        batch: &crate::domain::BatchId,
        total_size: u64,
    ) -> Result<PathBuf, StoreError>;

    /// Verifies the staged bytes against `expected_hash` and atomically
    /// moves them to their permanent path
    ///
    /// Never overwrites: an existing target is an error, not a replace.
    async fn commit(
        &self,
        handle: &StageHandle,
        final_name: &FileName,
        expected_hash: &ContentHash,
    ) -> Result<StorePath, StoreError>;

    /// Releases a staging slot without committing
    async fn abort(&self, handle: &StageHandle) -> Result<(), StoreError>;

    /// Removes committed bytes, returning the byte count freed
    ///
    /// Metadata updates are the caller's responsibility.
    async fn delete(&self, path: &StorePath) -> Result<u64, StoreError>;

    /// Re-computes the digest and size of a committed payload
    async fn hash_of(&self, path: &StorePath) -> Result<(ContentHash, u64), StoreError>;

    /// Queries the underlying filesystem for capacity
    async fn report(&self) -> Result<StoreReport, StoreError>;

    /// Scans the committed area for reconciliation
    async fn enumerate(&self) -> Result<Vec<StoredEntry>, StoreError>;
}
