//! Metadata repository port (driven/secondary port)
//!
//! The single persistence interface for all domain entities. Implementations
//! provide ACID semantics: every state transition helper performs a
//! conditional update (`... WHERE state = expected`) so concurrent writers
//! and replayed callbacks cannot rewind a state machine, and uniqueness
//! invariants are enforced by constraints rather than read-then-write.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific and
//!   don't need domain-level classification; use cases pre-validate the
//!   conditions they need typed errors for.
//! - Conditional mutations return `bool`: `false` means the guard did not
//!   match (already claimed, already advanced, row missing) and the caller
//!   decides whether that is a replay, a race, or a bug.
//! - The `FileSearchFilters` struct is the composable query surface; all
//!   populated fields combine with AND.

use chrono::{DateTime, Utc};

use crate::domain::{
    BackgroundTaskLog, BatchId, ErrorCategory, ErrorLog, File, FileName, IncomingState,
    IncomingTransfer, Instance, OutgoingState, OutgoingTransfer, Peer, PeerName, QueueState,
    RemoteInstance, SendQueueItem, Severity, Store, StoreName, TaskOutcome, TransferId, User,
};

/// Filter criteria for file searches
///
/// All fields are optional; when `None`, no filtering is applied for that
/// field. `name_like` uses SQL `LIKE` semantics (`%`, `_`).
#[derive(Debug, Clone, Default)]
pub struct FileSearchFilters {
    /// Exact file name
    pub name: Option<FileName>,
    /// `LIKE` pattern on the file name
    pub name_like: Option<String>,
    /// Exact uploader
    pub uploader: Option<String>,
    /// Exact observation grouping key
    pub obsid: Option<i64>,
    /// Exact session grouping key
    pub session_id: Option<String>,
    /// Minimum size in bytes, inclusive
    pub min_size: Option<u64>,
    /// Maximum size in bytes, inclusive
    pub max_size: Option<u64>,
    /// Created strictly after this time
    pub created_after: Option<DateTime<Utc>>,
    /// Created strictly before this time
    pub created_before: Option<DateTime<Utc>>,
    /// Only files with an available instance on this store
    pub store: Option<StoreName>,
    /// Result cap; `None` means unbounded (administrative callers)
    pub limit: Option<u32>,
}

impl FileSearchFilters {
    /// Creates a new empty filter (matches all files)
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if no filters are set (ignoring the limit)
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.name_like.is_none()
            && self.uploader.is_none()
            && self.obsid.is_none()
            && self.session_id.is_none()
            && self.min_size.is_none()
            && self.max_size.is_none()
            && self.created_after.is_none()
            && self.created_before.is_none()
            && self.store.is_none()
    }
}

/// Port trait for persistent metadata storage
///
/// Covers CRUD for every entity in the data model plus the conditional
/// mutations the orchestration layer leans on. One big trait, sectioned,
/// rather than a constellation of small ones; the adapter may delegate
/// internally however it likes.
#[async_trait::async_trait]
pub trait IMetadataRepository: Send + Sync {
    // --- File operations ---

    /// Inserts a file record; fails on a duplicate name
    async fn create_file(&self, file: &File) -> anyhow::Result<()>;

    /// Retrieves a file by name
    async fn get_file(&self, name: &FileName) -> anyhow::Result<Option<File>>;

    /// Queries files matching the given filters
    async fn search_files(&self, filters: &FileSearchFilters) -> anyhow::Result<Vec<File>>;

    /// Files on `store` lacking a RemoteInstance at `peer`, older than
    /// `min_age_days`, and not already covered by a non-terminal outgoing
    /// transfer to `peer`; oldest first, at most `limit`
    async fn files_needing_push(
        &self,
        peer: &PeerName,
        store: &StoreName,
        min_age_days: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<File>>;

    /// Files with an available instance on `source` but no instance on any
    /// of `destinations`, older than `min_age_days`; oldest first
    async fn files_needing_local_clone(
        &self,
        source: &StoreName,
        destinations: &[StoreName],
        min_age_days: i64,
        limit: u32,
    ) -> anyhow::Result<Vec<File>>;

    /// (file, instance) pairs on `store` for files created within
    /// `age_in_days`, for integrity checking
    async fn files_for_integrity_check(
        &self,
        store: &StoreName,
        age_in_days: i64,
    ) -> anyhow::Result<Vec<(File, Instance)>>;

    // --- Instance operations ---

    /// Inserts an instance row, returning its id
    async fn create_instance(&self, instance: &Instance) -> anyhow::Result<i64>;

    /// Retrieves the instance of `file` on `store`, if any
    async fn get_instance(
        &self,
        file: &FileName,
        store: &StoreName,
    ) -> anyhow::Result<Option<Instance>>;

    /// All instances of a file
    async fn instances_for_file(&self, file: &FileName) -> anyhow::Result<Vec<Instance>>;

    /// All available instances on a store
    async fn instances_on_store(&self, store: &StoreName) -> anyhow::Result<Vec<Instance>>;

    /// Marks the instance of `file` on `store` unavailable (soft delete)
    ///
    /// Returns `false` when no instance matched or its deletion policy
    /// forbids removal; the policy guard is part of the statement.
    async fn soft_delete_instance(
        &self,
        file: &FileName,
        store: &StoreName,
    ) -> anyhow::Result<bool>;

    /// Marks an instance unavailable regardless of deletion policy
    /// (integrity failures)
    async fn mark_instance_unavailable(&self, instance_id: i64) -> anyhow::Result<bool>;

    /// Removes an instance row (hard delete); honours the deletion policy
    async fn remove_instance(&self, instance_id: i64) -> anyhow::Result<bool>;

    // --- Remote instance operations ---

    /// Records that `peer` holds a copy; idempotent on (file, peer)
    async fn create_remote_instance(&self, remote: &RemoteInstance) -> anyhow::Result<()>;

    /// Retrieves the remote-instance claim for `file` at `peer`
    async fn get_remote_instance(
        &self,
        file: &FileName,
        peer: &PeerName,
    ) -> anyhow::Result<Option<RemoteInstance>>;

    /// All remote-instance claims for a file
    async fn remote_instances_for_file(
        &self,
        file: &FileName,
    ) -> anyhow::Result<Vec<RemoteInstance>>;

    // --- Store operations ---

    /// Inserts or updates a store record by name
    async fn upsert_store(&self, store: &Store) -> anyhow::Result<()>;

    /// Retrieves a store by name
    async fn get_store(&self, name: &StoreName) -> anyhow::Result<Option<Store>>;

    /// All stores
    async fn list_stores(&self) -> anyhow::Result<Vec<Store>>;

    /// Sets the administrative enable flag
    async fn set_store_enabled(&self, name: &StoreName, enabled: bool) -> anyhow::Result<bool>;

    /// Sets the ingestible flag
    async fn set_store_ingestible(
        &self,
        name: &StoreName,
        ingestible: bool,
    ) -> anyhow::Result<bool>;

    /// Sets the physical availability flag
    async fn set_store_available(&self, name: &StoreName, available: bool) -> anyhow::Result<bool>;

    /// Adjusts the used-bytes accounting by `delta` (commit: +, delete: −)
    async fn adjust_store_used(&self, name: &StoreName, delta: i64) -> anyhow::Result<()>;

    /// Overwrites capacity/used from a filesystem report
    async fn set_store_usage(
        &self,
        name: &StoreName,
        capacity: u64,
        used: u64,
    ) -> anyhow::Result<()>;

    // --- Outgoing transfer operations ---

    /// Inserts an outgoing transfer; fails when a non-terminal transfer for
    /// the same (file, destination) already exists
    async fn create_outgoing(&self, transfer: &OutgoingTransfer) -> anyhow::Result<()>;

    /// Retrieves an outgoing transfer
    async fn get_outgoing(&self, id: TransferId) -> anyhow::Result<Option<OutgoingTransfer>>;

    /// Conditionally advances `from` → `to`, recording `error` when given
    ///
    /// Returns `false` when the transfer was not in `from` (replay or race).
    async fn advance_outgoing(
        &self,
        id: TransferId,
        from: OutgoingState,
        to: OutgoingState,
        error: Option<&str>,
    ) -> anyhow::Result<bool>;

    /// Records the transport handle on a transfer
    async fn set_outgoing_external(&self, id: TransferId, external_id: &str)
        -> anyhow::Result<()>;

    /// Outgoing transfers currently in `state` whose last change is older
    /// than `min_age_days` (0 matches everything)
    async fn outgoing_stuck_in(
        &self,
        state: OutgoingState,
        min_age_days: i64,
    ) -> anyhow::Result<Vec<OutgoingTransfer>>;

    // --- Incoming transfer operations ---

    /// Inserts an incoming transfer keyed by the source's transfer id;
    /// fails on a duplicate id (callers detect replays with `get_incoming`)
    async fn create_incoming(&self, transfer: &IncomingTransfer) -> anyhow::Result<()>;

    /// Retrieves an incoming transfer by the source's transfer id
    async fn get_incoming(&self, id: TransferId) -> anyhow::Result<Option<IncomingTransfer>>;

    /// Conditionally advances `from` → `to`, recording `error` when given
    async fn advance_incoming(
        &self,
        id: TransferId,
        from: IncomingState,
        to: IncomingState,
        error: Option<&str>,
    ) -> anyhow::Result<bool>;

    /// Incoming transfers in `state`, oldest first, at most `limit`
    async fn incoming_in_state(
        &self,
        state: IncomingState,
        limit: u32,
    ) -> anyhow::Result<Vec<IncomingTransfer>>;

    /// Incoming transfers currently in `state` whose last change is older
    /// than `min_age_days`
    async fn incoming_stuck_in(
        &self,
        state: IncomingState,
        min_age_days: i64,
    ) -> anyhow::Result<Vec<IncomingTransfer>>;

    // --- Send queue operations ---

    /// Enqueues a batch
    async fn enqueue_batch(&self, item: &SendQueueItem) -> anyhow::Result<()>;

    /// Queued batches, oldest first, at most `limit`
    async fn queued_batches(&self, limit: u32) -> anyhow::Result<Vec<SendQueueItem>>;

    /// Batches currently submitted to a transport
    async fn submitted_batches(&self) -> anyhow::Result<Vec<SendQueueItem>>;

    /// Number of batches currently holding a live transport handle
    async fn count_submitted_batches(&self) -> anyhow::Result<u64>;

    /// Conditionally advances a batch `from` → `to`
    async fn set_batch_state(
        &self,
        id: BatchId,
        from: QueueState,
        to: QueueState,
    ) -> anyhow::Result<bool>;

    /// Records the transport handle on a batch
    async fn set_batch_external(&self, id: BatchId, external_id: &str) -> anyhow::Result<()>;

    // --- Peer operations ---

    /// Inserts or updates a peer record by name
    async fn upsert_peer(&self, peer: &Peer) -> anyhow::Result<()>;

    /// Retrieves a peer by name
    async fn get_peer(&self, name: &PeerName) -> anyhow::Result<Option<Peer>>;

    /// All peers
    async fn list_peers(&self) -> anyhow::Result<Vec<Peer>>;

    /// Removes a peer record
    async fn remove_peer(&self, name: &PeerName) -> anyhow::Result<bool>;

    /// Toggles the transfers-enabled flag
    async fn set_peer_transfers_enabled(
        &self,
        name: &PeerName,
        enabled: bool,
    ) -> anyhow::Result<bool>;

    /// Stamps a successful interaction and clears the last error
    async fn record_peer_seen(&self, name: &PeerName) -> anyhow::Result<()>;

    /// Records a protocol error against the peer
    async fn record_peer_error(&self, name: &PeerName, error: &str) -> anyhow::Result<()>;

    // --- User operations ---

    /// Inserts a user; fails on a duplicate name
    async fn create_user(&self, user: &User) -> anyhow::Result<()>;

    /// Retrieves a user by name
    async fn get_user(&self, name: &str) -> anyhow::Result<Option<User>>;

    /// Removes a user
    async fn delete_user(&self, name: &str) -> anyhow::Result<bool>;

    // --- Error log operations ---

    /// Appends an error row, returning its id
    async fn append_error(&self, row: &ErrorLog) -> anyhow::Result<i64>;

    /// Recent error rows, newest first, optionally filtered
    async fn recent_errors(
        &self,
        min_severity: Option<Severity>,
        category: Option<ErrorCategory>,
        limit: u32,
    ) -> anyhow::Result<Vec<ErrorLog>>;

    // --- Background task claims ---

    /// Attempts to claim `task_name` for this worker
    ///
    /// The claim succeeds when no other worker holds a claim younger than
    /// `stale_after_secs`; implemented as a conditional update so exactly
    /// one of several racing workers wins.
    async fn claim_task(&self, task_name: &str, stale_after_secs: i64) -> anyhow::Result<bool>;

    /// Releases a claim and appends the run to the task log
    async fn release_task(
        &self,
        task_name: &str,
        claimed_at: DateTime<Utc>,
        outcome: TaskOutcome,
    ) -> anyhow::Result<()>;

    /// Recent task runs, newest first
    async fn recent_task_runs(&self, limit: u32) -> anyhow::Result<Vec<BackgroundTaskLog>>;
}
