//! Transfer domain entities and state machines
//!
//! Outgoing (source-side) and incoming (destination-side) transfer records,
//! plus the send-queue batch that aggregates outgoing transfers into one
//! transport submission.
//!
//! ## Outgoing lifecycle
//!
//! ```text
//! INITIATED ──(peer granted slot, transport submitted)──▶ ONGOING
//! ONGOING   ──(transport succeeded, peer confirmed)─────▶ STAGED
//! STAGED    ──(peer callback: ingest complete)──────────▶ COMPLETED
//! any       ──(rejection | transport failure | sweep)───▶ FAILED
//! FAILED    ──(operator re-initiates)───────────────────▶ INITIATED
//! ```
//!
//! ## Incoming lifecycle
//!
//! ```text
//! INITIATED ──▶ STAGED ──▶ INGESTING ──▶ COMPLETED
//!     │           │            │
//!     └───────────┴────────────┴───────▶ FAILED
//! ```
//!
//! Transitions are monotonic; every advance goes through
//! [`OutgoingState::can_advance_to`] / [`IncomingState::can_advance_to`]
//! and the repository performs the matching conditional update, so an
//! out-of-order replay can never rewind a transfer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{BatchId, ContentHash, FileName, PeerName, StoreName, StorePath, TransferId};

// ============================================================================
// Outgoing transfers
// ============================================================================

/// State of a source-side transfer record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutgoingState {
    /// Staging slot granted by the peer, not yet submitted to transport
    Initiated,
    /// Bytes in flight through the async transport
    Ongoing,
    /// Bytes on the peer's staging area, awaiting its receive worker
    Staged,
    /// Peer ingested the file; RemoteInstance recorded
    Completed,
    /// Rejected, transport failure, timeout, or administrative abort
    Failed,
}

impl OutgoingState {
    /// Whether this state is terminal (no automatic transitions out)
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutgoingState::Completed | OutgoingState::Failed)
    }

    /// Whether a transition from `self` to `next` is legal
    ///
    /// Any non-terminal state may fail; `Failed` may be re-initiated by an
    /// operator. Everything else follows the forward path.
    #[must_use]
    pub fn can_advance_to(&self, next: OutgoingState) -> bool {
        use OutgoingState::*;
        match (self, next) {
            (Initiated, Ongoing) => true,
            (Ongoing, Staged) => true,
            (Staged, Completed) => true,
            (Initiated | Ongoing | Staged, Failed) => true,
            (Failed, Initiated) => true,
            _ => false,
        }
    }

    /// String form used in the database and on the wire
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OutgoingState::Initiated => "initiated",
            OutgoingState::Ongoing => "ongoing",
            OutgoingState::Staged => "staged",
            OutgoingState::Completed => "completed",
            OutgoingState::Failed => "failed",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(OutgoingState::Initiated),
            "ongoing" => Some(OutgoingState::Ongoing),
            "staged" => Some(OutgoingState::Staged),
            "completed" => Some(OutgoingState::Completed),
            "failed" => Some(OutgoingState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OutgoingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source-side record of one File being pushed to one peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingTransfer {
    /// Transfer id; also the cross-peer idempotency key
    pub id: TransferId,
    /// The file being pushed
    pub file_name: FileName,
    /// Destination peer
    pub destination: PeerName,
    /// Store the bytes are read from
    pub source_store: StoreName,
    /// Transfer-manager tag used for the transport leg
    pub method: String,
    /// Opaque handle of the external transport submission
    pub external_id: Option<String>,
    /// Batch this transfer was grouped into
    pub batch_id: Option<BatchId>,
    /// Current state
    pub state: OutgoingState,
    /// When the record was created
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
    /// Error text for failed transfers
    pub error: Option<String>,
}

impl OutgoingTransfer {
    /// Creates a new transfer in `Initiated`
    pub fn new(
        file_name: FileName,
        destination: PeerName,
        source_store: StoreName,
        method: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: TransferId::new(),
            file_name,
            destination,
            source_store,
            method: method.into(),
            external_id: None,
            batch_id: None,
            state: OutgoingState::Initiated,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Advance to `next`, validating monotonicity
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if the transition is illegal.
    pub fn advance(&mut self, next: OutgoingState) -> Result<(), DomainError> {
        if !self.state.can_advance_to(next) {
            return Err(DomainError::InvalidState {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Age since the last state change, in whole days
    #[must_use]
    pub fn age_in_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_days()
    }
}

// ============================================================================
// Incoming transfers
// ============================================================================

/// State of a destination-side transfer record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncomingState {
    /// Staging slot allocated, bytes not yet confirmed on disk
    Initiated,
    /// Bytes present in the staging area, awaiting the receive worker
    Staged,
    /// Receive worker is verifying and committing the bytes
    Ingesting,
    /// File and Instance rows created
    Completed,
    /// Verification or commit failure
    Failed,
}

impl IncomingState {
    /// Whether this state is terminal
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, IncomingState::Completed | IncomingState::Failed)
    }

    /// Whether a transition from `self` to `next` is legal
    #[must_use]
    pub fn can_advance_to(&self, next: IncomingState) -> bool {
        use IncomingState::*;
        match (self, next) {
            (Initiated, Staged) => true,
            (Staged, Ingesting) => true,
            (Ingesting, Completed) => true,
            (Initiated | Staged | Ingesting, Failed) => true,
            _ => false,
        }
    }

    /// String form used in the database and on the wire
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            IncomingState::Initiated => "initiated",
            IncomingState::Staged => "staged",
            IncomingState::Ingesting => "ingesting",
            IncomingState::Completed => "completed",
            IncomingState::Failed => "failed",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initiated" => Some(IncomingState::Initiated),
            "staged" => Some(IncomingState::Staged),
            "ingesting" => Some(IncomingState::Ingesting),
            "completed" => Some(IncomingState::Completed),
            "failed" => Some(IncomingState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for IncomingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination-side mirror of a peer's outgoing transfer
///
/// Keyed by the source's transfer id so that replayed staging or callback
/// requests are detected and answered with the prior outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingTransfer {
    /// The source's outgoing transfer id (idempotency key)
    pub id: TransferId,
    /// Expected file name
    pub file_name: FileName,
    /// Expected content hash
    pub expected_hash: ContentHash,
    /// Expected size in bytes
    pub expected_size: u64,
    /// Store the staging slot was allocated on
    pub store_name: StoreName,
    /// Absolute path of the staging slot on that store
    pub staging_path: String,
    /// The peer pushing the file
    pub source: PeerName,
    /// Current state
    pub state: IncomingState,
    /// When the slot was allocated
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
    /// Error text for failed transfers
    pub error: Option<String>,
}

impl IncomingTransfer {
    /// Creates a new incoming record in `Initiated`
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: TransferId,
        file_name: FileName,
        expected_hash: ContentHash,
        expected_size: u64,
        store_name: StoreName,
        staging_path: impl Into<String>,
        source: PeerName,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            file_name,
            expected_hash,
            expected_size,
            store_name,
            staging_path: staging_path.into(),
            source,
            state: IncomingState::Initiated,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    /// Advance to `next`, validating monotonicity
    ///
    /// # Errors
    /// Returns `DomainError::InvalidState` if the transition is illegal.
    pub fn advance(&mut self, next: IncomingState) -> Result<(), DomainError> {
        if !self.state.can_advance_to(next) {
            return Err(DomainError::InvalidState {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Age since the last state change, in whole days
    #[must_use]
    pub fn age_in_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_days()
    }
}

// ============================================================================
// Send queue
// ============================================================================

/// State of a queued transport batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueState {
    /// Waiting for a free transport slot
    Queued,
    /// Submitted to the async transport; handle recorded
    Submitted,
    /// Transport finished and the result was propagated
    Done,
    /// Transport reported failure
    Failed,
}

impl QueueState {
    /// String form used in the database
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueState::Queued => "queued",
            QueueState::Submitted => "submitted",
            QueueState::Done => "done",
            QueueState::Failed => "failed",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(QueueState::Queued),
            "submitted" => Some(QueueState::Submitted),
            "done" => Some(QueueState::Done),
            "failed" => Some(QueueState::Failed),
            _ => None,
        }
    }
}

/// One source-path → destination-path pair within a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Absolute path on the source store
    pub src: String,
    /// Path on the destination endpoint, relative to the granted staging dir
    pub dst: String,
    /// The outgoing transfer this entry carries
    pub outgoing_id: TransferId,
}

/// Aggregates up to `send_batch_size` outgoing transfers into one transport
/// submission
///
/// The queue item only weakly references its outgoing transfers: each
/// transfer keeps its own state row and the batch carries their ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendQueueItem {
    /// Batch id, shared with the destination's staging directory
    pub id: BatchId,
    /// Destination peer
    pub destination: PeerName,
    /// Store the sources are read from; selects the async manager
    pub source_store: StoreName,
    /// Transport endpoint identifier granted by the destination
    pub destination_endpoint: String,
    /// The path pairs to move
    pub entries: Vec<QueueEntry>,
    /// Transfer-manager tag for the transport leg
    pub method: String,
    /// Opaque transport handle once submitted
    pub external_id: Option<String>,
    /// Current state
    pub state: QueueState,
    /// When the batch was enqueued
    pub created_at: DateTime<Utc>,
    /// Last state change
    pub updated_at: DateTime<Utc>,
}

impl SendQueueItem {
    /// Creates a new queued batch
    pub fn new(
        id: BatchId,
        destination: PeerName,
        source_store: StoreName,
        destination_endpoint: impl Into<String>,
        entries: Vec<QueueEntry>,
        method: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            destination,
            source_store,
            destination_endpoint: destination_endpoint.into(),
            entries,
            method: method.into(),
            external_id: None,
            state: QueueState::Queued,
            created_at: now,
            updated_at: now,
        }
    }

    /// Ids of the outgoing transfers carried by this batch
    #[must_use]
    pub fn outgoing_ids(&self) -> Vec<TransferId> {
        self.entries.iter().map(|e| e.outgoing_id).collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing() -> OutgoingTransfer {
        OutgoingTransfer::new(
            FileName::new("zen.2457644.12345.uv".to_string()).unwrap(),
            PeerName::new("site-b".to_string()).unwrap(),
            StoreName::new("pot1".to_string()).unwrap(),
            "copy",
        )
    }

    #[test]
    fn test_outgoing_forward_path() {
        let mut t = outgoing();
        t.advance(OutgoingState::Ongoing).unwrap();
        t.advance(OutgoingState::Staged).unwrap();
        t.advance(OutgoingState::Completed).unwrap();
        assert!(t.state.is_terminal());
    }

    #[test]
    fn test_outgoing_cannot_skip_or_rewind() {
        let mut t = outgoing();
        assert!(t.advance(OutgoingState::Staged).is_err());
        assert!(t.advance(OutgoingState::Completed).is_err());
        t.advance(OutgoingState::Ongoing).unwrap();
        assert!(t.advance(OutgoingState::Initiated).is_err());
    }

    #[test]
    fn test_outgoing_any_nonterminal_may_fail() {
        for setup in [
            vec![],
            vec![OutgoingState::Ongoing],
            vec![OutgoingState::Ongoing, OutgoingState::Staged],
        ] {
            let mut t = outgoing();
            for s in setup {
                t.advance(s).unwrap();
            }
            t.advance(OutgoingState::Failed).unwrap();
        }
    }

    #[test]
    fn test_completed_is_final() {
        let mut t = outgoing();
        t.advance(OutgoingState::Ongoing).unwrap();
        t.advance(OutgoingState::Staged).unwrap();
        t.advance(OutgoingState::Completed).unwrap();
        assert!(t.advance(OutgoingState::Failed).is_err());
    }

    #[test]
    fn test_failed_reinitiates() {
        let mut t = outgoing();
        t.advance(OutgoingState::Failed).unwrap();
        t.advance(OutgoingState::Initiated).unwrap();
        assert_eq!(t.state, OutgoingState::Initiated);
    }

    #[test]
    fn test_incoming_forward_path() {
        let mut t = IncomingTransfer::new(
            TransferId::new(),
            FileName::new("f".to_string()).unwrap(),
            ContentHash::new("d41d8cd98f00b204e9800998ecf8427e".to_string()).unwrap(),
            8,
            StoreName::new("pot1".to_string()).unwrap(),
            "/srv/staging/x",
            PeerName::new("site-a".to_string()).unwrap(),
        );
        t.advance(IncomingState::Staged).unwrap();
        t.advance(IncomingState::Ingesting).unwrap();
        t.advance(IncomingState::Completed).unwrap();
        assert!(t.advance(IncomingState::Failed).is_err());
    }

    #[test]
    fn test_state_string_roundtrip() {
        for s in [
            OutgoingState::Initiated,
            OutgoingState::Ongoing,
            OutgoingState::Staged,
            OutgoingState::Completed,
            OutgoingState::Failed,
        ] {
            assert_eq!(OutgoingState::parse(s.as_str()), Some(s));
        }
        for s in [
            IncomingState::Initiated,
            IncomingState::Staged,
            IncomingState::Ingesting,
            IncomingState::Completed,
            IncomingState::Failed,
        ] {
            assert_eq!(IncomingState::parse(s.as_str()), Some(s));
        }
    }

    #[test]
    fn test_queue_item_outgoing_ids() {
        let ids = [TransferId::new(), TransferId::new()];
        let item = SendQueueItem::new(
            BatchId::new(),
            PeerName::new("site-b".to_string()).unwrap(),
            StoreName::new("pot1".to_string()).unwrap(),
            "site-b:/staging/batch",
            ids.iter()
                .enumerate()
                .map(|(i, id)| QueueEntry {
                    src: format!("/srv/pot1/f{i}"),
                    dst: format!("f{i}"),
                    outgoing_id: *id,
                })
                .collect(),
            "copy",
        );
        assert_eq!(item.outgoing_ids(), ids);
        assert_eq!(item.state, QueueState::Queued);
    }
}
