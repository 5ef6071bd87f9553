//! Domain entities and invariants
//!
//! Pure business types with no I/O: files and their local/remote instances,
//! stores, transfer state machines, the send queue, peers, users, and the
//! append-only observability rows.

pub mod errors;
pub mod file;
pub mod manifest;
pub mod newtypes;
pub mod oplog;
pub mod peer;
pub mod store;
pub mod transfer;
pub mod user;

pub use errors::DomainError;
pub use file::{DeletionPolicy, File, Instance, RemoteInstance};
pub use manifest::{ManifestItem, StoreManifest, MANIFEST_VERSION};
pub use newtypes::{BatchId, ContentHash, FileName, PeerName, StoreName, StorePath, TransferId};
pub use oplog::{BackgroundTaskLog, ErrorCategory, ErrorLog, Severity, TaskOutcome};
pub use peer::Peer;
pub use store::{Store, StoreKind};
pub use transfer::{
    IncomingState, IncomingTransfer, OutgoingState, OutgoingTransfer, QueueEntry, QueueState,
    SendQueueItem,
};
pub use user::{AuthLevel, User};
