//! File, Instance and RemoteInstance domain entities
//!
//! A `File` is the immutable unit of metadata: once created its size and
//! hash never change. Copies of the payload are tracked separately, as
//! `Instance` rows (local, on a named store) and `RemoteInstance` rows
//! (a claim that a named peer holds a copy). Navigation between the three
//! is by explicit query, never by in-memory back-pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ContentHash, FileName, PeerName, StoreName, StorePath};

/// The immutable metadata record of an archived file
///
/// A File may correspond to a flat byte stream or a directory tree; at the
/// metadata level both are a single named unit with one size and one hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct File {
    /// Globally unique name within this instance
    pub name: FileName,
    /// Payload size in bytes (canonical-archive size for directory trees)
    pub size: u64,
    /// Content digest
    pub hash: ContentHash,
    /// Creation time on this instance
    pub created_at: DateTime<Utc>,
    /// Name of the user or peer that uploaded the file
    pub uploader: String,
    /// Optional observation grouping key
    pub obsid: Option<i64>,
    /// Optional session grouping key
    pub session_id: Option<String>,
}

impl File {
    /// Creates a new File record stamped with the current time
    pub fn new(name: FileName, size: u64, hash: ContentHash, uploader: impl Into<String>) -> Self {
        Self {
            name,
            size,
            hash,
            created_at: Utc::now(),
            uploader: uploader.into(),
            obsid: None,
            session_id: None,
        }
    }

    /// Sets the observation grouping key
    #[must_use]
    pub fn with_obsid(mut self, obsid: i64) -> Self {
        self.obsid = Some(obsid);
        self
    }

    /// Sets the session grouping key
    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Age of the file relative to `now`, in whole days
    #[must_use]
    pub fn age_in_days(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_days()
    }
}

/// Whether a received instance may later be deleted by the local operator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionPolicy {
    /// The instance must not be deleted on this site
    #[default]
    Disallowed,
    /// The local administrator may delete the instance
    Allowed,
}

impl DeletionPolicy {
    /// String form used in the database and on the wire
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DeletionPolicy::Disallowed => "disallowed",
            DeletionPolicy::Allowed => "allowed",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "disallowed" => Some(DeletionPolicy::Disallowed),
            "allowed" => Some(DeletionPolicy::Allowed),
            _ => None,
        }
    }
}

/// A local, on-disk realisation of a File on a Store
///
/// At most one availability state exists per (file, store); the path is
/// relative to the store root and stable once committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Database row id (0 until persisted)
    pub id: i64,
    /// The file this instance realises
    pub file_name: FileName,
    /// The store holding the bytes
    pub store_name: StoreName,
    /// Path relative to the store root
    pub store_path: StorePath,
    /// False once soft-deleted or failed integrity checking
    pub available: bool,
    /// Whether the local operator may remove this instance
    pub deletion_policy: DeletionPolicy,
    /// When the instance was committed
    pub created_at: DateTime<Utc>,
}

impl Instance {
    /// Creates a new available instance stamped with the current time
    pub fn new(
        file_name: FileName,
        store_name: StoreName,
        store_path: StorePath,
        deletion_policy: DeletionPolicy,
    ) -> Self {
        Self {
            id: 0,
            file_name,
            store_name,
            store_path,
            available: true,
            deletion_policy,
            created_at: Utc::now(),
        }
    }
}

/// A recorded claim that a named peer holds an Instance of a File
///
/// Created only after the peer has confirmed ingestion, either through the
/// success callback or through hypervisor reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteInstance {
    /// The file held remotely
    pub file_name: FileName,
    /// The peer that confirmed it holds a copy
    pub librarian_name: PeerName,
    /// When the copy was confirmed
    pub copied_at: DateTime<Utc>,
}

impl RemoteInstance {
    /// Creates a new remote-instance claim stamped with the current time
    pub fn new(file_name: FileName, librarian_name: PeerName) -> Self {
        Self {
            file_name,
            librarian_name,
            copied_at: Utc::now(),
        }
    }
}
