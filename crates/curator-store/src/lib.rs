//! Curator Store - local POSIX storage backend
//!
//! The reference implementation of the store capability set:
//! - staged writes in unique slot directories
//! - atomic, hash-verified, never-overwriting commits
//! - MD5 content digests, with a canonical-archive digest for directory
//!   trees
//! - capacity reporting through `statvfs`
//! - full-store enumeration for reconciliation

pub mod hashing;
pub mod local;

pub use local::{CommitPolicy, LocalStore};
