//! Curator Peer - outbound wire protocol and credential handling
//!
//! The reqwest client behind the `IPeerClient` port, plus the cipher that
//! keeps peer authenticators encrypted at rest.

pub mod client;
pub mod credentials;

pub use client::HttpPeerClient;
pub use credentials::CredentialCipher;

use thiserror::Error;

/// Classified peer-interaction failures
#[derive(Debug, Error)]
pub enum PeerError {
    /// The peer declared a different name than our record
    #[error("Peer name mismatch: expected {expected}, peer declared {declared}")]
    NameMismatch { expected: String, declared: String },

    /// The peer refused our credentials
    #[error("Peer {peer} rejected the request with status {status}")]
    Rejected { peer: String, status: u16 },

    /// The peer answered with an unexpected structure or status
    #[error("Peer protocol error: {0}")]
    Protocol(String),

    /// Local credential handling failed
    #[error("Credential error: {0}")]
    Credential(String),
}
