//! Peer (librarian) domain entity
//!
//! A Peer is an independent server instance in the federation, known by
//! name, addressable by URL, and authenticated by credentials that are
//! encrypted at rest. The plaintext authenticator exists only transiently,
//! inside the client adapter, at call time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::PeerName;

/// Record of a known peer instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// Unique peer name; must match the name the peer declares over ping
    pub name: PeerName,
    /// Base URL, scheme and host (e.g. `http://site-b.example.org`)
    pub base_url: String,
    /// TCP port of the peer's API surface
    pub port: u16,
    /// Encrypted `username:password` authenticator (nonce-prefixed, base64)
    pub authenticator_enc: String,
    /// Whether orchestration may select this peer as a transfer destination
    pub transfers_enabled: bool,
    /// Last successful interaction
    pub last_seen: Option<DateTime<Utc>>,
    /// Last error observed talking to this peer
    pub last_error: Option<String>,
}

impl Peer {
    /// Creates a new transfer-enabled peer record
    pub fn new(
        name: PeerName,
        base_url: impl Into<String>,
        port: u16,
        authenticator_enc: impl Into<String>,
    ) -> Self {
        Self {
            name,
            base_url: base_url.into(),
            port,
            authenticator_enc: authenticator_enc.into(),
            transfers_enabled: true,
            last_seen: None,
            last_error: None,
        }
    }

    /// Full URL of the peer's API root
    #[must_use]
    pub fn api_root(&self) -> String {
        format!("{}:{}", self.base_url.trim_end_matches('/'), self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_root_joins_port() {
        let peer = Peer::new(
            PeerName::new("site-b".to_string()).unwrap(),
            "http://site-b.example.org/",
            21106,
            "blob",
        );
        assert_eq!(peer.api_root(), "http://site-b.example.org:21106");
    }

    #[test]
    fn test_new_peer_enabled() {
        let peer = Peer::new(
            PeerName::new("site-b".to_string()).unwrap(),
            "http://b",
            80,
            "blob",
        );
        assert!(peer.transfers_enabled);
        assert!(peer.last_seen.is_none());
    }
}
