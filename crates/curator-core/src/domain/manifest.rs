//! Versioned store manifest
//!
//! The on-device manifest that accompanies a physically transported store
//! ("SneakerNet"). Consumers validate the version and ignore unknown
//! fields, so older instances can read manifests written by newer ones.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::DomainError;
use super::newtypes::{ContentHash, FileName, PeerName, StorePath};

/// The manifest version this implementation writes and accepts
pub const MANIFEST_VERSION: u32 = 1;

/// One file carried by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestItem {
    pub name: FileName,
    pub size: u64,
    pub hash: ContentHash,
    pub relative_path: StorePath,
}

/// The manifest document written next to a transported store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreManifest {
    pub version: u32,
    pub items: Vec<ManifestItem>,
    pub source_librarian: PeerName,
    pub destination_librarian: PeerName,
    pub generated_at: DateTime<Utc>,
}

impl StoreManifest {
    /// Creates a new manifest stamped with the current time
    pub fn new(
        items: Vec<ManifestItem>,
        source_librarian: PeerName,
        destination_librarian: PeerName,
    ) -> Self {
        Self {
            version: MANIFEST_VERSION,
            items,
            source_librarian,
            destination_librarian,
            generated_at: Utc::now(),
        }
    }

    /// Validates the manifest version
    ///
    /// # Errors
    /// Returns `DomainError::UnsupportedManifestVersion` for any version
    /// other than [`MANIFEST_VERSION`].
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.version != MANIFEST_VERSION {
            return Err(DomainError::UnsupportedManifestVersion(self.version));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> StoreManifest {
        StoreManifest::new(
            vec![ManifestItem {
                name: FileName::new("zen.uv".to_string()).unwrap(),
                size: 8,
                hash: ContentHash::new("d41d8cd98f00b204e9800998ecf8427e".to_string()).unwrap(),
                relative_path: StorePath::new("2457644/zen.uv".to_string()).unwrap(),
            }],
            PeerName::new("site-a".to_string()).unwrap(),
            PeerName::new("site-b".to_string()).unwrap(),
        )
    }

    #[test]
    fn test_current_version_validates() {
        assert!(manifest().validate().is_ok());
    }

    #[test]
    fn test_future_version_rejected() {
        let mut m = manifest();
        m.version = 2;
        assert_eq!(
            m.validate(),
            Err(DomainError::UnsupportedManifestVersion(2))
        );
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{
            "version": 1,
            "items": [],
            "source_librarian": "site-a",
            "destination_librarian": "site-b",
            "generated_at": "2026-01-01T00:00:00Z",
            "vendor_extension": {"x": 1}
        }"#;
        let m: StoreManifest = serde_json::from_str(json).unwrap();
        assert!(m.validate().is_ok());
        assert!(m.items.is_empty());
    }

    #[test]
    fn test_json_roundtrip() {
        let m = manifest();
        let json = serde_json::to_string(&m).unwrap();
        let parsed: StoreManifest = serde_json::from_str(&json).unwrap();
        assert_eq!(m, parsed);
    }
}
