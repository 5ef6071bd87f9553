//! Domain newtypes with validation
//!
//! Strongly-typed wrappers for domain identifiers and values. Each newtype
//! ensures data validity at construction time, so the rest of the codebase
//! never has to re-check a file name or hash it received from a caller.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// UUID-based ID types
// ============================================================================

/// Identifier of an outgoing transfer
///
/// This id doubles as the cross-peer idempotency key: the destination
/// records it on its `IncomingTransfer`, and every callback carries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransferId(Uuid);

impl TransferId {
    /// Create a new random TransferId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a TransferId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TransferId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid TransferId: {e}")))
    }
}

/// Identifier of a send-queue batch
///
/// Generated by the source when it requests staging slots; the destination
/// uses it to name the shared staging directory for the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Create a new random BatchId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a BatchId from an existing UUID
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for BatchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BatchId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid BatchId: {e}")))
    }
}

// ============================================================================
// File name
// ============================================================================

/// Maximum accepted length of a file name in bytes
const MAX_FILE_NAME_LEN: usize = 256;

/// A validated archive file name
///
/// File names are globally unique within an instance and never contain
/// directory separators; a name that corresponds to a directory tree is
/// still a single flat name at the metadata level.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileName(String);

impl FileName {
    /// Create a new FileName
    ///
    /// # Errors
    /// Returns `DomainError::InvalidFileName` if the name is empty, longer
    /// than 256 bytes, or contains `/`, `\` or NUL.
    pub fn new(name: String) -> Result<Self, DomainError> {
        if name.is_empty() {
            return Err(DomainError::InvalidFileName(
                "name cannot be empty".to_string(),
            ));
        }
        if name.len() > MAX_FILE_NAME_LEN {
            return Err(DomainError::InvalidFileName(format!(
                "name exceeds {MAX_FILE_NAME_LEN} bytes"
            )));
        }
        if name.contains('/') || name.contains('\\') || name.contains('\0') {
            return Err(DomainError::InvalidFileName(format!(
                "name contains a path separator: {name}"
            )));
        }
        if name == "." || name == ".." {
            return Err(DomainError::InvalidFileName(name));
        }
        Ok(Self(name))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for FileName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for FileName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for FileName {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<FileName> for String {
    fn from(name: FileName) -> Self {
        name.0
    }
}

// ============================================================================
// Content hash
// ============================================================================

/// An MD5-width content digest in lowercase hex
///
/// The federation's historical digest is MD5; the width is fixed at 128 bits
/// (32 hex characters). Uppercase input is normalised to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Expected hex length of the digest (128 bits)
    const HEX_LEN: usize = 32;

    /// Create a new ContentHash
    ///
    /// # Errors
    /// Returns `DomainError::InvalidHash` if the string is not 32 hex chars.
    pub fn new(hash: String) -> Result<Self, DomainError> {
        if hash.len() != Self::HEX_LEN {
            return Err(DomainError::InvalidHash(format!(
                "expected {} hex chars, got {}",
                Self::HEX_LEN,
                hash.len()
            )));
        }
        if !hash.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidHash(format!(
                "not a hex string: {hash}"
            )));
        }
        Ok(Self(hash.to_ascii_lowercase()))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for ContentHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContentHash {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for ContentHash {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

// ============================================================================
// Store and peer names
// ============================================================================

/// Checks a short identifier: non-empty, `[A-Za-z0-9._-]` only
fn validate_short_name(name: &str) -> Result<(), DomainError> {
    if name.is_empty() {
        return Err(DomainError::InvalidName("name cannot be empty".to_string()));
    }
    if name.len() > 64 {
        return Err(DomainError::InvalidName(format!(
            "name exceeds 64 bytes: {name}"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-')
    {
        return Err(DomainError::InvalidName(format!(
            "name contains invalid characters: {name}"
        )));
    }
    Ok(())
}

/// A validated store name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StoreName(String);

impl StoreName {
    /// Create a new StoreName
    ///
    /// # Errors
    /// Returns `DomainError::InvalidName` on an empty or malformed name.
    pub fn new(name: String) -> Result<Self, DomainError> {
        validate_short_name(&name)?;
        Ok(Self(name))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StoreName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StoreName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for StoreName {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<StoreName> for String {
    fn from(name: StoreName) -> Self {
        name.0
    }
}

/// A validated peer (librarian) name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerName(String);

impl PeerName {
    /// Create a new PeerName
    ///
    /// # Errors
    /// Returns `DomainError::InvalidName` on an empty or malformed name.
    pub fn new(name: String) -> Result<Self, DomainError> {
        validate_short_name(&name)?;
        Ok(Self(name))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PeerName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PeerName {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for PeerName {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<PeerName> for String {
    fn from(name: PeerName) -> Self {
        name.0
    }
}

// ============================================================================
// Store-relative path
// ============================================================================

/// A path relative to a store root
///
/// Instance paths are stored relative to their store's root so that a store
/// can be relocated (or carried to another site) without rewriting metadata.
/// The path never escapes the root: no leading `/`, no `..` component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StorePath(String);

impl StorePath {
    /// Create a new StorePath
    ///
    /// # Errors
    /// Returns `DomainError::InvalidStorePath` if the path is empty,
    /// absolute, or contains a `..` component.
    pub fn new(path: String) -> Result<Self, DomainError> {
        if path.is_empty() {
            return Err(DomainError::InvalidStorePath(
                "path cannot be empty".to_string(),
            ));
        }
        if path.starts_with('/') {
            return Err(DomainError::InvalidStorePath(format!(
                "path must be relative: {path}"
            )));
        }
        if path.split('/').any(|c| c == ".." || c.is_empty()) {
            return Err(DomainError::InvalidStorePath(format!(
                "path contains invalid components: {path}"
            )));
        }
        if path.contains('\0') {
            return Err(DomainError::InvalidStorePath(
                "path contains NUL".to_string(),
            ));
        }
        Ok(Self(path))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve against a store root
    #[must_use]
    pub fn under(&self, root: &std::path::Path) -> std::path::PathBuf {
        root.join(&self.0)
    }
}

impl Display for StorePath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StorePath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for StorePath {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<StorePath> for String {
    fn from(path: StorePath) -> Self {
        path.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    mod transfer_id_tests {
        use super::*;

        #[test]
        fn test_new_creates_unique_ids() {
            assert_ne!(TransferId::new(), TransferId::new());
        }

        #[test]
        fn test_from_str_roundtrip() {
            let id = TransferId::new();
            let parsed: TransferId = id.to_string().parse().unwrap();
            assert_eq!(id, parsed);
        }

        #[test]
        fn test_from_str_invalid() {
            let result: Result<TransferId, _> = "not-a-uuid".parse();
            assert!(result.is_err());
        }

        #[test]
        fn test_serde_roundtrip() {
            let id = TransferId::new();
            let json = serde_json::to_string(&id).unwrap();
            let parsed: TransferId = serde_json::from_str(&json).unwrap();
            assert_eq!(id, parsed);
        }
    }

    mod file_name_tests {
        use super::*;

        #[test]
        fn test_valid_name() {
            let name = FileName::new("zen.2457644.12345.uv".to_string()).unwrap();
            assert_eq!(name.as_str(), "zen.2457644.12345.uv");
        }

        #[test]
        fn test_empty_fails() {
            assert!(FileName::new(String::new()).is_err());
        }

        #[test]
        fn test_separator_fails() {
            assert!(FileName::new("a/b".to_string()).is_err());
            assert!(FileName::new("a\\b".to_string()).is_err());
        }

        #[test]
        fn test_dot_names_fail() {
            assert!(FileName::new(".".to_string()).is_err());
            assert!(FileName::new("..".to_string()).is_err());
        }

        #[test]
        fn test_too_long_fails() {
            assert!(FileName::new("x".repeat(257)).is_err());
        }
    }

    mod content_hash_tests {
        use super::*;

        #[test]
        fn test_valid_hash() {
            let hash = ContentHash::new("d41d8cd98f00b204e9800998ecf8427e".to_string()).unwrap();
            assert_eq!(hash.as_str(), "d41d8cd98f00b204e9800998ecf8427e");
        }

        #[test]
        fn test_uppercase_normalised() {
            let hash = ContentHash::new("D41D8CD98F00B204E9800998ECF8427E".to_string()).unwrap();
            assert_eq!(hash.as_str(), "d41d8cd98f00b204e9800998ecf8427e");
        }

        #[test]
        fn test_wrong_length_fails() {
            assert!(ContentHash::new("abcd".to_string()).is_err());
        }

        #[test]
        fn test_non_hex_fails() {
            assert!(ContentHash::new("g".repeat(32)).is_err());
        }
    }

    mod store_path_tests {
        use super::*;

        #[test]
        fn test_valid_relative() {
            let path = StorePath::new("2457644/zen.uv".to_string()).unwrap();
            assert_eq!(path.as_str(), "2457644/zen.uv");
        }

        #[test]
        fn test_absolute_fails() {
            assert!(StorePath::new("/etc/passwd".to_string()).is_err());
        }

        #[test]
        fn test_traversal_fails() {
            assert!(StorePath::new("a/../b".to_string()).is_err());
        }

        #[test]
        fn test_under() {
            let path = StorePath::new("a/b".to_string()).unwrap();
            assert_eq!(
                path.under(std::path::Path::new("/srv/store")),
                std::path::PathBuf::from("/srv/store/a/b")
            );
        }
    }

    mod short_name_tests {
        use super::*;

        #[test]
        fn test_valid_names() {
            assert!(StoreName::new("pot1".to_string()).is_ok());
            assert!(PeerName::new("site-b.archive_2".to_string()).is_ok());
        }

        #[test]
        fn test_invalid_chars_fail() {
            assert!(StoreName::new("a b".to_string()).is_err());
            assert!(PeerName::new("a/b".to_string()).is_err());
        }
    }
}
