//! User accounts and authorisation levels
//!
//! Authorisation levels form a total order; every API endpoint declares the
//! minimum level it requires and a request is authorised when the caller's
//! level is at least that minimum.

use serde::{Deserialize, Serialize};

/// Ordered authorisation levels, weakest first
///
/// `Callback` sits between read-only and read-append: it is the level
/// granted to peer instances for delivering transfer callbacks without
/// being able to upload arbitrary files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthLevel {
    /// No privileges beyond unauthenticated endpoints
    None,
    /// May search and locate
    ReadOnly,
    /// May deliver peer-to-peer transfer callbacks
    Callback,
    /// May add files and stage peer transfers
    ReadAppend,
    /// May also soft-delete instances
    ReadWrite,
    /// Full administrative control
    Admin,
}

impl AuthLevel {
    /// Whether this level satisfies a required minimum
    #[must_use]
    pub fn satisfies(&self, minimum: AuthLevel) -> bool {
        *self >= minimum
    }

    /// String form used in the database
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthLevel::None => "none",
            AuthLevel::ReadOnly => "readonly",
            AuthLevel::Callback => "callback",
            AuthLevel::ReadAppend => "readappend",
            AuthLevel::ReadWrite => "readwrite",
            AuthLevel::Admin => "admin",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(AuthLevel::None),
            "readonly" => Some(AuthLevel::ReadOnly),
            "callback" => Some(AuthLevel::Callback),
            "readappend" => Some(AuthLevel::ReadAppend),
            "readwrite" => Some(AuthLevel::ReadWrite),
            "admin" => Some(AuthLevel::Admin),
            _ => None,
        }
    }
}

impl std::fmt::Display for AuthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user account
///
/// The password is stored as a salted digest (`salt$hex`); the plaintext is
/// never persisted. Verification lives in the API crate, next to the basic
/// auth parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Unique account name
    pub name: String,
    /// Salted password digest
    pub password_digest: String,
    /// Authorisation level
    pub level: AuthLevel,
}

impl User {
    /// Creates a new user record
    pub fn new(
        name: impl Into<String>,
        password_digest: impl Into<String>,
        level: AuthLevel,
    ) -> Self {
        Self {
            name: name.into(),
            password_digest: password_digest.into(),
            level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_totally_ordered() {
        use AuthLevel::*;
        let ladder = [None, ReadOnly, Callback, ReadAppend, ReadWrite, Admin];
        for window in ladder.windows(2) {
            assert!(window[0] < window[1]);
        }
    }

    #[test]
    fn test_satisfies() {
        assert!(AuthLevel::Admin.satisfies(AuthLevel::ReadWrite));
        assert!(AuthLevel::ReadAppend.satisfies(AuthLevel::ReadAppend));
        assert!(!AuthLevel::ReadOnly.satisfies(AuthLevel::Callback));
        assert!(!AuthLevel::Callback.satisfies(AuthLevel::ReadAppend));
    }

    #[test]
    fn test_string_roundtrip() {
        use AuthLevel::*;
        for level in [None, ReadOnly, Callback, ReadAppend, ReadWrite, Admin] {
            assert_eq!(AuthLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(AuthLevel::parse("root"), Option::None);
    }
}
