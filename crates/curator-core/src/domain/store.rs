//! Store domain entity
//!
//! A Store is a storage backend holding file instances. The persistent
//! record carries the flags orchestration decides on (ingestible, enabled,
//! available) and the capacity accounting; filesystem paths and commit
//! policies live in the startup configuration, not the database, so a
//! store can be re-rooted without a metadata migration.

use serde::{Deserialize, Serialize};

use super::newtypes::StoreName;

/// Concrete store backend kind, selected by tag at configuration time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// Local POSIX filesystem (the reference backend)
    Local,
}

impl StoreKind {
    /// String form used in the database and configuration
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Local => "local",
        }
    }

    /// Parse from the stored string form
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(StoreKind::Local),
            _ => None,
        }
    }
}

/// Persistent record of a storage backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    /// Unique store name
    pub name: StoreName,
    /// Backend kind tag
    pub kind: StoreKind,
    /// Total capacity in bytes
    pub capacity: u64,
    /// Bytes committed so far
    pub used: u64,
    /// Whether fresh uploads may land here (clones are allowed regardless)
    pub ingestible: bool,
    /// Administrative enable flag; disabled stores reject new transfers
    pub enabled: bool,
    /// Whether the backing device is physically reachable
    pub available: bool,
    /// Fraction of capacity at which the store reports full, in (0, 1]
    pub report_full_fraction: f64,
}

impl Store {
    /// Creates a new enabled, available store record
    pub fn new(name: StoreName, kind: StoreKind, capacity: u64, ingestible: bool) -> Self {
        Self {
            name,
            kind,
            capacity,
            used: 0,
            ingestible,
            enabled: true,
            available: true,
            report_full_fraction: 1.0,
        }
    }

    /// Bytes still available before the full threshold
    #[must_use]
    pub fn free(&self) -> u64 {
        self.threshold().saturating_sub(self.used)
    }

    /// The byte count at which this store reports full
    #[must_use]
    pub fn threshold(&self) -> u64 {
        (self.capacity as f64 * self.report_full_fraction) as u64
    }

    /// Whether the store currently reports full
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.used >= self.threshold()
    }

    /// Whether `additional` bytes would push the store past its threshold
    #[must_use]
    pub fn would_overflow(&self, additional: u64) -> bool {
        self.used.saturating_add(additional) > self.threshold()
    }

    /// Whether the store can accept a fresh upload of `size` bytes
    #[must_use]
    pub fn accepts_ingest(&self, size: u64) -> bool {
        self.enabled && self.ingestible && self.available && !self.would_overflow(size)
    }

    /// Whether the store can accept a clone of `size` bytes
    ///
    /// Clones land on non-ingestible stores too.
    #[must_use]
    pub fn accepts_clone(&self, size: u64) -> bool {
        self.enabled && self.available && !self.would_overflow(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(capacity: u64, fraction: f64) -> Store {
        let mut s = Store::new(
            StoreName::new("pot1".to_string()).unwrap(),
            StoreKind::Local,
            capacity,
            true,
        );
        s.report_full_fraction = fraction;
        s
    }

    #[test]
    fn test_full_threshold() {
        let mut s = store(1024, 1.0);
        s.used = 1000;
        assert!(!s.is_full());
        assert!(s.would_overflow(100));
        assert!(!s.would_overflow(24));
        s.used = 1024;
        assert!(s.is_full());
    }

    #[test]
    fn test_report_full_fraction_scales_threshold() {
        let mut s = store(1000, 0.9);
        s.used = 899;
        assert!(!s.is_full());
        s.used = 900;
        assert!(s.is_full());
    }

    #[test]
    fn test_non_ingestible_accepts_clone_only() {
        let mut s = store(1024, 1.0);
        s.ingestible = false;
        assert!(!s.accepts_ingest(10));
        assert!(s.accepts_clone(10));
    }

    #[test]
    fn test_disabled_rejects_everything() {
        let mut s = store(1024, 1.0);
        s.enabled = false;
        assert!(!s.accepts_ingest(10));
        assert!(!s.accepts_clone(10));
    }

    #[test]
    fn test_store_kind_roundtrip() {
        assert_eq!(StoreKind::parse("local"), Some(StoreKind::Local));
        assert_eq!(StoreKind::parse("tape"), None);
    }
}
