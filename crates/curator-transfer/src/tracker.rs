//! Shared handle table for asynchronous transports
//!
//! Both transports submit work onto the runtime and answer polls from this
//! table. Entries are never evicted by the transports themselves; the
//! orchestration layer stops polling once it has propagated a terminal
//! status, and a restarted process simply reports `Unknown`, which the
//! hypervisors treat as a failure to sweep.

use dashmap::DashMap;
use tokio::task::JoinHandle;

use curator_core::ports::TransportStatus;

/// Status and join handle per live submission
pub(crate) struct HandleTable {
    statuses: DashMap<String, TransportStatus>,
    joins: DashMap<String, JoinHandle<()>>,
}

impl HandleTable {
    pub(crate) fn new() -> Self {
        Self {
            statuses: DashMap::new(),
            joins: DashMap::new(),
        }
    }

    /// Marks a submission active; call before spawning its driver so a
    /// fast driver cannot race the registration
    pub(crate) fn register(&self, id: &str) {
        self.statuses
            .insert(id.to_string(), TransportStatus::Active);
    }

    /// Attaches the driver's join handle for cancellation
    pub(crate) fn attach(&self, id: &str, join: JoinHandle<()>) {
        self.joins.insert(id.to_string(), join);
    }

    /// Records the terminal status of a submission
    pub(crate) fn finish(&self, id: &str, status: TransportStatus) {
        self.statuses.insert(id.to_string(), status);
        self.joins.remove(id);
    }

    /// Current status; `Unknown` for handles this process never saw
    pub(crate) fn status(&self, id: &str) -> TransportStatus {
        self.statuses
            .get(id)
            .map(|s| s.clone())
            .unwrap_or(TransportStatus::Unknown)
    }

    /// Best-effort cancel: aborts the driving task; only an Active handle
    /// changes status
    pub(crate) fn cancel(&self, id: &str) {
        if let Some((_, join)) = self.joins.remove(id) {
            join.abort();
        }
        if let Some(mut entry) = self.statuses.get_mut(id) {
            if *entry == TransportStatus::Active {
                *entry = TransportStatus::Failed {
                    reason: "cancelled".to_string(),
                };
            }
        }
    }
}
