//! Background task configuration
//!
//! A JSON document mapping task type to a list of task configurations.
//! Every task carries a name, a cadence (`every_secs`) and a soft timeout
//! (`soft_timeout_secs`, checked between files); the remaining fields are
//! task-specific. Durations are plain seconds so a config survives being
//! written by any tool an operator has at hand.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Fields shared by every task entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCommon {
    /// Task name; defaults per type, must be unique across the document
    #[serde(default)]
    pub name: Option<String>,
    /// Seconds between runs
    #[serde(default = "default_every")]
    pub every_secs: u64,
    /// Soft timeout in seconds; the worker finishes the current file then
    /// yields
    #[serde(default = "default_soft_timeout")]
    pub soft_timeout_secs: u64,
}

fn default_every() -> u64 {
    300
}

fn default_soft_timeout() -> u64 {
    600
}

/// `check_integrity` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckIntegrityConfig {
    #[serde(flatten)]
    pub common: TaskCommon,
    /// Re-hash files created within this many days
    pub age_in_days: i64,
    pub store: String,
}

/// `create_local_clone` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLocalCloneConfig {
    #[serde(flatten)]
    pub common: TaskCommon,
    pub clone_from: String,
    pub clone_to: Vec<String>,
    #[serde(default = "default_files_per_run")]
    pub files_per_run: u32,
    #[serde(default)]
    pub age_in_days: i64,
    #[serde(default)]
    pub disable_store_on_full: bool,
}

fn default_files_per_run() -> u32 {
    100
}

/// `send_clone` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendCloneConfig {
    #[serde(flatten)]
    pub common: TaskCommon,
    pub destination_librarian: String,
    #[serde(default)]
    pub age_in_days: i64,
    pub store_preference: String,
    #[serde(default = "default_batch_size")]
    pub send_batch_size: u32,
}

fn default_batch_size() -> u32 {
    25
}

/// `consume_queue` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumeQueueConfig {
    #[serde(flatten)]
    pub common: TaskCommon,
    /// Global ceiling on concurrently live transport handles
    #[serde(default = "default_live_handles")]
    pub max_live_handles: u32,
}

fn default_live_handles() -> u32 {
    100
}

/// `check_consumed_queue` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckConsumedQueueConfig {
    #[serde(flatten)]
    pub common: TaskCommon,
}

/// `receive_clone` parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveCloneConfig {
    #[serde(flatten)]
    pub common: TaskCommon,
    /// `allowed` or `disallowed`: may the local operator later delete
    /// received instances
    #[serde(default = "default_deletion_policy")]
    pub deletion_policy: String,
    #[serde(default = "default_files_per_run")]
    pub files_per_run: u32,
}

fn default_deletion_policy() -> String {
    "disallowed".to_string()
}

/// Hypervisor parameters (outgoing and incoming share the shape)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypervisorConfig {
    #[serde(flatten)]
    pub common: TaskCommon,
    /// Sweep transfers whose last change is older than this many days
    #[serde(default)]
    pub age_in_days: i64,
}

/// The whole background configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackgroundConfig {
    #[serde(default)]
    pub check_integrity: Vec<CheckIntegrityConfig>,
    #[serde(default)]
    pub create_local_clone: Vec<CreateLocalCloneConfig>,
    #[serde(default)]
    pub send_clone: Vec<SendCloneConfig>,
    #[serde(default)]
    pub consume_queue: Vec<ConsumeQueueConfig>,
    #[serde(default)]
    pub check_consumed_queue: Vec<CheckConsumedQueueConfig>,
    #[serde(default)]
    pub receive_clone: Vec<ReceiveCloneConfig>,
    #[serde(default)]
    pub outgoing_transfer_hypervisor: Vec<HypervisorConfig>,
    #[serde(default)]
    pub incoming_transfer_hypervisor: Vec<HypervisorConfig>,
}

impl BackgroundConfig {
    /// Loads the JSON document at `path`
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BackgroundConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-entry constraints
    pub fn validate(&self) -> anyhow::Result<()> {
        for entry in &self.receive_clone {
            if !matches!(entry.deletion_policy.as_str(), "allowed" | "disallowed") {
                anyhow::bail!(
                    "background config: unknown deletion_policy `{}`",
                    entry.deletion_policy
                );
            }
        }

        // The source must try to repair a stuck transfer before the
        // destination gives up on it.
        let min_outgoing = self
            .outgoing_transfer_hypervisor
            .iter()
            .map(|h| h.age_in_days)
            .min();
        let min_incoming = self
            .incoming_transfer_hypervisor
            .iter()
            .map(|h| h.age_in_days)
            .min();
        if let (Some(outgoing), Some(incoming)) = (min_outgoing, min_incoming) {
            if outgoing >= incoming {
                tracing::warn!(
                    outgoing_age_days = outgoing,
                    incoming_age_days = incoming,
                    "Outgoing hypervisor age should be below the incoming hypervisor age"
                );
            }
        }
        Ok(())
    }
}
