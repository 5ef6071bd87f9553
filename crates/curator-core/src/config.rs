//! Configuration module for curator.
//!
//! Provides typed configuration structs that map to the YAML configuration
//! file, with loading, validation and defaults. Every configuration shape is
//! explicitly enumerated and validated at startup; a server never starts on
//! a config it cannot fully interpret.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// This instance's federation name; peers verify it over ping
    pub name: String,
    /// Human-facing site name
    #[serde(default)]
    pub displayed_site_name: String,
    /// Human-facing site description
    #[serde(default)]
    pub displayed_site_description: String,

    /// Bind host for the API surface
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port for the API surface
    #[serde(default = "default_port")]
    pub port: u16,

    pub database: DatabaseConfig,

    /// Path of the symmetric key file for peer credentials
    pub encryption_key_file: PathBuf,

    /// Search result cap for non-administrative callers
    #[serde(default = "default_max_search_results")]
    pub max_search_results: u32,
    /// Per-upload size ceiling in bytes
    #[serde(default = "default_max_upload_size")]
    pub maximal_upload_size_bytes: u64,

    /// Stores this instance serves
    #[serde(default)]
    pub add_stores: Vec<StoreProfile>,

    #[serde(default)]
    pub slack_webhook: SlackWebhookConfig,

    /// Path of the JSON background task configuration; also settable
    /// through `CURATOR_BACKGROUND_CONFIG`
    #[serde(default)]
    pub background_config: Option<PathBuf>,
}

/// Database connection settings
///
/// The reference driver is `sqlite`, where `name` is the database file path
/// and the host/port/user fields are unused but still accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_driver")]
    pub driver: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    /// Database name; the file path for sqlite
    pub name: String,
}

/// One store declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreProfile {
    pub store_name: String,
    /// Backend kind tag; `local` is the reference
    #[serde(default = "default_store_type")]
    pub store_type: String,
    /// Whether fresh uploads may land here
    #[serde(default = "default_true")]
    pub ingestible: bool,
    pub store_data: StoreData,
    #[serde(default)]
    pub transfer_manager_data: TransferManagerData,
    #[serde(default)]
    pub asynchronous_transfer_manager_data: AsyncTransferManagerData,
}

/// Filesystem layout and commit policies of a store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreData {
    /// Where staging slots are allocated
    pub staging_path: PathBuf,
    /// Root of the committed area
    pub store_path: PathBuf,
    /// Fraction of capacity at which the store reports full, in (0, 1]
    #[serde(default = "default_full_fraction")]
    pub report_full_fraction: f64,
    /// Make staging slots group-writable so transports running as other
    /// users can fill them
    #[serde(default)]
    pub group_write_after_stage: bool,
    /// Chown committed payloads to this uid (requires privilege)
    #[serde(default)]
    pub own_after_commit: Option<u32>,
    /// Strip write bits from committed payloads
    #[serde(default)]
    pub readonly_after_commit: bool,
}

/// Synchronous transfer manager selection for a store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferManagerData {
    /// Manager tag; `local` is the reference (blocking file copy)
    #[serde(default = "default_sync_manager")]
    pub transfer_manager_type: String,
}

impl Default for TransferManagerData {
    fn default() -> Self {
        Self {
            transfer_manager_type: default_sync_manager(),
        }
    }
}

/// Asynchronous transfer manager selection for a store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AsyncTransferManagerData {
    /// Manager tag; `copy` (plain file-copy fallback) or `shell`
    #[serde(default = "default_async_manager")]
    pub transfer_manager_type: String,
    /// Endpoint identifier peers should address batches for this store to,
    /// e.g. `host:/staging` for a shell transport
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Argv template for the `shell` transport; `{src}` and `{dst}` are
    /// substituted per submission
    #[serde(default)]
    pub shell_argv: Vec<String>,
    /// Ceiling on concurrently live transport handles for this manager
    #[serde(default = "default_max_live_handles")]
    pub max_live_handles: u32,
}

impl Default for AsyncTransferManagerData {
    fn default() -> Self {
        Self {
            transfer_manager_type: default_async_manager(),
            endpoint: None,
            shell_argv: Vec::new(),
            max_live_handles: default_max_live_handles(),
        }
    }
}

/// Slack webhook forwarding of error rows
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SlackWebhookConfig {
    #[serde(default)]
    pub enable: bool,
    /// File containing the webhook URL (kept out of the config itself)
    #[serde(default)]
    pub url_file: Option<PathBuf>,
    /// Severities to forward; empty means all
    #[serde(default)]
    pub post_error_severity: Vec<String>,
    /// Categories to forward; empty means all
    #[serde(default)]
    pub post_error_category: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    21106
}

fn default_db_driver() -> String {
    "sqlite".to_string()
}

fn default_max_search_results() -> u32 {
    250
}

fn default_max_upload_size() -> u64 {
    // 1 TiB; primary-data payloads are large
    1 << 40
}

fn default_store_type() -> String {
    "local".to_string()
}

fn default_sync_manager() -> String {
    "local".to_string()
}

fn default_async_manager() -> String {
    "copy".to_string()
}

fn default_max_live_handles() -> u32 {
    100
}

fn default_full_fraction() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl ServerConfig {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("config: `name` must not be empty");
        }
        if self.database.driver != "sqlite" {
            anyhow::bail!(
                "config: unsupported database driver `{}` (only `sqlite` is wired)",
                self.database.driver
            );
        }
        if self.database.name.is_empty() {
            anyhow::bail!("config: `database.name` must not be empty");
        }
        if self.encryption_key_file.as_os_str().is_empty() {
            anyhow::bail!("config: `encryption_key_file` must not be empty");
        }
        if self.max_search_results == 0 {
            anyhow::bail!("config: `max_search_results` must be positive");
        }

        let mut seen = std::collections::HashSet::new();
        for profile in &self.add_stores {
            if profile.store_name.is_empty() {
                anyhow::bail!("config: a store declaration is missing `store_name`");
            }
            if !seen.insert(profile.store_name.as_str()) {
                anyhow::bail!("config: duplicate store name `{}`", profile.store_name);
            }
            if profile.store_type != "local" {
                anyhow::bail!(
                    "config: store `{}` has unknown store_type `{}`",
                    profile.store_name,
                    profile.store_type
                );
            }
            let fraction = profile.store_data.report_full_fraction;
            if !(fraction > 0.0 && fraction <= 1.0) {
                anyhow::bail!(
                    "config: store `{}` report_full_fraction must be in (0, 1], got {}",
                    profile.store_name,
                    fraction
                );
            }
            let tm = &profile.transfer_manager_data.transfer_manager_type;
            if tm != "local" {
                anyhow::bail!(
                    "config: store `{}` has unknown transfer_manager_type `{tm}`",
                    profile.store_name
                );
            }
            let atm = &profile.asynchronous_transfer_manager_data;
            match atm.transfer_manager_type.as_str() {
                "copy" => {}
                "shell" => {
                    if atm.shell_argv.is_empty() {
                        anyhow::bail!(
                            "config: store `{}` selects the shell transport without `shell_argv`",
                            profile.store_name
                        );
                    }
                }
                other => anyhow::bail!(
                    "config: store `{}` has unknown asynchronous transfer_manager_type `{other}`",
                    profile.store_name
                ),
            }
        }

        if self.slack_webhook.enable && self.slack_webhook.url_file.is_none() {
            anyhow::bail!("config: slack webhook enabled without `url_file`");
        }

        Ok(())
    }

    /// Resolves the background config path, preferring the environment
    /// override the operators use for split deployments.
    pub fn background_config_path(&self) -> Option<PathBuf> {
        std::env::var_os("CURATOR_BACKGROUND_CONFIG")
            .map(PathBuf::from)
            .or_else(|| self.background_config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> String {
        r#"
name: site-a
database:
  name: /var/lib/curator/metadata.db
encryption_key_file: /etc/curator/peer.key
add_stores:
  - store_name: pot1
    store_data:
      staging_path: /srv/pot1/staging
      store_path: /srv/pot1/store
"#
        .to_string()
    }

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config: ServerConfig = serde_yaml::from_str(&minimal_yaml()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.port, 21106);
        assert_eq!(config.database.driver, "sqlite");
        assert_eq!(config.max_search_results, 250);
        let store = &config.add_stores[0];
        assert!(store.ingestible);
        assert_eq!(store.store_data.report_full_fraction, 1.0);
        assert_eq!(
            store.asynchronous_transfer_manager_data.transfer_manager_type,
            "copy"
        );
    }

    #[test]
    fn test_unknown_driver_rejected() {
        let yaml = minimal_yaml().replace(
            "database:\n  name:",
            "database:\n  driver: oracle\n  name:",
        );
        let config: ServerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_full_fraction_rejected() {
        let yaml = minimal_yaml().replace(
            "store_path: /srv/pot1/store",
            "store_path: /srv/pot1/store\n      report_full_fraction: 1.5",
        );
        let config: ServerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_store_rejected() {
        let yaml = format!(
            "{}{}",
            minimal_yaml(),
            r#"  - store_name: pot1
    store_data:
      staging_path: /srv/other/staging
      store_path: /srv/other/store
"#
        );
        let config: ServerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shell_transport_requires_argv() {
        let yaml = minimal_yaml().replace(
            "store_path: /srv/pot1/store",
            "store_path: /srv/pot1/store\n    asynchronous_transfer_manager_data:\n      transfer_manager_type: shell",
        );
        let config: ServerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_webhook_requires_url_file() {
        let yaml = format!("{}slack_webhook:\n  enable: true\n", minimal_yaml());
        let config: ServerConfig = serde_yaml::from_str(&yaml).unwrap();
        assert!(config.validate().is_err());
    }
}
