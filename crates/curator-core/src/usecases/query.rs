//! File query use cases: search, locate, validate
//!
//! Read-only operations over the metadata store, plus the validate flow
//! which re-hashes local instances against the recorded digest.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{ContentHash, File, FileName, PeerName, StoreName, StorePath};
use crate::ports::{FileSearchFilters, IMetadataRepository};
use crate::registry::StoreRegistry;

/// One location of a file: a local instance or a remote claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileLocation {
    /// Local store holding an instance; `None` for remote claims
    pub store: Option<StoreName>,
    /// Path of the local instance relative to its store root
    pub path: Option<StorePath>,
    /// Remote peer claiming a copy; `None` for local instances
    pub peer: Option<PeerName>,
}

/// One validation row for a local instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRow {
    /// Peer holding the instance; `None` for this instance's own stores
    pub peer: Option<PeerName>,
    pub store: StoreName,
    pub instance_id: i64,
    pub original_hash: ContentHash,
    /// Re-computed digest; `None` when the bytes could not be read
    pub current_hash: Option<ContentHash>,
    #[serde(rename = "match")]
    pub matches: bool,
}

/// Use case for the read-only file query surface
pub struct QueryUseCase {
    repository: Arc<dyn IMetadataRepository>,
    registry: StoreRegistry,
    max_search_results: u32,
}

impl QueryUseCase {
    /// Creates a new QueryUseCase
    pub fn new(
        repository: Arc<dyn IMetadataRepository>,
        registry: StoreRegistry,
        max_search_results: u32,
    ) -> Self {
        Self {
            repository,
            registry,
            max_search_results,
        }
    }

    /// Searches files; non-administrative callers are capped at the
    /// configured result limit
    pub async fn search_files(
        &self,
        mut filters: FileSearchFilters,
        admin: bool,
    ) -> Result<Vec<File>> {
        if !admin {
            let cap = self.max_search_results;
            filters.limit = Some(filters.limit.map_or(cap, |l| l.min(cap)));
        }
        self.repository.search_files(&filters).await
    }

    /// All known locations of a file: available local instances first,
    /// then remote claims
    pub async fn locate_file(&self, name: &FileName) -> Result<Option<Vec<FileLocation>>> {
        if self.repository.get_file(name).await?.is_none() {
            return Ok(None);
        }

        let mut locations = Vec::new();
        for instance in self.repository.instances_for_file(name).await? {
            if !instance.available {
                continue;
            }
            locations.push(FileLocation {
                store: Some(instance.store_name),
                path: Some(instance.store_path),
                peer: None,
            });
        }
        for remote in self.repository.remote_instances_for_file(name).await? {
            locations.push(FileLocation {
                store: None,
                path: None,
                peer: Some(remote.librarian_name),
            });
        }
        Ok(Some(locations))
    }

    /// Re-hashes every available local instance of a file
    ///
    /// Remote claims are not validated here; each site validates its own
    /// copies and the hypervisors reconcile disagreements.
    pub async fn validate_file(&self, name: &FileName) -> Result<Option<Vec<ValidationRow>>> {
        let Some(file) = self.repository.get_file(name).await? else {
            return Ok(None);
        };

        let mut rows = Vec::new();
        for instance in self.repository.instances_for_file(name).await? {
            if !instance.available {
                continue;
            }
            let Some(handles) = self.registry.get(&instance.store_name) else {
                warn!(store = %instance.store_name, "Instance on unconfigured store");
                continue;
            };
            let current = match handles.backend.hash_of(&instance.store_path).await {
                Ok((hash, _size)) => Some(hash),
                Err(e) => {
                    warn!(
                        file = %name,
                        store = %instance.store_name,
                        error = %e,
                        "Failed to re-hash instance"
                    );
                    None
                }
            };
            let matches = current.as_ref() == Some(&file.hash);
            rows.push(ValidationRow {
                peer: None,
                store: instance.store_name,
                instance_id: instance.id,
                original_hash: file.hash.clone(),
                current_hash: current,
                matches,
            });
        }
        Ok(Some(rows))
    }

    /// Soft-deletes the instance of `name` on `store`
    ///
    /// Returns `false` when nothing matched or the instance's deletion
    /// policy forbids removal; the repository enforces the policy in the
    /// statement and the API refuses the request separately, so the guard
    /// holds at both layers.
    pub async fn delete_instance(&self, name: &FileName, store: &StoreName) -> Result<bool> {
        self.repository
            .soft_delete_instance(name, store)
            .await
            .context("Failed to soft-delete instance")
    }
}
