//! Store manifest use cases (SneakerNet)
//!
//! Exporting a manifest of a store that is about to travel, and ingesting a
//! manifest that arrived with a physically transported store. The bytes
//! themselves move by truck; only metadata moves here.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{
    DeletionPolicy, File, Instance, ManifestItem, OutgoingState, OutgoingTransfer, PeerName,
    StoreManifest, StoreName,
};
use crate::ports::IMetadataRepository;

/// Options for manifest export
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ManifestExportOptions {
    /// Record an outgoing transfer per item so the destination's ingest
    /// completes them through the normal callback path
    #[serde(default)]
    pub create_outgoing_transfers: bool,
    /// Disable the store once the manifest is written (it is leaving)
    #[serde(default)]
    pub disable_store: bool,
    /// Mark the local instances unavailable (the bytes are leaving)
    #[serde(default)]
    pub mark_local_instances_as_unavailable: bool,
}

/// Result of a manifest ingestion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestIngestOutcome {
    /// Names recorded as File + Instance
    pub ingested: Vec<String>,
    /// Names rejected, with reasons
    pub rejected: Vec<(String, String)>,
}

/// Use case for store manifest export and import
pub struct ManifestUseCase {
    repository: Arc<dyn IMetadataRepository>,
    /// This instance's federation name
    local_name: PeerName,
}

impl ManifestUseCase {
    /// Creates a new ManifestUseCase
    pub fn new(repository: Arc<dyn IMetadataRepository>, local_name: PeerName) -> Self {
        Self {
            repository,
            local_name,
        }
    }

    /// Builds the manifest of every available instance on `store`
    pub async fn export(
        &self,
        store: &StoreName,
        destination: &PeerName,
        options: ManifestExportOptions,
    ) -> Result<StoreManifest> {
        let instances = self.repository.instances_on_store(store).await?;

        let mut items = Vec::with_capacity(instances.len());
        for instance in &instances {
            let file = self
                .repository
                .get_file(&instance.file_name)
                .await?
                .with_context(|| format!("Instance without file row: {}", instance.file_name))?;
            items.push(ManifestItem {
                name: file.name.clone(),
                size: file.size,
                hash: file.hash.clone(),
                relative_path: instance.store_path.clone(),
            });

            if options.create_outgoing_transfers {
                let transfer = OutgoingTransfer::new(
                    file.name.clone(),
                    destination.clone(),
                    store.clone(),
                    "sneakernet",
                );
                if let Err(e) = self.repository.create_outgoing(&transfer).await {
                    // Most likely a live transfer already covers the pair.
                    warn!(file = %file.name, error = %e, "Skipping outgoing transfer for manifest item");
                } else {
                    self.repository
                        .advance_outgoing(
                            transfer.id,
                            OutgoingState::Initiated,
                            OutgoingState::Ongoing,
                            None,
                        )
                        .await?;
                }
            }
        }

        if options.mark_local_instances_as_unavailable {
            for instance in &instances {
                self.repository
                    .mark_instance_unavailable(instance.id)
                    .await?;
            }
        }
        if options.disable_store {
            self.repository.set_store_enabled(store, false).await?;
        }

        info!(
            store = %store,
            destination = %destination,
            items = items.len(),
            "Exported store manifest"
        );

        Ok(StoreManifest::new(
            items,
            self.local_name.clone(),
            destination.clone(),
        ))
    }

    /// Ingests a manifest for a store that physically arrived
    ///
    /// The bytes are already in the store's committed area at the manifest's
    /// relative paths; only metadata rows are created. Items whose name
    /// exists with a different hash are rejected (name collision is fatal);
    /// items already present with a matching hash are counted as ingested
    /// without new rows.
    pub async fn ingest(
        &self,
        store: &StoreName,
        manifest: &StoreManifest,
    ) -> Result<ManifestIngestOutcome> {
        manifest.validate()?;

        if self
            .repository
            .get_store(store)
            .await?
            .is_none()
        {
            anyhow::bail!("Unknown store: {store}");
        }

        let mut outcome = ManifestIngestOutcome::default();
        for item in &manifest.items {
            match self.ingest_item(store, item).await {
                Ok(()) => outcome.ingested.push(item.name.to_string()),
                Err(e) => outcome.rejected.push((item.name.to_string(), e.to_string())),
            }
        }

        info!(
            store = %store,
            source = %manifest.source_librarian,
            ingested = outcome.ingested.len(),
            rejected = outcome.rejected.len(),
            "Ingested store manifest"
        );
        Ok(outcome)
    }

    async fn ingest_item(&self, store: &StoreName, item: &ManifestItem) -> Result<()> {
        match self.repository.get_file(&item.name).await? {
            Some(existing) if existing.hash != item.hash => {
                anyhow::bail!("name exists with a different hash")
            }
            Some(_) => {}
            None => {
                let file = File {
                    name: item.name.clone(),
                    size: item.size,
                    hash: item.hash.clone(),
                    created_at: chrono::Utc::now(),
                    uploader: format!("sneakernet:{}", self.local_name),
                    obsid: None,
                    session_id: None,
                };
                self.repository.create_file(&file).await?;
            }
        }

        if self
            .repository
            .get_instance(&item.name, store)
            .await?
            .is_some()
        {
            // Matching hash and an existing instance: re-delivery, no-op.
            return Ok(());
        }

        let instance = Instance::new(
            item.name.clone(),
            store.clone(),
            item.relative_path.clone(),
            DeletionPolicy::Disallowed,
        );
        self.repository.create_instance(&instance).await?;
        self.repository
            .adjust_store_used(store, item.size as i64)
            .await?;
        Ok(())
    }
}
