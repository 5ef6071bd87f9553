//! File ingest use case
//!
//! Orchestrates the stage → verify → commit → record flow shared by client
//! uploads and clone receipts. The only difference between the two callers
//! is who puts the bytes into the staging slot: uploads copy them through
//! the synchronous transfer manager, clone receipts find them already
//! delivered by the async transport.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{ContentHash, DeletionPolicy, File, FileName, Instance, StoreName, StorePath};
use crate::ports::{IMetadataRepository, StageHandle, StagePurpose, StoreError};
use crate::registry::StoreRegistry;

/// Classified ingest failures, mapped onto API status codes by the surface
#[derive(Debug, Error)]
pub enum IngestError {
    /// A file of this name exists with a different hash
    #[error("File {0} already exists with a different hash")]
    Conflict(String),

    /// The payload exceeds the configured upload ceiling
    #[error("Payload of {size} bytes exceeds the upload ceiling of {ceiling}")]
    TooLarge { size: u64, ceiling: u64 },

    /// No configured store can take the payload
    #[error("No store can accept the payload: {0}")]
    StoreFull(String),

    /// The named store is not configured
    #[error("Unknown store: {0}")]
    UnknownStore(String),

    /// Backend failure during stage or commit
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Metadata or transport failure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// What an ingest produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestOutcome {
    /// Store the instance landed on
    pub store: StoreName,
    /// Committed path relative to the store root
    pub instance_path: StorePath,
    /// True when the upload matched an existing file and nothing was written
    pub duplicate: bool,
}

/// A client upload request, validated at the API boundary
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub name: FileName,
    pub size: u64,
    pub hash: ContentHash,
    /// Where the synchronous manager reads the payload from
    pub source_path: std::path::PathBuf,
    /// Preferred destination store
    pub destination_hint: Option<StoreName>,
    pub uploader: String,
    pub obsid: Option<i64>,
    pub session_id: Option<String>,
}

/// Use case for ingesting payloads into local stores
pub struct IngestUseCase {
    repository: Arc<dyn IMetadataRepository>,
    registry: StoreRegistry,
    maximal_upload_size_bytes: u64,
}

impl IngestUseCase {
    /// Creates a new IngestUseCase
    pub fn new(
        repository: Arc<dyn IMetadataRepository>,
        registry: StoreRegistry,
        maximal_upload_size_bytes: u64,
    ) -> Self {
        Self {
            repository,
            registry,
            maximal_upload_size_bytes,
        }
    }

    /// Ingests a client upload
    ///
    /// A re-upload whose hash matches the existing file is a no-op success;
    /// a name collision with a different hash is fatal to the request.
    pub async fn upload(&self, request: UploadRequest) -> Result<IngestOutcome, IngestError> {
        if request.size > self.maximal_upload_size_bytes {
            return Err(IngestError::TooLarge {
                size: request.size,
                ceiling: self.maximal_upload_size_bytes,
            });
        }

        if let Some(outcome) = self
            .check_duplicate(&request.name, &request.hash)
            .await?
        {
            return Ok(outcome);
        }

        let store_name = self
            .pick_ingest_store(request.destination_hint.as_ref(), request.size)
            .await?;
        let handles = self
            .registry
            .get(&store_name)
            .ok_or_else(|| IngestError::UnknownStore(store_name.to_string()))?;

        let handle = handles
            .backend
            .stage(&request.name, request.size, StagePurpose::Ingest)
            .await
            .map_err(classify_stage_error)?;

        if let Err(e) = handles
            .sync_manager
            .submit(&request.source_path, &handle.path)
            .await
        {
            let _ = handles.backend.abort(&handle).await;
            return Err(IngestError::Other(
                e.context("Failed to copy payload into the staging slot"),
            ));
        }

        let file = File {
            name: request.name.clone(),
            size: request.size,
            hash: request.hash.clone(),
            created_at: chrono::Utc::now(),
            uploader: request.uploader,
            obsid: request.obsid,
            session_id: request.session_id,
        };
        self.finalize_staged(&store_name, &handle, &file, DeletionPolicy::Disallowed)
            .await
    }

    /// Commits a filled staging slot and records File and Instance rows
    ///
    /// Shared by the upload flow and the clone-receipt worker. The staging
    /// slot is always released: committed on success, aborted on failure.
    pub async fn finalize_staged(
        &self,
        store_name: &StoreName,
        handle: &StageHandle,
        file: &File,
        deletion_policy: DeletionPolicy,
    ) -> Result<IngestOutcome, IngestError> {
        let handles = self
            .registry
            .get(store_name)
            .ok_or_else(|| IngestError::UnknownStore(store_name.to_string()))?;

        let instance_path = match handles
            .backend
            .commit(handle, &file.name, &file.hash)
            .await
        {
            Ok(path) => path,
            Err(e) => {
                let _ = handles.backend.abort(handle).await;
                return Err(classify_stage_error(e));
            }
        };

        // File row may already exist when this is a clone of a known file.
        match self.repository.get_file(&file.name).await? {
            Some(existing) if existing.hash != file.hash => {
                let _ = handles.backend.delete(&instance_path).await;
                return Err(IngestError::Conflict(file.name.to_string()));
            }
            Some(_) => {}
            None => {
                self.repository
                    .create_file(file)
                    .await
                    .context("Failed to record the file")?;
            }
        }

        let instance = Instance::new(
            file.name.clone(),
            store_name.clone(),
            instance_path.clone(),
            deletion_policy,
        );
        self.repository
            .create_instance(&instance)
            .await
            .context("Failed to record the instance")?;
        self.repository
            .adjust_store_used(store_name, file.size as i64)
            .await
            .context("Failed to account committed bytes")?;

        info!(
            file = %file.name,
            store = %store_name,
            path = %instance_path,
            size = file.size,
            "Ingested file"
        );

        Ok(IngestOutcome {
            store: store_name.clone(),
            instance_path,
            duplicate: false,
        })
    }

    /// Answers re-uploads: same hash is a no-op, different hash a conflict
    async fn check_duplicate(
        &self,
        name: &FileName,
        hash: &ContentHash,
    ) -> Result<Option<IngestOutcome>, IngestError> {
        let Some(existing) = self.repository.get_file(name).await? else {
            return Ok(None);
        };
        if existing.hash != *hash {
            warn!(file = %name, "Rejected re-upload with a different hash");
            return Err(IngestError::Conflict(name.to_string()));
        }

        let instances = self.repository.instances_for_file(name).await?;
        let (store, instance_path) = instances
            .iter()
            .find(|i| i.available)
            .map(|i| (i.store_name.clone(), i.store_path.clone()))
            .ok_or_else(|| {
                anyhow::anyhow!("File {name} exists but has no available instance")
            })?;
        info!(file = %name, "Re-upload with matching hash; treating as success");
        Ok(Some(IngestOutcome {
            store,
            instance_path,
            duplicate: true,
        }))
    }

    /// Picks the destination store: the hint when given, otherwise the
    /// first ingestible store with room
    async fn pick_ingest_store(
        &self,
        hint: Option<&StoreName>,
        size: u64,
    ) -> Result<StoreName, IngestError> {
        if let Some(name) = hint {
            let store = self
                .repository
                .get_store(name)
                .await?
                .ok_or_else(|| IngestError::UnknownStore(name.to_string()))?;
            if !store.accepts_ingest(size) {
                return Err(IngestError::StoreFull(format!(
                    "store {name} cannot accept {size} bytes"
                )));
            }
            return Ok(name.clone());
        }

        for store in self.repository.list_stores().await? {
            if store.accepts_ingest(size) && self.registry.get(&store.name).is_some() {
                return Ok(store.name);
            }
        }
        Err(IngestError::StoreFull(format!(
            "no ingestible store with {size} bytes free"
        )))
    }

}

/// Folds backend errors into the ingest taxonomy
fn classify_stage_error(e: StoreError) -> IngestError {
    match e {
        StoreError::Full { .. } => IngestError::StoreFull(e.to_string()),
        other => IngestError::Store(other),
    }
}

/// Copies a payload with the given manager and finalizes it in one call
///
/// Convenience for local cloning, where source bytes live on another store
/// of the same server.
pub async fn clone_into_store(
    ingest: &IngestUseCase,
    source_payload: &Path,
    destination: &StoreName,
    file: &File,
) -> Result<IngestOutcome, IngestError> {
    let handles = ingest
        .registry
        .get(destination)
        .ok_or_else(|| IngestError::UnknownStore(destination.to_string()))?;

    let handle = handles
        .backend
        .stage(&file.name, file.size, StagePurpose::Clone)
        .await
        .map_err(classify_stage_error)?;

    if let Err(e) = handles
        .sync_manager
        .submit(source_payload, &handle.path)
        .await
    {
        let _ = handles.backend.abort(&handle).await;
        return Err(IngestError::Other(
            e.context("Failed to copy payload between stores"),
        ));
    }

    ingest
        .finalize_staged(destination, &handle, file, DeletionPolicy::Allowed)
        .await
}
