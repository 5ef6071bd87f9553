//! Peer exchange use case
//!
//! The server-side half of the inter-server push protocol: granting staging
//! slots, confirming staged bytes, answering state queries (all destination
//! side), and absorbing success callbacks (source side). Every operation is
//! keyed by the source's outgoing transfer id and answers replays with the
//! prior outcome, so a peer may retry any call after a lost response.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::domain::{
    BatchId, IncomingState, IncomingTransfer, OutgoingState, PeerName, RemoteInstance, TransferId,
};
use crate::ports::{
    IMetadataRepository, IncomingReport, InstanceInfo, StageBatchGrant, StageSpec,
};
use crate::registry::StoreRegistry;

/// Classified failures of the peer-facing protocol operations
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// A requested name exists with a different hash
    #[error("File {0} already exists with a different hash")]
    Conflict(String),

    /// No configured store can stage the batch
    #[error("No store can stage the batch: {0}")]
    StoreFull(String),

    /// The referenced transfer id is not known here
    #[error("Unknown transfer {0}")]
    UnknownTransfer(TransferId),

    /// The call arrived for a transfer in an incompatible state
    #[error("Transfer {0} does not accept this call in its current state")]
    OutOfOrder(TransferId),

    /// Storage or metadata failure
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

type Result<T> = std::result::Result<T, ExchangeError>;

/// Use case for the peer-facing protocol operations
pub struct ExchangeUseCase {
    repository: Arc<dyn IMetadataRepository>,
    registry: StoreRegistry,
}

impl ExchangeUseCase {
    /// Creates a new ExchangeUseCase
    pub fn new(repository: Arc<dyn IMetadataRepository>, registry: StoreRegistry) -> Self {
        Self {
            repository,
            registry,
        }
    }

    /// Destination side: grants staging slots for a batch
    ///
    /// Picks the first ingestible store with room for the batch's total
    /// size, allocates one shared staging directory, and records an
    /// `IncomingTransfer` per file. Files whose id is already known are
    /// skipped (replayed request); files whose name exists with a different
    /// hash are refused, failing the whole grant so the source can drop
    /// them from the batch.
    pub async fn grant_stage_batch(
        &self,
        source: &PeerName,
        batch_id: BatchId,
        files: &[StageSpec],
    ) -> Result<StageBatchGrant> {
        if files.is_empty() {
            return Err(ExchangeError::Other(anyhow::anyhow!(
                "empty staging request"
            )));
        }
        let total: u64 = files.iter().map(|f| f.size).sum();

        // Name collisions with different content are fatal per file.
        for spec in files {
            if let Some(existing) = self.repository.get_file(&spec.name).await? {
                if existing.hash != spec.hash {
                    return Err(ExchangeError::Conflict(spec.name.to_string()));
                }
            }
        }

        let mut chosen = None;
        for store in self.repository.list_stores().await? {
            if store.accepts_ingest(total) && self.registry.get(&store.name).is_some() {
                chosen = Some(store.name);
                break;
            }
        }
        let store_name = chosen
            .ok_or_else(|| ExchangeError::StoreFull(format!("{total} bytes requested")))?;
        let handles = self
            .registry
            .get(&store_name)
            .expect("chosen store is registered");

        let staging_dir = handles
            .backend
            .stage_batch_dir(&batch_id, total)
            .await
            .map_err(|e| {
                if matches!(e, crate::ports::StoreError::Full { .. }) {
                    ExchangeError::StoreFull(e.to_string())
                } else {
                    ExchangeError::Other(anyhow::Error::new(e))
                }
            })?;

        for spec in files {
            if self.repository.get_incoming(spec.outgoing_id).await?.is_some() {
                // Replayed grant request; the slot already exists.
                continue;
            }
            let incoming = IncomingTransfer::new(
                spec.outgoing_id,
                spec.name.clone(),
                spec.hash.clone(),
                spec.size,
                store_name.clone(),
                staging_dir.join(spec.name.as_str()).display().to_string(),
                source.clone(),
            );
            self.repository.create_incoming(&incoming).await?;
        }

        // The transport addresses the batch through the store's configured
        // endpoint when one exists (remote transports), and through the
        // local directory path otherwise (plain-copy transport).
        let dir_name = staging_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let destination_endpoint = match &handles.async_endpoint {
            Some(endpoint) => format!("{}/{}", endpoint.trim_end_matches('/'), dir_name),
            None => staging_dir.display().to_string(),
        };

        info!(
            source = %source,
            batch = %batch_id,
            files = files.len(),
            store = %store_name,
            "Granted staging slots"
        );

        Ok(StageBatchGrant {
            destination_endpoint,
            staging_dir: staging_dir.display().to_string(),
        })
    }

    /// Destination side: the source reports the listed transfers' bytes
    /// are in the staging area
    ///
    /// Unknown ids are reported back as errors; already-staged (or further
    /// advanced) transfers are silently accepted as replays.
    pub async fn confirm_staged(&self, outgoing_ids: &[TransferId]) -> Result<()> {
        for &id in outgoing_ids {
            let Some(incoming) = self.repository.get_incoming(id).await? else {
                return Err(ExchangeError::UnknownTransfer(id));
            };
            match incoming.state {
                IncomingState::Initiated => {
                    self.repository
                        .advance_incoming(id, IncomingState::Initiated, IncomingState::Staged, None)
                        .await?;
                }
                // Replay after a lost response; already past staging.
                _ => {}
            }
        }
        Ok(())
    }

    /// Source side: absorbs a destination's success callback
    ///
    /// Creates the RemoteInstance and completes the outgoing transfer.
    /// Replays and out-of-order arrivals (callback before the staged
    /// confirmation) both converge on the same final state.
    pub async fn record_callback(
        &self,
        outgoing_id: TransferId,
        _instance: &InstanceInfo,
    ) -> Result<()> {
        let Some(transfer) = self.repository.get_outgoing(outgoing_id).await? else {
            return Err(ExchangeError::UnknownTransfer(outgoing_id));
        };

        match transfer.state {
            OutgoingState::Completed => return Ok(()),
            OutgoingState::Failed => {
                // The peer ingested a transfer we already gave up on; keep
                // the remote instance, the record stays failed.
                warn!(transfer = %outgoing_id, "Callback for a failed transfer");
            }
            OutgoingState::Ongoing => {
                // Missed the staged confirmation; synchronise forward.
                self.repository
                    .advance_outgoing(
                        outgoing_id,
                        OutgoingState::Ongoing,
                        OutgoingState::Staged,
                        None,
                    )
                    .await?;
                self.repository
                    .advance_outgoing(
                        outgoing_id,
                        OutgoingState::Staged,
                        OutgoingState::Completed,
                        None,
                    )
                    .await?;
            }
            OutgoingState::Staged => {
                self.repository
                    .advance_outgoing(
                        outgoing_id,
                        OutgoingState::Staged,
                        OutgoingState::Completed,
                        None,
                    )
                    .await?;
            }
            OutgoingState::Initiated => {
                return Err(ExchangeError::OutOfOrder(outgoing_id));
            }
        }

        self.repository
            .create_remote_instance(&RemoteInstance::new(
                transfer.file_name.clone(),
                transfer.destination.clone(),
            ))
            .await?;

        info!(
            transfer = %outgoing_id,
            file = %transfer.file_name,
            peer = %transfer.destination,
            "Transfer completed by peer callback"
        );
        Ok(())
    }

    /// Destination side: reports the state of an incoming transfer
    pub async fn report_incoming(&self, outgoing_id: TransferId) -> Result<IncomingReport> {
        Ok(match self.repository.get_incoming(outgoing_id).await? {
            Some(incoming) => IncomingReport {
                state: Some(incoming.state),
                since: Some(incoming.updated_at),
            },
            None => IncomingReport {
                state: None,
                since: None,
            },
        })
    }
}
