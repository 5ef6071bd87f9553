//! send_clone - select files for a peer and stage a transport batch
//!
//! One run builds at most one batch: files on the preferred store that the
//! destination lacks, grouped into a SendQueueItem after the peer grants
//! staging slots. The queue consumer submits the batch to the transport on
//! its own cadence.

use std::str::FromStr;

use tracing::{info, warn};

use curator_core::domain::{
    BatchId, ErrorCategory, OutgoingTransfer, PeerName, QueueEntry, SendQueueItem, Severity,
    StoreName,
};
use curator_core::ports::StageSpec;

use crate::config::SendCloneConfig;
use crate::context::TaskContext;

pub async fn send_clone(context: &TaskContext, config: &SendCloneConfig) -> anyhow::Result<()> {
    let destination = PeerName::from_str(&config.destination_librarian)?;
    let store = StoreName::from_str(&config.store_preference)?;
    let Some(handles) = context.registry.get(&store) else {
        anyhow::bail!("send_clone: store {store} is not configured");
    };

    let Some(peer) = context.repository.get_peer(&destination).await? else {
        anyhow::bail!("send_clone: peer {destination} is not registered");
    };
    if !peer.transfers_enabled {
        return Ok(());
    }

    // Identity handshake; a name mismatch poisons the whole interaction.
    if let Err(e) = context.peer_client.ping(&peer).await {
        warn!(peer = %destination, error = %e, "Peer ping failed, skipping this cycle");
        context
            .repository
            .record_peer_error(&destination, &e.to_string())
            .await?;
        context
            .reporter
            .report(
                Severity::Error,
                ErrorCategory::Peer,
                &format!("ping to {destination} failed: {e}"),
            )
            .await;
        return Ok(());
    }

    let files = context
        .repository
        .files_needing_push(&destination, &store, config.age_in_days, config.send_batch_size)
        .await?;
    if files.is_empty() {
        return Ok(());
    }

    // Build the transfers in memory first: the grant call carries their
    // ids, and nothing is persisted if the peer refuses.
    let method = handles.async_manager.describe().to_string();
    let mut transfers = Vec::with_capacity(files.len());
    let mut specs = Vec::with_capacity(files.len());
    let batch_id = BatchId::new();
    for file in &files {
        let mut transfer = OutgoingTransfer::new(
            file.name.clone(),
            destination.clone(),
            store.clone(),
            method.clone(),
        );
        transfer.batch_id = Some(batch_id);
        specs.push(StageSpec {
            outgoing_id: transfer.id,
            name: file.name.clone(),
            size: file.size,
            hash: file.hash.clone(),
        });
        transfers.push(transfer);
    }

    let grant = match context
        .peer_client
        .stage_batch(&peer, batch_id, &specs)
        .await
    {
        Ok(grant) => grant,
        Err(e) => {
            warn!(peer = %destination, error = %e, "Staging grant refused");
            context
                .repository
                .record_peer_error(&destination, &e.to_string())
                .await?;
            context
                .reporter
                .report(
                    Severity::Error,
                    ErrorCategory::Peer,
                    &format!("stage_batch to {destination} failed: {e}"),
                )
                .await;
            return Ok(());
        }
    };
    context.repository.record_peer_seen(&destination).await?;

    let mut entries = Vec::with_capacity(files.len());
    for (file, transfer) in files.iter().zip(&transfers) {
        let Some(instance) = context.repository.get_instance(&file.name, &store).await? else {
            // The instance vanished between selection and staging.
            continue;
        };
        context.repository.create_outgoing(transfer).await?;
        entries.push(QueueEntry {
            src: handles
                .backend
                .absolute_path(&instance.store_path)
                .display()
                .to_string(),
            dst: file.name.as_str().to_string(),
            outgoing_id: transfer.id,
        });
    }
    if entries.is_empty() {
        return Ok(());
    }

    let item = SendQueueItem::new(
        batch_id,
        destination.clone(),
        store.clone(),
        grant.destination_endpoint,
        entries,
        method,
    );
    context.repository.enqueue_batch(&item).await?;

    info!(
        peer = %destination,
        batch = %batch_id,
        files = item.entries.len(),
        "Enqueued send batch"
    );
    Ok(())
}
