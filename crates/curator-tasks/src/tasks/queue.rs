//! consume_queue / check_consumed_queue - drive the transport leg
//!
//! The consumer submits queued batches to the async transfer manager while
//! honouring the global live-handle cap; the checker polls live handles
//! and propagates terminal transport status onto the batch's outgoing
//! transfers (and, on success, to the destination's staged confirmation).

use std::path::PathBuf;

use tracing::{info, warn};

use curator_core::domain::{ErrorCategory, OutgoingState, QueueState, SendQueueItem, Severity};
use curator_core::ports::{TransportRequest, TransportStatus};

use crate::config::ConsumeQueueConfig;
use crate::context::TaskContext;
use crate::scheduler::TaskBudget;

pub async fn consume_queue(
    context: &TaskContext,
    config: &ConsumeQueueConfig,
    budget: &TaskBudget,
) -> anyhow::Result<()> {
    let live = context.repository.count_submitted_batches().await?;
    if live >= config.max_live_handles as u64 {
        return Ok(());
    }
    let room = (config.max_live_handles as u64 - live) as u32;

    let batches = context.repository.queued_batches(room).await?;
    let mut submitted = 0u32;
    for batch in batches {
        if budget.expired() {
            break;
        }

        let Some(handles) = context.registry.get(&batch.source_store) else {
            warn!(batch = %batch.id, store = %batch.source_store, "Batch references an unconfigured store");
            continue;
        };

        let request = TransportRequest {
            src_paths: batch.entries.iter().map(|e| PathBuf::from(&e.src)).collect(),
            dest_endpoint: batch.destination_endpoint.clone(),
            dest_paths: batch.entries.iter().map(|e| e.dst.clone()).collect(),
        };

        let external_id = match handles.async_manager.submit(&request).await {
            Ok(id) => id,
            Err(e) => {
                warn!(batch = %batch.id, error = %e, "Transport submission failed");
                context
                    .reporter
                    .report(
                        Severity::Warning,
                        ErrorCategory::Transport,
                        &format!("submission of batch {} failed: {e}", batch.id),
                    )
                    .await;
                continue;
            }
        };

        context
            .repository
            .set_batch_external(batch.id, &external_id)
            .await?;
        context
            .repository
            .set_batch_state(batch.id, QueueState::Queued, QueueState::Submitted)
            .await?;
        for id in batch.outgoing_ids() {
            context
                .repository
                .set_outgoing_external(id, &external_id)
                .await?;
            context
                .repository
                .advance_outgoing(id, OutgoingState::Initiated, OutgoingState::Ongoing, None)
                .await?;
        }
        submitted += 1;
    }

    if submitted > 0 {
        info!(submitted, "Submitted queued batches to transport");
    }
    Ok(())
}

pub async fn check_consumed_queue(context: &TaskContext, budget: &TaskBudget) -> anyhow::Result<()> {
    let batches = context.repository.submitted_batches().await?;
    for batch in batches {
        if budget.expired() {
            break;
        }
        let Some(external_id) = batch.external_id.clone() else {
            warn!(batch = %batch.id, "Submitted batch without a transport handle");
            continue;
        };
        let Some(handles) = context.registry.get(&batch.source_store) else {
            continue;
        };

        let status = match handles.async_manager.poll(&external_id).await {
            Ok(status) => status,
            Err(e) => {
                warn!(batch = %batch.id, error = %e, "Transport poll failed");
                continue;
            }
        };

        match status {
            TransportStatus::Active => {}
            TransportStatus::Succeeded => {
                complete_batch(context, &batch).await?;
            }
            TransportStatus::Failed { reason } => {
                fail_batch(context, &batch, &reason).await?;
            }
            TransportStatus::Unknown => {
                // A restarted transport forgot the handle; the bytes may or
                // may not have arrived. Fail the batch and let the
                // hypervisors reconcile against the destination.
                fail_batch(context, &batch, "transport lost the handle").await?;
            }
        }
    }
    Ok(())
}

/// Transport succeeded: confirm with the destination and mark staged
async fn complete_batch(context: &TaskContext, batch: &SendQueueItem) -> anyhow::Result<()> {
    let Some(peer) = context.repository.get_peer(&batch.destination).await? else {
        anyhow::bail!("batch {} addresses an unregistered peer", batch.id);
    };

    let ids = batch.outgoing_ids();
    if let Err(e) = context.peer_client.set_staged(&peer, &ids).await {
        // The bytes are there but the confirmation was lost; stay submitted
        // and let the next check (or the hypervisor) retry.
        warn!(batch = %batch.id, error = %e, "set_staged failed, will retry");
        context
            .repository
            .record_peer_error(&batch.destination, &e.to_string())
            .await?;
        context
            .reporter
            .report(
                Severity::Warning,
                ErrorCategory::Transport,
                &format!("set_staged for batch {} failed: {e}", batch.id),
            )
            .await;
        return Ok(());
    }
    context.repository.record_peer_seen(&batch.destination).await?;

    for id in ids {
        context
            .repository
            .advance_outgoing(id, OutgoingState::Ongoing, OutgoingState::Staged, None)
            .await?;
    }
    context
        .repository
        .set_batch_state(batch.id, QueueState::Submitted, QueueState::Done)
        .await?;
    info!(batch = %batch.id, "Batch staged on destination");
    Ok(())
}

/// Transport failed: fail every transfer with the transport's reason
async fn fail_batch(
    context: &TaskContext,
    batch: &SendQueueItem,
    reason: &str,
) -> anyhow::Result<()> {
    for entry in &batch.entries {
        context
            .repository
            .advance_outgoing(
                entry.outgoing_id,
                OutgoingState::Ongoing,
                OutgoingState::Failed,
                Some(reason),
            )
            .await?;
        context
            .reporter
            .report(
                Severity::Warning,
                ErrorCategory::Transport,
                &format!(
                    "transport failed for {} in batch {}: {reason}",
                    entry.dst, batch.id
                ),
            )
            .await;
    }
    context
        .repository
        .set_batch_state(batch.id, QueueState::Submitted, QueueState::Failed)
        .await?;
    warn!(batch = %batch.id, reason, "Batch failed in transport");
    Ok(())
}
