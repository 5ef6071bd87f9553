//! Transfer hypervisors - reconcile stuck transfers against ground truth
//!
//! Lost callbacks and dropped confirmations leave transfers parked in
//! ONGOING or STAGED. The outgoing hypervisor asks the destination what it
//! actually saw and resolves per the matrix below; the incoming hypervisor
//! is its destination-side mirror, failing out slots the source never
//! filled and releasing their staging space.
//!
//! | source state | peer reports        | action                          |
//! |--------------|---------------------|---------------------------------|
//! | STAGED       | COMPLETED           | record RemoteInstance, complete |
//! | STAGED       | STAGED / INGESTING  | leave                           |
//! | STAGED       | unknown / FAILED    | fail                            |
//! | ONGOING      | STAGED / INGESTING  | synchronise forward to STAGED   |
//! | ONGOING      | COMPLETED           | synchronise forward, complete   |
//! | ONGOING      | unknown / FAILED    | fail, try to cancel transport   |

use tracing::{info, warn};

use curator_core::domain::{
    ErrorCategory, IncomingState, OutgoingState, OutgoingTransfer, Peer, RemoteInstance, Severity,
};

use crate::config::HypervisorConfig;
use crate::context::TaskContext;
use crate::scheduler::TaskBudget;

pub async fn outgoing_transfer_hypervisor(
    context: &TaskContext,
    config: &HypervisorConfig,
    budget: &TaskBudget,
) -> anyhow::Result<()> {
    let mut stuck = context
        .repository
        .outgoing_stuck_in(OutgoingState::Staged, config.age_in_days)
        .await?;
    stuck.extend(
        context
            .repository
            .outgoing_stuck_in(OutgoingState::Ongoing, config.age_in_days)
            .await?,
    );

    let mut repaired = 0u32;
    let mut failed = 0u32;
    for transfer in stuck {
        if budget.expired() {
            break;
        }

        let Some(peer) = context.repository.get_peer(&transfer.destination).await? else {
            warn!(peer = %transfer.destination, "Stuck transfer addresses an unregistered peer");
            continue;
        };

        let report = match context.peer_client.query_incoming(&peer, transfer.id).await {
            Ok(report) => report,
            Err(e) => {
                warn!(transfer = %transfer.id, error = %e, "query_incoming failed");
                context
                    .repository
                    .record_peer_error(&transfer.destination, &e.to_string())
                    .await?;
                continue;
            }
        };
        context
            .repository
            .record_peer_seen(&transfer.destination)
            .await?;

        match (transfer.state, report.state) {
            (OutgoingState::Staged, Some(IncomingState::Completed)) => {
                complete_from_sweep(context, &transfer).await?;
                repaired += 1;
            }
            (OutgoingState::Staged, Some(IncomingState::Staged | IncomingState::Ingesting)) => {
                // The destination is still working; extend the deadline by
                // doing nothing (the sweep keys off updated_at).
            }
            (OutgoingState::Staged, other) => {
                fail_from_sweep(context, &transfer, &peer, other).await?;
                failed += 1;
            }
            (OutgoingState::Ongoing, Some(IncomingState::Staged | IncomingState::Ingesting)) => {
                context
                    .repository
                    .advance_outgoing(
                        transfer.id,
                        OutgoingState::Ongoing,
                        OutgoingState::Staged,
                        None,
                    )
                    .await?;
                repaired += 1;
            }
            (OutgoingState::Ongoing, Some(IncomingState::Completed)) => {
                context
                    .repository
                    .advance_outgoing(
                        transfer.id,
                        OutgoingState::Ongoing,
                        OutgoingState::Staged,
                        None,
                    )
                    .await?;
                complete_from_sweep(context, &transfer).await?;
                repaired += 1;
            }
            (OutgoingState::Ongoing, Some(IncomingState::Initiated)) => {
                // The slot exists but the bytes never confirmed; the
                // transport leg is lost. Fail and release the pair.
                fail_from_sweep(context, &transfer, &peer, Some(IncomingState::Initiated))
                    .await?;
                failed += 1;
            }
            (OutgoingState::Ongoing, other) => {
                fail_from_sweep(context, &transfer, &peer, other).await?;
                failed += 1;
            }
            _ => {}
        }
    }

    if repaired + failed > 0 {
        info!(repaired, failed, "Outgoing hypervisor pass finished");
    }
    Ok(())
}

/// The destination completed the ingest but the callback never arrived
async fn complete_from_sweep(
    context: &TaskContext,
    transfer: &OutgoingTransfer,
) -> anyhow::Result<()> {
    context
        .repository
        .create_remote_instance(&RemoteInstance::new(
            transfer.file_name.clone(),
            transfer.destination.clone(),
        ))
        .await?;
    context
        .repository
        .advance_outgoing(
            transfer.id,
            OutgoingState::Staged,
            OutgoingState::Completed,
            None,
        )
        .await?;
    info!(transfer = %transfer.id, file = %transfer.file_name, "Repaired lost callback");
    Ok(())
}

/// The destination lost or failed the transfer; give up on this attempt
async fn fail_from_sweep(
    context: &TaskContext,
    transfer: &OutgoingTransfer,
    _peer: &Peer,
    peer_state: Option<IncomingState>,
) -> anyhow::Result<()> {
    let reason = match peer_state {
        Some(state) => format!("destination reports state {state}"),
        None => "destination does not know the transfer".to_string(),
    };

    // Best-effort cancel of a transport handle that may still be running.
    if transfer.state == OutgoingState::Ongoing {
        if let (Some(external_id), Some(handles)) = (
            transfer.external_id.as_deref(),
            context.registry.get(&transfer.source_store),
        ) {
            if let Err(e) = handles.async_manager.cancel(external_id).await {
                warn!(transfer = %transfer.id, error = %e, "Transport cancel failed");
            }
        }
    }

    context
        .repository
        .advance_outgoing(transfer.id, transfer.state, OutgoingState::Failed, Some(&reason))
        .await?;
    context
        .reporter
        .report(
            Severity::Warning,
            ErrorCategory::Transport,
            &format!("hypervisor failed transfer {} of {}: {reason}", transfer.id, transfer.file_name),
        )
        .await;
    Ok(())
}

pub async fn incoming_transfer_hypervisor(
    context: &TaskContext,
    config: &HypervisorConfig,
    budget: &TaskBudget,
) -> anyhow::Result<()> {
    // Initiated: the transport never delivered. Staged: the source never
    // confirmed or this site's receive worker is gone. Ingesting: a worker
    // died mid-commit. All of them are past the age the source needed to
    // repair its side first.
    let mut stuck = Vec::new();
    for state in [
        IncomingState::Initiated,
        IncomingState::Staged,
        IncomingState::Ingesting,
    ] {
        stuck.extend(
            context
                .repository
                .incoming_stuck_in(state, config.age_in_days)
                .await?,
        );
    }

    let mut failed = 0u32;
    for incoming in stuck {
        if budget.expired() {
            break;
        }

        let reason = format!("abandoned in {} past the sweep age", incoming.state);
        if !context
            .repository
            .advance_incoming(incoming.id, incoming.state, IncomingState::Failed, Some(&reason))
            .await?
        {
            continue;
        }
        failed += 1;

        // Release the staging slot the batch dir still holds for this file.
        let staging_path = std::path::PathBuf::from(&incoming.staging_path);
        if staging_path.exists() {
            let result = if staging_path.is_dir() {
                std::fs::remove_dir_all(&staging_path)
            } else {
                std::fs::remove_file(&staging_path)
            };
            if let Err(e) = result {
                warn!(path = %staging_path.display(), error = %e, "Failed to release staging slot");
            }
        }

        context
            .reporter
            .report(
                Severity::Warning,
                ErrorCategory::Transport,
                &format!(
                    "incoming transfer {} from {} abandoned: {reason}",
                    incoming.id, incoming.source
                ),
            )
            .await;
    }

    if failed > 0 {
        info!(failed, "Incoming hypervisor pass finished");
    }
    Ok(())
}
