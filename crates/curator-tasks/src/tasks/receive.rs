//! receive_clone - ingest staged peer transfers
//!
//! For each incoming transfer whose bytes are on the staging area, run the
//! normal commit flow (verify, rename, record File and Instance), then
//! call the source's success callback. A lost callback leaves the transfer
//! COMPLETED here; the source's hypervisor discovers that through
//! query_incoming.

use std::path::PathBuf;

use tracing::{info, warn};

use curator_core::domain::{
    DeletionPolicy, ErrorCategory, File, IncomingState, IncomingTransfer, Severity,
};
use curator_core::ports::{InstanceInfo, StageHandle};

use crate::config::ReceiveCloneConfig;
use crate::context::TaskContext;
use crate::scheduler::TaskBudget;

pub async fn receive_clone(
    context: &TaskContext,
    config: &ReceiveCloneConfig,
    budget: &TaskBudget,
) -> anyhow::Result<()> {
    let deletion_policy = DeletionPolicy::parse(&config.deletion_policy)
        .ok_or_else(|| anyhow::anyhow!("unknown deletion_policy {}", config.deletion_policy))?;

    let staged = context
        .repository
        .incoming_in_state(IncomingState::Staged, config.files_per_run)
        .await?;

    let mut received = 0u32;
    for incoming in staged {
        if budget.expired() {
            info!(received, "Receive pass yielding on soft timeout");
            break;
        }

        // Claim the transfer; a second worker loses the conditional update.
        if !context
            .repository
            .advance_incoming(
                incoming.id,
                IncomingState::Staged,
                IncomingState::Ingesting,
                None,
            )
            .await?
        {
            continue;
        }

        match ingest_one(context, &incoming, deletion_policy).await {
            Ok(()) => {
                context
                    .repository
                    .advance_incoming(
                        incoming.id,
                        IncomingState::Ingesting,
                        IncomingState::Completed,
                        None,
                    )
                    .await?;
                received += 1;
                deliver_callback(context, &incoming).await;
            }
            Err(e) => {
                warn!(transfer = %incoming.id, error = %e, "Receive ingest failed");
                context
                    .repository
                    .advance_incoming(
                        incoming.id,
                        IncomingState::Ingesting,
                        IncomingState::Failed,
                        Some(&e.to_string()),
                    )
                    .await?;
                context
                    .reporter
                    .report(
                        Severity::Error,
                        ErrorCategory::Store,
                        &format!("ingest of incoming transfer {} failed: {e}", incoming.id),
                    )
                    .await;
            }
        }
    }

    if received > 0 {
        info!(received, "Receive pass finished");
    }
    Ok(())
}

/// Commits one staged payload and records its metadata rows
async fn ingest_one(
    context: &TaskContext,
    incoming: &IncomingTransfer,
    deletion_policy: DeletionPolicy,
) -> anyhow::Result<()> {
    // Re-delivery of a file this site already holds with the same hash is
    // a success, not a collision.
    if let Some(existing) = context.repository.get_file(&incoming.file_name).await? {
        if existing.hash == incoming.expected_hash
            && context
                .repository
                .get_instance(&incoming.file_name, &incoming.store_name)
                .await?
                .is_some()
        {
            info!(file = %incoming.file_name, "Incoming payload already ingested");
            let staged = PathBuf::from(&incoming.staging_path);
            if staged.is_dir() {
                let _ = std::fs::remove_dir_all(&staged);
            } else {
                let _ = std::fs::remove_file(&staged);
            }
            return Ok(());
        }
    }

    let staging_path = PathBuf::from(&incoming.staging_path);
    let token = staging_path
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow::anyhow!("malformed staging path {}", incoming.staging_path))?;
    let handle = StageHandle {
        token,
        path: staging_path,
    };

    let file = File {
        name: incoming.file_name.clone(),
        size: incoming.expected_size,
        hash: incoming.expected_hash.clone(),
        created_at: chrono::Utc::now(),
        uploader: format!("librarian:{}", incoming.source),
        obsid: None,
        session_id: None,
    };
    context
        .ingest
        .finalize_staged(&incoming.store_name, &handle, &file, deletion_policy)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    Ok(())
}

/// Calls the source's success callback; failures only warn, the hypervisor
/// repairs lost callbacks
async fn deliver_callback(context: &TaskContext, incoming: &IncomingTransfer) {
    let peer = match context.repository.get_peer(&incoming.source).await {
        Ok(Some(peer)) => peer,
        Ok(None) => {
            warn!(peer = %incoming.source, "Cannot deliver callback to an unregistered peer");
            return;
        }
        Err(e) => {
            warn!(error = %e, "Cannot look up callback peer");
            return;
        }
    };

    let instance = match context
        .repository
        .get_instance(&incoming.file_name, &incoming.store_name)
        .await
    {
        Ok(Some(instance)) => InstanceInfo {
            store: instance.store_name,
            path: instance.store_path,
        },
        _ => {
            warn!(file = %incoming.file_name, "Ingested instance missing for callback");
            return;
        }
    };

    if let Err(e) = context
        .peer_client
        .callback_succeeded(&peer, incoming.id, &instance)
        .await
    {
        warn!(transfer = %incoming.id, error = %e, "Success callback failed");
        context
            .reporter
            .report(
                Severity::Warning,
                ErrorCategory::Transport,
                &format!("callback for {} to {} failed: {e}", incoming.id, incoming.source),
            )
            .await;
    }
}
