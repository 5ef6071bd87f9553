//! create_local_clone - replicate files between local stores
//!
//! For every eligible file without an instance on any destination store,
//! copy via the synchronous transfer manager to the first destination with
//! room. When every destination is full and the task is configured to, the
//! destinations are disabled in order, which lets a paired send task drain
//! them to a remote site.

use std::str::FromStr;

use tracing::{info, warn};

use curator_core::domain::{ErrorCategory, Severity, StoreName};
use curator_core::usecases::clone_into_store;

use crate::config::CreateLocalCloneConfig;
use crate::context::TaskContext;
use crate::scheduler::TaskBudget;

pub async fn create_local_clone(
    context: &TaskContext,
    config: &CreateLocalCloneConfig,
    budget: &TaskBudget,
) -> anyhow::Result<()> {
    let source = StoreName::from_str(&config.clone_from)?;
    let destinations: Vec<StoreName> = config
        .clone_to
        .iter()
        .map(|s| StoreName::from_str(s))
        .collect::<Result<_, _>>()?;
    let Some(source_handles) = context.registry.get(&source) else {
        anyhow::bail!("create_local_clone: store {source} is not configured");
    };

    let files = context
        .repository
        .files_needing_local_clone(&source, &destinations, config.age_in_days, config.files_per_run)
        .await?;
    if files.is_empty() {
        return Ok(());
    }

    let mut cloned = 0u32;
    for file in files {
        if budget.expired() {
            info!(cloned, "Local clone yielding on soft timeout");
            break;
        }

        let Some(instance) = context.repository.get_instance(&file.name, &source).await? else {
            continue;
        };
        let source_payload = source_handles.backend.absolute_path(&instance.store_path);

        // First destination with room wins.
        let mut placed = false;
        for dest in &destinations {
            let Some(record) = context.repository.get_store(dest).await? else {
                continue;
            };
            if !record.accepts_clone(file.size) {
                continue;
            }
            match clone_into_store(&context.ingest, &source_payload, dest, &file).await {
                Ok(_) => {
                    cloned += 1;
                    placed = true;
                }
                Err(e) => {
                    warn!(file = %file.name, dest = %dest, error = %e, "Local clone failed");
                    context
                        .reporter
                        .report(
                            Severity::Error,
                            ErrorCategory::Store,
                            &format!("local clone of {} to {dest} failed: {e}", file.name),
                        )
                        .await;
                }
            }
            break;
        }

        if !placed && config.disable_store_on_full {
            // Everything is full; take the destinations out of rotation.
            for dest in &destinations {
                if let Some(record) = context.repository.get_store(dest).await? {
                    if record.enabled && record.is_full() {
                        info!(store = %dest, "Disabling full clone destination");
                        context.repository.set_store_enabled(dest, false).await?;
                    }
                }
            }
            break;
        }
    }

    info!(source = %source, cloned, "Local clone pass finished");
    Ok(())
}
