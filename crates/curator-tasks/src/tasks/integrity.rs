//! check_integrity - re-hash recent files against their recorded digest
//!
//! A mismatch is a critical store error: the row is logged, and the
//! instance is marked unavailable so nothing serves corrupt bytes.

use std::str::FromStr;

use tracing::{info, warn};

use curator_core::domain::{ErrorCategory, Severity, StoreName};

use crate::config::CheckIntegrityConfig;
use crate::context::TaskContext;
use crate::scheduler::TaskBudget;

pub async fn check_integrity(
    context: &TaskContext,
    config: &CheckIntegrityConfig,
    budget: &TaskBudget,
) -> anyhow::Result<()> {
    let store = StoreName::from_str(&config.store)?;
    let Some(handles) = context.registry.get(&store) else {
        anyhow::bail!("check_integrity: store {store} is not configured");
    };

    // The availability flag tracks physical reachability; this task visits
    // every store on a cadence, so it doubles as the prober.
    match handles.backend.report().await {
        Ok(_) => {
            context.repository.set_store_available(&store, true).await?;
        }
        Err(e) => {
            warn!(store = %store, error = %e, "Store is unreachable");
            context.repository.set_store_available(&store, false).await?;
            context
                .reporter
                .report(
                    Severity::Error,
                    ErrorCategory::Store,
                    &format!("store {store} is unreachable: {e}"),
                )
                .await;
            return Ok(());
        }
    }

    let pairs = context
        .repository
        .files_for_integrity_check(&store, config.age_in_days)
        .await?;

    let mut checked = 0u32;
    let mut corrupt = 0u32;
    for (file, instance) in pairs {
        if budget.expired() {
            info!(checked, "Integrity check yielding on soft timeout");
            break;
        }

        let computed = match handles.backend.hash_of(&instance.store_path).await {
            Ok((hash, _)) => hash,
            Err(e) => {
                warn!(file = %file.name, error = %e, "Integrity check cannot read instance");
                context
                    .reporter
                    .report(
                        Severity::Error,
                        ErrorCategory::Store,
                        &format!("integrity check cannot read {}: {e}", file.name),
                    )
                    .await;
                continue;
            }
        };
        checked += 1;

        if computed != file.hash {
            corrupt += 1;
            context
                .reporter
                .report(
                    Severity::Critical,
                    ErrorCategory::Store,
                    &format!(
                        "integrity failure: {} on {} hashes {} (recorded {})",
                        file.name, store, computed, file.hash
                    ),
                )
                .await;
            context
                .repository
                .mark_instance_unavailable(instance.id)
                .await?;
        }
    }

    info!(store = %store, checked, corrupt, "Integrity check finished");
    Ok(())
}
