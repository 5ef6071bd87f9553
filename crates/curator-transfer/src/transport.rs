//! Asynchronous plain file-copy transport
//!
//! The fallback `IAsyncTransferManager` for deployments where source and
//! destination share a filesystem view (NFS cross-mounts, single-host
//! federations, tests). The destination endpoint is an absolute directory
//! path; each submission copies its path pairs on a spawned task and the
//! caller polls for the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use curator_core::ports::{IAsyncTransferManager, TransportRequest, TransportStatus};

use crate::tracker::HandleTable;

/// Plain-copy asynchronous transport
pub struct CopyTransport {
    table: Arc<HandleTable>,
}

impl CopyTransport {
    /// Creates the transport with an empty handle table
    pub fn new() -> Self {
        Self {
            table: Arc::new(HandleTable::new()),
        }
    }

    fn copy_pair(src: &Path, dst: &Path) -> std::io::Result<()> {
        if let Some(parent) = dst.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let metadata = std::fs::symlink_metadata(src)?;
        if metadata.is_dir() {
            std::fs::create_dir_all(dst)?;
            for entry in std::fs::read_dir(src)? {
                let entry = entry?;
                Self::copy_pair(&entry.path(), &dst.join(entry.file_name()))?;
            }
        } else {
            std::fs::copy(src, dst)?;
        }
        Ok(())
    }
}

impl Default for CopyTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl IAsyncTransferManager for CopyTransport {
    async fn submit(&self, request: &TransportRequest) -> anyhow::Result<String> {
        if request.src_paths.len() != request.dest_paths.len() {
            anyhow::bail!(
                "path list mismatch: {} sources, {} destinations",
                request.src_paths.len(),
                request.dest_paths.len()
            );
        }

        let id = Uuid::new_v4().to_string();
        let endpoint = PathBuf::from(&request.dest_endpoint);
        let pairs: Vec<(PathBuf, PathBuf)> = request
            .src_paths
            .iter()
            .zip(&request.dest_paths)
            .map(|(src, dst)| (src.clone(), endpoint.join(dst)))
            .collect();

        self.table.register(&id);
        let table = Arc::clone(&self.table);
        let task_id = id.clone();
        let join = tokio::task::spawn_blocking(move || {
            for (src, dst) in &pairs {
                if let Err(e) = Self::copy_pair(src, dst) {
                    warn!(src = %src.display(), error = %e, "Copy transport pair failed");
                    table.finish(
                        &task_id,
                        TransportStatus::Failed {
                            reason: format!("copy of {} failed: {e}", src.display()),
                        },
                    );
                    return;
                }
            }
            table.finish(&task_id, TransportStatus::Succeeded);
        });
        self.table.attach(&id, join);

        debug!(handle = %id, pairs = request.src_paths.len(), "Submitted copy transport batch");
        Ok(id)
    }

    async fn poll(&self, external_id: &str) -> anyhow::Result<TransportStatus> {
        Ok(self.table.status(external_id))
    }

    async fn cancel(&self, external_id: &str) -> anyhow::Result<()> {
        self.table.cancel(external_id);
        Ok(())
    }

    fn describe(&self) -> &str {
        "copy"
    }
}
