//! Asynchronous shell-command transport
//!
//! Drives an external copy program (rsync over SSH in production) from an
//! argv template. `{src}` and `{dst}` are substituted per path pair, with
//! `{dst}` built as `<endpoint>/<dest path>`, matching rsync's
//! `host:/dir/file` addressing. Pairs run sequentially on one driver task
//! per submission; the transport's concurrency comes from concurrent
//! submissions, capped by the consume-queue task.

use std::process::Stdio;
use std::sync::Arc;

use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use curator_core::ports::{IAsyncTransferManager, TransportRequest, TransportStatus};

use crate::tracker::HandleTable;

/// Argv-template transport
pub struct ShellTransport {
    argv: Vec<String>,
    table: Arc<HandleTable>,
}

impl ShellTransport {
    /// Creates the transport from an argv template
    ///
    /// # Errors
    /// Fails when the template is empty or names no `{src}`/`{dst}`
    /// placeholder (such a command could never move anything).
    pub fn new(argv: Vec<String>) -> anyhow::Result<Self> {
        if argv.is_empty() {
            anyhow::bail!("shell transport requires a non-empty argv template");
        }
        let has_src = argv.iter().any(|a| a.contains("{src}"));
        let has_dst = argv.iter().any(|a| a.contains("{dst}"));
        if !has_src || !has_dst {
            anyhow::bail!("shell transport argv must reference {{src}} and {{dst}}");
        }
        Ok(Self {
            argv,
            table: Arc::new(HandleTable::new()),
        })
    }

    fn render(&self, src: &str, dst: &str) -> Vec<String> {
        self.argv
            .iter()
            .map(|a| a.replace("{src}", src).replace("{dst}", dst))
            .collect()
    }
}

#[async_trait::async_trait]
impl IAsyncTransferManager for ShellTransport {
    async fn submit(&self, request: &TransportRequest) -> anyhow::Result<String> {
        if request.src_paths.len() != request.dest_paths.len() {
            anyhow::bail!(
                "path list mismatch: {} sources, {} destinations",
                request.src_paths.len(),
                request.dest_paths.len()
            );
        }

        let id = Uuid::new_v4().to_string();
        let commands: Vec<Vec<String>> = request
            .src_paths
            .iter()
            .zip(&request.dest_paths)
            .map(|(src, dst)| {
                let dst = format!("{}/{}", request.dest_endpoint.trim_end_matches('/'), dst);
                self.render(&src.display().to_string(), &dst)
            })
            .collect();

        self.table.register(&id);
        let table = Arc::clone(&self.table);
        let task_id = id.clone();
        let join = tokio::spawn(async move {
            for argv in &commands {
                let result = Command::new(&argv[0])
                    .args(&argv[1..])
                    .stdin(Stdio::null())
                    .stdout(Stdio::null())
                    .stderr(Stdio::piped())
                    .output()
                    .await;
                match result {
                    Ok(output) if output.status.success() => {}
                    Ok(output) => {
                        let stderr = String::from_utf8_lossy(&output.stderr);
                        warn!(command = %argv[0], status = %output.status, "Shell transport command failed");
                        table.finish(
                            &task_id,
                            TransportStatus::Failed {
                                reason: format!(
                                    "{} exited with {}: {}",
                                    argv[0],
                                    output.status,
                                    stderr.trim()
                                ),
                            },
                        );
                        return;
                    }
                    Err(e) => {
                        table.finish(
                            &task_id,
                            TransportStatus::Failed {
                                reason: format!("failed to spawn {}: {e}", argv[0]),
                            },
                        );
                        return;
                    }
                }
            }
            table.finish(&task_id, TransportStatus::Succeeded);
        });
        self.table.attach(&id, join);

        debug!(handle = %id, pairs = request.src_paths.len(), "Submitted shell transport batch");
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
        "shell"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    async fn wait_terminal(transport: &ShellTransport, id: &str) -> TransportStatus {
        for _ in 0..200 {
            let status = transport.poll(id).await.unwrap();
            if status.is_terminal() {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("transport never reached a terminal status");
    }

    #[test]
    fn test_template_validation() {
        assert!(ShellTransport::new(vec![]).is_err());
        assert!(ShellTransport::new(vec!["cp".to_string()]).is_err());
        assert!(ShellTransport::new(vec![
            "cp".to_string(),
            "{src}".to_string(),
            "{dst}".to_string()
        ])
        .is_ok());
    }

    #[tokio::test]
    async fn test_cp_template_moves_bytes() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("a");
        std::fs::write(&src, b"bytes").unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir(&out).unwrap();

        let transport = ShellTransport::new(vec![
            "cp".to_string(),
            "{src}".to_string(),
            "{dst}".to_string(),
        ])
        .unwrap();
        let id = transport
            .submit(&TransportRequest {
                src_paths: vec![src],
                dest_endpoint: out.display().to_string(),
                dest_paths: vec!["a".to_string()],
            })
            .await
            .unwrap();

        assert_eq!(wait_terminal(&transport, &id).await, TransportStatus::Succeeded);
        assert_eq!(std::fs::read(out.join("a")).unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn test_failing_command_reports_failed() {
        let dir = TempDir::new().unwrap();
        let transport = ShellTransport::new(vec![
            "cp".to_string(),
            "{src}".to_string(),
            "{dst}".to_string(),
        ])
        .unwrap();
        let id = transport
            .submit(&TransportRequest {
                src_paths: vec![dir.path().join("ghost")],
                dest_endpoint: dir.path().display().to_string(),
                dest_paths: vec!["ghost".to_string()],
            })
            .await
            .unwrap();

        assert!(matches!(
            wait_terminal(&transport, &id).await,
            TransportStatus::Failed { .. }
        ));
    }
}
