//! Synchronous local-copy transfer manager
//!
//! The reference `ISyncTransferManager`: a blocking recursive copy on the
//! blocking pool. `submit` returns once every byte is in place; hash
//! verification happens at commit time in the store adapter, not here.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::Context;
use tracing::debug;

use curator_core::ports::ISyncTransferManager;

/// Recursively copies a file or directory tree, returning bytes copied
fn copy_payload(src: &Path, dst: &Path) -> io::Result<u64> {
    let metadata = fs::symlink_metadata(src)?;
    if metadata.is_file() {
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        return fs::copy(src, dst);
    }
    if !metadata.is_dir() {
        return Err(io::Error::other(format!(
            "source is neither a file nor a directory: {}",
            src.display()
        )));
    }

    fs::create_dir_all(dst)?;
    let mut total = 0u64;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        total += copy_payload(&entry.path(), &dst.join(entry.file_name()))?;
    }
    Ok(total)
}

/// Blocking file-copy transfer manager
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCopyManager;

impl LocalCopyManager {
    /// Creates the manager
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl ISyncTransferManager for LocalCopyManager {
    async fn submit(&self, src: &Path, dst: &Path) -> anyhow::Result<u64> {
        let src = src.to_path_buf();
        let dst = dst.to_path_buf();
        let bytes = tokio::task::spawn_blocking(move || copy_payload(&src, &dst))
            .await
            .context("copy task panicked")?
            .context("local copy failed")?;
        debug!(bytes, "Local copy complete");
        Ok(bytes)
    }

    fn describe(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_copies_flat_file() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("src.bin");
        let dst = dir.path().join("out/dst.bin");
        fs::write(&src, b"payload").unwrap();

        let bytes = LocalCopyManager::new().submit(&src, &dst).await.unwrap();
        assert_eq!(bytes, 7);
        assert_eq!(fs::read(dst).unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_copies_directory_tree() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("tree");
        fs::create_dir_all(src.join("sub")).unwrap();
        fs::write(src.join("a"), b"aa").unwrap();
        fs::write(src.join("sub/b"), b"bbb").unwrap();

        let dst = dir.path().join("copy");
        let bytes = LocalCopyManager::new().submit(&src, &dst).await.unwrap();
        assert_eq!(bytes, 5);
        assert_eq!(fs::read(dst.join("sub/b")).unwrap(), b"bbb");
    }

    #[tokio::test]
    async fn test_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        let result = LocalCopyManager::new()
            .submit(&dir.path().join("ghost"), &dir.path().join("dst"))
            .await;
        assert!(result.is_err());
    }
}
