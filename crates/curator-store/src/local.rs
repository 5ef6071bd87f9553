//! Local POSIX store backend
//!
//! The reference `IStoreBackend`: staging slots are unique directories under
//! the staging root, commits verify the streamed digest and atomically
//! rename the payload into the committed area, and capacity comes from
//! `statvfs`. Acceptance checks (enabled, ingestible, available, room below
//! the full threshold) read the store's metadata row, so an administrative
//! disable takes effect on the next stage call.
//!
//! The committed path of a payload is simply its file name at the store
//! root; name uniqueness is global, so no sharding scheme is needed for
//! correctness.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use curator_core::domain::{ContentHash, FileName, StoreName, StorePath};
use curator_core::ports::{
    IMetadataRepository, IStoreBackend, StageHandle, StagePurpose, StoreError, StoreReport,
    StoredEntry,
};

use crate::hashing;

/// Post-commit policies from the store's configuration
#[derive(Debug, Clone, Default)]
pub struct CommitPolicy {
    /// Make staging slots group-writable (transports running as other users)
    pub group_write_after_stage: bool,
    /// Chown committed payloads to this uid
    pub own_after_commit: Option<u32>,
    /// Strip write bits from committed payloads
    pub readonly_after_commit: bool,
}

/// Local-filesystem store backend
pub struct LocalStore {
    name: StoreName,
    staging_root: PathBuf,
    store_root: PathBuf,
    policy: CommitPolicy,
    repository: Arc<dyn IMetadataRepository>,
}

impl LocalStore {
    /// Creates the backend, ensuring both roots exist
    pub fn new(
        name: StoreName,
        staging_root: PathBuf,
        store_root: PathBuf,
        policy: CommitPolicy,
        repository: Arc<dyn IMetadataRepository>,
    ) -> Result<Self, StoreError> {
        for root in [&staging_root, &store_root] {
            std::fs::create_dir_all(root).map_err(|e| StoreError::Io {
                store: name.to_string(),
                source: e,
            })?;
        }
        Ok(Self {
            name,
            staging_root,
            store_root,
            policy,
            repository,
        })
    }

    /// Root of the committed area
    pub fn store_root(&self) -> &Path {
        &self.store_root
    }

    fn io_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            store: self.name.to_string(),
            source,
        }
    }

    /// Reads the store row and checks acceptance for the given purpose
    async fn check_acceptance(
        &self,
        expected_size: u64,
        purpose: StagePurpose,
    ) -> Result<(), StoreError> {
        let record = self
            .repository
            .get_store(&self.name)
            .await
            .map_err(|e| StoreError::NotAccepting {
                store: self.name.to_string(),
                reason: format!("metadata unavailable: {e}"),
            })?
            .ok_or_else(|| StoreError::NotAccepting {
                store: self.name.to_string(),
                reason: "store has no metadata row".to_string(),
            })?;

        if !record.enabled {
            return Err(StoreError::NotAccepting {
                store: self.name.to_string(),
                reason: "store is disabled".to_string(),
            });
        }
        if !record.available {
            return Err(StoreError::NotAccepting {
                store: self.name.to_string(),
                reason: "store is unavailable".to_string(),
            });
        }
        if purpose == StagePurpose::Ingest && !record.ingestible {
            return Err(StoreError::NotAccepting {
                store: self.name.to_string(),
                reason: "store is not ingestible".to_string(),
            });
        }
        if record.would_overflow(expected_size) {
            return Err(StoreError::Full {
                store: self.name.to_string(),
                needed: expected_size,
                free: record.free(),
            });
        }
        Ok(())
    }

    fn slot_dir(&self, token: &str) -> PathBuf {
        self.staging_root.join(token)
    }

    /// Strips write bits from a committed payload, recursively for trees
    fn apply_readonly(path: &Path) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path)?;
        let mut mode = metadata.permissions().mode();
        mode &= !0o222;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
        if metadata.is_dir() {
            for entry in std::fs::read_dir(path)? {
                Self::apply_readonly(&entry?.path())?;
            }
        }
        Ok(())
    }

    /// Chowns a committed payload, recursively for trees
    fn apply_owner(path: &Path, uid: u32) -> std::io::Result<()> {
        let c_path = std::ffi::CString::new(path.as_os_str().as_encoded_bytes())
            .map_err(std::io::Error::other)?;
        // Keep the group unchanged.
        let rc = unsafe { libc::chown(c_path.as_ptr(), uid, u32::MAX) };
        if rc != 0 {
            return Err(std::io::Error::last_os_error());
        }
        if std::fs::metadata(path)?.is_dir() {
            for entry in std::fs::read_dir(path)? {
                Self::apply_owner(&entry?.path(), uid)?;
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl IStoreBackend for LocalStore {
    fn name(&self) -> &StoreName {
        &self.name
    }

    fn staging_root(&self) -> &Path {
        &self.staging_root
    }

    fn absolute_path(&self, path: &StorePath) -> PathBuf {
        path.under(&self.store_root)
    }

    async fn stage(
        &self,
        name: &FileName,
        expected_size: u64,
        purpose: StagePurpose,
    ) -> Result<StageHandle, StoreError> {
        self.check_acceptance(expected_size, purpose).await?;

        let token = Uuid::new_v4().to_string();
        let slot = self.slot_dir(&token);
        std::fs::create_dir_all(&slot).map_err(|e| self.io_err(e))?;

        if self.policy.group_write_after_stage {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&slot, std::fs::Permissions::from_mode(0o2775))
                .map_err(|e| self.io_err(e))?;
        }

        let path = slot.join(name.as_str());
        debug!(store = %self.name, file = %name, slot = %token, "Allocated staging slot");
        Ok(StageHandle { token, path })
    }

    async fn stage_batch_dir(
        &self,
        batch: &curator_core::domain::BatchId,
        total_size: u64,
    ) -> Result<PathBuf, StoreError> {
        self.check_acceptance(total_size, StagePurpose::Ingest).await?;

        let dir = self.staging_root.join(format!("batch-{batch}"));
        std::fs::create_dir_all(&dir).map_err(|e| self.io_err(e))?;
        if self.policy.group_write_after_stage {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o2775))
                .map_err(|e| self.io_err(e))?;
        }
        debug!(store = %self.name, batch = %batch, "Allocated batch staging directory");
        Ok(dir)
    }

    async fn commit(
        &self,
        handle: &StageHandle,
        final_name: &FileName,
        expected_hash: &ContentHash,
    ) -> Result<StorePath, StoreError> {
        if !handle.path.exists() {
            return Err(StoreError::StagedPayloadMissing(
                handle.path.display().to_string(),
            ));
        }

        let staged = handle.path.clone();
        let (computed, size) = tokio::task::spawn_blocking(move || hashing::hash_payload(&staged))
            .await
            .map_err(|e| self.io_err(std::io::Error::other(e)))?
            .map_err(|e| self.io_err(e))?;

        if computed != *expected_hash {
            warn!(
                store = %self.name,
                file = %final_name,
                expected = %expected_hash,
                computed = %computed,
                "Hash mismatch at commit"
            );
            return Err(StoreError::HashMismatch {
                name: final_name.to_string(),
                expected: expected_hash.to_string(),
                computed: computed.to_string(),
            });
        }

        let target = self.store_root.join(final_name.as_str());
        if target.exists() {
            return Err(StoreError::TargetExists(final_name.to_string()));
        }

        std::fs::rename(&handle.path, &target).map_err(|e| self.io_err(e))?;

        if self.policy.readonly_after_commit {
            Self::apply_readonly(&target).map_err(|e| self.io_err(e))?;
        }
        if let Some(uid) = self.policy.own_after_commit {
            Self::apply_owner(&target, uid).map_err(|e| self.io_err(e))?;
        }

        // The slot directory is empty now; drop it.
        let _ = std::fs::remove_dir(self.slot_dir(&handle.token));

        info!(
            store = %self.name,
            file = %final_name,
            size,
            "Committed payload"
        );

        StorePath::new(final_name.as_str().to_string()).map_err(|_| {
            // FileName validation is strictly tighter than StorePath's.
            StoreError::TargetExists(final_name.to_string())
        })
    }

    async fn abort(&self, handle: &StageHandle) -> Result<(), StoreError> {
        let slot = self.slot_dir(&handle.token);
        if slot.exists() {
            std::fs::remove_dir_all(&slot).map_err(|e| self.io_err(e))?;
            debug!(store = %self.name, slot = %handle.token, "Released staging slot");
        }
        Ok(())
    }

    async fn delete(&self, path: &StorePath) -> Result<u64, StoreError> {
        let target = path.under(&self.store_root);
        if !target.exists() {
            return Ok(0);
        }
        let freed = hashing::payload_size(&target).map_err(|e| self.io_err(e))?;
        if target.is_dir() {
            std::fs::remove_dir_all(&target).map_err(|e| self.io_err(e))?;
        } else {
            std::fs::remove_file(&target).map_err(|e| self.io_err(e))?;
        }
        info!(store = %self.name, path = %path, freed, "Deleted payload");
        Ok(freed)
    }

    async fn hash_of(&self, path: &StorePath) -> Result<(ContentHash, u64), StoreError> {
        let target = path.under(&self.store_root);
        tokio::task::spawn_blocking(move || hashing::hash_payload(&target))
            .await
            .map_err(|e| self.io_err(std::io::Error::other(e)))?
            .map_err(|e| self.io_err(e))
    }

    async fn report(&self) -> Result<StoreReport, StoreError> {
        let root = self.store_root.clone();
        let store = self.name.to_string();
        tokio::task::spawn_blocking(move || {
            let c_path = std::ffi::CString::new(root.as_os_str().as_encoded_bytes())
                .map_err(std::io::Error::other)?;
            let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
            let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
            if rc != 0 {
                return Err(std::io::Error::last_os_error());
            }
            let frsize = stat.f_frsize as u64;
            let capacity = stat.f_blocks as u64 * frsize;
            let free = stat.f_bavail as u64 * frsize;
            Ok(StoreReport {
                capacity,
                used: capacity - stat.f_bfree as u64 * frsize,
                free,
            })
        })
        .await
        .map_err(|e| StoreError::Io {
            store: store.clone(),
            source: std::io::Error::other(e),
        })?
        .map_err(|e| StoreError::Io { store, source: e })
    }

    async fn enumerate(&self) -> Result<Vec<StoredEntry>, StoreError> {
        let root = self.store_root.clone();
        let entries = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<(String, ContentHash, u64)>> {
            let mut out = Vec::new();
            let mut names: Vec<_> = std::fs::read_dir(&root)?
                .collect::<Result<Vec<_>, _>>()?
                .into_iter()
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect();
            names.sort();
            for name in names {
                let path = root.join(&name);
                let (hash, size) = hashing::hash_payload(&path)?;
                out.push((name, hash, size));
            }
            Ok(out)
        })
        .await
        .map_err(|e| self.io_err(std::io::Error::other(e)))?
        .map_err(|e| self.io_err(e))?;

        let mut out = Vec::with_capacity(entries.len());
        for (name, hash, size) in entries {
            let path = StorePath::new(name).map_err(|e| {
                self.io_err(std::io::Error::other(format!("unenumerable entry: {e}")))
            })?;
            out.push(StoredEntry { path, size, hash });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curator_core::domain::{Store, StoreKind};
    use curator_db::{DatabasePool, SqliteMetadataRepository};
    use tempfile::TempDir;

    async fn setup(capacity: u64, fraction: f64) -> (TempDir, LocalStore, Arc<dyn IMetadataRepository>) {
        let dir = TempDir::new().unwrap();
        let pool = DatabasePool::in_memory().await.unwrap();
        let repo: Arc<dyn IMetadataRepository> =
            Arc::new(SqliteMetadataRepository::new(pool.pool().clone()));

        let name = StoreName::new("pot1".to_string()).unwrap();
        let mut record = Store::new(name.clone(), StoreKind::Local, capacity, true);
        record.report_full_fraction = fraction;
        repo.upsert_store(&record).await.unwrap();

        let store = LocalStore::new(
            name,
            dir.path().join("staging"),
            dir.path().join("store"),
            CommitPolicy::default(),
            Arc::clone(&repo),
        )
        .unwrap();
        (dir, store, repo)
    }

    fn file_name(s: &str) -> FileName {
        FileName::new(s.to_string()).unwrap()
    }

    async fn stage_and_fill(store: &LocalStore, name: &str, content: &[u8]) -> StageHandle {
        let handle = store
            .stage(&file_name(name), content.len() as u64, StagePurpose::Ingest)
            .await
            .unwrap();
        std::fs::write(&handle.path, content).unwrap();
        handle
    }

    #[tokio::test]
    async fn test_stage_commit_roundtrip() {
        let (_dir, store, _repo) = setup(1 << 20, 1.0).await;
        let handle = stage_and_fill(&store, "a.uv", b"hello\nhe").await;

        let expected = hashing::hash_file(&handle.path).unwrap().0;
        let path = store
            .commit(&handle, &file_name("a.uv"), &expected)
            .await
            .unwrap();
        assert_eq!(path.as_str(), "a.uv");

        let committed = path.under(store.store_root());
        assert_eq!(std::fs::read(committed).unwrap(), b"hello\nhe");
        // The slot is gone.
        assert!(!store.slot_dir(&handle.token).exists());
    }

    #[tokio::test]
    async fn test_commit_rejects_hash_mismatch() {
        let (_dir, store, _repo) = setup(1 << 20, 1.0).await;
        let handle = stage_and_fill(&store, "a.uv", b"payload").await;

        let wrong = ContentHash::new("f".repeat(32)).unwrap();
        let err = store
            .commit(&handle, &file_name("a.uv"), &wrong)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::HashMismatch { .. }));
    }

    #[tokio::test]
    async fn test_commit_never_overwrites() {
        let (_dir, store, _repo) = setup(1 << 20, 1.0).await;

        let first = stage_and_fill(&store, "a.uv", b"one").await;
        let hash = hashing::hash_file(&first.path).unwrap().0;
        store.commit(&first, &file_name("a.uv"), &hash).await.unwrap();

        let second = stage_and_fill(&store, "a.uv", b"one").await;
        let err = store
            .commit(&second, &file_name("a.uv"), &hash)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::TargetExists(_)));
        store.abort(&second).await.unwrap();
    }

    #[tokio::test]
    async fn test_stage_honours_capacity_threshold() {
        let (_dir, store, repo) = setup(1024, 1.0).await;
        let pot1 = StoreName::new("pot1".to_string()).unwrap();

        // 1000 bytes fit.
        assert!(store
            .stage(&file_name("big"), 1000, StagePurpose::Ingest)
            .await
            .is_ok());
        // With 1000 bytes accounted, 100 more do not.
        repo.adjust_store_used(&pot1, 1000).await.unwrap();
        let err = store
            .stage(&file_name("small"), 100, StagePurpose::Ingest)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Full { .. }));
    }

    #[tokio::test]
    async fn test_non_ingestible_accepts_clones_only() {
        let (_dir, store, repo) = setup(1 << 20, 1.0).await;
        let pot1 = StoreName::new("pot1".to_string()).unwrap();
        repo.set_store_ingestible(&pot1, false).await.unwrap();

        assert!(matches!(
            store
                .stage(&file_name("a"), 1, StagePurpose::Ingest)
                .await
                .unwrap_err(),
            StoreError::NotAccepting { .. }
        ));
        assert!(store
            .stage(&file_name("a"), 1, StagePurpose::Clone)
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_disabled_store_rejects_stage() {
        let (_dir, store, repo) = setup(1 << 20, 1.0).await;
        let pot1 = StoreName::new("pot1".to_string()).unwrap();
        repo.set_store_enabled(&pot1, false).await.unwrap();

        assert!(matches!(
            store
                .stage(&file_name("a"), 1, StagePurpose::Clone)
                .await
                .unwrap_err(),
            StoreError::NotAccepting { .. }
        ));
    }

    #[tokio::test]
    async fn test_zero_byte_payload_commits() {
        let (_dir, store, _repo) = setup(1 << 20, 1.0).await;
        let handle = stage_and_fill(&store, "empty", b"").await;
        let hash = ContentHash::new("d41d8cd98f00b204e9800998ecf8427e".to_string()).unwrap();
        let path = store.commit(&handle, &file_name("empty"), &hash).await.unwrap();
        assert_eq!(path.as_str(), "empty");
    }

    #[tokio::test]
    async fn test_directory_payload_roundtrip() {
        let (_dir, store, _repo) = setup(1 << 20, 1.0).await;
        let handle = store
            .stage(&file_name("obs.uv"), 6, StagePurpose::Ingest)
            .await
            .unwrap();
        std::fs::create_dir_all(handle.path.join("sub")).unwrap();
        std::fs::write(handle.path.join("flags"), b"abc").unwrap();
        std::fs::write(handle.path.join("sub/data"), b"def").unwrap();

        let (hash, size) = hashing::hash_directory(&handle.path).unwrap();
        assert_eq!(size, 6);
        let path = store.commit(&handle, &file_name("obs.uv"), &hash).await.unwrap();

        let (rehash, resize) = store.hash_of(&path).await.unwrap();
        assert_eq!(rehash, hash);
        assert_eq!(resize, 6);
    }

    #[tokio::test]
    async fn test_delete_frees_bytes() {
        let (_dir, store, _repo) = setup(1 << 20, 1.0).await;
        let handle = stage_and_fill(&store, "a.uv", b"12345").await;
        let hash = hashing::hash_file(&handle.path).unwrap().0;
        let path = store.commit(&handle, &file_name("a.uv"), &hash).await.unwrap();

        assert_eq!(store.delete(&path).await.unwrap(), 5);
        // A second delete is a no-op.
        assert_eq!(store.delete(&path).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enumerate_lists_committed_payloads() {
        let (_dir, store, _repo) = setup(1 << 20, 1.0).await;
        for (name, content) in [("b.uv", b"bb".as_slice()), ("a.uv", b"a".as_slice())] {
            let handle = stage_and_fill(&store, name, content).await;
            let hash = hashing::hash_file(&handle.path).unwrap().0;
            store.commit(&handle, &file_name(name), &hash).await.unwrap();
        }

        let entries = store.enumerate().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path.as_str(), "a.uv");
        assert_eq!(entries[0].size, 1);
        assert_eq!(entries[1].path.as_str(), "b.uv");
    }

    #[tokio::test]
    async fn test_abort_releases_slot() {
        let (_dir, store, _repo) = setup(1 << 20, 1.0).await;
        let handle = stage_and_fill(&store, "a.uv", b"x").await;
        store.abort(&handle).await.unwrap();
        assert!(!store.slot_dir(&handle.token).exists());
    }
}
