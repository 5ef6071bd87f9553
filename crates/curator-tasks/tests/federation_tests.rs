//! Two-site federation tests
//!
//! Each test builds two complete sites (in-memory metadata, on-disk
//! temp stores, real task implementations) joined by a loopback peer
//! client that calls the other site's exchange use case directly. The
//! network is the only fake: everything else is the production path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use curator_core::domain::{
    BatchId, ContentHash, ErrorCategory, FileName, IncomingState, OutgoingState, Peer, PeerName,
    Severity, Store, StoreKind, StoreName, TransferId,
};
use curator_core::ports::{
    IAsyncTransferManager, IMetadataRepository, IPeerClient, IStoreBackend, IncomingReport,
    InstanceInfo, PingInfo, StageBatchGrant, StageSpec, TransportRequest, TransportStatus,
};
use curator_core::registry::{StoreHandles, StoreRegistry};
use curator_core::usecases::{ExchangeUseCase, IngestUseCase, UploadRequest};
use curator_db::{DatabasePool, SqliteMetadataRepository};
use curator_store::{CommitPolicy, LocalStore};
use curator_tasks::config::{
    ConsumeQueueConfig, HypervisorConfig, ReceiveCloneConfig, SendCloneConfig, TaskCommon,
};
use curator_tasks::tasks::{hypervisor, queue, receive, send};
use curator_tasks::{TaskBudget, TaskContext};
use curator_telemetry::ErrorReporter;
use curator_transfer::{CopyTransport, LocalCopyManager};

// ============================================================================
// Loopback network
// ============================================================================

/// Routes peer calls straight into the target site's exchange use case
#[derive(Default)]
struct LoopbackNetwork {
    exchanges: Mutex<HashMap<String, Arc<ExchangeUseCase>>>,
    /// Scenario toggle: swallow success callbacks (the lost-callback case)
    drop_callbacks: AtomicBool,
}

impl LoopbackNetwork {
    fn join(&self, name: &str, exchange: Arc<ExchangeUseCase>) {
        self.exchanges
            .lock()
            .unwrap()
            .insert(name.to_string(), exchange);
    }

    fn exchange_of(&self, peer: &Peer) -> anyhow::Result<Arc<ExchangeUseCase>> {
        self.exchanges
            .lock()
            .unwrap()
            .get(peer.name.as_str())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("peer {} is unreachable", peer.name))
    }
}

/// One site's view of the loopback network
struct LoopbackPeerClient {
    network: Arc<LoopbackNetwork>,
    local_name: PeerName,
}

#[async_trait::async_trait]
impl IPeerClient for LoopbackPeerClient {
    async fn ping(&self, peer: &Peer) -> anyhow::Result<PingInfo> {
        self.network.exchange_of(peer)?;
        Ok(PingInfo {
            name: peer.name.to_string(),
            description: String::new(),
        })
    }

    async fn stage_batch(
        &self,
        peer: &Peer,
        batch_id: BatchId,
        files: &[StageSpec],
    ) -> anyhow::Result<StageBatchGrant> {
        Ok(self
            .network
            .exchange_of(peer)?
            .grant_stage_batch(&self.local_name, batch_id, files)
            .await?)
    }

    async fn set_staged(&self, peer: &Peer, outgoing_ids: &[TransferId]) -> anyhow::Result<()> {
        Ok(self
            .network
            .exchange_of(peer)?
            .confirm_staged(outgoing_ids)
            .await?)
    }

    async fn callback_succeeded(
        &self,
        peer: &Peer,
        outgoing_id: TransferId,
        instance: &InstanceInfo,
    ) -> anyhow::Result<()> {
        if self.network.drop_callbacks.load(Ordering::Acquire) {
            anyhow::bail!("simulated network loss");
        }
        Ok(self
            .network
            .exchange_of(peer)?
            .record_callback(outgoing_id, instance)
            .await?)
    }

    async fn query_incoming(
        &self,
        peer: &Peer,
        outgoing_id: TransferId,
    ) -> anyhow::Result<IncomingReport> {
        Ok(self
            .network
            .exchange_of(peer)?
            .report_incoming(outgoing_id)
            .await?)
    }
}

/// Async manager that accepts submissions and then reports failure
struct FailingTransport;

#[async_trait::async_trait]
impl IAsyncTransferManager for FailingTransport {
    async fn submit(&self, _request: &TransportRequest) -> anyhow::Result<String> {
        Ok("doomed-handle".to_string())
    }

    async fn poll(&self, _external_id: &str) -> anyhow::Result<TransportStatus> {
        Ok(TransportStatus::Failed {
            reason: "link down".to_string(),
        })
    }

    async fn cancel(&self, _external_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn describe(&self) -> &str {
        "copy"
    }
}

// ============================================================================
// Site harness
// ============================================================================

struct Site {
    name: PeerName,
    store_name: StoreName,
    repository: Arc<dyn IMetadataRepository>,
    context: TaskContext,
    _dir: tempfile::TempDir,
}

async fn build_site(
    name: &str,
    network: &Arc<LoopbackNetwork>,
    async_manager: Option<Arc<dyn IAsyncTransferManager>>,
) -> Site {
    let dir = tempfile::TempDir::new().unwrap();
    let pool = DatabasePool::in_memory().await.unwrap();
    let repository: Arc<dyn IMetadataRepository> =
        Arc::new(SqliteMetadataRepository::new(pool.pool().clone()));

    let store_name = StoreName::new(format!("{name}-pot")).unwrap();
    repository
        .upsert_store(&Store::new(
            store_name.clone(),
            StoreKind::Local,
            1 << 30,
            true,
        ))
        .await
        .unwrap();

    let backend = Arc::new(
        LocalStore::new(
            store_name.clone(),
            dir.path().join("staging"),
            dir.path().join("store"),
            CommitPolicy::default(),
            Arc::clone(&repository),
        )
        .unwrap(),
    );
    let mut registry = StoreRegistry::new();
    registry.insert(
        store_name.clone(),
        StoreHandles {
            backend,
            sync_manager: Arc::new(LocalCopyManager::new()),
            async_manager: async_manager.unwrap_or_else(|| Arc::new(CopyTransport::new())),
            async_endpoint: None,
            max_live_handles: 100,
        },
    );

    let local_name = PeerName::new(name.to_string()).unwrap();
    let ingest = Arc::new(IngestUseCase::new(
        Arc::clone(&repository),
        registry.clone(),
        1 << 30,
    ));
    let exchange = Arc::new(ExchangeUseCase::new(
        Arc::clone(&repository),
        registry.clone(),
    ));
    network.join(name, Arc::clone(&exchange));

    let context = TaskContext {
        local_name: local_name.clone(),
        repository: Arc::clone(&repository),
        registry,
        peer_client: Arc::new(LoopbackPeerClient {
            network: Arc::clone(network),
            local_name: local_name.clone(),
        }),
        reporter: Arc::new(ErrorReporter::new(Arc::clone(&repository))),
        ingest,
        exchange,
    };

    Site {
        name: local_name,
        store_name,
        repository,
        context,
        _dir: dir,
    }
}

/// Registers `other` as a peer of `site`
async fn befriend(site: &Site, other: &Site) {
    site.repository
        .upsert_peer(&Peer::new(
            other.name.clone(),
            "http://loopback",
            1,
            "unused-blob",
        ))
        .await
        .unwrap();
}

/// Uploads a payload through the real ingest flow
async fn seed_file(site: &Site, name: &str, content: &[u8]) {
    let source = site._dir.path().join("incoming-payload");
    std::fs::write(&source, content).unwrap();
    let hash = curator_store::hashing::hash_file(&source).unwrap().0;
    site.context
        .ingest
        .upload(UploadRequest {
            name: FileName::new(name.to_string()).unwrap(),
            size: content.len() as u64,
            hash,
            source_path: source,
            destination_hint: Some(site.store_name.clone()),
            uploader: "obs".to_string(),
            obsid: None,
            session_id: None,
        })
        .await
        .unwrap();
}

fn send_config(site: &Site, destination: &Site) -> SendCloneConfig {
    SendCloneConfig {
        common: TaskCommon {
            name: None,
            every_secs: 60,
            soft_timeout_secs: 60,
        },
        destination_librarian: destination.name.to_string(),
        age_in_days: 0,
        store_preference: site.store_name.to_string(),
        send_batch_size: 10,
    }
}

fn budget() -> TaskBudget {
    TaskBudget::new(Duration::from_secs(60))
}

/// Runs consume + check until the transport settles or the deadline hits
async fn drive_transport(site: &Site) {
    let consume = ConsumeQueueConfig {
        common: TaskCommon {
            name: None,
            every_secs: 60,
            soft_timeout_secs: 60,
        },
        max_live_handles: 100,
    };

    queue::consume_queue(&site.context, &consume, &budget())
        .await
        .unwrap();
    for _ in 0..200 {
        queue::check_consumed_queue(&site.context, &budget())
            .await
            .unwrap();
        if site.repository.count_submitted_batches().await.unwrap() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("transport never settled");
}

fn receive_config() -> ReceiveCloneConfig {
    ReceiveCloneConfig {
        common: TaskCommon {
            name: None,
            every_secs: 60,
            soft_timeout_secs: 60,
        },
        deletion_policy: "disallowed".to_string(),
        files_per_run: 100,
    }
}

fn hypervisor_config(age_in_days: i64) -> HypervisorConfig {
    HypervisorConfig {
        common: TaskCommon {
            name: None,
            every_secs: 60,
            soft_timeout_secs: 60,
        },
        age_in_days,
    }
}

async fn sole_outgoing(site: &Site) -> curator_core::domain::OutgoingTransfer {
    let mut all = Vec::new();
    for state in [
        OutgoingState::Initiated,
        OutgoingState::Ongoing,
        OutgoingState::Staged,
        OutgoingState::Completed,
        OutgoingState::Failed,
    ] {
        all.extend(site.repository.outgoing_stuck_in(state, 0).await.unwrap());
    }
    assert_eq!(all.len(), 1, "expected exactly one outgoing transfer");
    all.remove(0)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_peer_clone_happy_path() {
    let network = Arc::new(LoopbackNetwork::default());
    let site_a = build_site("site-a", &network, None).await;
    let site_b = build_site("site-b", &network, None).await;
    befriend(&site_a, &site_b).await;
    befriend(&site_b, &site_a).await;

    seed_file(&site_a, "zen.2457644.12345.uv", b"correlator output").await;

    // One scheduler cycle on the source...
    send::send_clone(&site_a.context, &send_config(&site_a, &site_b))
        .await
        .unwrap();
    drive_transport(&site_a).await;
    // ...and one on the destination.
    receive::receive_clone(&site_b.context, &receive_config(), &budget())
        .await
        .unwrap();

    // Source side: transfer completed, remote instance recorded.
    let transfer = sole_outgoing(&site_a).await;
    assert_eq!(transfer.state, OutgoingState::Completed);
    let file_name = FileName::new("zen.2457644.12345.uv".to_string()).unwrap();
    assert!(site_a
        .repository
        .get_remote_instance(&file_name, &site_b.name)
        .await
        .unwrap()
        .is_some());

    // Destination side: file + instance with the matching hash.
    let file_on_b = site_b
        .repository
        .get_file(&file_name)
        .await
        .unwrap()
        .expect("file replicated to site-b");
    let instance = site_b
        .repository
        .get_instance(&file_name, &site_b.store_name)
        .await
        .unwrap()
        .expect("instance on site-b");
    assert!(instance.available);
    let (rehash, _) = site_b
        .context
        .registry
        .get(&site_b.store_name)
        .unwrap()
        .backend
        .hash_of(&instance.store_path)
        .await
        .unwrap();
    assert_eq!(rehash, file_on_b.hash);

    // A second send pass finds nothing left to push.
    send::send_clone(&site_a.context, &send_config(&site_a, &site_b))
        .await
        .unwrap();
    assert_eq!(
        site_a.repository.queued_batches(10).await.unwrap().len(),
        0
    );
}

#[tokio::test]
async fn test_lost_callback_repaired_by_hypervisor() {
    let network = Arc::new(LoopbackNetwork::default());
    let site_a = build_site("site-a", &network, None).await;
    let site_b = build_site("site-b", &network, None).await;
    befriend(&site_a, &site_b).await;
    befriend(&site_b, &site_a).await;

    seed_file(&site_a, "zen.2457644.12345.uv", b"correlator output").await;
    network.drop_callbacks.store(true, Ordering::Release);

    send::send_clone(&site_a.context, &send_config(&site_a, &site_b))
        .await
        .unwrap();
    drive_transport(&site_a).await;
    receive::receive_clone(&site_b.context, &receive_config(), &budget())
        .await
        .unwrap();

    // The callback was dropped: the destination completed, the source is
    // parked in STAGED.
    let transfer = sole_outgoing(&site_a).await;
    assert_eq!(transfer.state, OutgoingState::Staged);
    let incoming = site_b
        .repository
        .get_incoming(transfer.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(incoming.state, IncomingState::Completed);

    // The hypervisor queries the destination and repairs the record.
    network.drop_callbacks.store(false, Ordering::Release);
    hypervisor::outgoing_transfer_hypervisor(&site_a.context, &hypervisor_config(0), &budget())
        .await
        .unwrap();

    let repaired = sole_outgoing(&site_a).await;
    assert_eq!(repaired.state, OutgoingState::Completed);
    let file_name = FileName::new("zen.2457644.12345.uv".to_string()).unwrap();
    assert!(site_a
        .repository
        .get_remote_instance(&file_name, &site_b.name)
        .await
        .unwrap()
        .is_some());

    // No duplicate ingest on the destination.
    assert_eq!(
        site_b
            .repository
            .instances_for_file(&file_name)
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_transport_failure_fails_the_batch() {
    let network = Arc::new(LoopbackNetwork::default());
    let site_a = build_site("site-a", &network, Some(Arc::new(FailingTransport))).await;
    let site_b = build_site("site-b", &network, None).await;
    befriend(&site_a, &site_b).await;
    befriend(&site_b, &site_a).await;

    seed_file(&site_a, "zen.1.uv", b"one").await;
    seed_file(&site_a, "zen.2.uv", b"two").await;

    send::send_clone(&site_a.context, &send_config(&site_a, &site_b))
        .await
        .unwrap();
    drive_transport(&site_a).await;

    // Every transfer in the batch failed with the transport's reason.
    let failed = site_a
        .repository
        .outgoing_stuck_in(OutgoingState::Failed, 0)
        .await
        .unwrap();
    assert_eq!(failed.len(), 2);
    for transfer in &failed {
        assert_eq!(transfer.error.as_deref(), Some("link down"));
    }

    // One transport warning per file.
    let warnings = site_a
        .repository
        .recent_errors(Some(Severity::Warning), Some(ErrorCategory::Transport), 10)
        .await
        .unwrap();
    assert_eq!(warnings.len(), 2);

    // The destination saw slots allocated but no bytes: no progress past
    // INITIATED.
    for transfer in &failed {
        let incoming = site_b
            .repository
            .get_incoming(transfer.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(incoming.state, IncomingState::Initiated);
    }
}

#[tokio::test]
async fn test_incoming_hypervisor_releases_abandoned_slots() {
    let network = Arc::new(LoopbackNetwork::default());
    let site_a = build_site("site-a", &network, Some(Arc::new(FailingTransport))).await;
    let site_b = build_site("site-b", &network, None).await;
    befriend(&site_a, &site_b).await;
    befriend(&site_b, &site_a).await;

    seed_file(&site_a, "zen.1.uv", b"one").await;
    send::send_clone(&site_a.context, &send_config(&site_a, &site_b))
        .await
        .unwrap();

    // The slot exists on the destination, the bytes never arrive.
    hypervisor::incoming_transfer_hypervisor(&site_b.context, &hypervisor_config(0), &budget())
        .await
        .unwrap();

    let incoming = site_b
        .repository
        .incoming_stuck_in(IncomingState::Failed, 0)
        .await
        .unwrap();
    assert_eq!(incoming.len(), 1);
}

#[tokio::test]
async fn test_replayed_callback_is_idempotent() {
    let network = Arc::new(LoopbackNetwork::default());
    let site_a = build_site("site-a", &network, None).await;
    let site_b = build_site("site-b", &network, None).await;
    befriend(&site_a, &site_b).await;
    befriend(&site_b, &site_a).await;

    seed_file(&site_a, "zen.1.uv", b"one").await;
    send::send_clone(&site_a.context, &send_config(&site_a, &site_b))
        .await
        .unwrap();
    drive_transport(&site_a).await;
    receive::receive_clone(&site_b.context, &receive_config(), &budget())
        .await
        .unwrap();

    let transfer = sole_outgoing(&site_a).await;
    assert_eq!(transfer.state, OutgoingState::Completed);

    // Redeliver the callback by hand: same idempotency key, same result.
    let instance = InstanceInfo {
        store: site_b.store_name.clone(),
        path: curator_core::domain::StorePath::new("zen.1.uv".to_string()).unwrap(),
    };
    site_a
        .context
        .exchange
        .record_callback(transfer.id, &instance)
        .await
        .unwrap();

    let file_name = FileName::new("zen.1.uv".to_string()).unwrap();
    assert_eq!(
        site_a
            .repository
            .remote_instances_for_file(&file_name)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        sole_outgoing(&site_a).await.state,
        OutgoingState::Completed
    );
}
