//! Integration tests for the SQLite metadata repository
//!
//! Every test runs against a fresh in-memory database, exercising the
//! uniqueness invariants and the conditional state-transition updates.

use curator_core::domain::{
    ContentHash, DeletionPolicy, ErrorCategory, ErrorLog, File, FileName, IncomingState,
    IncomingTransfer, Instance, OutgoingState, OutgoingTransfer, Peer, PeerName, QueueEntry,
    QueueState, RemoteInstance, SendQueueItem, Severity, Store, StoreKind, StoreName, StorePath,
    TaskOutcome, TransferId,
};
use curator_core::ports::{FileSearchFilters, IMetadataRepository};
use curator_db::{DatabasePool, SqliteMetadataRepository};

async fn repo() -> SqliteMetadataRepository {
    let pool = DatabasePool::in_memory().await.unwrap();
    SqliteMetadataRepository::new(pool.pool().clone())
}

fn file(name: &str) -> File {
    File::new(
        FileName::new(name.to_string()).unwrap(),
        1024,
        ContentHash::new("d41d8cd98f00b204e9800998ecf8427e".to_string()).unwrap(),
        "obs",
    )
}

fn store(name: &str) -> Store {
    Store::new(
        StoreName::new(name.to_string()).unwrap(),
        StoreKind::Local,
        1 << 30,
        true,
    )
}

fn instance(file: &str, store: &str, path: &str) -> Instance {
    Instance::new(
        FileName::new(file.to_string()).unwrap(),
        StoreName::new(store.to_string()).unwrap(),
        StorePath::new(path.to_string()).unwrap(),
        DeletionPolicy::Allowed,
    )
}

#[tokio::test]
async fn test_file_name_is_unique() {
    let repo = repo().await;
    repo.create_file(&file("a.uv")).await.unwrap();
    assert!(repo.create_file(&file("a.uv")).await.is_err());
    assert!(repo.create_file(&file("b.uv")).await.is_ok());
}

#[tokio::test]
async fn test_file_roundtrip() {
    let repo = repo().await;
    let mut f = file("a.uv");
    f.obsid = Some(2457644);
    f.session_id = Some("s1".to_string());
    repo.create_file(&f).await.unwrap();

    let got = repo
        .get_file(&FileName::new("a.uv".to_string()).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got.name, f.name);
    assert_eq!(got.size, 1024);
    assert_eq!(got.hash, f.hash);
    assert_eq!(got.obsid, Some(2457644));
    assert_eq!(got.session_id.as_deref(), Some("s1"));
}

#[tokio::test]
async fn test_search_filters() {
    let repo = repo().await;
    repo.upsert_store(&store("pot1")).await.unwrap();
    for (name, size) in [("zen.1.uv", 100u64), ("zen.2.uv", 2000), ("cal.1.uv", 100)] {
        let mut f = file(name);
        f.size = size;
        repo.create_file(&f).await.unwrap();
    }
    repo.create_instance(&instance("zen.1.uv", "pot1", "zen.1.uv"))
        .await
        .unwrap();

    let by_like = repo
        .search_files(&FileSearchFilters {
            name_like: Some("zen.%".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_like.len(), 2);

    let by_size = repo
        .search_files(&FileSearchFilters {
            min_size: Some(150),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_size.len(), 1);
    assert_eq!(by_size[0].name.as_str(), "zen.2.uv");

    let by_store = repo
        .search_files(&FileSearchFilters {
            store: Some(StoreName::new("pot1".to_string()).unwrap()),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(by_store.len(), 1);

    let capped = repo
        .search_files(&FileSearchFilters {
            limit: Some(2),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(capped.len(), 2);
}

#[tokio::test]
async fn test_instance_uniqueness_and_fk() {
    let repo = repo().await;
    repo.upsert_store(&store("pot1")).await.unwrap();
    repo.create_file(&file("a.uv")).await.unwrap();

    repo.create_instance(&instance("a.uv", "pot1", "a.uv"))
        .await
        .unwrap();
    assert!(repo
        .create_instance(&instance("a.uv", "pot1", "a.uv"))
        .await
        .is_err());
    // FK: file must exist
    assert!(repo
        .create_instance(&instance("ghost.uv", "pot1", "ghost.uv"))
        .await
        .is_err());
}

#[tokio::test]
async fn test_soft_delete_respects_policy() {
    let repo = repo().await;
    repo.upsert_store(&store("pot1")).await.unwrap();
    repo.create_file(&file("a.uv")).await.unwrap();
    repo.create_file(&file("b.uv")).await.unwrap();

    let mut protected = instance("a.uv", "pot1", "a.uv");
    protected.deletion_policy = DeletionPolicy::Disallowed;
    repo.create_instance(&protected).await.unwrap();
    repo.create_instance(&instance("b.uv", "pot1", "b.uv"))
        .await
        .unwrap();

    let a = FileName::new("a.uv".to_string()).unwrap();
    let b = FileName::new("b.uv".to_string()).unwrap();
    let pot1 = StoreName::new("pot1".to_string()).unwrap();

    assert!(!repo.soft_delete_instance(&a, &pot1).await.unwrap());
    assert!(repo.soft_delete_instance(&b, &pot1).await.unwrap());

    let b_instance = repo.get_instance(&b, &pot1).await.unwrap().unwrap();
    assert!(!b_instance.available);
}

#[tokio::test]
async fn test_hard_delete_respects_policy() {
    let repo = repo().await;
    repo.upsert_store(&store("pot1")).await.unwrap();
    repo.create_file(&file("a.uv")).await.unwrap();

    let mut protected = instance("a.uv", "pot1", "a.uv");
    protected.deletion_policy = DeletionPolicy::Disallowed;
    let protected_id = repo.create_instance(&protected).await.unwrap();
    assert!(!repo.remove_instance(protected_id).await.unwrap());

    repo.create_file(&file("b.uv")).await.unwrap();
    let removable_id = repo
        .create_instance(&instance("b.uv", "pot1", "b.uv"))
        .await
        .unwrap();
    assert!(repo.remove_instance(removable_id).await.unwrap());
}

#[tokio::test]
async fn test_remote_instance_idempotent() {
    let repo = repo().await;
    repo.create_file(&file("a.uv")).await.unwrap();
    let remote = RemoteInstance::new(
        FileName::new("a.uv".to_string()).unwrap(),
        PeerName::new("site-b".to_string()).unwrap(),
    );
    repo.create_remote_instance(&remote).await.unwrap();
    repo.create_remote_instance(&remote).await.unwrap();

    let remotes = repo
        .remote_instances_for_file(&FileName::new("a.uv".to_string()).unwrap())
        .await
        .unwrap();
    assert_eq!(remotes.len(), 1);
}

#[tokio::test]
async fn test_store_used_accounting() {
    let repo = repo().await;
    repo.upsert_store(&store("pot1")).await.unwrap();
    let pot1 = StoreName::new("pot1".to_string()).unwrap();

    repo.adjust_store_used(&pot1, 1000).await.unwrap();
    assert_eq!(repo.get_store(&pot1).await.unwrap().unwrap().used, 1000);

    repo.adjust_store_used(&pot1, -400).await.unwrap();
    assert_eq!(repo.get_store(&pot1).await.unwrap().unwrap().used, 600);

    // Never drives the accounting negative.
    repo.adjust_store_used(&pot1, -10_000).await.unwrap();
    assert_eq!(repo.get_store(&pot1).await.unwrap().unwrap().used, 0);
}

#[tokio::test]
async fn test_upsert_store_preserves_runtime_flags() {
    let repo = repo().await;
    repo.upsert_store(&store("pot1")).await.unwrap();
    let pot1 = StoreName::new("pot1".to_string()).unwrap();

    repo.set_store_enabled(&pot1, false).await.unwrap();
    repo.adjust_store_used(&pot1, 123).await.unwrap();

    // A config re-load upserts the store again; enabled and used survive.
    repo.upsert_store(&store("pot1")).await.unwrap();
    let after = repo.get_store(&pot1).await.unwrap().unwrap();
    assert!(!after.enabled);
    assert_eq!(after.used, 123);
}

fn outgoing(file: &str, dest: &str) -> OutgoingTransfer {
    OutgoingTransfer::new(
        FileName::new(file.to_string()).unwrap(),
        PeerName::new(dest.to_string()).unwrap(),
        StoreName::new("pot1".to_string()).unwrap(),
        "copy",
    )
}

#[tokio::test]
async fn test_one_live_outgoing_per_file_and_destination() {
    let repo = repo().await;
    repo.create_file(&file("a.uv")).await.unwrap();

    let first = outgoing("a.uv", "site-b");
    repo.create_outgoing(&first).await.unwrap();
    // Second live transfer for the same pair is rejected by the partial index.
    assert!(repo.create_outgoing(&outgoing("a.uv", "site-b")).await.is_err());
    // A different destination is fine.
    repo.create_outgoing(&outgoing("a.uv", "site-c")).await.unwrap();

    // Once the first fails, a retry row is accepted.
    assert!(repo
        .advance_outgoing(first.id, OutgoingState::Initiated, OutgoingState::Failed, Some("admin"))
        .await
        .unwrap());
    repo.create_outgoing(&outgoing("a.uv", "site-b")).await.unwrap();
}

#[tokio::test]
async fn test_advance_outgoing_is_conditional() {
    let repo = repo().await;
    repo.create_file(&file("a.uv")).await.unwrap();
    let t = outgoing("a.uv", "site-b");
    repo.create_outgoing(&t).await.unwrap();

    assert!(repo
        .advance_outgoing(t.id, OutgoingState::Initiated, OutgoingState::Ongoing, None)
        .await
        .unwrap());
    // Replay of the same transition finds the guard stale.
    assert!(!repo
        .advance_outgoing(t.id, OutgoingState::Initiated, OutgoingState::Ongoing, None)
        .await
        .unwrap());
    // Illegal transitions are rejected before touching the database.
    assert!(repo
        .advance_outgoing(t.id, OutgoingState::Ongoing, OutgoingState::Completed, None)
        .await
        .is_err());

    let got = repo.get_outgoing(t.id).await.unwrap().unwrap();
    assert_eq!(got.state, OutgoingState::Ongoing);
}

#[tokio::test]
async fn test_incoming_idempotency_key() {
    let repo = repo().await;
    repo.upsert_store(&store("pot1")).await.unwrap();

    let id = TransferId::new();
    let incoming = IncomingTransfer::new(
        id,
        FileName::new("a.uv".to_string()).unwrap(),
        ContentHash::new("d41d8cd98f00b204e9800998ecf8427e".to_string()).unwrap(),
        1024,
        StoreName::new("pot1".to_string()).unwrap(),
        "/srv/staging/x/a.uv",
        PeerName::new("site-a".to_string()).unwrap(),
    );
    repo.create_incoming(&incoming).await.unwrap();
    // Replayed staging request with the same source transfer id.
    assert!(repo.create_incoming(&incoming).await.is_err());
    assert!(repo.get_incoming(id).await.unwrap().is_some());

    assert!(repo
        .advance_incoming(id, IncomingState::Initiated, IncomingState::Staged, None)
        .await
        .unwrap());
    let stuck = repo.incoming_stuck_in(IncomingState::Staged, 0).await.unwrap();
    assert_eq!(stuck.len(), 1);
}

#[tokio::test]
async fn test_send_queue_lifecycle() {
    let repo = repo().await;
    let item = SendQueueItem::new(
        curator_core::domain::BatchId::new(),
        PeerName::new("site-b".to_string()).unwrap(),
        StoreName::new("pot1".to_string()).unwrap(),
        "site-b:/staging/batch",
        vec![QueueEntry {
            src: "/srv/pot1/a.uv".to_string(),
            dst: "a.uv".to_string(),
            outgoing_id: TransferId::new(),
        }],
        "copy",
    );
    repo.enqueue_batch(&item).await.unwrap();

    let queued = repo.queued_batches(10).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].entries.len(), 1);
    assert_eq!(repo.count_submitted_batches().await.unwrap(), 0);

    assert!(repo
        .set_batch_state(item.id, QueueState::Queued, QueueState::Submitted)
        .await
        .unwrap());
    repo.set_batch_external(item.id, "handle-1").await.unwrap();
    assert_eq!(repo.count_submitted_batches().await.unwrap(), 1);
    assert_eq!(repo.submitted_batches().await.unwrap()[0]
        .external_id
        .as_deref(), Some("handle-1"));

    assert!(repo
        .set_batch_state(item.id, QueueState::Submitted, QueueState::Done)
        .await
        .unwrap());
    assert_eq!(repo.count_submitted_batches().await.unwrap(), 0);
}

#[tokio::test]
async fn test_files_needing_push_excludes_covered() {
    let repo = repo().await;
    repo.upsert_store(&store("pot1")).await.unwrap();
    let pot1 = StoreName::new("pot1".to_string()).unwrap();
    let site_b = PeerName::new("site-b".to_string()).unwrap();

    for name in ["a.uv", "b.uv", "c.uv"] {
        repo.create_file(&file(name)).await.unwrap();
        repo.create_instance(&instance(name, "pot1", name))
            .await
            .unwrap();
    }
    // a: already replicated
    repo.create_remote_instance(&RemoteInstance::new(
        FileName::new("a.uv".to_string()).unwrap(),
        site_b.clone(),
    ))
    .await
    .unwrap();
    // b: live transfer in flight
    repo.create_outgoing(&outgoing("b.uv", "site-b")).await.unwrap();

    let needing = repo
        .files_needing_push(&site_b, &pot1, 0, 10)
        .await
        .unwrap();
    assert_eq!(needing.len(), 1);
    assert_eq!(needing[0].name.as_str(), "c.uv");
}

#[tokio::test]
async fn test_files_needing_local_clone() {
    let repo = repo().await;
    repo.upsert_store(&store("pot1")).await.unwrap();
    repo.upsert_store(&store("pot2")).await.unwrap();
    let pot1 = StoreName::new("pot1".to_string()).unwrap();
    let pot2 = StoreName::new("pot2".to_string()).unwrap();

    repo.create_file(&file("a.uv")).await.unwrap();
    repo.create_file(&file("b.uv")).await.unwrap();
    repo.create_instance(&instance("a.uv", "pot1", "a.uv"))
        .await
        .unwrap();
    repo.create_instance(&instance("b.uv", "pot1", "b.uv"))
        .await
        .unwrap();
    repo.create_instance(&instance("b.uv", "pot2", "b.uv"))
        .await
        .unwrap();

    let needing = repo
        .files_needing_local_clone(&pot1, std::slice::from_ref(&pot2), 0, 10)
        .await
        .unwrap();
    assert_eq!(needing.len(), 1);
    assert_eq!(needing[0].name.as_str(), "a.uv");
}

#[tokio::test]
async fn test_peer_roundtrip_and_flags() {
    let repo = repo().await;
    let name = PeerName::new("site-b".to_string()).unwrap();
    repo.upsert_peer(&Peer::new(name.clone(), "http://site-b", 21106, "enc-blob"))
        .await
        .unwrap();

    repo.record_peer_error(&name, "name mismatch").await.unwrap();
    assert_eq!(
        repo.get_peer(&name).await.unwrap().unwrap().last_error.as_deref(),
        Some("name mismatch")
    );

    repo.record_peer_seen(&name).await.unwrap();
    let peer = repo.get_peer(&name).await.unwrap().unwrap();
    assert!(peer.last_error.is_none());
    assert!(peer.last_seen.is_some());

    assert!(repo.set_peer_transfers_enabled(&name, false).await.unwrap());
    assert!(!repo.get_peer(&name).await.unwrap().unwrap().transfers_enabled);
    assert!(repo.remove_peer(&name).await.unwrap());
    assert!(repo.get_peer(&name).await.unwrap().is_none());
}

#[tokio::test]
async fn test_error_log_filtering() {
    let repo = repo().await;
    repo.append_error(&ErrorLog::new(Severity::Info, ErrorCategory::Store, "i"))
        .await
        .unwrap();
    repo.append_error(&ErrorLog::new(
        Severity::Warning,
        ErrorCategory::Transport,
        "w",
    ))
    .await
    .unwrap();
    repo.append_error(&ErrorLog::new(Severity::Critical, ErrorCategory::Store, "c"))
        .await
        .unwrap();

    let warnings_up = repo
        .recent_errors(Some(Severity::Warning), None, 10)
        .await
        .unwrap();
    assert_eq!(warnings_up.len(), 2);

    let store_only = repo
        .recent_errors(None, Some(ErrorCategory::Store), 10)
        .await
        .unwrap();
    assert_eq!(store_only.len(), 2);
}

#[tokio::test]
async fn test_task_claim_mutual_exclusion() {
    let repo = repo().await;

    assert!(repo.claim_task("send_clone", 3600).await.unwrap());
    // Second worker cannot claim while the first holds a fresh claim.
    assert!(!repo.claim_task("send_clone", 3600).await.unwrap());
    // A different task is independent.
    assert!(repo.claim_task("receive_clone", 3600).await.unwrap());

    let claimed_at = chrono::Utc::now();
    repo.release_task("send_clone", claimed_at, TaskOutcome::Succeeded)
        .await
        .unwrap();
    assert!(repo.claim_task("send_clone", 3600).await.unwrap());

    let runs = repo.recent_task_runs(10).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].task_name, "send_clone");
    assert_eq!(runs[0].outcome, Some(TaskOutcome::Succeeded));
}

#[tokio::test]
async fn test_stale_task_claim_is_stolen() {
    let repo = repo().await;
    assert!(repo.claim_task("send_clone", 3600).await.unwrap());
    // With a zero staleness window every existing claim is stale.
    assert!(repo.claim_task("send_clone", 0).await.unwrap());
}

#[tokio::test]
async fn test_user_crud() {
    let repo = repo().await;
    let user = curator_core::domain::User::new(
        "obs",
        "salt$digest",
        curator_core::domain::AuthLevel::ReadAppend,
    );
    repo.create_user(&user).await.unwrap();
    assert!(repo.create_user(&user).await.is_err());

    let got = repo.get_user("obs").await.unwrap().unwrap();
    assert_eq!(got.level, curator_core::domain::AuthLevel::ReadAppend);

    assert!(repo.delete_user("obs").await.unwrap());
    assert!(repo.get_user("obs").await.unwrap().is_none());
}
