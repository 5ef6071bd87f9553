//! API surface tests through the socketless dispatch layer
//!
//! A full single-site stack (in-memory metadata, temp-dir store, real use
//! cases) behind `router::dispatch`, exercising authentication, the
//! authorisation ladder, and the ingest/lookup flows end to end.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde_json::{json, Value};

use curator_api::auth::digest_password;
use curator_api::router::{dispatch, AppState};
use curator_api::types::ApiError;
use curator_core::domain::{AuthLevel, PeerName, Store, StoreKind, StoreName, User};
use curator_core::ports::IMetadataRepository;
use curator_core::registry::{StoreHandles, StoreRegistry};
use curator_core::usecases::{ExchangeUseCase, IngestUseCase, ManifestUseCase, QueryUseCase};
use curator_db::{DatabasePool, SqliteMetadataRepository};
use curator_peer::CredentialCipher;
use curator_store::{hashing, CommitPolicy, LocalStore};
use curator_telemetry::ErrorReporter;
use curator_transfer::{CopyTransport, LocalCopyManager};

struct TestSite {
    state: AppState,
    repository: Arc<dyn IMetadataRepository>,
    dir: tempfile::TempDir,
}

async fn build_site(store_capacity: u64) -> TestSite {
    let dir = tempfile::TempDir::new().unwrap();
    let pool = DatabasePool::in_memory().await.unwrap();
    let repository: Arc<dyn IMetadataRepository> =
        Arc::new(SqliteMetadataRepository::new(pool.pool().clone()));

    let store_name = StoreName::new("pot1".to_string()).unwrap();
    repository
        .upsert_store(&Store::new(
            store_name.clone(),
            StoreKind::Local,
            store_capacity,
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
        store_name,
        StoreHandles {
            backend,
            sync_manager: Arc::new(LocalCopyManager::new()),
            async_manager: Arc::new(CopyTransport::new()),
            async_endpoint: None,
            max_live_handles: 100,
        },
    );

    // The standard account ladder.
    for (name, level) in [
        ("reader", AuthLevel::ReadOnly),
        ("peer-b", AuthLevel::Callback),
        ("obs", AuthLevel::ReadAppend),
        ("curator", AuthLevel::ReadWrite),
        ("root", AuthLevel::Admin),
    ] {
        repository
            .create_user(&User::new(name, digest_password("pw"), level))
            .await
            .unwrap();
    }

    let repo = Arc::clone(&repository);
    let ingest = Arc::new(IngestUseCase::new(
        Arc::clone(&repo),
        registry.clone(),
        1 << 20,
    ));
    let query = Arc::new(QueryUseCase::new(Arc::clone(&repo), registry.clone(), 250));
    let exchange = Arc::new(ExchangeUseCase::new(Arc::clone(&repo), registry.clone()));
    let manifest = Arc::new(ManifestUseCase::new(
        Arc::clone(&repo),
        PeerName::new("site-a".to_string()).unwrap(),
    ));

    let state = AppState {
        site_name: "site-a".to_string(),
        site_description: "Test archive".to_string(),
        repository: Arc::clone(&repository),
        ingest,
        query,
        exchange,
        manifest,
        reporter: Arc::new(ErrorReporter::new(Arc::clone(&repository))),
        cipher: Arc::new(CredentialCipher::from_key_bytes(b"test key")),
    };

    TestSite {
        state,
        repository,
        dir,
    }
}

fn basic(user: &str) -> String {
    format!("Basic {}", BASE64.encode(format!("{user}:pw")))
}

async fn call(
    site: &TestSite,
    method: &str,
    endpoint: &str,
    user: Option<&str>,
    body: Value,
) -> Result<Value, ApiError> {
    let header = user.map(basic);
    dispatch(
        &site.state,
        method,
        endpoint,
        header.as_deref(),
        body.to_string().as_bytes(),
    )
    .await
}

/// Writes a payload to disk and returns an upload request body for it
fn upload_body(site: &TestSite, name: &str, content: &[u8]) -> Value {
    let source = site.dir.path().join(format!("client-{name}"));
    std::fs::write(&source, content).unwrap();
    let hash = hashing::hash_file(&source).unwrap().0;
    json!({
        "name": name,
        "size": content.len(),
        "hash": hash.as_str(),
        "source_path_on_client": source.display().to_string(),
    })
}

// ============================================================================
// Scenario: ingest and locate
// ============================================================================

#[tokio::test]
async fn test_upload_then_validate_roundtrip() {
    let site = build_site(1 << 20).await;

    let uploaded = call(
        &site,
        "POST",
        "upload",
        Some("obs"),
        upload_body(&site, "test.txt", b"hello\nhe"),
    )
    .await
    .unwrap();
    assert_eq!(uploaded["store"], "pot1");
    assert_eq!(uploaded["duplicate"], false);

    let validated = call(
        &site,
        "POST",
        "validate_file",
        Some("obs"),
        json!({"name": "test.txt"}),
    )
    .await
    .unwrap();
    let rows = validated["results"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["match"], true);
    assert_eq!(rows[0]["original_hash"], rows[0]["current_hash"]);

    let located = call(
        &site,
        "POST",
        "locate_file",
        Some("reader"),
        json!({"name": "test.txt"}),
    )
    .await
    .unwrap();
    assert_eq!(located["locations"][0]["store"], "pot1");

    let searched = call(
        &site,
        "POST",
        "search_files",
        Some("reader"),
        json!({"name_like": "test.%"}),
    )
    .await
    .unwrap();
    assert_eq!(searched["files"].as_array().unwrap().len(), 1);
}

// ============================================================================
// Scenario: duplicate-name conflict
// ============================================================================

#[tokio::test]
async fn test_duplicate_name_conflicts_unless_same_hash() {
    let site = build_site(1 << 20).await;

    call(
        &site,
        "POST",
        "upload",
        Some("obs"),
        upload_body(&site, "test.txt", b"hello\nhe"),
    )
    .await
    .unwrap();

    // Same name, different content: Conflict, nothing changed.
    let mut body = upload_body(&site, "test.txt", b"other contents!!");
    body["name"] = json!("test.txt");
    let err = call(&site, "POST", "upload", Some("obs"), body)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 409);

    let file_name = curator_core::domain::FileName::new("test.txt".to_string()).unwrap();
    let instances = site.repository.instances_for_file(&file_name).await.unwrap();
    assert_eq!(instances.len(), 1);

    // Same name, same content: no-op success.
    let again = call(
        &site,
        "POST",
        "upload",
        Some("obs"),
        upload_body(&site, "test.txt", b"hello\nhe"),
    )
    .await
    .unwrap();
    assert_eq!(again["duplicate"], true);
    assert_eq!(
        site.repository
            .instances_for_file(&file_name)
            .await
            .unwrap()
            .len(),
        1
    );
}

// ============================================================================
// Scenario: store full
// ============================================================================

#[tokio::test]
async fn test_store_full_rejects_and_keeps_accounting() {
    let site = build_site(1024).await;
    let pot1 = StoreName::new("pot1".to_string()).unwrap();

    let big = vec![b'x'; 1000];
    call(&site, "POST", "upload", Some("obs"), upload_body(&site, "big.bin", &big))
        .await
        .unwrap();
    assert_eq!(site.repository.get_store(&pot1).await.unwrap().unwrap().used, 1000);

    let small = vec![b'y'; 100];
    let err = call(
        &site,
        "POST",
        "upload",
        Some("obs"),
        upload_body(&site, "small.bin", &small),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), 507);

    // Accounting is unchanged by the rejected upload.
    assert_eq!(site.repository.get_store(&pot1).await.unwrap().unwrap().used, 1000);
}

// ============================================================================
// Boundaries
// ============================================================================

#[tokio::test]
async fn test_zero_byte_file_accepted() {
    let site = build_site(1 << 20).await;
    let uploaded = call(
        &site,
        "POST",
        "upload",
        Some("obs"),
        upload_body(&site, "empty.bin", b""),
    )
    .await
    .unwrap();
    assert_eq!(uploaded["duplicate"], false);
}

#[tokio::test]
async fn test_oversized_upload_rejected_pre_stream() {
    let site = build_site(1 << 20).await;
    // Declared size over the ceiling; no bytes are read at all.
    let body = json!({
        "name": "huge.bin",
        "size": (1u64 << 21),
        "hash": "d41d8cd98f00b204e9800998ecf8427e",
        "source_path_on_client": "/nonexistent/path",
    });
    let err = call(&site, "POST", "upload", Some("obs"), body)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 413);
}

#[tokio::test]
async fn test_hash_mismatch_rejected() {
    let site = build_site(1 << 20).await;
    let mut body = upload_body(&site, "lies.bin", b"actual content");
    body["hash"] = json!("00000000000000000000000000000000");
    let err = call(&site, "POST", "upload", Some("obs"), body)
        .await
        .unwrap_err();
    assert_eq!(err.status(), 422);
}

// ============================================================================
// Authentication and authorisation
// ============================================================================

#[tokio::test]
async fn test_authorisation_ladder() {
    let site = build_site(1 << 20).await;

    // Unauthenticated: ping works, everything else is 401.
    let ping = call(&site, "GET", "ping", None, json!({})).await.unwrap();
    assert_eq!(ping["name"], "site-a");
    let err = call(&site, "POST", "search_files", None, json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 401);

    // ReadOnly can search but not upload.
    call(&site, "POST", "search_files", Some("reader"), json!({}))
        .await
        .unwrap();
    let err = call(
        &site,
        "POST",
        "upload",
        Some("reader"),
        upload_body(&site, "f.bin", b"x"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), 403);

    // Callback sits below ReadAppend: callbacks yes, uploads no.
    let err = call(
        &site,
        "POST",
        "upload",
        Some("peer-b"),
        upload_body(&site, "f.bin", b"x"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), 403);
    // A state query for an unknown transfer still answers, which proves
    // the Callback level got past authorisation.
    let report = call(
        &site,
        "POST",
        "query_incoming",
        Some("peer-b"),
        json!({"outgoing_id": uuid_like()}),
    )
    .await
    .unwrap();
    assert_eq!(report["state"], Value::Null);

    // ReadAppend cannot delete instances.
    let err = call(
        &site,
        "POST",
        "delete_instance",
        Some("obs"),
        json!({"name": "f.bin", "store": "pot1"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), 403);

    // Admin-only endpoints refuse ReadWrite.
    let err = call(
        &site,
        "POST",
        "create_user",
        Some("curator"),
        json!({"name": "x", "password": "y", "level": "readonly"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), 403);

    // Wrong password is authentication failure, not authorisation.
    let header = format!("Basic {}", BASE64.encode("root:wrong"));
    let err = dispatch(&site.state, "GET", "whoami", Some(&header), b"{}")
        .await
        .unwrap_err();
    assert_eq!(err.status(), 401);
}

fn uuid_like() -> String {
    "00000000-0000-4000-8000-000000000000".to_string()
}

#[tokio::test]
async fn test_whoami_reports_level() {
    let site = build_site(1 << 20).await;
    let who = call(&site, "GET", "whoami", Some("curator"), json!({}))
        .await
        .unwrap();
    assert_eq!(who["name"], "curator");
    assert_eq!(who["level"], "readwrite");
}

// ============================================================================
// Administration
// ============================================================================

#[tokio::test]
async fn test_user_administration() {
    let site = build_site(1 << 20).await;

    call(
        &site,
        "POST",
        "create_user",
        Some("root"),
        json!({"name": "new-user", "password": "pw", "level": "readappend"}),
    )
    .await
    .unwrap();
    // Duplicate names conflict.
    let err = call(
        &site,
        "POST",
        "create_user",
        Some("root"),
        json!({"name": "new-user", "password": "pw", "level": "readonly"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), 409);

    // The new user can authenticate immediately.
    call(&site, "GET", "whoami", Some("new-user"), json!({}))
        .await
        .unwrap();

    call(
        &site,
        "POST",
        "delete_user",
        Some("root"),
        json!({"name": "new-user"}),
    )
    .await
    .unwrap();
    let err = call(&site, "GET", "whoami", Some("new-user"), json!({}))
        .await
        .unwrap_err();
    assert_eq!(err.status(), 401);
}

#[tokio::test]
async fn test_librarian_administration() {
    let site = build_site(1 << 20).await;

    call(
        &site,
        "POST",
        "add_librarian",
        Some("root"),
        json!({
            "name": "site-b",
            "base_url": "http://site-b.example.org",
            "port": 21106,
            "authenticator": "site-a:secret"
        }),
    )
    .await
    .unwrap();

    // The stored authenticator is encrypted, not the plaintext.
    let peer = site
        .repository
        .get_peer(&PeerName::new("site-b".to_string()).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert!(!peer.authenticator_enc.contains("secret"));
    assert_eq!(
        site.state.cipher.decrypt(&peer.authenticator_enc).unwrap(),
        "site-a:secret"
    );

    call(
        &site,
        "POST",
        "set_librarian_transfer",
        Some("root"),
        json!({"name": "site-b", "enabled": false}),
    )
    .await
    .unwrap();
    assert!(!site
        .repository
        .get_peer(&PeerName::new("site-b".to_string()).unwrap())
        .await
        .unwrap()
        .unwrap()
        .transfers_enabled);

    call(
        &site,
        "POST",
        "remove_librarian",
        Some("root"),
        json!({"name": "site-b"}),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_store_state_administration() {
    let site = build_site(1 << 20).await;
    let pot1 = StoreName::new("pot1".to_string()).unwrap();

    call(
        &site,
        "POST",
        "set_store_state",
        Some("root"),
        json!({"name": "pot1", "enabled": false, "ingestible": false}),
    )
    .await
    .unwrap();
    let store = site.repository.get_store(&pot1).await.unwrap().unwrap();
    assert!(!store.enabled);
    assert!(!store.ingestible);

    // Disabled stores reject uploads.
    let err = call(
        &site,
        "POST",
        "upload",
        Some("obs"),
        upload_body(&site, "f.bin", b"x"),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), 507);
}

#[tokio::test]
async fn test_delete_instance_policy_enforced() {
    let site = build_site(1 << 20).await;
    call(
        &site,
        "POST",
        "upload",
        Some("obs"),
        upload_body(&site, "keep.bin", b"data"),
    )
    .await
    .unwrap();

    // Fresh uploads carry deletion disallowed.
    let err = call(
        &site,
        "POST",
        "delete_instance",
        Some("curator"),
        json!({"name": "keep.bin", "store": "pot1"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), 403);

    let err = call(
        &site,
        "POST",
        "delete_instance",
        Some("curator"),
        json!({"name": "ghost.bin", "store": "pot1"}),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status(), 404);
}

// ============================================================================
// Manifest round-trip
// ============================================================================

#[tokio::test]
async fn test_store_manifest_roundtrip() {
    let source = build_site(1 << 20).await;
    for (name, content) in [("a.uv", b"aaa".as_slice()), ("b.uv", b"bbbb".as_slice())] {
        call(
            &source,
            "POST",
            "upload",
            Some("obs"),
            upload_body(&source, name, content),
        )
        .await
        .unwrap();
    }

    let manifest = call(
        &source,
        "POST",
        "get_store_manifest",
        Some("root"),
        json!({"store": "pot1", "destination_librarian": "site-b", "options": {}}),
    )
    .await
    .unwrap();
    assert_eq!(manifest["version"], 1);
    assert_eq!(manifest["items"].as_array().unwrap().len(), 2);

    // The destination ingests the manifest for its matching store.
    let dest = build_site(1 << 20).await;
    let outcome = call(
        &dest,
        "POST",
        "ingest_store_manifest",
        Some("obs"),
        json!({"store": "pot1", "manifest": manifest}),
    )
    .await
    .unwrap();
    assert_eq!(outcome["ingested"].as_array().unwrap().len(), 2);
    assert_eq!(outcome["rejected"].as_array().unwrap().len(), 0);

    // Every manifest item is now a File + Instance on the destination.
    for name in ["a.uv", "b.uv"] {
        let file_name = curator_core::domain::FileName::new(name.to_string()).unwrap();
        assert!(dest.repository.get_file(&file_name).await.unwrap().is_some());
        assert_eq!(
            dest.repository
                .instances_for_file(&file_name)
                .await
                .unwrap()
                .len(),
            1
        );
    }
}
