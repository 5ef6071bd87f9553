//! Request dispatch and handlers
//!
//! One table maps `(method, path)` to a minimum authorisation level; one
//! match dispatches to the handler. Handlers are plain async functions
//! over [`AppState`] and JSON bytes, so the whole surface is testable
//! without opening a socket.

use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::warn;

use curator_core::domain::{
    AuthLevel, ErrorCategory, FileName, PeerName, Severity, Store, StoreName, User,
};
use curator_core::ports::{
    CallbackRequest, FileSearchFilters, IMetadataRepository, QueryIncomingRequest,
    SetStagedRequest, StageBatchRequest,
};
use curator_core::usecases::{
    ExchangeError, ExchangeUseCase, IngestUseCase, ManifestUseCase, QueryUseCase, UploadRequest,
};
use curator_peer::CredentialCipher;
use curator_telemetry::ErrorReporter;

use crate::auth::{self, digest_password};
use crate::types::*;

/// Everything the handlers operate through
#[derive(Clone)]
pub struct AppState {
    pub site_name: String,
    pub site_description: String,
    pub repository: Arc<dyn IMetadataRepository>,
    pub ingest: Arc<IngestUseCase>,
    pub query: Arc<QueryUseCase>,
    pub exchange: Arc<ExchangeUseCase>,
    pub manifest: Arc<ManifestUseCase>,
    pub reporter: Arc<ErrorReporter>,
    pub cipher: Arc<CredentialCipher>,
}

/// Minimum authorisation level per endpoint; `None` means the route does
/// not exist
fn required_level(method: &str, endpoint: &str) -> Option<AuthLevel> {
    let level = match (method, endpoint) {
        ("GET", "ping") => AuthLevel::None,
        ("GET", "whoami") => AuthLevel::ReadOnly,
        ("GET", "list_stores") => AuthLevel::ReadOnly,
        ("POST", "search_files") => AuthLevel::ReadOnly,
        ("POST", "locate_file") => AuthLevel::ReadOnly,
        ("POST", "validate_file") => AuthLevel::ReadAppend,
        ("POST", "upload") => AuthLevel::ReadAppend,
        ("POST", "delete_instance") => AuthLevel::ReadWrite,
        ("POST", "stage_batch") => AuthLevel::ReadAppend,
        ("POST", "set_staged") => AuthLevel::ReadAppend,
        ("POST", "ingest_store_manifest") => AuthLevel::ReadAppend,
        ("POST", "callback_succeeded") => AuthLevel::Callback,
        ("POST", "query_incoming") => AuthLevel::Callback,
        ("POST", "create_user") => AuthLevel::Admin,
        ("POST", "delete_user") => AuthLevel::Admin,
        ("POST", "add_librarian") => AuthLevel::Admin,
        ("POST", "remove_librarian") => AuthLevel::Admin,
        ("POST", "set_librarian_transfer") => AuthLevel::Admin,
        ("POST", "set_store_state") => AuthLevel::Admin,
        ("POST", "get_store_manifest") => AuthLevel::Admin,
        _ => return None,
    };
    Some(level)
}

/// Parses a JSON body into its typed shape
fn parse<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::Validation(e.to_string()))
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, ApiError> {
    serde_json::to_value(value).map_err(|e| ApiError::Internal(e.into()))
}

/// Authenticates, authorises, and dispatches one request
///
/// `endpoint` is the path with the `/api/v1/` prefix already stripped.
pub async fn dispatch(
    state: &AppState,
    method: &str,
    endpoint: &str,
    auth_header: Option<&str>,
    body: &[u8],
) -> Result<Value, ApiError> {
    let required = required_level(method, endpoint)
        .ok_or_else(|| ApiError::NotFound(format!("{method} /api/v1/{endpoint}")))?;

    let user = if required == AuthLevel::None {
        match auth_header {
            Some(header) => auth::authenticate(state.repository.as_ref(), Some(header))
                .await
                .ok(),
            None => None,
        }
    } else {
        let user = auth::authenticate(state.repository.as_ref(), auth_header).await?;
        if !user.level.satisfies(required) {
            return Err(ApiError::Forbidden(required));
        }
        Some(user)
    };

    let result = route(state, endpoint, user.as_ref(), body).await;

    // Infrastructure failures get logged through the taxonomy; user errors
    // are surfaced verbatim and never reach the error log.
    if let Err(e) = &result {
        if !e.is_user_error() {
            let (severity, category) = match e {
                ApiError::StoreFull(_) => (Severity::Error, ErrorCategory::Store),
                ApiError::TransportUnavailable(_) => (Severity::Warning, ErrorCategory::Transport),
                _ => (Severity::Critical, ErrorCategory::Webserver),
            };
            state
                .reporter
                .report(severity, category, &format!("{method} {endpoint}: {e}"))
                .await;
        }
    }

    result
}

async fn route(
    state: &AppState,
    endpoint: &str,
    user: Option<&User>,
    body: &[u8],
) -> Result<Value, ApiError> {
    match endpoint {
        "ping" => to_value(PingResponse {
            name: state.site_name.clone(),
            description: state.site_description.clone(),
        }),
        "whoami" => {
            let user = user.expect("whoami requires authentication");
            to_value(WhoamiResponse {
                name: user.name.clone(),
                level: user.level,
            })
        }
        "list_stores" => handle_list_stores(state).await,
        "upload" => handle_upload(state, user.expect("upload requires authentication"), body).await,
        "search_files" => {
            handle_search(state, user.expect("search requires authentication"), body).await
        }
        "locate_file" => handle_locate(state, body).await,
        "validate_file" => handle_validate(state, body).await,
        "delete_instance" => handle_delete_instance(state, body).await,
        "stage_batch" => handle_stage_batch(state, body).await,
        "set_staged" => handle_set_staged(state, body).await,
        "callback_succeeded" => handle_callback(state, body).await,
        "query_incoming" => handle_query_incoming(state, body).await,
        "ingest_store_manifest" => handle_ingest_manifest(state, body).await,
        "create_user" => handle_create_user(state, body).await,
        "delete_user" => handle_delete_user(state, body).await,
        "add_librarian" => handle_add_librarian(state, body).await,
        "remove_librarian" => handle_remove_librarian(state, body).await,
        "set_librarian_transfer" => handle_set_librarian_transfer(state, body).await,
        "set_store_state" => handle_set_store_state(state, body).await,
        "get_store_manifest" => handle_get_store_manifest(state, body).await,
        _ => Err(ApiError::NotFound(endpoint.to_string())),
    }
}

// ============================================================================
// Ingest and lookup
// ============================================================================

async fn handle_upload(state: &AppState, user: &User, body: &[u8]) -> Result<Value, ApiError> {
    let request: UploadRequestBody = parse(body)?;
    let outcome = state
        .ingest
        .upload(UploadRequest {
            name: request.name,
            size: request.size,
            hash: request.hash,
            source_path: request.source_path_on_client.into(),
            destination_hint: request.destination_hint,
            uploader: user.name.clone(),
            obsid: request.obsid,
            session_id: request.session_id,
        })
        .await?;
    to_value(UploadResponse {
        store: outcome.store,
        instance_path: outcome.instance_path.to_string(),
        duplicate: outcome.duplicate,
    })
}

async fn handle_search(state: &AppState, user: &User, body: &[u8]) -> Result<Value, ApiError> {
    let request: SearchFilesRequest = parse(body)?;
    let filters = FileSearchFilters {
        name: request
            .name
            .map(FileName::new)
            .transpose()
            .map_err(|e| ApiError::Validation(e.to_string()))?,
        name_like: request.name_like,
        uploader: request.uploader,
        obsid: request.obsid,
        session_id: request.session_id,
        min_size: request.min_size,
        max_size: request.max_size,
        created_after: request.created_after,
        created_before: request.created_before,
        store: request
            .store
            .map(StoreName::new)
            .transpose()
            .map_err(|e| ApiError::Validation(e.to_string()))?,
        limit: request.limit,
    };
    let files = state
        .query
        .search_files(filters, user.level == AuthLevel::Admin)
        .await
        .map_err(ApiError::Internal)?;
    to_value(SearchFilesResponse { files })
}

async fn handle_locate(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: FileNameRequest = parse(body)?;
    let locations = state
        .query
        .locate_file(&request.name)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound(request.name.to_string()))?;
    to_value(json!({ "locations": locations }))
}

async fn handle_validate(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: FileNameRequest = parse(body)?;
    let rows = state
        .query
        .validate_file(&request.name)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| ApiError::NotFound(request.name.to_string()))?;
    to_value(json!({ "results": rows }))
}

async fn handle_delete_instance(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: DeleteInstanceRequest = parse(body)?;

    let instance = state
        .repository
        .get_instance(&request.name, &request.store)
        .await
        .map_err(ApiError::Internal)?
        .ok_or_else(|| {
            ApiError::NotFound(format!("{} on {}", request.name, request.store))
        })?;
    if !instance.available {
        return Err(ApiError::NotFound(format!(
            "{} on {}",
            request.name, request.store
        )));
    }

    let deleted = state
        .query
        .delete_instance(&request.name, &request.store)
        .await
        .map_err(ApiError::Internal)?;
    if !deleted {
        // The row exists, so the statement's policy guard refused it.
        return Err(ApiError::PolicyForbidden(format!(
            "instance of {} on {} has deletion disallowed",
            request.name, request.store
        )));
    }
    to_value(OkResponse::new())
}

// ============================================================================
// Peer-to-peer
// ============================================================================

fn map_exchange(e: ExchangeError) -> ApiError {
    match e {
        ExchangeError::Conflict(name) => ApiError::Conflict(name),
        ExchangeError::StoreFull(msg) => ApiError::StoreFull(msg),
        ExchangeError::UnknownTransfer(id) => ApiError::NotFound(id.to_string()),
        ExchangeError::OutOfOrder(id) => ApiError::Conflict(id.to_string()),
        ExchangeError::Other(inner) => ApiError::Internal(inner),
    }
}

async fn handle_stage_batch(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: StageBatchRequest = parse(body)?;
    let source =
        PeerName::from_str(&request.source).map_err(|e| ApiError::Validation(e.to_string()))?;
    let grant = state
        .exchange
        .grant_stage_batch(&source, request.batch_id, &request.files)
        .await
        .map_err(map_exchange)?;
    to_value(grant)
}

async fn handle_set_staged(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: SetStagedRequest = parse(body)?;
    state
        .exchange
        .confirm_staged(&request.outgoing_ids)
        .await
        .map_err(map_exchange)?;
    to_value(OkResponse::new())
}

async fn handle_callback(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: CallbackRequest = parse(body)?;
    state
        .exchange
        .record_callback(request.outgoing_id, &request.instance)
        .await
        .map_err(map_exchange)?;
    to_value(OkResponse::new())
}

async fn handle_query_incoming(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: QueryIncomingRequest = parse(body)?;
    let report = state
        .exchange
        .report_incoming(request.outgoing_id)
        .await
        .map_err(map_exchange)?;
    to_value(report)
}

async fn handle_ingest_manifest(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: IngestStoreManifestRequest = parse(body)?;
    request
        .manifest
        .validate()
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    if state
        .repository
        .get_store(&request.store)
        .await
        .map_err(ApiError::Internal)?
        .is_none()
    {
        return Err(ApiError::NotFound(format!("store {}", request.store)));
    }
    let outcome = state
        .manifest
        .ingest(&request.store, &request.manifest)
        .await
        .map_err(ApiError::Internal)?;
    to_value(outcome)
}

// ============================================================================
// Administrative
// ============================================================================

async fn handle_list_stores(state: &AppState) -> Result<Value, ApiError> {
    let stores: Vec<Store> = state
        .repository
        .list_stores()
        .await
        .map_err(ApiError::Internal)?;
    to_value(json!({ "stores": stores }))
}

async fn handle_create_user(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: CreateUserRequest = parse(body)?;
    if request.name.is_empty() || request.password.is_empty() {
        return Err(ApiError::Validation(
            "user name and password must not be empty".to_string(),
        ));
    }
    if state
        .repository
        .get_user(&request.name)
        .await
        .map_err(ApiError::Internal)?
        .is_some()
    {
        return Err(ApiError::Conflict(request.name));
    }
    let user = User::new(
        request.name,
        digest_password(&request.password),
        request.level,
    );
    state
        .repository
        .create_user(&user)
        .await
        .map_err(ApiError::Internal)?;
    to_value(OkResponse::new())
}

async fn handle_delete_user(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: DeleteUserRequest = parse(body)?;
    if !state
        .repository
        .delete_user(&request.name)
        .await
        .map_err(ApiError::Internal)?
    {
        return Err(ApiError::NotFound(request.name));
    }
    to_value(OkResponse::new())
}

async fn handle_add_librarian(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: AddLibrarianRequest = parse(body)?;
    let name =
        PeerName::from_str(&request.name).map_err(|e| ApiError::Validation(e.to_string()))?;
    CredentialCipher::split_authenticator(&request.authenticator)
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    let encrypted = state
        .cipher
        .encrypt(&request.authenticator)
        .map_err(|e| ApiError::Internal(anyhow::Error::new(e)))?;

    let peer = curator_core::domain::Peer::new(name, request.base_url, request.port, encrypted);
    state
        .repository
        .upsert_peer(&peer)
        .await
        .map_err(ApiError::Internal)?;
    to_value(OkResponse::new())
}

async fn handle_remove_librarian(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: RemoveLibrarianRequest = parse(body)?;
    let name =
        PeerName::from_str(&request.name).map_err(|e| ApiError::Validation(e.to_string()))?;
    if !state
        .repository
        .remove_peer(&name)
        .await
        .map_err(ApiError::Internal)?
    {
        return Err(ApiError::NotFound(request.name));
    }
    to_value(OkResponse::new())
}

async fn handle_set_librarian_transfer(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: SetLibrarianTransferRequest = parse(body)?;
    let name =
        PeerName::from_str(&request.name).map_err(|e| ApiError::Validation(e.to_string()))?;
    if !state
        .repository
        .set_peer_transfers_enabled(&name, request.enabled)
        .await
        .map_err(ApiError::Internal)?
    {
        return Err(ApiError::NotFound(request.name));
    }
    to_value(OkResponse::new())
}

async fn handle_set_store_state(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: SetStoreStateRequest = parse(body)?;
    let mut touched = false;
    if let Some(enabled) = request.enabled {
        touched = true;
        if !state
            .repository
            .set_store_enabled(&request.name, enabled)
            .await
            .map_err(ApiError::Internal)?
        {
            return Err(ApiError::NotFound(request.name.to_string()));
        }
    }
    if let Some(ingestible) = request.ingestible {
        touched = true;
        if !state
            .repository
            .set_store_ingestible(&request.name, ingestible)
            .await
            .map_err(ApiError::Internal)?
        {
            return Err(ApiError::NotFound(request.name.to_string()));
        }
    }
    if !touched {
        return Err(ApiError::Validation(
            "set_store_state requires `enabled` or `ingestible`".to_string(),
        ));
    }
    to_value(OkResponse::new())
}

async fn handle_get_store_manifest(state: &AppState, body: &[u8]) -> Result<Value, ApiError> {
    let request: GetStoreManifestRequest = parse(body)?;
    let destination = PeerName::from_str(&request.destination_librarian)
        .map_err(|e| ApiError::Validation(e.to_string()))?;
    if state
        .repository
        .get_store(&request.store)
        .await
        .map_err(ApiError::Internal)?
        .is_none()
    {
        return Err(ApiError::NotFound(format!("store {}", request.store)));
    }
    let manifest = state
        .manifest
        .export(&request.store, &destination, request.options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Manifest export failed");
            ApiError::Internal(e)
        })?;
    to_value(manifest)
}
