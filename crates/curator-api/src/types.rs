//! Typed request and response shapes of the API surface
//!
//! Everything on the wire is JSON; each shape here is one endpoint's body.
//! The error enum carries the full user-visible failure taxonomy and its
//! HTTP status mapping.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use curator_core::domain::{AuthLevel, ContentHash, File, FileName, StoreManifest, StoreName};
use curator_core::usecases::{IngestError, ManifestExportOptions};

// ============================================================================
// Errors
// ============================================================================

/// User-visible API failures with their status codes
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Insufficient authorisation (requires {0})")]
    Forbidden(AuthLevel),

    #[error("Refused by policy: {0}")]
    PolicyForbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Hash mismatch: {0}")]
    HashMismatch(String),

    #[error("Store full: {0}")]
    StoreFull(String),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Internal error")]
    Internal(#[source] anyhow::Error),
}

impl ApiError {
    /// The HTTP status code this failure maps to
    pub fn status(&self) -> u16 {
        match self {
            ApiError::AuthenticationFailed => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::PolicyForbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::PayloadTooLarge(_) => 413,
            ApiError::HashMismatch(_) => 422,
            ApiError::StoreFull(_) => 507,
            ApiError::Validation(_) => 400,
            ApiError::TransportUnavailable(_) => 503,
            ApiError::Internal(_) => 500,
        }
    }

    /// Whether this failure is the caller's fault (never logged at error
    /// severity)
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            ApiError::StoreFull(_) | ApiError::TransportUnavailable(_) | ApiError::Internal(_)
        )
    }
}

impl From<IngestError> for ApiError {
    fn from(e: IngestError) -> Self {
        use curator_core::ports::StoreError;
        match e {
            IngestError::Conflict(name) => ApiError::Conflict(name),
            IngestError::TooLarge { size, ceiling } => {
                ApiError::PayloadTooLarge(format!("{size} bytes exceeds ceiling {ceiling}"))
            }
            IngestError::StoreFull(msg) => ApiError::StoreFull(msg),
            IngestError::UnknownStore(name) => ApiError::NotFound(format!("store {name}")),
            IngestError::Store(StoreError::HashMismatch {
                name,
                expected,
                computed,
            }) => ApiError::HashMismatch(format!("{name}: expected {expected}, got {computed}")),
            IngestError::Store(StoreError::Full { .. }) => ApiError::StoreFull(e_to_string(&e)),
            IngestError::Store(StoreError::TargetExists(name)) => ApiError::Conflict(name),
            IngestError::Store(other) => ApiError::Internal(anyhow::Error::new(other)),
            IngestError::Other(inner) => ApiError::Internal(inner),
        }
    }
}

fn e_to_string(e: &dyn std::error::Error) -> String {
    e.to_string()
}

/// The JSON body every failed request carries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// ============================================================================
// Ingest and lookup
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRequestBody {
    pub name: FileName,
    pub size: u64,
    pub hash: ContentHash,
    /// Path the server-side synchronous manager reads the payload from
    pub source_path_on_client: String,
    #[serde(default)]
    pub destination_hint: Option<StoreName>,
    #[serde(default)]
    pub obsid: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub store: StoreName,
    pub instance_path: String,
    /// True when the upload matched an existing file and was a no-op
    pub duplicate: bool,
}

/// Flat filter record for file searches; all populated fields AND together
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilesRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub name_like: Option<String>,
    #[serde(default)]
    pub uploader: Option<String>,
    #[serde(default)]
    pub obsid: Option<i64>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub min_size: Option<u64>,
    #[serde(default)]
    pub max_size: Option<u64>,
    #[serde(default)]
    pub created_after: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub created_before: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub store: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchFilesResponse {
    pub files: Vec<File>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileNameRequest {
    pub name: FileName,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteInstanceRequest {
    pub name: FileName,
    pub store: StoreName,
}

// ============================================================================
// Administrative
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub name: String,
    pub password: String,
    pub level: AuthLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUserRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddLibrarianRequest {
    pub name: String,
    pub base_url: String,
    pub port: u16,
    /// Plaintext `user:password`; encrypted before it reaches the database
    pub authenticator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveLibrarianRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetLibrarianTransferRequest {
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetStoreStateRequest {
    pub name: StoreName,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub ingestible: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStoreManifestRequest {
    pub store: StoreName,
    pub destination_librarian: String,
    #[serde(default)]
    pub options: ManifestExportOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestStoreManifestRequest {
    pub store: StoreName,
    pub manifest: StoreManifest,
}

// ============================================================================
// Misc responses
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoamiResponse {
    pub name: String,
    pub level: AuthLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    pub fn new() -> Self {
        Self { ok: true }
    }
}

impl Default for OkResponse {
    fn default() -> Self {
        Self::new()
    }
}
