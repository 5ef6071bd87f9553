//! Port definitions (trait interfaces for adapters)
//!
//! Driven ports only: the API surface is a driving adapter and depends on
//! the use cases directly.

pub mod metadata_repository;
pub mod notification;
pub mod peer_client;
pub mod store_backend;
pub mod transfer_manager;

pub use metadata_repository::{FileSearchFilters, IMetadataRepository};
pub use notification::{INotifier, NullNotifier};
pub use peer_client::{
    CallbackRequest, IPeerClient, IncomingReport, InstanceInfo, PingInfo, QueryIncomingRequest,
    SetStagedRequest, StageBatchGrant, StageBatchRequest, StageSpec,
};
pub use store_backend::{
    IStoreBackend, StageHandle, StagePurpose, StoreError, StoreReport, StoredEntry,
};
pub use transfer_manager::{
    IAsyncTransferManager, ISyncTransferManager, TransportRequest, TransportStatus,
};
