//! Shared context handed to every background task
//!
//! One bundle of the ports and use cases a task may need. Tasks receive it
//! by reference; nothing here is task-specific state.

use std::sync::Arc;

use curator_core::domain::PeerName;
use curator_core::ports::{IMetadataRepository, IPeerClient};
use curator_core::registry::StoreRegistry;
use curator_core::usecases::{ExchangeUseCase, IngestUseCase};
use curator_telemetry::ErrorReporter;

/// Everything a background task operates through
#[derive(Clone)]
pub struct TaskContext {
    /// This instance's federation name
    pub local_name: PeerName,
    pub repository: Arc<dyn IMetadataRepository>,
    pub registry: StoreRegistry,
    pub peer_client: Arc<dyn IPeerClient>,
    pub reporter: Arc<ErrorReporter>,
    pub ingest: Arc<IngestUseCase>,
    pub exchange: Arc<ExchangeUseCase>,
}
