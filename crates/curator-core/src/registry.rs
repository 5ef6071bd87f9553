//! Store registry - configured adapters keyed by store name
//!
//! At startup the daemon instantiates one backend and one transfer-manager
//! pair per configured store and hands the registry to the use cases, the
//! API surface, and the background tasks. Orchestration code never sees a
//! concrete adapter type.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::StoreName;
use crate::ports::{IAsyncTransferManager, IStoreBackend, ISyncTransferManager};

/// The adapters serving one configured store
#[derive(Clone)]
pub struct StoreHandles {
    /// Storage backend
    pub backend: Arc<dyn IStoreBackend>,
    /// Synchronous transfer manager (ingest and local clones)
    pub sync_manager: Arc<dyn ISyncTransferManager>,
    /// Asynchronous transfer manager (peer-to-peer transport)
    pub async_manager: Arc<dyn IAsyncTransferManager>,
    /// Endpoint identifier peers address batches for this store to
    pub async_endpoint: Option<String>,
    /// Ceiling on concurrently live transport handles
    pub max_live_handles: u32,
}

/// All configured stores, keyed by name
#[derive(Clone, Default)]
pub struct StoreRegistry {
    stores: HashMap<StoreName, StoreHandles>,
}

impl StoreRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the adapters for a store
    pub fn insert(&mut self, name: StoreName, handles: StoreHandles) {
        self.stores.insert(name, handles);
    }

    /// Looks up a store's adapters
    pub fn get(&self, name: &StoreName) -> Option<&StoreHandles> {
        self.stores.get(name)
    }

    /// All registered store names
    pub fn names(&self) -> impl Iterator<Item = &StoreName> {
        self.stores.keys()
    }

    /// Number of registered stores
    pub fn len(&self) -> usize {
        self.stores.len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }
}
