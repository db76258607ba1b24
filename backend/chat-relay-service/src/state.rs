use crate::{
    config::Config,
    services::{accounts::Accounts, blob_store::BlobStore, MemoryStore, MessageStore},
    websocket::{PresenceRegistry, Relay},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn MessageStore>,
    pub relay: Relay,
    pub blobs: Arc<BlobStore>,
    pub accounts: Arc<Accounts>,
}

impl AppState {
    pub fn new(config: Arc<Config>, store: Arc<dyn MessageStore>) -> Self {
        let relay = Relay::new(store.clone(), PresenceRegistry::new(), config.history_limit);
        Self {
            blobs: Arc::new(BlobStore::new(&config.uploads)),
            accounts: Arc::new(Accounts::new(config.accounts.clone())),
            relay,
            store,
            config,
        }
    }

    /// In-memory state for tests and store-less runs.
    pub fn in_memory(config: Config) -> Self {
        let store = MemoryStore::with_capacity(config.memory_capacity);
        Self::new(Arc::new(config), Arc::new(store))
    }
}
