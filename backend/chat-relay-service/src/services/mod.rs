pub mod accounts;
pub mod blob_store;
pub mod memory_store;
pub mod message_store;
pub mod postgres_store;

pub use memory_store::MemoryStore;
pub use message_store::{MessageStore, StoreError, StoreResult};
pub use postgres_store::PostgresStore;
