//! Collaborators at the engine boundary: the project backend and the local
//! fitness cache.

mod cache;
mod connector;

pub use cache::{CacheError, JsonFileCache, LocalCache, MemoryCache};
pub use connector::{
    BackendConnector, FileBackend, GENERATIONS_DIR, MODELS_FILE, MemoryBackend,
    PublishedGeneration, SCHEMA_FILE, TransportError,
};
