//! subcap-storage: local key-value persistence for sync config and cached secrets

pub mod adapter;
pub mod fallback;
pub mod file;
pub mod health;
pub mod memory;

pub use adapter::StorageAdapter;
pub use fallback::FallbackStore;
pub use file::FileStore;
pub use health::{check_health, is_healthy};
pub use memory::MemoryStore;

/// Build the default local store: a JSON file, falling back to memory when
/// the file cannot be read or written.
pub fn build_store(
    cfg: &subcap_core::config::StorageConfig,
) -> FallbackStore<FileStore, MemoryStore> {
    FallbackStore::new(FileStore::new(&cfg.path), MemoryStore::new())
}
