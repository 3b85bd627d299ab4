pub mod local;
pub mod memory;
pub mod provider;
pub mod s3;

pub use local::*;
pub use memory::*;
pub use provider::*;
pub use s3::S3Storage;

use std::sync::Arc;

use crate::config::{StorageBackend, StorageConfig};

/// Create the storage provider selected by configuration
pub fn build_provider(config: &StorageConfig) -> StorageResult<Arc<dyn StorageProvider>> {
    let provider: Arc<dyn StorageProvider> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        StorageBackend::Local => Arc::new(LocalStorage::new(&config.local_path)),
        StorageBackend::S3 => Arc::new(S3Storage::new(&config.s3)?),
    };

    tracing::info!("Using {} storage backend", provider.storage_type());
    Ok(provider)
}
