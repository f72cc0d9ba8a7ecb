//! Object storage and the artifact cache for tarn.
//!
//! This crate provides:
//! - An object store abstraction with a local filesystem backend
//!   (atomic writes, traversal protection)
//! - The cache store: artifact content plus sidecar header metadata

pub mod backends;
pub mod cache;
pub mod error;
pub mod traits;

pub use backends::filesystem::FilesystemBackend;
pub use cache::{CacheMetadata, CacheStore, CachedResponse, HeaderMap, X_CACHE, X_CACHED_AT};
pub use error::{StorageError, StorageResult};
pub use traits::ObjectStore;

use std::sync::Arc;
use tarn_core::config::CacheConfig;

/// Create an object store from configuration.
pub async fn from_config(config: &CacheConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    if config.root.as_os_str().is_empty() {
        return Err(StorageError::Config("cache.root cannot be empty".to_string()));
    }
    let backend = FilesystemBackend::new(&config.root).await?;
    Ok(Arc::new(backend))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::path::PathBuf;
    use tempfile::tempdir;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempdir().unwrap();
        let config = CacheConfig {
            root: temp.path().join("npm"),
        };

        let store = from_config(&config).await.unwrap();
        store
            .put("public/left-pad", Bytes::from_static(b"{}"))
            .await
            .unwrap();
        assert!(store.exists("public/left-pad").await.unwrap());
        assert_eq!(store.backend_name(), "filesystem");
    }

    #[tokio::test]
    async fn from_config_rejects_empty_root() {
        let config = CacheConfig {
            root: PathBuf::new(),
        };

        match from_config(&config).await {
            Ok(_) => panic!("expected error"),
            Err(StorageError::Config(_)) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
}
