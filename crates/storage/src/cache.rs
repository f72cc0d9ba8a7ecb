//! Cached registry artifacts with sidecar metadata.
//!
//! Every artifact is stored as two objects: the content at its derived key
//! and a JSON record at `<key>.meta` holding the retained response headers,
//! the time it was cached and its size. The content is written first, so an
//! interrupted save leaves at worst content without a sidecar, which still
//! loads as a hit.

use crate::error::{StorageError, StorageResult};
use crate::traits::ObjectStore;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tarn_core::cache_key::meta_key;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::instrument;

/// Header marking whether a response came from the cache.
pub const X_CACHE: &str = "x-cache";
/// Header carrying the RFC 3339 time the artifact was cached.
pub const X_CACHED_AT: &str = "x-cached-at";

/// Headers never persisted in a sidecar.
const UNSTORED_HEADERS: [&str; 5] = [
    "content-length",
    "content-encoding",
    "transfer-encoding",
    X_CACHE,
    X_CACHED_AT,
];

/// Response headers keyed by lowercase name.
pub type HeaderMap = BTreeMap<String, String>;

/// Sidecar record stored at `<key>.meta`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub headers: HeaderMap,
    #[serde(rename = "cachedAt", with = "time::serde::rfc3339")]
    pub cached_at: OffsetDateTime,
    pub size: u64,
}

/// An artifact loaded from the cache.
#[derive(Clone, Debug)]
pub struct CachedResponse {
    pub bytes: Bytes,
    /// Stored headers plus `x-cache: HIT` and, when known, `x-cached-at`.
    pub headers: HeaderMap,
}

/// Content + sidecar store over an [`ObjectStore`].
#[derive(Clone)]
pub struct CacheStore {
    store: Arc<dyn ObjectStore>,
}

impl CacheStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Underlying object store.
    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Check if content exists at `key`.
    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.store.exists(key).await
    }

    /// Load content and headers, failing with `NotFound` when absent.
    #[instrument(skip(self))]
    pub async fn load(&self, key: &str) -> StorageResult<CachedResponse> {
        let bytes = self.store.get(key).await?;
        let mut headers = HeaderMap::new();

        match self.load_metadata(key).await {
            Ok(Some(meta)) => {
                headers = meta.headers;
                if let Ok(cached_at) = meta.cached_at.format(&Rfc3339) {
                    headers.insert(X_CACHED_AT.to_string(), cached_at);
                }
            }
            Ok(None) => {
                tracing::debug!(key, "cached artifact has no sidecar metadata");
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "ignoring unreadable cache metadata");
            }
        }
        headers.insert(X_CACHE.to_string(), "HIT".to_string());

        Ok(CachedResponse { bytes, headers })
    }

    /// Load only the sidecar record for `key`.
    pub async fn load_metadata(&self, key: &str) -> StorageResult<Option<CacheMetadata>> {
        let meta_key = meta_key(key);
        let raw = match self.store.get(&meta_key).await {
            Ok(raw) => raw,
            Err(StorageError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| StorageError::CorruptMetadata {
                key: meta_key,
                reason: e.to_string(),
            })
    }

    /// Save content then its sidecar record.
    #[instrument(skip(self, bytes, headers), fields(size = bytes.len()))]
    pub async fn save(
        &self,
        key: &str,
        bytes: Bytes,
        headers: &HeaderMap,
    ) -> StorageResult<CacheMetadata> {
        let meta = CacheMetadata {
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                .filter(|(k, _)| !UNSTORED_HEADERS.contains(&k.as_str()))
                .collect(),
            cached_at: OffsetDateTime::now_utc(),
            size: bytes.len() as u64,
        };
        let encoded = serde_json::to_vec(&meta).map_err(|e| StorageError::CorruptMetadata {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        self.store.put(key, bytes).await?;
        self.store.put(&meta_key(key), Bytes::from(encoded)).await?;

        tracing::debug!(key, size = meta.size, "saved artifact to cache");
        Ok(meta)
    }

    pub async fn health_check(&self) -> StorageResult<()> {
        self.store.health_check().await
    }
}
