use async_trait::async_trait;
use bytes::Bytes;
use std::sync::{Arc, Mutex};
use tarn_storage::error::{StorageError, StorageResult};
use tarn_storage::traits::ObjectStore;
use tarn_storage::FilesystemBackend;

/// Backend that records every write and can be told to fail writes to keys
/// with a given suffix. Delegates to a real filesystem backend.
#[allow(dead_code)]
pub struct RecordingBackend {
    inner: FilesystemBackend,
    pub writes: Arc<Mutex<Vec<String>>>,
    fail_suffix: Option<&'static str>,
}

#[allow(dead_code)]
impl RecordingBackend {
    pub async fn new(root: &std::path::Path) -> Arc<Self> {
        Self::failing(root, None).await
    }

    pub async fn failing(root: &std::path::Path, fail_suffix: Option<&'static str>) -> Arc<Self> {
        Arc::new(Self {
            inner: FilesystemBackend::new(root).await.unwrap(),
            writes: Arc::new(Mutex::new(Vec::new())),
            fail_suffix,
        })
    }

    pub fn recorded_writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for RecordingBackend {
    async fn exists(&self, key: &str) -> StorageResult<bool> {
        self.inner.exists(key).await
    }

    async fn get(&self, key: &str) -> StorageResult<Bytes> {
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, data: Bytes) -> StorageResult<()> {
        self.writes.lock().unwrap().push(key.to_string());
        if let Some(suffix) = self.fail_suffix
            && key.ends_with(suffix)
        {
            return Err(StorageError::Io(std::io::Error::other("injected failure")));
        }
        self.inner.put(key, data).await
    }

    fn backend_name(&self) -> &'static str {
        "recording"
    }
}
