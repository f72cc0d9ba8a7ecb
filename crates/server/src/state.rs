//! Application state shared across handlers.

use crate::auth::TokenService;
use crate::credentials::CredentialStore;
use crate::singleflight::KeyedLocks;
use crate::upstream::{UpstreamClient, UpstreamError};
use std::sync::Arc;
use tarn_core::config::AppConfig;
use tarn_storage::{CacheStore, ObjectStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Artifact cache over the object store.
    pub cache: CacheStore,
    /// Upstream registry client.
    pub upstream: Arc<UpstreamClient>,
    /// Bearer token signer/verifier.
    pub tokens: Arc<TokenService>,
    /// Login credential backend.
    pub credentials: Arc<dyn CredentialStore>,
    /// Per-key locks for cache fills and publishes.
    pub inflight: KeyedLocks,
}

impl AppState {
    /// Create a new application state.
    ///
    /// Fails only if the HTTP client cannot be built.
    pub fn new(
        config: AppConfig,
        storage: Arc<dyn ObjectStore>,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, UpstreamError> {
        let upstream = UpstreamClient::new(&config.upstream)?;
        let tokens = TokenService::new(&config.auth);

        if config.auth.accept_web_tokens {
            tracing::warn!("auth.accept_web_tokens is enabled; web session tokens can publish");
        }

        Ok(Self {
            config: Arc::new(config),
            cache: CacheStore::new(storage),
            upstream: Arc::new(upstream),
            tokens: Arc::new(tokens),
            credentials,
            inflight: KeyedLocks::new(),
        })
    }

    /// Mount path without a trailing slash.
    pub fn mount_path(&self) -> String {
        self.config.server.normalized_mount_path()
    }
}
