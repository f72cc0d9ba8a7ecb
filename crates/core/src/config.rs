//! Configuration types shared across crates.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Server configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:4873").
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Path prefix the registry is mounted under (e.g., "/npm").
    #[serde(default = "default_mount_path")]
    pub mount_path: String,
    /// Externally visible origin of the proxy (e.g., "https://mirror.example.com").
    /// When unset, the origin is derived from the request's Host and
    /// X-Forwarded-* headers.
    #[serde(default)]
    pub public_url: Option<String>,
    /// Maximum accepted request body size in bytes (publish payloads carry
    /// base64 tarballs, so this needs headroom).
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
    /// Enable the /metrics endpoint for Prometheus scraping.
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

fn default_bind() -> String {
    "127.0.0.1:4873".to_string()
}

fn default_mount_path() -> String {
    "/npm".to_string()
}

fn default_max_body_bytes() -> usize {
    512 * 1024 * 1024
}

fn default_metrics_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            mount_path: default_mount_path(),
            public_url: None,
            max_body_bytes: default_max_body_bytes(),
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl ServerConfig {
    /// Mount path without a trailing slash ("/" becomes "").
    pub fn normalized_mount_path(&self) -> String {
        self.mount_path.trim_end_matches('/').to_string()
    }

    /// Validate server configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if !self.mount_path.starts_with('/') {
            return Err(format!(
                "server.mount_path must start with '/': {}",
                self.mount_path
            ));
        }
        if let Some(url) = &self.public_url
            && !is_http_url(url)
        {
            return Err(format!(
                "server.public_url must be an http(s) URL: {url}"
            ));
        }
        Ok(())
    }
}

/// Upstream registry configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the upstream registry.
    #[serde(default = "default_registry_url")]
    pub registry_url: String,
    /// Origin request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// User-Agent sent to the upstream registry.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Rewrite upstream `dist.tarball` URLs in served metadata so tarball
    /// downloads come back through the proxy.
    #[serde(default = "default_rewrite_tarball_urls")]
    pub rewrite_tarball_urls: bool,
}

fn default_registry_url() -> String {
    "https://registry.npmjs.org".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_user_agent() -> String {
    concat!("tarn/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_rewrite_tarball_urls() -> bool {
    true
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            registry_url: default_registry_url(),
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            rewrite_tarball_urls: default_rewrite_tarball_urls(),
        }
    }
}

impl UpstreamConfig {
    /// Get the origin request timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Registry base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.registry_url.trim_end_matches('/')
    }

    /// Validate upstream configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if !is_http_url(&self.registry_url) {
            return Err(format!(
                "upstream.registry_url must be an http(s) URL: {}",
                self.registry_url
            ));
        }
        if self.timeout_secs == 0 {
            return Err("upstream.timeout_secs cannot be 0".to_string());
        }
        Ok(())
    }
}

/// On-disk cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root directory holding the `public/` and `private/` partitions.
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("./data/npm")
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
        }
    }
}

/// Authentication configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HMAC secret used to sign bearer tokens.
    /// WARNING: Prefer the TARN_AUTH__JWT_SECRET env var over storing in config.
    pub jwt_secret: String,
    /// Path to an htpasswd file with bcrypt hashes.
    #[serde(default = "default_htpasswd_path")]
    pub htpasswd_path: PathBuf,
    /// Lifetime of tokens issued to the npm CLI (default: 365 days).
    #[serde(default = "default_npm_token_ttl_secs")]
    pub npm_token_ttl_secs: u64,
    /// Lifetime of web session tokens (default: 24 hours).
    #[serde(default = "default_web_token_ttl_secs")]
    pub web_token_ttl_secs: u64,
    /// Accept web session tokens on npm endpoints (default: false).
    #[serde(default)]
    pub accept_web_tokens: bool,
}

fn default_htpasswd_path() -> PathBuf {
    PathBuf::from("./data/htpasswd")
}

fn default_npm_token_ttl_secs() -> u64 {
    365 * 24 * 60 * 60
}

fn default_web_token_ttl_secs() -> u64 {
    24 * 60 * 60
}

impl AuthConfig {
    /// Create a test configuration with a fixed secret.
    ///
    /// **For testing only.**
    pub fn for_testing() -> Self {
        Self {
            jwt_secret: "test-secret-do-not-use".to_string(),
            htpasswd_path: default_htpasswd_path(),
            npm_token_ttl_secs: default_npm_token_ttl_secs(),
            web_token_ttl_secs: default_web_token_ttl_secs(),
            accept_web_tokens: false,
        }
    }

    /// Validate auth configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.jwt_secret.trim().is_empty() {
            return Err("auth.jwt_secret cannot be empty".to_string());
        }
        if self.npm_token_ttl_secs == 0 || self.web_token_ttl_secs == 0 {
            return Err("auth token lifetimes must be greater than 0".to_string());
        }
        if self.npm_token_ttl_secs > i64::MAX as u64 || self.web_token_ttl_secs > i64::MAX as u64 {
            return Err("auth token lifetimes exceed the supported range".to_string());
        }
        Ok(())
    }
}

/// Complete application configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream registry configuration.
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Authentication configuration (required).
    pub auth: AuthConfig,
}

impl AppConfig {
    /// Create a test configuration with sensible defaults.
    ///
    /// **For testing only.** Uses the default cache root and a fixed token secret.
    pub fn for_testing() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            cache: CacheConfig::default(),
            auth: AuthConfig::for_testing(),
        }
    }

    /// Validate all sections.
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;
        self.upstream.validate()?;
        self.auth.validate()?;
        Ok(())
    }
}

fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_defaults() {
        let config = UpstreamConfig::default();
        assert_eq!(config.base_url(), "https://registry.npmjs.org");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert!(config.rewrite_tarball_urls);
    }

    #[test]
    fn test_base_url_trims_trailing_slash() {
        let config = UpstreamConfig {
            registry_url: "http://localhost:9000/".to_string(),
            ..Default::default()
        };
        assert_eq!(config.base_url(), "http://localhost:9000");
    }

    #[test]
    fn test_app_config_deserialize_with_only_secret() {
        let json = r#"{"auth": {"jwt_secret": "s3cret"}}"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.server.mount_path, "/npm");
        assert_eq!(config.auth.npm_token_ttl_secs, 365 * 24 * 60 * 60);
        assert!(!config.auth.accept_web_tokens);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_secret() {
        let mut config = AppConfig::for_testing();
        config.auth.jwt_secret = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_mount_and_registry() {
        let mut config = AppConfig::for_testing();
        config.server.mount_path = "npm".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::for_testing();
        config.upstream.registry_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::for_testing();
        config.upstream.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_normalized_mount_path() {
        let mut config = ServerConfig::default();
        assert_eq!(config.normalized_mount_path(), "/npm");
        config.mount_path = "/registry/".to_string();
        assert_eq!(config.normalized_mount_path(), "/registry");
        config.mount_path = "/".to_string();
        assert_eq!(config.normalized_mount_path(), "");
    }
}
