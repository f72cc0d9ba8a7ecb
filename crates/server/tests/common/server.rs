//! Server test utilities.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use httpmock::MockServer;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tarn_core::TokenKind;
use tarn_core::config::AppConfig;
use tarn_server::{AppState, HtpasswdStore, create_router};
use tempfile::TempDir;
use tower::ServiceExt;

/// User present in every test server's htpasswd file.
pub const TEST_USER: &str = "alice";
pub const TEST_PASSWORD: &str = "correct horse";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    /// Fake upstream registry.
    pub upstream: MockServer,
    _temp_dir: TempDir,
}

/// A fully buffered response.
#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: axum::http::HeaderMap,
    pub body: bytes::Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[allow(dead_code)]
impl TestServer {
    /// Create a new test server with temporary storage and a mock upstream.
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let upstream = MockServer::start_async().await;
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let htpasswd_path = temp_dir.path().join("htpasswd");
        write_htpasswd(&htpasswd_path, &[(TEST_USER, TEST_PASSWORD)]);

        let mut config = AppConfig::for_testing();
        config.upstream.registry_url = upstream.base_url();
        config.upstream.timeout_secs = 5;
        config.cache.root = temp_dir.path().join("npm");
        config.auth.htpasswd_path = htpasswd_path;
        modifier(&mut config);

        let storage = tarn_storage::from_config(&config.cache)
            .await
            .expect("Failed to create cache storage");
        let credentials = Arc::new(HtpasswdStore::new(&config.auth.htpasswd_path));
        let state = AppState::new(config, storage, credentials).expect("Failed to create state");

        tarn_server::metrics::register_metrics();
        let router = create_router(state.clone());

        Self {
            router,
            state,
            upstream,
            _temp_dir: temp_dir,
        }
    }

    /// Root directory of the on-disk cache.
    pub fn cache_root(&self) -> PathBuf {
        self.state.config.cache.root.clone()
    }

    /// Send a request through the router.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// GET a path, optionally with a bearer token.
    pub async fn get(&self, uri: &str, token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    /// PUT a JSON body, optionally with a bearer token.
    pub async fn put_json(&self, uri: &str, body: &Value, token: Option<&str>) -> TestResponse {
        let mut builder = Request::builder()
            .method("PUT")
            .uri(uri)
            .header("Content-Type", "application/json");
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let body = Body::from(serde_json::to_vec(body).unwrap());
        self.send(builder.body(body).unwrap()).await
    }

    /// Log in as the test user and return the npm token.
    pub async fn login(&self) -> String {
        let response = self
            .put_json(
                &format!("/npm/-/user/org.couchdb.user:{TEST_USER}"),
                &json!({ "name": TEST_USER, "password": TEST_PASSWORD }),
                None,
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED);
        response.json()["token"]
            .as_str()
            .expect("login response carries a token")
            .to_string()
    }

    /// Mint a token directly, bypassing login.
    pub fn issue_token(&self, kind: TokenKind) -> String {
        self.state.tokens.issue(TEST_USER, kind).unwrap()
    }
}

/// Write an htpasswd file with low-cost bcrypt entries.
pub fn write_htpasswd(path: &Path, entries: &[(&str, &str)]) {
    let contents: String = entries
        .iter()
        .map(|(user, password)| format!("{user}:{}\n", bcrypt::hash(password, 4).unwrap()))
        .collect();
    std::fs::write(path, contents).expect("Failed to write htpasswd");
}
