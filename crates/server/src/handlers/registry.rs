//! npm registry endpoints under the mount path.
//!
//! Every request below the mount goes through [`dispatch`], which classifies
//! it and hands off to the read-through cache, publish, login or the
//! passthrough relay.

use crate::error::{ApiError, ApiResult};
use crate::handlers::{publish, user};
use crate::metrics;
use crate::state::AppState;
use crate::upstream::UpstreamError;
use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::header::{CONTENT_LENGTH, CONTENT_TYPE, HOST};
use axum::http::request::Parts;
use axum::http::{HeaderMap as HttpHeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use tarn_core::cache_key::{CachePartition, derive_cache_key};
use tarn_core::package::rewrite_tarball_urls;
use tarn_core::registry_path::strip_mount;
use tarn_core::{RegistryPath, RegistryRoute};
use tarn_storage::{HeaderMap, X_CACHE, X_CACHED_AT};

/// Headers set by [`proxied_response`] itself, never copied from storage.
const MANAGED_HEADERS: [&str; 5] = [
    "content-type",
    "content-length",
    "content-encoding",
    X_CACHE,
    X_CACHED_AT,
];

/// ANY {mount}/{*path}
pub async fn dispatch(State(state): State<AppState>, req: Request) -> Response {
    let (parts, body) = req.into_parts();
    match route(&state, &parts, body).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn route(state: &AppState, parts: &Parts, body: Body) -> ApiResult<Response> {
    let mount = state.mount_path();
    let raw_path = strip_mount(parts.uri.path(), &mount)
        .ok_or_else(|| ApiError::NotFound(format!("{} is outside the registry", parts.uri.path())))?;

    match RegistryRoute::classify(parts.method.as_str(), raw_path)? {
        RegistryRoute::Empty => Err(ApiError::NotFound("no package requested".to_string())),
        RegistryRoute::Preflight => Ok(preflight_response()),
        RegistryRoute::Whoami => user::whoami(state, parts),
        RegistryRoute::Login { username } => {
            let body = read_body(state, body).await?;
            user::login(state, &username, body).await
        }
        RegistryRoute::Publish { package } => {
            let body = read_body(state, body).await?;
            publish::publish(state, parts, &package, body).await
        }
        RegistryRoute::Read(path) => read(state, parts, &path, raw_path).await,
        RegistryRoute::Passthrough { raw_path } => {
            let body = read_body(state, body).await?;
            passthrough(state, parts, &raw_path, body).await
        }
    }
}

/// Read-through lookup: private partition, then public, then origin.
#[tracing::instrument(skip(state, parts), fields(package = %path.package_name()))]
async fn read(
    state: &AppState,
    parts: &Parts,
    path: &RegistryPath,
    raw_path: &str,
) -> ApiResult<Response> {
    let is_head = parts.method == Method::HEAD;

    let private_key = derive_cache_key(path, CachePartition::Private);
    if state.cache.exists(&private_key).await? {
        metrics::record_cache_lookup(CachePartition::Private.as_str(), "hit");
        let cached = state.cache.load(&private_key).await?;
        return Ok(proxied_response(
            StatusCode::OK,
            cached.bytes,
            &cached.headers,
            is_head,
        ));
    }

    let public_key = derive_cache_key(path, CachePartition::Public);
    if let Some(response) = load_public(state, parts, path, &public_key).await? {
        return Ok(response);
    }

    let _fill = state.inflight.lock(&public_key).await;
    // Another request may have filled the entry while we waited.
    if let Some(response) = load_public(state, parts, path, &public_key).await? {
        return Ok(response);
    }
    metrics::record_cache_lookup(CachePartition::Public.as_str(), "miss");

    let origin = state.upstream.fetch(raw_path, &parts.headers).await?;
    if !origin.status.is_success() {
        tracing::debug!(status = origin.status.as_u16(), "relaying uncached origin response");
        let mut headers = origin.headers;
        headers.insert(X_CACHE.to_string(), "MISS".to_string());
        return Ok(proxied_response(origin.status, origin.bytes, &headers, is_head));
    }

    if let Err(e) = state
        .cache
        .save(&public_key, origin.bytes.clone(), &origin.headers)
        .await
    {
        metrics::CACHE_SAVE_FAILURES.inc();
        tracing::warn!(key = %public_key, error = %e, "failed to cache origin response");
    }

    let mut headers = origin.headers;
    headers.insert(X_CACHE.to_string(), "MISS".to_string());
    let bytes = rewrite_for_client(state, parts, path, origin.bytes);
    Ok(proxied_response(StatusCode::OK, bytes, &headers, is_head))
}

async fn load_public(
    state: &AppState,
    parts: &Parts,
    path: &RegistryPath,
    key: &str,
) -> ApiResult<Option<Response>> {
    if !state.cache.exists(key).await? {
        return Ok(None);
    }
    metrics::record_cache_lookup(CachePartition::Public.as_str(), "hit");
    let cached = state.cache.load(key).await?;
    let bytes = rewrite_for_client(state, parts, path, cached.bytes);
    Ok(Some(proxied_response(
        StatusCode::OK,
        bytes,
        &cached.headers,
        parts.method == Method::HEAD,
    )))
}

/// Point upstream tarball URLs in public metadata back through the proxy.
///
/// The cached copy keeps the origin URLs; the rewrite happens per response
/// since the public origin can differ between requests.
fn rewrite_for_client(state: &AppState, parts: &Parts, path: &RegistryPath, bytes: Bytes) -> Bytes {
    if path.is_tarball() || !state.config.upstream.rewrite_tarball_urls {
        return bytes;
    }
    let Ok(mut document) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
        return bytes;
    };
    let base = registry_base(state, &parts.headers);
    if rewrite_tarball_urls(&mut document, state.upstream.base_url(), &base) == 0 {
        return bytes;
    }
    match serde_json::to_vec(&document) {
        Ok(rewritten) => Bytes::from(rewritten),
        Err(e) => {
            tracing::warn!(error = %e, "failed to re-encode rewritten metadata");
            bytes
        }
    }
}

/// Relay anything the registry does not handle itself.
async fn passthrough(
    state: &AppState,
    parts: &Parts,
    raw_path: &str,
    body: Bytes,
) -> ApiResult<Response> {
    metrics::PASSTHROUGH_REQUESTS.inc();
    let target = match parts.uri.query() {
        Some(query) => format!("{raw_path}?{query}"),
        None => raw_path.to_string(),
    };

    let origin = match state
        .upstream
        .relay(parts.method.clone(), &target, &parts.headers, body)
        .await
    {
        Ok(origin) => origin,
        Err(UpstreamError::Timeout(message)) => return Err(ApiError::Timeout(message)),
        Err(e) => return Err(e.into()),
    };

    Ok(proxied_response(
        origin.status,
        origin.bytes,
        &origin.headers,
        parts.method == Method::HEAD,
    ))
}

fn preflight_response() -> Response {
    (
        StatusCode::OK,
        [
            ("access-control-allow-origin", "*"),
            ("access-control-allow-methods", "GET, POST, OPTIONS, HEAD"),
            (
                "access-control-allow-headers",
                "Content-Type, Authorization, X-Requested-With, X-NPM-Auth-Token, X-NPM-Session, X-NPM-OTP",
            ),
            ("access-control-max-age", "86400"),
        ],
    )
        .into_response()
}

async fn read_body(state: &AppState, body: Body) -> ApiResult<Bytes> {
    let limit = state.config.server.max_body_bytes;
    axum::body::to_bytes(body, limit)
        .await
        .map_err(|e| ApiError::PayloadTooLarge(format!("request body exceeds {limit} bytes: {e}")))
}

/// Build a response for registry content.
///
/// `Content-Length` always reflects `bytes`; HEAD responses keep it but
/// carry no body. Missing cache headers are filled with `UNKNOWN` and an
/// empty timestamp.
pub(crate) fn proxied_response(
    status: StatusCode,
    bytes: Bytes,
    headers: &HeaderMap,
    is_head: bool,
) -> Response {
    let length = bytes.len();
    let body = if is_head { Body::empty() } else { Body::from(bytes) };
    let mut response = Response::new(body);
    *response.status_mut() = status;

    let out = response.headers_mut();
    for (name, value) in headers {
        if MANAGED_HEADERS.contains(&name.as_str()) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            out.insert(name, value);
        }
    }

    let content_type = headers
        .get("content-type")
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    out.insert(CONTENT_TYPE, content_type);
    out.insert(CONTENT_LENGTH, HeaderValue::from(length));

    let x_cache = headers
        .get(X_CACHE)
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static("UNKNOWN"));
    out.insert(HeaderName::from_static(X_CACHE), x_cache);

    let cached_at = headers
        .get(X_CACHED_AT)
        .and_then(|v| HeaderValue::from_str(v).ok())
        .unwrap_or_else(|| HeaderValue::from_static(""));
    out.insert(HeaderName::from_static(X_CACHED_AT), cached_at);

    response
}

/// Externally visible origin of this server (`scheme://host`).
///
/// `server.public_url` wins; otherwise it is derived from the forwarding
/// headers a reverse proxy sets, then `Host`.
pub(crate) fn public_origin(state: &AppState, headers: &HttpHeaderMap) -> String {
    if let Some(url) = &state.config.server.public_url {
        return url.trim_end_matches('/').to_string();
    }
    let first = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };
    let scheme = first("x-forwarded-proto").unwrap_or_else(|| "http".to_string());
    let host = first("x-forwarded-host")
        .or_else(|| first(HOST.as_str()))
        .unwrap_or_else(|| "localhost".to_string());
    format!("{scheme}://{host}")
}

/// Public origin plus mount path: the base of every proxied registry URL.
pub(crate) fn registry_base(state: &AppState, headers: &HttpHeaderMap) -> String {
    format!("{}{}", public_origin(state, headers), state.mount_path())
}
