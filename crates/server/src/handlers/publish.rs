//! `npm publish` into the private partition.

use crate::auth::{get_trace_id, require_auth};
use crate::error::{ApiError, ApiResult};
use crate::handlers::registry::registry_base;
use crate::metrics::PUBLISHES;
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use tarn_core::cache_key::{CachePartition, derive_cache_key};
use tarn_core::package::synthetic_revision;
use tarn_core::registry_path::is_package_name;
use tarn_core::{PackageDocument, PublishContext, PublishPlan, RegistryPath, prepare_publish};
use tarn_storage::{HeaderMap, StorageError};
use time::OffsetDateTime;

/// PUT {mount}/{package}
///
/// Tarballs are written before the metadata that references them, and
/// publishes of one package are serialized on its metadata key.
pub async fn publish(
    state: &AppState,
    parts: &Parts,
    package: &str,
    body: Bytes,
) -> ApiResult<Response> {
    let trace_id = get_trace_id(parts).cloned().unwrap_or_default();
    let registry_base = registry_base(state, &parts.headers);
    let user = require_auth(
        parts,
        &format!("you must be logged in to publish packages; run `npm login --registry={registry_base}`"),
    )
    .inspect_err(|_| PUBLISHES.with_label_values(&["unauthorized"]).inc())?;

    if !is_package_name(package) {
        PUBLISHES.with_label_values(&["rejected"]).inc();
        return Err(ApiError::BadRequest(format!("invalid package name: {package}")));
    }
    let document = PackageDocument::from_slice(&body)
        .inspect_err(|_| PUBLISHES.with_label_values(&["rejected"]).inc())?;

    let metadata_key = derive_cache_key(
        &RegistryPath::Metadata {
            name: package.to_string(),
        },
        CachePartition::Private,
    );
    let _publish = state.inflight.lock(&metadata_key).await;

    let now = OffsetDateTime::now_utc();
    let existing = load_existing(state, &metadata_key).await?;
    let plan = prepare_publish(
        document,
        PublishContext {
            package,
            username: &user.username,
            registry_base: &registry_base,
            existing,
            now,
        },
    )
    .inspect_err(|e| {
        let outcome = match e {
            tarn_core::Error::VersionExists(_) => "conflict",
            _ => "rejected",
        };
        PUBLISHES.with_label_values(&[outcome]).inc();
    })?;

    let PublishPlan {
        package: name,
        tarballs,
        metadata,
    } = plan;
    let versions: Vec<String> = tarballs.iter().map(|t| t.version.clone()).collect();

    let tarball_headers = content_type_headers("application/octet-stream");
    for tarball in tarballs {
        let key = derive_cache_key(
            &RegistryPath::Tarball {
                package: name.clone(),
                filename: tarball.filename,
            },
            CachePartition::Private,
        );
        state
            .cache
            .save(&key, Bytes::from(tarball.bytes), &tarball_headers)
            .await
            .inspect_err(|_| PUBLISHES.with_label_values(&["error"]).inc())?;
    }

    let encoded = serde_json::to_vec(&metadata)
        .map_err(|e| ApiError::Internal(format!("failed to encode package metadata: {e}")))?;
    state
        .cache
        .save(
            &metadata_key,
            Bytes::from(encoded),
            &content_type_headers("application/json"),
        )
        .await
        .inspect_err(|_| PUBLISHES.with_label_values(&["error"]).inc())?;

    PUBLISHES.with_label_values(&["ok"]).inc();
    tracing::info!(
        package = %name,
        versions = ?versions,
        username = %user.username,
        trace_id = %trace_id,
        "package published"
    );

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "id": name,
            "rev": synthetic_revision(now),
        })),
    )
        .into_response())
}

async fn load_existing(state: &AppState, key: &str) -> ApiResult<Option<Value>> {
    let bytes = match state.cache.store().get(key).await {
        Ok(bytes) => bytes,
        Err(StorageError::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| ApiError::Internal(format!("stored metadata for {key} is corrupt: {e}")))
}

fn content_type_headers(content_type: &str) -> HeaderMap {
    HeaderMap::from([("content-type".to_string(), content_type.to_string())])
}
