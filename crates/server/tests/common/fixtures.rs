//! Test fixtures for generating registry documents.

use async_compression::tokio::write::{GzipEncoder, ZlibEncoder};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde_json::{Value, json};
use sha2::{Digest, Sha512};
use tokio::io::AsyncWriteExt;

/// Deterministic stand-in for a tarball.
#[allow(dead_code)]
pub fn tarball_bytes(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// SRI `sha512-` string for `data`.
#[allow(dead_code)]
pub fn sha512_integrity(data: &[u8]) -> String {
    format!("sha512-{}", STANDARD.encode(Sha512::digest(data)))
}

/// Publish document as `npm publish` sends it.
#[allow(dead_code)]
pub fn publish_document(name: &str, version: &str, tarball: &[u8]) -> Value {
    let unscoped = name.rsplit('/').next().unwrap_or(name);
    let filename = format!("{unscoped}-{version}.tgz");
    json!({
        "_id": name,
        "name": name,
        "description": "test package",
        "dist-tags": { "latest": version },
        "versions": {
            version: {
                "name": name,
                "version": version,
                "dist": {
                    "integrity": sha512_integrity(tarball),
                    "shasum": "",
                    "tarball": format!("http://localhost/npm/{name}/-/{filename}")
                }
            }
        },
        "_attachments": {
            filename: {
                "content_type": "application/octet-stream",
                "data": STANDARD.encode(tarball),
                "length": tarball.len()
            }
        }
    })
}

/// Upstream metadata for `name` whose tarballs live under `upstream_base`.
#[allow(dead_code)]
pub fn upstream_metadata(name: &str, upstream_base: &str, versions: &[&str]) -> Value {
    let unscoped = name.rsplit('/').next().unwrap_or(name);
    let versions: serde_json::Map<String, Value> = versions
        .iter()
        .map(|v| {
            (
                v.to_string(),
                json!({
                    "name": name,
                    "version": v,
                    "dist": {
                        "tarball": format!("{upstream_base}/{name}/-/{unscoped}-{v}.tgz")
                    }
                }),
            )
        })
        .collect();
    json!({
        "name": name,
        "dist-tags": { "latest": versions.keys().last().cloned().unwrap_or_default() },
        "versions": versions
    })
}

#[allow(dead_code)]
pub async fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzipEncoder::new(Vec::new());
    encoder.write_all(data).await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}

#[allow(dead_code)]
pub async fn zlib(data: &[u8]) -> Vec<u8> {
    let mut encoder = ZlibEncoder::new(Vec::new());
    encoder.write_all(data).await.unwrap();
    encoder.shutdown().await.unwrap();
    encoder.into_inner()
}
