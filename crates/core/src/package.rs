//! Package documents and the publish transformation.
//!
//! `npm publish` sends a CouchDB-style document: the package metadata with
//! every new version under `versions`, plus the tarballs themselves as
//! base64 blobs under `_attachments`. Publishing detaches those blobs into
//! individual tarball files and persists the remaining metadata with
//! `dist.tarball` pointing back through the proxy.

use crate::registry_path::{TARBALL_SEPARATOR, unscoped_name};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha512};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// A base64 tarball attached to a publish document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(default)]
    pub content_type: Option<String>,
    pub data: String,
    #[serde(default)]
    pub length: Option<u64>,
}

/// Publish payload as sent by the npm CLI.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PackageDocument {
    pub name: String,
    #[serde(default)]
    pub versions: Map<String, Value>,
    #[serde(rename = "_attachments", default)]
    pub attachments: BTreeMap<String, Attachment>,
    #[serde(rename = "dist-tags", default)]
    pub dist_tags: Map<String, Value>,
    /// Every other field (description, readme, maintainers, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PackageDocument {
    /// Parse a publish body.
    pub fn from_slice(body: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(body)
            .map_err(|e| crate::Error::InvalidPackage(format!("malformed package document: {e}")))
    }

    /// Find the attachment for `version`.
    ///
    /// npm names attachments `<name>-<version>.tgz`; scoped packages are
    /// also accepted under their unscoped name.
    pub fn attachment_for(&self, version: &str) -> Option<(&str, &Attachment)> {
        let full = format!("{}-{version}.tgz", self.name);
        let unscoped = format!("{}-{version}.tgz", unscoped_name(&self.name));
        [full, unscoped]
            .iter()
            .find_map(|key| self.attachments.get_key_value(key.as_str()))
            .map(|(k, v)| (k.as_str(), v))
    }
}

/// A tarball extracted from a publish document.
#[derive(Clone, Debug)]
pub struct PublishedTarball {
    pub version: String,
    /// File name under `<package>/-/`.
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Everything a publish writes: tarballs first, then metadata.
#[derive(Clone, Debug)]
pub struct PublishPlan {
    pub package: String,
    pub tarballs: Vec<PublishedTarball>,
    pub metadata: Value,
}

/// Inputs to the publish transformation that don't come from the body.
#[derive(Clone, Debug)]
pub struct PublishContext<'a> {
    /// Package name from the request URL.
    pub package: &'a str,
    /// Authenticated publisher.
    pub username: &'a str,
    /// Public origin + mount path that tarball URLs are rewritten to.
    pub registry_base: &'a str,
    /// Previously published metadata for this package, if any.
    pub existing: Option<Value>,
    pub now: OffsetDateTime,
}

/// Turn a publish document into the files to persist.
pub fn prepare_publish(doc: PackageDocument, ctx: PublishContext<'_>) -> crate::Result<PublishPlan> {
    if doc.name != ctx.package {
        return Err(crate::Error::NameMismatch {
            expected: ctx.package.to_string(),
            actual: doc.name,
        });
    }
    if doc.versions.is_empty() {
        return Err(crate::Error::InvalidPackage(
            "document contains no versions".to_string(),
        ));
    }

    let mut metadata = match ctx.existing {
        Some(Value::Object(map)) => map,
        Some(_) => {
            return Err(crate::Error::InvalidPackage(
                "stored metadata is not a JSON object".to_string(),
            ));
        }
        None => Map::new(),
    };

    let existing_versions = metadata
        .get("versions")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    if let Some(version) = doc.versions.keys().find(|v| existing_versions.contains_key(*v)) {
        return Err(crate::Error::VersionExists(format!("{}@{version}", doc.name)));
    }

    let registry_base = ctx.registry_base.trim_end_matches('/');
    let timestamp = ctx
        .now
        .format(&Rfc3339)
        .map_err(|e| crate::Error::Serialization(e.to_string()))?;

    let mut tarballs = Vec::new();
    let mut versions = existing_versions;
    for (version, version_meta) in &doc.versions {
        let mut version_meta = version_meta.clone();
        if let Some((attachment_name, attachment)) = doc.attachment_for(version) {
            let bytes = decode_attachment(attachment_name, attachment)?;
            if let Some(integrity) = version_meta
                .pointer("/dist/integrity")
                .and_then(Value::as_str)
            {
                verify_integrity(attachment_name, integrity, &bytes)?;
            }

            let filename = format!("{}-{version}.tgz", unscoped_name(&doc.name));
            let tarball_url = format!(
                "{registry_base}/{}{TARBALL_SEPARATOR}{filename}",
                doc.name
            );
            set_dist_tarball(&mut version_meta, tarball_url)?;
            tarballs.push(PublishedTarball {
                version: version.clone(),
                filename,
                bytes,
            });
        }
        versions.insert(version.clone(), version_meta);
    }

    for (key, value) in doc.extra {
        if !key.starts_with('_') {
            metadata.insert(key, value);
        }
    }

    let mut dist_tags = metadata
        .get("dist-tags")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    dist_tags.extend(doc.dist_tags);

    let mut times = metadata
        .get("time")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    times
        .entry("created")
        .or_insert_with(|| Value::String(timestamp.clone()));
    times.insert("modified".to_string(), Value::String(timestamp.clone()));
    for version in doc.versions.keys() {
        times.insert(version.clone(), Value::String(timestamp.clone()));
    }

    metadata.insert("_id".to_string(), Value::String(doc.name.clone()));
    metadata.insert("name".to_string(), Value::String(doc.name.clone()));
    metadata.insert("versions".to_string(), Value::Object(versions));
    metadata.insert("dist-tags".to_string(), Value::Object(dist_tags));
    metadata.insert("time".to_string(), Value::Object(times));
    metadata.insert(
        "_publishedBy".to_string(),
        Value::String(ctx.username.to_string()),
    );
    metadata.insert("_attachments".to_string(), Value::Object(Map::new()));

    Ok(PublishPlan {
        package: doc.name,
        tarballs,
        metadata: Value::Object(metadata),
    })
}

fn decode_attachment(filename: &str, attachment: &Attachment) -> crate::Result<Vec<u8>> {
    let bytes = STANDARD
        .decode(attachment.data.trim())
        .map_err(|e| crate::Error::InvalidAttachment {
            filename: filename.to_string(),
            reason: format!("invalid base64: {e}"),
        })?;
    if let Some(length) = attachment.length
        && length != bytes.len() as u64
    {
        return Err(crate::Error::InvalidAttachment {
            filename: filename.to_string(),
            reason: format!("declared length {length}, decoded {} bytes", bytes.len()),
        });
    }
    Ok(bytes)
}

/// Verify `bytes` against an SRI string; only `sha512-` entries are checked.
pub fn verify_integrity(filename: &str, integrity: &str, bytes: &[u8]) -> crate::Result<()> {
    let expected: Vec<&str> = integrity
        .split_whitespace()
        .filter_map(|entry| entry.strip_prefix("sha512-"))
        .collect();
    if expected.is_empty() {
        return Ok(());
    }

    let actual = STANDARD.encode(Sha512::digest(bytes));
    if expected.iter().any(|e| *e == actual) {
        Ok(())
    } else {
        Err(crate::Error::IntegrityMismatch {
            filename: filename.to_string(),
            expected: format!("sha512-{}", expected[0]),
            actual: format!("sha512-{actual}"),
        })
    }
}

fn set_dist_tarball(version_meta: &mut Value, url: String) -> crate::Result<()> {
    let obj = version_meta.as_object_mut().ok_or_else(|| {
        crate::Error::InvalidPackage("version metadata must be an object".to_string())
    })?;
    let dist = obj
        .entry("dist")
        .or_insert_with(|| Value::Object(Map::new()));
    match dist.as_object_mut() {
        Some(dist) => {
            dist.insert("tarball".to_string(), Value::String(url));
            Ok(())
        }
        None => Err(crate::Error::InvalidPackage(
            "dist must be an object".to_string(),
        )),
    }
}

/// Rewrite every `versions.*.dist.tarball` starting with `from` to start
/// with `to`. Returns the number of URLs rewritten.
pub fn rewrite_tarball_urls(metadata: &mut Value, from: &str, to: &str) -> usize {
    let from = from.trim_end_matches('/');
    let to = to.trim_end_matches('/');
    let Some(versions) = metadata.get_mut("versions").and_then(Value::as_object_mut) else {
        return 0;
    };

    let mut rewritten = 0;
    for version in versions.values_mut() {
        if let Some(Value::String(url)) = version.pointer_mut("/dist/tarball")
            && let Some(rest) = url.strip_prefix(from)
            && rest.starts_with('/')
        {
            let proxied = format!("{to}{rest}");
            *url = proxied;
            rewritten += 1;
        }
    }
    rewritten
}

/// Placeholder CouchDB revision (`1-<millis in base36>`).
///
/// Not derived from content and not usable for optimistic concurrency.
pub fn synthetic_revision(now: OffsetDateTime) -> String {
    let millis = (now.unix_timestamp_nanos() / 1_000_000).max(0) as u128;
    format!("1-{}", to_base36(millis))
}

fn to_base36(mut n: u128) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}
