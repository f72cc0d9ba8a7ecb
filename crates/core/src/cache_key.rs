//! Storage key derivation for cached registry artifacts.

use crate::registry_path::RegistryPath;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Suffix of the sidecar metadata record stored next to every artifact.
pub const META_SUFFIX: &str = ".meta";

/// Which subtree of the cache root an artifact lives in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePartition {
    /// Copies of upstream registry responses.
    Public,
    /// Locally published packages. Takes precedence over `Public`.
    Private,
}

impl CachePartition {
    /// Directory name of this partition under the cache root.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for CachePartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the storage key (relative to the cache root) for a registry path.
///
/// | path     | public                         | private                       |
/// |----------|--------------------------------|-------------------------------|
/// | metadata | `public/<name>`                | `private/<name>.json`         |
/// | tarball  | `public/<pkg>-tarballs/<file>` | `private/<pkg>/-/<file>`      |
pub fn derive_cache_key(path: &RegistryPath, partition: CachePartition) -> String {
    let root = partition.as_str();
    match (path, partition) {
        (RegistryPath::Metadata { name }, CachePartition::Public) => format!("{root}/{name}"),
        (RegistryPath::Metadata { name }, CachePartition::Private) => {
            format!("{root}/{name}.json")
        }
        (RegistryPath::Tarball { package, filename }, CachePartition::Public) => {
            format!("{root}/{package}-tarballs/{filename}")
        }
        (RegistryPath::Tarball { package, filename }, CachePartition::Private) => {
            format!("{root}/{package}/-/{filename}")
        }
    }
}

/// Key of the sidecar metadata record for a content key.
pub fn meta_key(key: &str) -> String {
    format!("{key}{META_SUFFIX}")
}
