//! Registry path parsing and request route classification.

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Separator between a package name and its tarball filename.
pub const TARBALL_SEPARATOR: &str = "/-/";

/// Prefix of the npm login endpoint (after the mount path).
pub const LOGIN_PREFIX: &str = "-/user/org.couchdb.user:";

/// Identity endpoints answered locally.
pub const WHOAMI_PATHS: [&str; 2] = ["-/whoami", "-/npm/v1/user"];

/// A resource in the registry namespace.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistryPath {
    /// Package metadata document (`name` or `@scope/name`).
    Metadata { name: String },
    /// Package tarball (`name/-/name-1.0.0.tgz`).
    Tarball { package: String, filename: String },
}

impl RegistryPath {
    /// Parse a decoded, registry-relative path.
    pub fn parse(path: &str) -> crate::Result<Self> {
        let path = path.trim_start_matches('/');
        validate_segments(path)?;

        if let Some((package, filename)) = path.split_once(TARBALL_SEPARATOR) {
            if !is_package_name(package) {
                return Err(crate::Error::InvalidRegistryPath(format!(
                    "invalid package name in tarball path: {package}"
                )));
            }
            if filename.is_empty() || filename.contains('/') {
                return Err(crate::Error::InvalidRegistryPath(format!(
                    "invalid tarball filename: {filename}"
                )));
            }
            return Ok(Self::Tarball {
                package: package.to_string(),
                filename: filename.to_string(),
            });
        }

        if !is_package_name(path) {
            return Err(crate::Error::InvalidRegistryPath(format!(
                "not a package path: {path}"
            )));
        }
        Ok(Self::Metadata {
            name: path.to_string(),
        })
    }

    /// Package name this path belongs to.
    pub fn package_name(&self) -> &str {
        match self {
            Self::Metadata { name } => name,
            Self::Tarball { package, .. } => package,
        }
    }

    /// Whether this path points at a tarball.
    pub fn is_tarball(&self) -> bool {
        matches!(self, Self::Tarball { .. })
    }
}

impl fmt::Display for RegistryPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Metadata { name } => write!(f, "{name}"),
            Self::Tarball { package, filename } => {
                write!(f, "{package}{TARBALL_SEPARATOR}{filename}")
            }
        }
    }
}

/// Check that a decoded path is `name` or `@scope/name`.
pub fn is_package_name(name: &str) -> bool {
    let valid_part = |part: &str| {
        !part.is_empty()
            && !part.starts_with('.')
            && part.chars().all(|c| {
                c.is_ascii_alphanumeric()
                    || matches!(c, '-' | '_' | '.' | '~' | '!' | '*' | '\'' | '(' | ')')
            })
    };

    match name.strip_prefix('@') {
        Some(scoped) => match scoped.split_once('/') {
            Some((scope, rest)) => valid_part(scope) && valid_part(rest),
            None => false,
        },
        None => valid_part(name),
    }
}

/// The unscoped part of a package name (`@scope/name` becomes `name`).
pub fn unscoped_name(name: &str) -> &str {
    if name.starts_with('@') {
        name.rsplit_once('/').map(|(_, rest)| rest).unwrap_or(name)
    } else {
        name
    }
}

/// Strip the mount prefix and leading slashes from a raw request path.
///
/// Returns `None` when the path is not under the mount.
pub fn strip_mount<'a>(request_path: &'a str, mount_path: &str) -> Option<&'a str> {
    let mount = mount_path.trim_end_matches('/');
    let rest = request_path.strip_prefix(mount)?;
    if !rest.is_empty() && !rest.starts_with('/') {
        return None;
    }
    Some(rest.trim_start_matches('/'))
}

/// Percent-decode a raw registry path (`@scope%2fname` becomes `@scope/name`).
pub fn decode_path(raw: &str) -> crate::Result<String> {
    percent_decode_str(raw)
        .decode_utf8()
        .map(|s| s.into_owned())
        .map_err(|e| crate::Error::InvalidRegistryPath(format!("path is not valid UTF-8: {e}")))
}

fn validate_segments(path: &str) -> crate::Result<()> {
    if path.contains('\\') || path.contains('\0') {
        return Err(crate::Error::InvalidRegistryPath(format!(
            "illegal character in path: {path}"
        )));
    }
    for segment in path.split('/') {
        if segment.is_empty() || segment == "." || segment == ".." {
            return Err(crate::Error::InvalidRegistryPath(format!(
                "illegal path segment in: {path}"
            )));
        }
    }
    Ok(())
}

/// What the router should do with a request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RegistryRoute {
    /// Nothing left after stripping the mount.
    Empty,
    /// CORS preflight.
    Preflight,
    /// `-/whoami` or `-/npm/v1/user`.
    Whoami,
    /// `PUT -/user/org.couchdb.user:<name>`.
    Login { username: String },
    /// `PUT <package>`. The name is not validated here.
    Publish { package: String },
    /// Cache-or-fetch read of metadata or a tarball.
    Read(RegistryPath),
    /// Relayed to the upstream registry without caching. Holds the raw
    /// (still percent-encoded) registry-relative path.
    Passthrough { raw_path: String },
}

impl RegistryRoute {
    /// Classify a request by method and its mount-stripped raw path.
    pub fn classify(method: &str, raw_path: &str) -> crate::Result<Self> {
        let raw_path = raw_path.trim_matches('/');
        if method.eq_ignore_ascii_case("OPTIONS") {
            return Ok(Self::Preflight);
        }
        if raw_path.is_empty() {
            return Ok(Self::Empty);
        }

        let passthrough = || Self::Passthrough {
            raw_path: raw_path.to_string(),
        };
        let path = decode_path(raw_path)?;
        validate_segments(&path)?;

        let is_read = method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD");
        let is_put = method.eq_ignore_ascii_case("PUT");

        if path.starts_with("-/") {
            if is_read && WHOAMI_PATHS.contains(&path.as_str()) {
                return Ok(Self::Whoami);
            }
            if is_put && let Some(username) = path.strip_prefix(LOGIN_PREFIX) {
                return Ok(Self::Login {
                    username: username.to_string(),
                });
            }
            return Ok(passthrough());
        }

        if is_put {
            return Ok(Self::Publish { package: path });
        }

        if is_read {
            return Ok(RegistryPath::parse(&path)
                .map(Self::Read)
                .unwrap_or_else(|_| passthrough()));
        }

        Ok(passthrough())
    }
}
