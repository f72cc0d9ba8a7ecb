//! Credential verification for `npm login`.

use async_trait::async_trait;
use std::path::PathBuf;

/// Credential lookup failures (distinct from a wrong password).
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("failed to read credential file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("credential check failed: {0}")]
    Internal(String),
}

/// Verifies a username and password pair.
#[async_trait]
pub trait CredentialStore: Send + Sync + 'static {
    /// Returns `Ok(false)` for unknown users and wrong passwords alike.
    async fn verify(&self, username: &str, password: &str) -> Result<bool, CredentialError>;
}

/// htpasswd file with bcrypt hashes (`user:$2y$...` per line).
///
/// The file is re-read on every check so edits take effect without a
/// restart. Entries using other hash formats never match.
pub struct HtpasswdStore {
    path: PathBuf,
}

impl HtpasswdStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CredentialStore for HtpasswdStore {
    #[tracing::instrument(skip(self, password), fields(backend = "htpasswd"))]
    async fn verify(&self, username: &str, password: &str) -> Result<bool, CredentialError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %self.path.display(), "htpasswd file not found, rejecting login");
                return Ok(false);
            }
            Err(source) => {
                return Err(CredentialError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let Some(hash) = find_hash(&contents, username) else {
            return Ok(false);
        };
        if !hash.starts_with("$2") {
            tracing::warn!(username, "unsupported htpasswd hash format");
            return Ok(false);
        }

        // bcrypt verification is CPU-bound.
        let hash = hash.to_string();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash).unwrap_or(false))
            .await
            .map_err(|e| CredentialError::Internal(format!("verification task failed: {e}")))
    }
}

fn find_hash<'a>(contents: &'a str, username: &str) -> Option<&'a str> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once(':'))
        .find(|(user, _)| *user == username)
        .map(|(_, hash)| hash.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::tempdir;

    fn write_htpasswd(dir: &Path, entries: &[(&str, &str)]) -> PathBuf {
        let path = dir.join("htpasswd");
        let contents: String = entries
            .iter()
            .map(|(user, pw)| format!("{user}:{}\n", bcrypt::hash(pw, 4).unwrap()))
            .collect();
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[tokio::test]
    async fn test_verify_bcrypt_entries() {
        let temp = tempdir().unwrap();
        let path = write_htpasswd(temp.path(), &[("alice", "s3cret"), ("bob", "hunter2")]);
        let store = HtpasswdStore::new(path);

        assert!(store.verify("alice", "s3cret").await.unwrap());
        assert!(store.verify("bob", "hunter2").await.unwrap());
        assert!(!store.verify("alice", "hunter2").await.unwrap());
        assert!(!store.verify("carol", "s3cret").await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file_rejects() {
        let temp = tempdir().unwrap();
        let store = HtpasswdStore::new(temp.path().join("absent"));
        assert!(!store.verify("alice", "s3cret").await.unwrap());
    }

    #[tokio::test]
    async fn test_non_bcrypt_hash_rejected() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("htpasswd");
        std::fs::write(&path, "# comment\nalice:{SHA}W6ph5Mm5Pz8GgiULbPgzG37mj9g=\n").unwrap();
        let store = HtpasswdStore::new(path);
        assert!(!store.verify("alice", "password").await.unwrap());
    }

    #[test]
    fn test_find_hash_skips_comments_and_blanks() {
        let contents = "\n# alice:nope\nalice:$2y$04$abc\n";
        assert_eq!(find_hash(contents, "alice"), Some("$2y$04$abc"));
        assert_eq!(find_hash(contents, "bob"), None);
    }
}
