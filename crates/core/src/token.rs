//! Bearer token claims and kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// What a token was issued for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    /// Short-lived browser session token.
    Web,
    /// Long-lived token handed to the npm CLI on login.
    Npm,
}

impl TokenKind {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Npm => "npm",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Claims carried inside a signed bearer token.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Authenticated username.
    pub username: String,
    /// Issued-at (Unix seconds).
    pub iat: i64,
    /// Expiry (Unix seconds).
    pub exp: i64,
    /// Token kind.
    #[serde(rename = "type")]
    pub kind: TokenKind,
}

impl TokenClaims {
    /// Build claims for `username` valid for `ttl_secs` from `now`.
    pub fn new(username: impl Into<String>, kind: TokenKind, now: OffsetDateTime, ttl_secs: u64) -> Self {
        let iat = now.unix_timestamp();
        let ttl = i64::try_from(ttl_secs).unwrap_or(i64::MAX);
        Self {
            username: username.into(),
            iat,
            exp: iat.saturating_add(ttl),
            kind,
        }
    }

    /// Check if the token has expired at `now`.
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now.unix_timestamp() >= self.exp
    }

    /// Check if the token may authenticate npm client endpoints.
    ///
    /// Web session tokens only pass when `accept_web_tokens` is set.
    pub fn permits_npm(&self, accept_web_tokens: bool) -> bool {
        match self.kind {
            TokenKind::Npm => true,
            TokenKind::Web => accept_web_tokens,
        }
    }
}
