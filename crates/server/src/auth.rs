//! Bearer token issuing and the authentication middleware.

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::middleware::Next;
use axum::response::Response;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use tarn_core::config::AuthConfig;
use tarn_core::{TokenClaims, TokenKind};
use time::OffsetDateTime;
use tracing::Instrument;
use uuid::Uuid;

/// Maximum length for trace IDs.
/// Longer trace IDs are truncated to prevent log bloat and potential log injection.
const MAX_TRACE_ID_LEN: usize = 128;

/// Request and response header carrying the trace ID.
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Trace ID for request correlation.
#[derive(Clone, Debug)]
pub struct TraceId(pub String);

impl TraceId {
    /// Generate a new random trace ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create a trace ID from a client-provided value.
    /// Truncated to MAX_TRACE_ID_LEN characters, non-printable characters removed.
    pub fn from_client(value: &str) -> Self {
        let sanitized: String = value
            .chars()
            .take(MAX_TRACE_ID_LEN)
            .filter(|c| c.is_ascii_graphic() || *c == ' ')
            .collect();

        if sanitized.is_empty() {
            Self::new()
        } else {
            Self(sanitized)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TraceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TraceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signs and verifies HS256 bearer tokens.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    npm_ttl_secs: u64,
    web_ttl_secs: u64,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = config.jwt_secret.as_bytes();
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            npm_ttl_secs: config.npm_token_ttl_secs,
            web_ttl_secs: config.web_token_ttl_secs,
        }
    }

    /// Issue a token of `kind` for `username`, valid from now.
    pub fn issue(&self, username: &str, kind: TokenKind) -> tarn_core::Result<String> {
        let ttl = match kind {
            TokenKind::Npm => self.npm_ttl_secs,
            TokenKind::Web => self.web_ttl_secs,
        };
        let claims = TokenClaims::new(username, kind, OffsetDateTime::now_utc(), ttl);
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| tarn_core::Error::Serialization(format!("failed to sign token: {e}")))
    }

    /// Verify signature and expiry, returning the claims.
    pub fn verify(&self, token: &str) -> tarn_core::Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let data = jsonwebtoken::decode::<TokenClaims>(token, &self.decoding, &validation)
            .map_err(|e| tarn_core::Error::InvalidToken(e.to_string()))?;

        if data.claims.is_expired_at(OffsetDateTime::now_utc()) {
            return Err(tarn_core::Error::InvalidToken("token expired".to_string()));
        }
        Ok(data.claims)
    }
}

/// Authenticated request extension.
#[derive(Clone, Debug)]
pub struct AuthenticatedUser {
    pub username: String,
}

/// Extract bearer token from Authorization header.
/// Per RFC 6750, the "Bearer" scheme is case-insensitive.
fn extract_bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            if v.len() >= 7 && v[..7].eq_ignore_ascii_case("bearer ") {
                Some(v[7..].trim())
            } else {
                None
            }
        })
        .filter(|token| !token.is_empty())
}

/// Extract trace ID from X-Trace-Id header or generate a new one.
fn extract_or_generate_trace_id(req: &Request) -> TraceId {
    req.headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(TraceId::from_client)
        .unwrap_or_else(TraceId::new)
}

/// Sets up trace context and attaches the authenticated user, if any.
///
/// Never rejects: a missing, invalid or wrong-kind token just leaves the
/// request anonymous and handlers decide whether that is acceptable. The
/// trace ID is echoed back in `x-trace-id`.
pub async fn auth_middleware(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let trace_id = extract_or_generate_trace_id(&req);
    let span = tracing::info_span!("request", trace_id = %trace_id);
    req.extensions_mut().insert(trace_id.clone());

    let verified = extract_bearer_token(&req).map(|token| state.tokens.verify(token));
    if let Some(result) = verified {
        match result {
            Ok(claims) if claims.permits_npm(state.config.auth.accept_web_tokens) => {
                req.extensions_mut().insert(AuthenticatedUser {
                    username: claims.username,
                });
            }
            Ok(claims) => {
                tracing::debug!(
                    username = %claims.username,
                    kind = %claims.kind,
                    "token kind not accepted for npm endpoints"
                );
            }
            Err(e) => {
                tracing::debug!(error = %e, "ignoring invalid bearer token");
            }
        }
    }

    let mut response = next.run(req).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

/// Require authentication, with an npm-style challenge on failure.
pub fn require_auth<'a>(parts: &'a Parts, hint: &str) -> ApiResult<&'a AuthenticatedUser> {
    get_auth(parts).ok_or_else(|| ApiError::AuthRequired(hint.to_string()))
}

/// Get optional authentication.
pub fn get_auth(parts: &Parts) -> Option<&AuthenticatedUser> {
    parts.extensions.get::<AuthenticatedUser>()
}

/// Get the trace ID attached by [`auth_middleware`].
pub fn get_trace_id(parts: &Parts) -> Option<&TraceId> {
    parts.extensions.get::<TraceId>()
}
