//! `npm login` and `npm whoami`.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult};
use crate::handlers::registry::registry_base;
use crate::metrics::LOGINS;
use crate::state::AppState;
use axum::Json;
use axum::body::Bytes;
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tarn_core::TokenKind;
use tarn_core::package::synthetic_revision;
use time::OffsetDateTime;

/// CouchDB-style user document sent by `npm login`.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Successful login.
#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub id: String,
    pub rev: String,
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub username: String,
}

/// GET {mount}/-/whoami, GET {mount}/-/npm/v1/user
pub fn whoami(state: &AppState, parts: &Parts) -> ApiResult<Response> {
    let hint = format!(
        "not logged in; run `npm login --registry={}`",
        registry_base(state, &parts.headers)
    );
    let user = require_auth(parts, &hint)?;
    Ok(Json(WhoamiResponse {
        username: user.username.clone(),
    })
    .into_response())
}

/// PUT {mount}/-/user/org.couchdb.user:{name}
///
/// The name in the body wins over the one in the URL.
pub async fn login(state: &AppState, url_username: &str, body: Bytes) -> ApiResult<Response> {
    let request: LoginRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid login document: {e}")))?;

    let username = request
        .name
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| url_username.to_string());
    let password = request.password.unwrap_or_default();

    let valid = !username.is_empty()
        && !password.is_empty()
        && state
            .credentials
            .verify(&username, &password)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
    if !valid {
        LOGINS.with_label_values(&["rejected"]).inc();
        tracing::info!(%username, "login rejected");
        return Err(ApiError::Unauthorized(
            "Invalid username or password".to_string(),
        ));
    }

    let token = state.tokens.issue(&username, TokenKind::Npm)?;
    LOGINS.with_label_values(&["ok"]).inc();
    tracing::info!(%username, "login succeeded");

    Ok((
        StatusCode::CREATED,
        Json(LoginResponse {
            ok: true,
            id: format!("org.couchdb.user:{username}"),
            rev: synthetic_revision(OffsetDateTime::now_utc()),
            token,
        }),
    )
        .into_response())
}
