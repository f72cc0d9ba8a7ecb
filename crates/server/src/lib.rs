//! HTTP server for the tarn npm caching proxy.
//!
//! This crate provides:
//! - Read-through caching of registry metadata and tarballs
//! - Private package publishing
//! - `npm login` / `npm whoami` with signed bearer tokens
//! - Passthrough of every other registry endpoint to the upstream

pub mod auth;
pub mod compression;
pub mod credentials;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod routes;
pub mod singleflight;
pub mod state;
pub mod upstream;

pub use auth::{TokenService, TraceId};
pub use credentials::{CredentialStore, HtpasswdStore};
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
pub use upstream::UpstreamClient;
