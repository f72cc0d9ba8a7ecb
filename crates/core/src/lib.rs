//! Core domain types and shared logic for the tarn npm caching proxy.
//!
//! This crate defines the data model used across all other crates:
//! - Application configuration
//! - Registry path parsing and request route classification
//! - Cache key derivation and partitions
//! - Bearer token claims
//! - Package documents and the publish transformation

pub mod cache_key;
pub mod config;
pub mod error;
pub mod package;
pub mod registry_path;
pub mod token;

pub use cache_key::{CachePartition, derive_cache_key, meta_key};
pub use error::{Error, Result};
pub use package::{PackageDocument, PublishContext, PublishPlan, prepare_publish};
pub use registry_path::{RegistryPath, RegistryRoute};
pub use token::{TokenClaims, TokenKind};
