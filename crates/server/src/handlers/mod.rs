//! HTTP request handlers.

pub mod health;
pub mod publish;
pub mod registry;
pub mod user;

pub use health::*;
pub use registry::dispatch;
