//! Canon Daemon - REST surface for the canon decision engine.
//!
//! The daemon provides:
//! - `/api/canon` decision endpoints (decide, promote, check-non-interference)
//! - ledger, verification and why-not reads scoped to the caller's tenant
//! - tenant authentication (header or HS256 bearer token) and per-tenant rate limits
//! - an optional background pass reconciling the fast store with the durable archive

#![deny(unsafe_code)]

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod server;

pub use config::DaemonConfig;
pub use error::{ApiError, ApiResult, DaemonError, DaemonResult};
pub use server::Server;
