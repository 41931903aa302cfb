//! HTTP surface over the card service.
//!
//! Routes:
//! - `GET /health`
//! - `/api/v1/cards`: card CRUD and batch updates, scoped to the `x-user-id` caller
//! - `/api/v1/admin`: key status and rotation
//! - `GET /metrics` (with the `prometheus` feature)
//!
//! Every response carries the hardening headers; `/api/*` is throttled per
//! client IP.

pub mod admin_routes;
pub mod auth;
pub mod card_routes;
pub mod error;
#[cfg(feature = "metrics")]
pub mod metrics_middleware;
#[cfg(feature = "prometheus")]
pub mod metrics_routes;
pub mod request_throttle;
pub mod security_headers;
pub mod server;

pub use {
    error::{ApiError, ApiResult},
    server::{AppState, build_router, serve},
};
