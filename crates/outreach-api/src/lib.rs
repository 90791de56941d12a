//! Axum HTTP API for the outreach backend.
//!
//! This crate provides:
//! - Credit accounting with a hold/commit protocol around paid operations
//! - Profile scraping, message generation and email lookup providers
//! - Google ID token verification
//! - Rate limiting, security headers and Prometheus metrics

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod providers;
pub mod routes;
pub mod services;
pub mod state;

pub use config::{ApiConfig, CreditConfig, OperationConfig};
pub use error::{ApiError, ApiResult, CreditError};
pub use routes::create_router;
pub use services::{CreditService, HoldSweeper, PaidOperationRunner};
pub use state::{AppState, Providers};
