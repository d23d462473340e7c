//! Canvas Credits HTTP API Service.
//!
//! This crate provides the HTTP API for the canvas credits ledger, including:
//!
//! - Credit balances, purchase history and ledger history
//! - Credit consumption and purchases (service-to-service)
//! - Subscription upserts and periodic grants
//! - Manual adjustments (admin)
//! - Payment provider webhooks
//!
//! # Authentication
//!
//! The service supports three authentication methods:
//!
//! 1. **JWT tokens** - For end-user requests (dashboard, etc.)
//! 2. **Service API keys** - For service-to-service requests (generation workers, billing)
//! 3. **Admin API keys** - For manual adjustments

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result

pub mod auth;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use config::ServiceConfig;
pub use engine::CreditsEngine;
pub use error::ApiError;
pub use routes::create_router;
pub use state::AppState;
