//! HTTP API layer for tally.
//!
//! This crate provides the REST API:
//!
//! - **Endpoints**: account and poll APIs (POST-RPC style, JSON bodies)
//! - **Extractors**: authentication
//! - **Middleware**: bearer-token resolution
//!
//! Built on Axum 0.8 with Tower middleware stack.

pub mod endpoints;
pub mod extractors;
pub mod middleware;
pub mod response;

pub use endpoints::router;
