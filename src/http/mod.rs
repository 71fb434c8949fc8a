//! HTTP server module
//!
//! This module handles HTTP request routing and handling:
//! - Axum router with the aggregation and proxy endpoints
//! - Handlers for source lookup, stats and health
//! - Manifest, segment and subtitle proxy handlers
//! - Request logging middleware feeding the metrics collector

pub mod handlers;
pub mod middleware;
pub mod proxy;
pub mod routes;

pub use routes::create_router;
