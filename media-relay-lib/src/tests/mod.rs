//! Crate-level tests
//!
//! Exercise the orchestrator and the proxies end to end against a real
//! in-process upstream HTTP server.
