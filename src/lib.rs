//! Maintgate - a per-host maintenance gate for HTTP traffic
//!
//! This library provides an HTTP gate that:
//! - Polls a remote source for maintenance policies and publishes them atomically
//! - Matches each request's Host header against the policies, first match wins
//! - Lets allow-listed client IPs (peer or X-Forwarded-For) through
//! - Answers everyone else with a 503 in JSON, plain text or an HTML template
//! - Negotiates that representation from Accept, or from the upstream's Content-Type

pub mod config;
pub mod error;
pub mod gate;
pub mod identity;
pub mod intercept;
pub mod matcher;
pub mod policy;
pub mod pool;
pub mod proxy;
pub mod refresh;
pub mod store;
pub mod synth;
pub mod template;

/// Version information for the gate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
