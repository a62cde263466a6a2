//! Request path: header sanitization, forwarding, relay and error rendering.

pub mod correlation;
pub mod engine;
pub mod error;
pub mod headers;

pub use engine::{upstream_client, ProxyEngine};
