//! Logging, OTLP tracing and W3C/B3 context propagation for the api-gateway.

pub mod config;
pub mod otlp;
pub mod propagation;
pub mod spans;

pub use config::{OtlpProtocol, TracingConfig};
pub use otlp::{init_tracing, TracingGuard};
pub use propagation::{extract_context, inject_context, propagator, strip_context_headers};
