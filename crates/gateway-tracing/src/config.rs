//! Tracing configuration types.

use serde::Deserialize;

/// Configuration for logging and the OpenTelemetry tracing subsystem.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TracingConfig {
    /// The service name reported to the OTLP collector.
    pub service_name: String,

    /// OTLP collector endpoint (e.g. "http://otel-collector:4317").
    /// When `None`, OTLP export is disabled and only log output is produced.
    pub otlp_endpoint: Option<String>,

    /// Transport protocol for OTLP export.
    pub protocol: OtlpProtocol,

    /// Log level filter (e.g. "info", "api_gateway=debug,info").
    pub log_level: String,

    /// Human-readable console logs instead of JSON lines.
    pub pretty: bool,

    /// Deployment environment recorded on the tracing resource.
    pub environment: String,
}

/// OTLP transport protocol.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            service_name: "api-gateway".to_string(),
            otlp_endpoint: None,
            protocol: OtlpProtocol::default(),
            log_level: "info".to_string(),
            pretty: false,
            environment: "prod".to_string(),
        }
    }
}
