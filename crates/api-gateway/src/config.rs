//! Configuration types and loading logic.

use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use gateway_tracing::TracingConfig;
use serde::Deserialize;

/// Top-level gateway configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub auth: AuthConfig,
    pub watch: WatchConfig,
    pub tracing: TracingConfig,
}

/// Server listen configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_address: String,

    /// Seconds to wait for in-flight requests after a shutdown signal.
    pub shutdown_timeout_secs: u64,

    /// Response header carrying the resolved service name.
    pub service_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: "127.0.0.1:8080".to_string(),
            shutdown_timeout_secs: 5,
            service_header: "x-service".to_string(),
        }
    }
}

/// Shared client used for every backend call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub connect_timeout_secs: u64,
    pub timeout_secs: u64,
    pub pool_idle_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 5,
            timeout_secs: 300,
            pool_idle_timeout_secs: 90,
        }
    }
}

/// Forward-auth configuration. Authorization is disabled without `address`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub address: Option<String>,
    pub timeout_secs: u64,

    /// Auth response headers copied onto the upstream request on allow.
    pub allowed_upstream_headers: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            address: None,
            timeout_secs: 5,
            allowed_upstream_headers: vec![
                "authorization".to_string(),
                "x-auth-request-user".to_string(),
                "x-auth-request-email".to_string(),
            ],
        }
    }
}

/// Which ConfigMap holds the routing table, and how to reach the cluster.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub config_map: String,
    pub data_key: String,

    /// Falls back to the pod's service-account namespace.
    pub namespace: Option<String>,

    /// Out-of-cluster kubeconfig; inferred config when unset.
    pub kubeconfig: Option<PathBuf>,

    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,

    /// A watch session must last this long before its close resets the backoff.
    pub stable_session_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            config_map: "gateway-config".to_string(),
            data_key: "services.yaml".to_string(),
            namespace: None,
            kubeconfig: None,
            backoff_base_ms: 500,
            backoff_max_ms: 30_000,
            stable_session_secs: 10,
        }
    }
}

impl GatewayConfig {
    /// Load configuration from TOML file and environment variables.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables (GATEWAY_ prefix, __ for nesting)
    /// 2. TOML config file
    /// 3. Defaults
    pub fn load(config_path: &str) -> anyhow::Result<Self> {
        let config: GatewayConfig = Self::figment(config_path).extract()?;
        Ok(config)
    }

    fn figment(config_path: &str) -> Figment {
        Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("GATEWAY_").split("__"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = GatewayConfig::load("missing.toml").unwrap();
            assert_eq!(config.server.listen_address, "127.0.0.1:8080");
            assert_eq!(config.server.service_header, "x-service");
            assert_eq!(config.upstream.timeout_secs, 300);
            assert!(config.auth.address.is_none());
            assert_eq!(config.watch.config_map, "gateway-config");
            assert_eq!(config.watch.data_key, "services.yaml");
            assert_eq!(config.watch.stable_session_secs, 10);
            assert_eq!(config.tracing.service_name, "api-gateway");
            Ok(())
        });
    }

    #[test]
    fn test_toml_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "gateway.toml",
                r#"
[server]
listen_address = "0.0.0.0:9000"

[auth]
address = "auth:4181"
allowed_upstream_headers = ["x-user"]

[watch]
namespace = "edge"
backoff_max_ms = 1000
"#,
            )?;
            jail.set_env("GATEWAY_SERVER__LISTEN_ADDRESS", "0.0.0.0:9100");
            jail.set_env("GATEWAY_WATCH__CONFIG_MAP", "routes");

            let config = GatewayConfig::load("gateway.toml").unwrap();
            assert_eq!(config.server.listen_address, "0.0.0.0:9100");
            assert_eq!(config.server.shutdown_timeout_secs, 5);
            assert_eq!(config.auth.address.as_deref(), Some("auth:4181"));
            assert_eq!(config.auth.allowed_upstream_headers, vec!["x-user"]);
            assert_eq!(config.watch.namespace.as_deref(), Some("edge"));
            assert_eq!(config.watch.config_map, "routes");
            assert_eq!(config.watch.backoff_base_ms, 500);
            assert_eq!(config.watch.backoff_max_ms, 1000);
            Ok(())
        });
    }
}
