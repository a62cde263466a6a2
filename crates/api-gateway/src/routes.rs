//! Routing table model and YAML decoding.
//!
//! The routing table lives in a ConfigMap under a single YAML key:
//!
//! ```yaml
//! version: v1
//! services:
//!   - name: card-service
//!     serviceUrl: card-service:8080
//!     paths:
//!       - /api/v1/card
//!       - /api/card/v1
//! ```
//!
//! `target` and `pathPrefixes` are accepted as aliases for `serviceUrl` and
//! `paths`.

use std::str::FromStr;

use axum::http::uri::Authority;
use serde::Deserialize;
use thiserror::Error;

/// Routing table schema version. Unknown tags fail decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SchemaVersion {
    #[serde(rename = "v1")]
    V1,
}

/// A complete routing table. Service order is match priority.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RoutingConfig {
    pub version: SchemaVersion,
    #[serde(default)]
    pub services: Vec<ServiceRoute>,
}

/// One upstream and the path prefixes that select it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceRoute {
    /// Display name, reported in the `x-service` response header.
    #[serde(default)]
    pub name: Option<String>,

    /// `host` or `host:port` of the upstream.
    #[serde(rename = "serviceUrl", alias = "target")]
    pub target: String,

    #[serde(rename = "paths", alias = "pathPrefixes", default)]
    pub path_prefixes: Vec<String>,
}

/// Why a routing table payload was rejected.
#[derive(Debug, Error)]
pub enum RoutesError {
    #[error("cannot decode routing config: {0}")]
    Decode(#[from] serde_yml::Error),

    #[error("service #{index} has an empty upstream target")]
    EmptyTarget { index: usize },

    #[error("service #{index} has invalid upstream target {target:?}: expected host or host:port")]
    InvalidTarget { index: usize, target: String },
}

impl RoutingConfig {
    /// Decode and validate a YAML routing table.
    pub fn from_yaml(payload: &str) -> Result<Self, RoutesError> {
        let config: RoutingConfig = serde_yml::from_str(payload)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), RoutesError> {
        for (index, service) in self.services.iter().enumerate() {
            if service.target.trim().is_empty() {
                return Err(RoutesError::EmptyTarget { index });
            }
            if service.authority().is_none() {
                return Err(RoutesError::InvalidTarget {
                    index,
                    target: service.target.clone(),
                });
            }
            if service.path_prefixes.is_empty() {
                tracing::warn!(
                    service = %service.display_name(),
                    "Service declares no path prefixes and will never match"
                );
            }
        }
        Ok(())
    }

    /// First service (in declaration order) with a prefix of `path`.
    ///
    /// This is first-match, not longest-match: an earlier, broader prefix
    /// shadows later, more specific ones.
    pub fn find(&self, path: &str) -> Option<&ServiceRoute> {
        self.services.iter().find(|service| service.matches(path))
    }
}

impl ServiceRoute {
    /// Byte-wise prefix comparison against the request path.
    pub fn matches(&self, path: &str) -> bool {
        self.path_prefixes
            .iter()
            .any(|prefix| path.as_bytes().starts_with(prefix.as_bytes()))
    }

    /// The upstream as a URI authority, or `None` if `target` carries a
    /// scheme, path or other non-authority content.
    pub fn authority(&self) -> Option<Authority> {
        if self.target.contains('/') {
            return None;
        }
        Authority::from_str(&self.target).ok()
    }

    /// Name for headers and logs; unnamed routes fall back to the target.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(name: &str, target: &str, prefixes: &[&str]) -> ServiceRoute {
        ServiceRoute {
            name: Some(name.to_string()),
            target: target.to_string(),
            path_prefixes: prefixes.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn test_decode_configmap_format() {
        let yaml = r#"
version: v1
services:
  - name: card-service
    serviceUrl: card-service
    paths:
      - /api/v1/card
      - /api/card/v1
"#;
        let config = RoutingConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.version, SchemaVersion::V1);
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].target, "card-service");
        assert_eq!(
            config.services[0].path_prefixes,
            vec!["/api/v1/card", "/api/card/v1"]
        );
    }

    #[test]
    fn test_decode_accepts_aliases_and_missing_name() {
        let yaml = r#"
version: v1
services:
  - target: "127.0.0.1:6000"
    pathPrefixes: ["/api/card"]
"#;
        let config = RoutingConfig::from_yaml(yaml).unwrap();
        let service = &config.services[0];
        assert!(service.name.is_none());
        assert_eq!(service.target, "127.0.0.1:6000");
        assert_eq!(service.display_name(), "127.0.0.1:6000");
    }

    #[test]
    fn test_missing_services_is_empty_table() {
        let config = RoutingConfig::from_yaml("version: v1\n").unwrap();
        assert!(config.services.is_empty());
        assert!(config.find("/anything").is_none());
    }

    #[test]
    fn test_unknown_version_rejected() {
        let err = RoutingConfig::from_yaml("version: v2\nservices: []\n").unwrap_err();
        assert!(matches!(err, RoutesError::Decode(_)));
    }

    #[test]
    fn test_syntax_error_rejected() {
        let err = RoutingConfig::from_yaml("version: v1\nservices: [\n").unwrap_err();
        assert!(matches!(err, RoutesError::Decode(_)));
    }

    #[test]
    fn test_target_with_scheme_rejected() {
        let yaml = r#"
version: v1
services:
  - serviceUrl: "http://card-service:8080"
    paths: ["/api"]
"#;
        let err = RoutingConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, RoutesError::InvalidTarget { index: 0, .. }));
    }

    #[test]
    fn test_empty_target_rejected() {
        let yaml = "version: v1\nservices:\n  - serviceUrl: \"\"\n    paths: [\"/\"]\n";
        let err = RoutingConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, RoutesError::EmptyTarget { index: 0 }));
    }

    #[test]
    fn test_first_match_wins_over_longer_prefix() {
        let config = RoutingConfig {
            version: SchemaVersion::V1,
            services: vec![
                route("api", "api:80", &["/api"]),
                route("card", "card:80", &["/api/v1/card"]),
            ],
        };
        assert_eq!(config.find("/api/v1/card/123").unwrap().display_name(), "api");
    }

    #[test]
    fn test_specific_route_listed_first_wins() {
        let config = RoutingConfig {
            version: SchemaVersion::V1,
            services: vec![
                route("card", "card:80", &["/api/v1/card"]),
                route("api", "api:80", &["/api"]),
            ],
        };
        assert_eq!(config.find("/api/v1/card/123").unwrap().display_name(), "card");
        assert_eq!(config.find("/api/v2/user").unwrap().display_name(), "api");
        assert!(config.find("/unrelated").is_none());
    }

    #[test]
    fn test_prefix_match_is_case_sensitive_and_bytewise() {
        let service = route("card", "card:80", &["/api/card"]);
        assert!(service.matches("/api/card"));
        assert!(service.matches("/api/cards"));
        assert!(!service.matches("/API/card"));
        assert!(!service.matches("/api"));
    }
}
