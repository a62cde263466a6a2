//! ConfigMap-backed [`ConfigSource`].

use std::path::Path;

use async_trait::async_trait;
use futures_util::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, WatchEvent, WatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;

use super::{ConfigSource, EventStream, SourceError, SourceEvent};
use crate::config::WatchConfig;

/// Service-account namespace file mounted into every pod.
pub const NAMESPACE_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/namespace";

/// Namespace used outside a cluster when none is configured.
pub const DEFAULT_NAMESPACE: &str = "gateway";

/// Watches a single ConfigMap and yields the routing payload under `data_key`.
pub struct KubeConfigSource {
    api: Api<ConfigMap>,
    namespace: String,
    name: String,
    data_key: String,
}

impl KubeConfigSource {
    pub fn new(client: Client, namespace: &str, name: &str, data_key: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            name: name.to_string(),
            data_key: data_key.to_string(),
        }
    }

    /// Build the Kubernetes client and resolve the namespace from config.
    pub async fn connect(config: &WatchConfig) -> Result<Self, SourceError> {
        let namespace = config
            .namespace
            .clone()
            .unwrap_or_else(|| read_namespace(Path::new(NAMESPACE_FILE)));
        let client = build_client(config.kubeconfig.as_deref()).await?;
        Ok(Self::new(client, &namespace, &config.config_map, &config.data_key))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }
}

#[async_trait]
impl ConfigSource for KubeConfigSource {
    fn describe(&self) -> String {
        format!("configmap/{}/{}", self.namespace, self.name)
    }

    async fn subscribe(&self) -> Result<EventStream, SourceError> {
        let params = WatchParams::default().fields(&format!("metadata.name={}", self.name));
        // Version "0" replays the current object as an Added event first.
        let stream = self.api.watch(&params, "0").await?;
        let data_key = self.data_key.clone();

        Ok(stream
            .filter_map(move |item| {
                let event = translate(item, &data_key);
                async move { event }
            })
            .boxed())
    }
}

fn translate(
    item: kube::Result<WatchEvent<ConfigMap>>,
    data_key: &str,
) -> Option<Result<SourceEvent, SourceError>> {
    match item {
        Ok(WatchEvent::Added(cm)) => Some(Ok(SourceEvent::Added(payload(cm, data_key)))),
        Ok(WatchEvent::Modified(cm)) => Some(Ok(SourceEvent::Modified(payload(cm, data_key)))),
        Ok(WatchEvent::Deleted(_)) => Some(Ok(SourceEvent::Deleted)),
        Ok(WatchEvent::Bookmark(_)) => None,
        Ok(WatchEvent::Error(status)) => Some(Err(SourceError::Stream(format!("{status:?}")))),
        Err(e) => Some(Err(e.into())),
    }
}

fn payload(cm: ConfigMap, data_key: &str) -> Option<String> {
    cm.data.and_then(|mut data| data.remove(data_key))
}

/// Namespace from the service-account file, or [`DEFAULT_NAMESPACE`].
pub fn read_namespace(path: &Path) -> String {
    std::fs::read_to_string(path)
        .ok()
        .map(|ns| ns.trim().to_string())
        .filter(|ns| !ns.is_empty())
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}

async fn build_client(kubeconfig: Option<&Path>) -> Result<Client, SourceError> {
    match kubeconfig {
        Some(path) => {
            tracing::info!(path = %path.display(), "Using out of cluster kubeconfig");
            let kubeconfig = Kubeconfig::read_from(path)?;
            let config =
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await?;
            Ok(Client::try_from(config)?)
        }
        None => {
            tracing::info!("Using inferred cluster config");
            Ok(Client::try_default().await?)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn configmap(data: &[(&str, &str)]) -> ConfigMap {
        let data: BTreeMap<String, String> = data
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConfigMap {
            data: Some(data),
            ..ConfigMap::default()
        }
    }

    #[test]
    fn test_translate_extracts_data_key() {
        let cm = configmap(&[("services.yaml", "version: v1\n"), ("other", "x")]);
        let event = translate(Ok(WatchEvent::Modified(cm)), "services.yaml");
        assert_eq!(
            event.unwrap().unwrap(),
            SourceEvent::Modified(Some("version: v1\n".to_string()))
        );
    }

    #[test]
    fn test_translate_missing_key_yields_empty_payload() {
        let cm = configmap(&[("other", "x")]);
        let event = translate(Ok(WatchEvent::Added(cm)), "services.yaml");
        assert_eq!(event.unwrap().unwrap(), SourceEvent::Added(None));

        let event = translate(Ok(WatchEvent::Added(ConfigMap::default())), "services.yaml");
        assert_eq!(event.unwrap().unwrap(), SourceEvent::Added(None));
    }

    #[test]
    fn test_translate_deleted() {
        let event = translate(Ok(WatchEvent::Deleted(configmap(&[]))), "services.yaml");
        assert_eq!(event.unwrap().unwrap(), SourceEvent::Deleted);
    }

    #[test]
    fn test_read_namespace_trims_file_contents() {
        let path = std::env::temp_dir().join(format!("gateway-ns-{}", uuid::Uuid::new_v4()));
        std::fs::write(&path, "payments\n").unwrap();
        assert_eq!(read_namespace(&path), "payments");
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_namespace_falls_back_to_default() {
        let path = std::env::temp_dir().join(format!("gateway-ns-missing-{}", uuid::Uuid::new_v4()));
        assert_eq!(read_namespace(&path), DEFAULT_NAMESPACE);

        std::fs::write(&path, "  \n").unwrap();
        assert_eq!(read_namespace(&path), DEFAULT_NAMESPACE);
        std::fs::remove_file(&path).unwrap();
    }
}
