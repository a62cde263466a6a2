//! api-gateway: reverse proxy routing requests to backend services by path
//! prefix, from a routing table watched live in a Kubernetes ConfigMap.

mod auth;
mod config;
mod proxy;
mod router;
mod routes;
mod server;
mod store;
mod watcher;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::HeaderName;
use tokio_util::sync::CancellationToken;

use auth::{AllowAll, AuthGate, HttpAuthGate};
use config::GatewayConfig;
use proxy::ProxyEngine;
use router::Router;
use store::ConfigStore;
use watcher::backoff::Backoff;
use watcher::{ConfigWatcher, KubeConfigSource};

fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args: Vec<String> = std::env::args().collect();
    let flag_value = |flag: &str| {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1).cloned())
    };

    let config_path = flag_value("--config")
        .or_else(|| args.get(1).filter(|a| !a.starts_with('-')).cloned())
        .or_else(|| std::env::var("GATEWAY_CONFIG").ok())
        .unwrap_or_else(|| "gateway.toml".to_string());

    // Load configuration
    let mut config = GatewayConfig::load(&config_path)?;

    // Apply CLI overrides (take precedence over TOML and env vars)
    if let Some(addr) = flag_value("--addr") {
        config.server.listen_address = addr;
    }
    if let Some(address) = flag_value("--auth-server") {
        config.auth.address = Some(address);
    }
    if let Some(path) = flag_value("--kubeconfig") {
        config.watch.kubeconfig = Some(PathBuf::from(path));
    }
    if let Some(namespace) = flag_value("--namespace") {
        config.watch.namespace = Some(namespace);
    }
    if let Some(level) = flag_value("--log-level") {
        config.tracing.log_level = level;
    }
    if args.iter().any(|a| a == "--pretty") {
        config.tracing.pretty = true;
    }

    // kube and reqwest both link rustls; pick the provider explicitly.
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Build the tokio runtime first, the tonic gRPC exporter needs a reactor context
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let tracing_guard = gateway_tracing::init_tracing(&config.tracing);

        tracing::info!(
            config_path = %config_path,
            listen_address = %config.server.listen_address,
            config_map = %config.watch.config_map,
            auth_enabled = config.auth.address.is_some(),
            "Starting api-gateway"
        );

        let result = run(config).await;
        if let Err(ref e) = result {
            tracing::error!(error = %e, "api-gateway exited with error");
        }
        drop(tracing_guard);
        result
    })
}

async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let store = Arc::new(ConfigStore::new());

    // Config watcher
    let source = KubeConfigSource::connect(&config.watch)
        .await
        .context("failed to build kubernetes client")?;
    tracing::info!(
        namespace = %source.namespace(),
        config_map = %config.watch.config_map,
        data_key = %config.watch.data_key,
        "Watching routing config"
    );
    let watcher_cancel = CancellationToken::new();
    let watcher = ConfigWatcher::new(
        source,
        store.clone(),
        Backoff::new(config.watch.backoff_base_ms, config.watch.backoff_max_ms),
        watcher_cancel.clone(),
    )
    .with_stable_session(Duration::from_secs(config.watch.stable_session_secs));
    let watcher_handle = tokio::spawn(watcher.run());

    // Proxy engine
    let client = proxy::upstream_client(&config.upstream)?;
    let auth: Arc<dyn AuthGate> = match config.auth.address.as_deref() {
        Some(address) => {
            let gate = HttpAuthGate::new(address, &config.auth)?;
            tracing::info!(auth_server = %gate.url(), "Forward authorization enabled");
            Arc::new(gate)
        }
        None => Arc::new(AllowAll),
    };
    let service_header = HeaderName::from_bytes(config.server.service_header.as_bytes())
        .context("invalid server.service_header")?;
    let engine = Arc::new(ProxyEngine::new(
        Router::new(store.clone()),
        auth,
        client,
        service_header,
    ));

    // Serve until SIGINT/SIGTERM
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        server::shutdown_signal().await;
        signal.cancel();
    });

    let served = server::run(&config.server, engine, shutdown).await;

    watcher_cancel.cancel();
    if tokio::time::timeout(Duration::from_secs(config.server.shutdown_timeout_secs), watcher_handle)
        .await
        .is_err()
    {
        tracing::warn!("Config watcher did not stop in time");
    }

    tracing::info!(generation = store.generation(), "Server exited properly");
    served
}
