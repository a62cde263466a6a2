//! Axum HTTP server: catch-all proxy handler, listener, graceful shutdown.

use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::response::Response;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::catch_panic::CatchPanicLayer;

use crate::config::ServerConfig;
use crate::proxy::ProxyEngine;

/// Build the app. Every method and path goes to the proxy engine.
pub fn app(engine: Arc<ProxyEngine>) -> axum::Router {
    axum::Router::new()
        .fallback(handle_request)
        .layer(CatchPanicLayer::new())
        .with_state(engine)
}

/// Bind the configured address and serve until `shutdown` fires.
pub async fn run(
    config: &ServerConfig,
    engine: Arc<ProxyEngine>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&config.listen_address).await?;
    tracing::info!(address = %config.listen_address, "api-gateway listening");

    serve(
        listener,
        engine,
        shutdown,
        Duration::from_secs(config.shutdown_timeout_secs),
    )
    .await
}

/// Serve on `listener`. Once `shutdown` fires no new connections are
/// accepted and in-flight requests get `drain_timeout` to finish.
pub async fn serve(
    listener: TcpListener,
    engine: Arc<ProxyEngine>,
    shutdown: CancellationToken,
    drain_timeout: Duration,
) -> anyhow::Result<()> {
    let server = axum::serve(
        listener,
        app(engine).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.clone().cancelled_owned())
    .into_future();

    let deadline = async {
        shutdown.cancelled().await;
        tracing::info!(
            timeout_secs = drain_timeout.as_secs(),
            "Shutdown signal received, draining connections..."
        );
        tokio::time::sleep(drain_timeout).await;
    };

    tokio::select! {
        result = server => result?,
        _ = deadline => {
            tracing::warn!("Drain timeout elapsed, dropping in-flight connections");
        }
    }

    tracing::info!("api-gateway shut down");
    Ok(())
}

async fn handle_request(
    State(engine): State<Arc<ProxyEngine>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    request: Request,
) -> Response {
    engine.handle(request, remote).await
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install CTRL+C signal handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
