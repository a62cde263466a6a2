//! Minimal upstream for manual end-to-end checks: answers every request
//! with 200 and echoes the received request headers.
//!
//! Usage: `test-upstream [listen-address]` (default `127.0.0.1:5008`).

use axum::extract::Request;
use axum::http::header;

async fn ready(request: Request) -> ([(header::HeaderName, &'static str); 1], String) {
    let mut body = String::from("HTTP upstream Ready!\n\n");
    for (name, value) in request.headers() {
        body.push_str(name.as_str());
        body.push_str(": ");
        body.push_str(&String::from_utf8_lossy(value.as_bytes()));
        body.push('\n');
    }
    ([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let addr = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:5008".to_string());

    let app = axum::Router::new().fallback(ready);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(address = %addr, "test upstream listening");

    axum::serve(listener, app).await?;
    Ok(())
}
