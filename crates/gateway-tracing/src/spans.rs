//! Span builder helpers for gateway instrumentation.

/// Create the request-scoped span for one proxied request.
///
/// Usage: `let span = gateway_request_span!(request_id, method, path, remote_addr);`
///
/// `otel.name` is filled in as `"<METHOD> <path>"` once the request is
/// accepted. Fields recorded later by the proxy engine:
/// - `service`: name of the matched route
/// - `upstream`: target authority the request was forwarded to
/// - `http.response.status_code`: upstream (or rendered) status
/// - `otel.status_code` / `otel.status_message` / `error`: set on failure branches
#[macro_export]
macro_rules! gateway_request_span {
    ($request_id:expr, $method:expr, $path:expr, $remote_addr:expr) => {
        tracing::info_span!(
            "gateway_request",
            otel.name = tracing::field::Empty,
            otel.kind = "server",
            otel.status_code = tracing::field::Empty,
            otel.status_message = tracing::field::Empty,
            request_id = %$request_id,
            http.request.method = %$method,
            url.path = %$path,
            client.address = %$remote_addr,
            service = tracing::field::Empty,
            upstream = tracing::field::Empty,
            http.response.status_code = tracing::field::Empty,
            error = tracing::field::Empty,
        )
    };
}

/// Create a client span for the upstream forward.
///
/// `status` and `latency_ms` are recorded once the upstream answers. A failed
/// send records `otel.status_code = "ERROR"` with the message instead.
#[macro_export]
macro_rules! upstream_forward_span {
    ($request_id:expr, $target:expr) => {
        tracing::info_span!(
            "upstream_forward",
            otel.kind = "client",
            otel.status_code = tracing::field::Empty,
            otel.status_message = tracing::field::Empty,
            request_id = %$request_id,
            target = %$target,
            status = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
            error = tracing::field::Empty,
        )
    };
}
