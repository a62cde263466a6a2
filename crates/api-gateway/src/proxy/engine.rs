//! Per-request pipeline: sanitize, route, authorize, forward, relay.
//!
//! The upstream body is streamed both ways: no request or response body is
//! buffered by the gateway.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::{Body, HttpBody};
use axum::extract::Request;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::{Instrument, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::correlation;
use super::error::ProxyError;
use super::headers::{append_forwarded_for, copy_headers, merge_headers, strip_hop_by_hop};
use crate::auth::{AuthDecision, AuthGate, AuthRequest};
use crate::config::UpstreamConfig;
use crate::router::Router;
use crate::routes::ServiceRoute;

/// Build the shared upstream client. Redirects are relayed, never followed.
pub fn upstream_client(config: &UpstreamConfig) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.timeout_secs))
        .pool_idle_timeout(Duration::from_secs(config.pool_idle_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

pub struct ProxyEngine {
    router: Router,
    auth: Arc<dyn AuthGate>,
    client: reqwest::Client,
    service_header: HeaderName,
}

impl ProxyEngine {
    pub fn new(
        router: Router,
        auth: Arc<dyn AuthGate>,
        client: reqwest::Client,
        service_header: HeaderName,
    ) -> Self {
        Self {
            router,
            auth,
            client,
            service_header,
        }
    }

    /// Proxy one inbound request. Never fails: every error is rendered.
    pub async fn handle(&self, request: Request, remote: SocketAddr) -> Response {
        let request_id = correlation::generate_id();
        let method = request.method().clone();
        let path = request.uri().path().to_string();

        let span = gateway_tracing::gateway_request_span!(&request_id, &method, &path, remote);
        span.record("otel.name", format!("{method} {path}").as_str());
        let _ = span.set_parent(gateway_tracing::extract_context(request.headers()));

        let accept = request.headers().get(header::ACCEPT).cloned();

        async {
            let result = self.proxy(request, remote, &request_id).await;
            let span = Span::current();
            match result {
                Ok(response) => {
                    span.record("http.response.status_code", response.status().as_u16());
                    response
                }
                Err(e) => {
                    span.record("otel.status_code", "ERROR");
                    span.record("otel.status_message", tracing::field::display(&e));
                    span.record("error", tracing::field::display(&e));
                    match &e {
                        ProxyError::NoRoute(_) | ProxyError::UnsupportedScheme(_) => {
                            tracing::warn!(error = %e, "Request rejected")
                        }
                        _ => tracing::error!(error = %e, "Request failed"),
                    }
                    let response = e.render(&request_id, accept.as_ref());
                    span.record("http.response.status_code", response.status().as_u16());
                    response
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn proxy(
        &self,
        request: Request,
        remote: SocketAddr,
        request_id: &str,
    ) -> Result<Response, ProxyError> {
        if let Some(scheme) = request.uri().scheme_str() {
            if scheme != "http" && scheme != "https" {
                return Err(ProxyError::UnsupportedScheme(scheme.to_string()));
            }
        }

        let (parts, body) = request.into_parts();
        let path = parts.uri.path();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or(path);
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| parts.uri.authority().map(|a| a.as_str()))
            .unwrap_or("");

        let mut headers = parts.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.remove(header::HOST);
        append_forwarded_for(&mut headers, remote.ip());

        let route = self
            .router
            .match_path(path)
            .ok_or_else(|| ProxyError::NoRoute(path.to_string()))?;
        let span = Span::current();
        span.record("service", route.display_name());
        span.record("upstream", route.target.as_str());

        let decision = self
            .auth
            .authorize(&AuthRequest {
                method: &parts.method,
                host,
                uri: path_and_query,
                headers: &headers,
            })
            .await?;
        match decision {
            AuthDecision::Allow { header_additions } => merge_headers(&mut headers, &header_additions),
            AuthDecision::Block(rejection) => {
                tracing::info!(status = rejection.status.as_u16(), "Request blocked by authorization");
                return Ok(rejection.into_response());
            }
        }

        let url = format!("http://{}{}", route.target, path_and_query);
        let url = reqwest::Url::parse(&url).map_err(|_| ProxyError::InvalidUpstream(route.target.clone()))?;

        let forward_span = gateway_tracing::upstream_forward_span!(request_id, &route.target);
        gateway_tracing::strip_context_headers(&mut headers);
        gateway_tracing::inject_context(&forward_span, &mut headers);

        let mut upstream = self.client.request(parts.method.clone(), url).headers(headers);
        if body.size_hint().exact() != Some(0) {
            upstream = upstream.body(reqwest::Body::wrap_stream(body.into_data_stream()));
        }

        let start = Instant::now();
        let result = upstream.send().instrument(forward_span.clone()).await;
        let latency = start.elapsed().as_millis() as u64;
        forward_span.record("latency_ms", latency);

        let upstream_resp = result.inspect_err(|e| {
            forward_span.record("otel.status_code", "ERROR");
            forward_span.record("otel.status_message", tracing::field::display(e));
            forward_span.record("error", tracing::field::display(e));
        })?;
        forward_span.record("status", upstream_resp.status().as_u16());
        tracing::info!(
            service = route.display_name(),
            status = upstream_resp.status().as_u16(),
            latency_ms = latency,
            "Forward complete"
        );

        Ok(self.relay(upstream_resp, &route))
    }

    /// Turn the upstream answer into the client response, body streamed.
    fn relay(&self, upstream: reqwest::Response, route: &ServiceRoute) -> Response {
        let status = upstream.status();

        let mut headers = HeaderMap::new();
        copy_headers(&mut headers, upstream.headers());
        strip_hop_by_hop(&mut headers);
        match HeaderValue::from_str(route.display_name()) {
            Ok(value) => {
                headers.insert(self.service_header.clone(), value);
            }
            Err(_) => tracing::warn!(service = route.display_name(), "Service name is not a valid header value"),
        }

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
        *response.headers_mut() = headers;
        response
    }
}
