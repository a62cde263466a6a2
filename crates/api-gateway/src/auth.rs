//! Per-request authorization hook.
//!
//! The proxy engine consults an [`AuthGate`] after routing and before
//! forwarding. [`HttpAuthGate`] delegates the decision to an external
//! forward-auth service; [`AllowAll`] is used when none is configured.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use thiserror::Error;

use crate::config::AuthConfig;
use crate::proxy::headers::strip_hop_by_hop;

pub const X_FORWARDED_METHOD: &str = "x-forwarded-method";
pub const X_FORWARDED_HOST: &str = "x-forwarded-host";
pub const X_FORWARDED_URI: &str = "x-forwarded-uri";

/// The parts of an inbound request an authorization decision may look at.
#[derive(Debug, Clone, Copy)]
pub struct AuthRequest<'a> {
    pub method: &'a Method,
    pub host: &'a str,
    /// Path plus query string, as received.
    pub uri: &'a str,
    pub headers: &'a HeaderMap,
}

#[derive(Debug)]
pub enum AuthDecision {
    /// Forward the request, overlaying these headers on the outbound copy.
    Allow { header_additions: HeaderMap },
    /// Answer the client with this response instead of forwarding.
    Block(Rejection),
}

impl AuthDecision {
    pub fn allow() -> Self {
        AuthDecision::Allow {
            header_additions: HeaderMap::new(),
        }
    }
}

/// Response relayed to the client when a request is blocked.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("auth service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid auth service address {0}")]
    InvalidAddress(String),
}

/// Decides whether a request may proceed. Shared across all request tasks.
#[async_trait]
pub trait AuthGate: Send + Sync {
    async fn authorize(&self, request: &AuthRequest<'_>) -> Result<AuthDecision, AuthError>;
}

/// Allows everything, adds nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl AuthGate for AllowAll {
    async fn authorize(&self, _request: &AuthRequest<'_>) -> Result<AuthDecision, AuthError> {
        Ok(AuthDecision::allow())
    }
}

/// Forward-auth client: a `GET` to the auth service carrying the original
/// request headers. A 2xx answer allows, anything else blocks.
pub struct HttpAuthGate {
    client: reqwest::Client,
    url: reqwest::Url,
    allowed_upstream_headers: Vec<HeaderName>,
}

impl HttpAuthGate {
    pub fn new(address: &str, config: &AuthConfig) -> Result<Self, AuthError> {
        let address = if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{address}")
        };
        let url = reqwest::Url::parse(&address).map_err(|_| AuthError::InvalidAddress(address.clone()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let allowed_upstream_headers = config
            .allowed_upstream_headers
            .iter()
            .filter_map(|name| match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => Some(name),
                Err(_) => {
                    tracing::warn!(header = %name, "Ignoring invalid allowed upstream header name");
                    None
                }
            })
            .collect();

        Ok(Self {
            client,
            url,
            allowed_upstream_headers,
        })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    fn outbound_headers(&self, request: &AuthRequest<'_>) -> HeaderMap {
        let mut headers = request.headers.clone();
        strip_hop_by_hop(&mut headers);
        for name in [header::HOST, header::CONTENT_LENGTH, header::CONTENT_TYPE, header::CONTENT_ENCODING] {
            headers.remove(name);
        }

        headers.insert(
            X_FORWARDED_METHOD,
            HeaderValue::from_str(request.method.as_str()).unwrap_or(HeaderValue::from_static("GET")),
        );
        if let Ok(host) = HeaderValue::from_str(request.host) {
            headers.insert(X_FORWARDED_HOST, host);
        }
        if let Ok(uri) = HeaderValue::from_str(request.uri) {
            headers.insert(X_FORWARDED_URI, uri);
        }
        headers
    }
}

#[async_trait]
impl AuthGate for HttpAuthGate {
    async fn authorize(&self, request: &AuthRequest<'_>) -> Result<AuthDecision, AuthError> {
        let response = self
            .client
            .get(self.url.clone())
            .headers(self.outbound_headers(request))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let mut header_additions = HeaderMap::new();
            for name in &self.allowed_upstream_headers {
                for value in response.headers().get_all(name) {
                    header_additions.append(name.clone(), value.clone());
                }
            }
            tracing::debug!(
                status = status.as_u16(),
                additions = header_additions.len(),
                "Request allowed by auth service"
            );
            return Ok(AuthDecision::Allow { header_additions });
        }

        let mut headers = HeaderMap::new();
        if let Some(content_type) = response.headers().get(header::CONTENT_TYPE) {
            headers.insert(header::CONTENT_TYPE, content_type.clone());
        }
        for name in [header::WWW_AUTHENTICATE, header::LOCATION, header::SET_COOKIE] {
            for value in response.headers().get_all(&name) {
                headers.append(name.clone(), value.clone());
            }
        }
        let body = response.bytes().await?;

        tracing::info!(status = status.as_u16(), "Request blocked by auth service");
        Ok(AuthDecision::Block(Rejection {
            status,
            headers,
            body,
        }))
    }
}
