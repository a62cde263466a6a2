//! Request-path failures and their client-facing rendering.

use axum::http::header::{self, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use super::correlation::REQUEST_ID_HEADER;
use crate::auth::AuthError;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unsupported protocol scheme {0}")]
    UnsupportedScheme(String),

    #[error("no service defined for path {0}")]
    NoRoute(String),

    #[error("authorization failed: {0}")]
    Auth(#[from] AuthError),

    #[error("invalid upstream address {0}")]
    InvalidUpstream(String),

    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl ProxyError {
    /// Message shown to the client. Internal detail stays in the logs.
    fn public_message(&self) -> &'static str {
        match self {
            ProxyError::UnsupportedScheme(_) => "unsupported protocol scheme",
            ProxyError::NoRoute(_) => "no service defined",
            ProxyError::Auth(_) => "authorization service unavailable",
            ProxyError::InvalidUpstream(_) => "invalid upstream address",
            ProxyError::Upstream(e) if e.is_timeout() => "upstream timeout",
            ProxyError::Upstream(_) => "upstream connection error",
        }
    }

    /// Convert into the client response. `request_id` is the id already on
    /// the request span; `accept` is the inbound `Accept` header and selects
    /// between HTML and JSON error bodies.
    pub fn render(self, request_id: &str, accept: Option<&HeaderValue>) -> Response {
        match self {
            ProxyError::UnsupportedScheme(ref scheme) => {
                (StatusCode::BAD_REQUEST, format!("unsupported protocol scheme {scheme}"))
                    .into_response()
            }
            other => render_error(
                StatusCode::BAD_GATEWAY,
                other.public_message(),
                request_id,
                accept,
            ),
        }
    }
}

/// Render a gateway error page carrying `request_id` in the body and the
/// `x-request-id` header.
pub fn render_error(
    status: StatusCode,
    message: &str,
    request_id: &str,
    accept: Option<&HeaderValue>,
) -> Response {
    tracing::debug!(request_id = %request_id, status = status.as_u16(), message, "Rendering error response");

    let accept = accept.and_then(|v| v.to_str().ok()).unwrap_or("");
    let mut response = if prefers_json(accept) {
        let body = serde_json::json!({
            "status": status.as_u16(),
            "error": message,
            "request_id": request_id,
        });
        (status, axum::Json(body)).into_response()
    } else {
        let reason = status.canonical_reason().unwrap_or("Error");
        let body = format!(
            "<!DOCTYPE html>\n<html>\n<head><title>{code} {reason}</title></head>\n<body>\n\
             <h1>{code} {reason}</h1>\n<p>{message}</p>\n<p>Request ID: {request_id}</p>\n\
             </body>\n</html>\n",
            code = status.as_u16(),
        );
        (status, axum::response::Html(body)).into_response()
    };

    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

/// Whether `application/json` outranks `text/html` in an Accept header.
/// Ties go to whichever is listed first.
fn prefers_json(accept: &str) -> bool {
    let mut json: Option<(f32, usize)> = None;
    let mut html: Option<(f32, usize)> = None;

    for (position, range) in accept.split(',').enumerate() {
        let mut parts = range.split(';');
        let media = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let quality = parts
            .filter_map(|p| p.trim().strip_prefix("q="))
            .find_map(|q| q.trim().parse::<f32>().ok())
            .unwrap_or(1.0);

        let slot = match media.as_str() {
            "application/json" => &mut json,
            "text/html" => &mut html,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some((quality, position));
        }
    }

    match (json, html) {
        (Some((jq, _)), None) => jq > 0.0,
        (Some((jq, jp)), Some((hq, hp))) => jq > hq || (jq == hq && jq > 0.0 && jp < hp),
        _ => false,
    }
}
