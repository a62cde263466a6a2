//! W3C trace-context, baggage and B3 propagation over `http::HeaderMap`.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use opentelemetry::propagation::{Extractor, Injector, TextMapCompositePropagator};
use opentelemetry::Context;
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_zipkin::{B3Encoding, Propagator as B3Propagator};
use tracing::Span;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Headers carrying inbound distributed-tracing context.
const CONTEXT_HEADERS: &[&str] = &[
    "traceparent",
    "tracestate",
    "baggage",
    "b3",
    "x-b3-traceid",
    "x-b3-spanid",
    "x-b3-parentspanid",
    "x-b3-sampled",
    "x-b3-flags",
];

/// The gateway's propagator: W3C trace context, W3C baggage and B3
/// multi-header. Extraction accepts either format; injection writes both.
pub fn propagator() -> TextMapCompositePropagator {
    TextMapCompositePropagator::new(vec![
        Box::new(TraceContextPropagator::new()),
        Box::new(BaggagePropagator::new()),
        Box::new(B3Propagator::with_encoding(B3Encoding::MultipleHeader)),
    ])
}

struct HeaderExtractor<'a>(&'a HeaderMap);

impl Extractor for HeaderExtractor<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.to_str().ok())
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(HeaderName::as_str).collect()
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        let name = match HeaderName::from_bytes(key.as_bytes()) {
            Ok(name) => name,
            Err(_) => return,
        };
        if let Ok(value) = HeaderValue::from_str(&value) {
            self.0.insert(name, value);
        }
    }
}

/// Extract the caller's trace context (and baggage) using the global propagator.
pub fn extract_context(headers: &HeaderMap) -> Context {
    opentelemetry::global::get_text_map_propagator(|p| p.extract(&HeaderExtractor(headers)))
}

/// Remove inbound trace-context, baggage and B3 headers so they are not
/// forwarded alongside the gateway's own context.
pub fn strip_context_headers(headers: &mut HeaderMap) {
    for name in CONTEXT_HEADERS {
        headers.remove(*name);
    }
}

/// Inject the context of `span` into outbound headers.
pub fn inject_context(span: &Span, headers: &mut HeaderMap) {
    let cx = span.context();
    opentelemetry::global::get_text_map_propagator(|p| {
        p.inject_context(&cx, &mut HeaderInjector(headers))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::propagation::TextMapPropagator;
    use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};

    const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const SPAN_ID: &str = "00f067aa0ba902b7";

    #[test]
    fn test_strip_context_headers_keeps_unrelated_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("traceparent", HeaderValue::from_static("00-abc-def-01"));
        headers.insert("tracestate", HeaderValue::from_static("vendor=1"));
        headers.insert("baggage", HeaderValue::from_static("user=alice"));
        headers.insert("b3", HeaderValue::from_static("80f198ee56343ba8-e457b5a2e4d86bd1-1"));
        headers.insert("x-b3-traceid", HeaderValue::from_static(TRACE_ID));
        headers.insert("x-b3-spanid", HeaderValue::from_static(SPAN_ID));
        headers.insert("x-b3-sampled", HeaderValue::from_static("1"));
        headers.insert("accept", HeaderValue::from_static("*/*"));

        strip_context_headers(&mut headers);

        assert!(headers.get("traceparent").is_none());
        assert!(headers.get("tracestate").is_none());
        assert!(headers.get("baggage").is_none());
        assert!(headers.get("b3").is_none());
        assert!(headers.get("x-b3-traceid").is_none());
        assert!(headers.get("x-b3-spanid").is_none());
        assert!(headers.get("x-b3-sampled").is_none());
        assert_eq!(headers.get("accept").unwrap(), "*/*");
    }

    #[test]
    fn test_extractor_reads_header_values() {
        let mut headers = HeaderMap::new();
        headers.insert("baggage", HeaderValue::from_static("user=alice"));
        let extractor = HeaderExtractor(&headers);

        assert_eq!(extractor.get("baggage"), Some("user=alice"));
        assert!(extractor.get("missing").is_none());
        assert_eq!(extractor.keys(), vec!["baggage"]);
    }

    #[test]
    fn test_injector_ignores_invalid_values() {
        let mut headers = HeaderMap::new();
        let mut injector = HeaderInjector(&mut headers);
        injector.set("traceparent", "00-abc-def-01".to_string());
        injector.set("tracestate", "bad\nvalue".to_string());

        assert_eq!(headers.get("traceparent").unwrap(), "00-abc-def-01");
        assert!(headers.get("tracestate").is_none());
    }

    #[test]
    fn test_propagator_extracts_b3_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-b3-traceid", HeaderValue::from_static(TRACE_ID));
        headers.insert("x-b3-spanid", HeaderValue::from_static(SPAN_ID));
        headers.insert("x-b3-sampled", HeaderValue::from_static("1"));

        let cx = propagator().extract(&HeaderExtractor(&headers));
        let span = cx.span();
        let remote = span.span_context();
        assert!(remote.is_valid());
        assert!(remote.is_remote());
        assert_eq!(remote.trace_id(), TraceId::from_hex(TRACE_ID).unwrap());
        assert_eq!(remote.span_id(), SpanId::from_hex(SPAN_ID).unwrap());
    }

    #[test]
    fn test_propagator_injects_w3c_and_b3() {
        let cx = Context::new().with_remote_span_context(SpanContext::new(
            TraceId::from_hex(TRACE_ID).unwrap(),
            SpanId::from_hex(SPAN_ID).unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        ));
        let mut headers = HeaderMap::new();
        propagator().inject_context(&cx, &mut HeaderInjector(&mut headers));

        assert_eq!(
            headers.get("traceparent").unwrap(),
            format!("00-{TRACE_ID}-{SPAN_ID}-01").as_str()
        );
        assert_eq!(headers.get("x-b3-traceid").unwrap(), TRACE_ID);
        assert_eq!(headers.get("x-b3-spanid").unwrap(), SPAN_ID);
        assert_eq!(headers.get("x-b3-sampled").unwrap(), "1");
    }
}
