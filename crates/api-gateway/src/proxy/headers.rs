//! Header sanitization shared by the request and response paths.

use std::net::IpAddr;

use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};

/// Headers that are meaningful only for a single transport hop.
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Remove hop-by-hop headers, including any header named as a `Connection`
/// token. Applying it twice is the same as applying it once.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Append `client` to X-Forwarded-For, folding prior values into one
/// comma-separated header.
pub fn append_forwarded_for(headers: &mut HeaderMap, client: IpAddr) {
    let prior: Vec<&str> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();

    let value = if prior.is_empty() {
        client.to_string()
    } else {
        format!("{}, {client}", prior.join(", "))
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

/// Overlay `additions` onto `headers`. Each name present in `additions`
/// replaces every existing value of that name.
pub fn merge_headers(headers: &mut HeaderMap, additions: &HeaderMap) {
    for name in additions.keys() {
        headers.remove(name);
    }
    for (name, value) in additions {
        headers.append(name.clone(), value.clone());
    }
}

/// Copy every value from `src` into `dst` without replacing existing ones.
pub fn copy_headers(dst: &mut HeaderMap, src: &HeaderMap) {
    for (name, value) in src {
        dst.append(name.clone(), value.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.append(*name, HeaderValue::from_static(value));
        }
        headers
    }

    #[test]
    fn test_strip_hop_by_hop() {
        let mut headers = map(&[
            ("connection", "keep-alive, x-session-token"),
            ("keep-alive", "timeout=5"),
            ("te", "trailers"),
            ("transfer-encoding", "chunked"),
            ("upgrade", "websocket"),
            ("proxy-authorization", "Basic abc"),
            ("x-session-token", "secret"),
            ("accept", "text/html"),
            ("authorization", "Bearer t"),
        ]);
        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 2);
        assert_eq!(headers["accept"], "text/html");
        assert_eq!(headers["authorization"], "Bearer t");
    }

    #[test]
    fn test_strip_hop_by_hop_is_idempotent() {
        let mut once = map(&[
            ("connection", "close"),
            ("trailers", "x"),
            ("x-custom", "1"),
            ("x-custom", "2"),
        ]);
        strip_hop_by_hop(&mut once);
        let mut twice = once.clone();
        strip_hop_by_hop(&mut twice);

        assert_eq!(once, twice);
        assert_eq!(twice.get_all("x-custom").iter().count(), 2);
    }

    #[test]
    fn test_forwarded_for_accumulates() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "10.0.0.1".parse().unwrap());
        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.1");

        append_forwarded_for(&mut headers, "10.0.0.2".parse().unwrap());
        assert_eq!(headers[X_FORWARDED_FOR], "10.0.0.1, 10.0.0.2");
    }

    #[test]
    fn test_forwarded_for_folds_multiple_headers() {
        let mut headers = map(&[("x-forwarded-for", "1.1.1.1"), ("x-forwarded-for", "2.2.2.2")]);
        append_forwarded_for(&mut headers, "::1".parse().unwrap());

        assert_eq!(headers.get_all(X_FORWARDED_FOR).iter().count(), 1);
        assert_eq!(headers[X_FORWARDED_FOR], "1.1.1.1, 2.2.2.2, ::1");
    }

    #[test]
    fn test_merge_replaces_same_name() {
        let mut headers = map(&[("x-user", "spoofed"), ("x-user", "also-spoofed"), ("accept", "*/*")]);
        let additions = map(&[("x-user", "alice"), ("x-groups", "a"), ("x-groups", "b")]);
        merge_headers(&mut headers, &additions);

        let users: Vec<_> = headers.get_all("x-user").iter().collect();
        assert_eq!(users, vec!["alice"]);
        assert_eq!(headers.get_all("x-groups").iter().count(), 2);
        assert_eq!(headers["accept"], "*/*");
    }

    #[test]
    fn test_copy_headers_keeps_every_value() {
        let mut dst = map(&[("set-cookie", "a=1")]);
        let src = map(&[("set-cookie", "b=2"), ("set-cookie", "c=3")]);
        copy_headers(&mut dst, &src);
        assert_eq!(dst.get_all("set-cookie").iter().count(), 3);
    }
}
