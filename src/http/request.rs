//! Request handling and transformation.
//!
//! # Responsibilities
//! - Request ID header name and lookup
//! - Prepare the client request for forwarding to an instance
//!
//! # Design Decisions
//! - Hop-by-hop headers are stripped; `Host` is left to the client stack
//! - `X-Forwarded-For` gains the client address
//! - The body is streamed through, never buffered

use axum::body::Body;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Request, Uri};

use crate::discovery::instance::ServiceInstance;
use crate::error::GatewayError;

pub const X_REQUEST_ID: &str = "x-request-id";

const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

pub fn request_id(headers: &HeaderMap) -> String {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

/// Rewrite `request` to target `instance` at `path`.
pub fn build_upstream_request(
    request: Request<Body>,
    instance: &ServiceInstance,
    path: &str,
    client_ip: &str,
) -> Result<Request<Body>, GatewayError> {
    let (mut parts, body) = request.into_parts();

    let path_and_query = match parts.uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    };
    let uri: Uri = format!("http://{}{}", instance.endpoint(), path_and_query)
        .parse()
        .map_err(|e| GatewayError::Upstream(format!("invalid upstream uri: {e}")))?;
    parts.uri = uri;

    for name in HOP_BY_HOP.iter() {
        parts.headers.remove(name);
    }
    parts.headers.remove("keep-alive");
    parts.headers.remove("proxy-connection");
    parts.headers.remove(header::HOST);

    let forwarded = match parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded) {
        parts.headers.insert("x-forwarded-for", value);
    }

    Ok(Request::from_parts(parts, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upstream_request_rewrite() {
        let request = Request::builder()
            .uri("http://gateway.local/api/orders?page=2")
            .header("host", "gateway.local")
            .header("connection", "keep-alive")
            .header("x-forwarded-for", "203.0.113.1")
            .header("x-request-id", "req-1")
            .body(Body::empty())
            .unwrap();
        let instance = ServiceInstance::new("orders", "10.0.0.5", 3001);

        let upstream = build_upstream_request(request, &instance, "/api/orders", "198.51.100.9").unwrap();
        assert_eq!(upstream.uri(), "http://10.0.0.5:3001/api/orders?page=2");
        assert!(upstream.headers().get("host").is_none());
        assert!(upstream.headers().get("connection").is_none());
        assert_eq!(upstream.headers()["x-forwarded-for"], "203.0.113.1, 198.51.100.9");
        assert_eq!(request_id(upstream.headers()), "req-1");
    }
}
