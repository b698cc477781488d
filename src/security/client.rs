//! Request identity as seen by the limiter.

use std::net::{IpAddr, SocketAddr};

use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};

pub const API_KEY_HEADER: &str = "x-api-key";
pub const USER_ID_HEADER: &str = "x-user-id";

/// Everything the admission checks key on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestIdentity {
    pub method: String,
    pub path: String,
    /// Best-effort client address, or `"unknown"`.
    pub client_ip: String,
    pub api_key: Option<String>,
    pub user_id: Option<String>,
}

impl RequestIdentity {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let socket = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr)
            .or_else(|| request.extensions().get::<SocketAddr>().copied());

        Self {
            method: request.method().as_str().to_string(),
            path: request.uri().path().to_string(),
            client_ip: client_ip(request.headers(), socket),
            api_key: header_value(request.headers(), API_KEY_HEADER),
            user_id: header_value(request.headers(), USER_ID_HEADER),
        }
    }

    pub fn client_ip_addr(&self) -> Option<IpAddr> {
        self.client_ip.parse().ok()
    }
}

/// X-Forwarded-For first hop, then X-Real-IP, then the peer address.
pub fn client_ip(headers: &HeaderMap, socket: Option<SocketAddr>) -> String {
    if let Some(first) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }

    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return real_ip.to_string();
    }

    socket
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_for_first_hop_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7, 10.0.0.1"));
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, None), "203.0.113.7");
    }

    #[test]
    fn test_real_ip_then_socket() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));
        assert_eq!(client_ip(&headers, None), "198.51.100.2");

        let socket: SocketAddr = "192.0.2.5:4000".parse().unwrap();
        assert_eq!(client_ip(&HeaderMap::new(), Some(socket)), "192.0.2.5");
        assert_eq!(client_ip(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_identity_from_request() {
        let socket: SocketAddr = "192.0.2.5:4000".parse().unwrap();
        let mut request = Request::builder()
            .method("POST")
            .uri("/api/orders?x=1")
            .header("X-API-Key", "k-123")
            .header("X-User-ID", "u-9")
            .body(Body::empty())
            .unwrap();
        request.extensions_mut().insert(ConnectInfo(socket));

        let identity = RequestIdentity::from_request(&request);
        assert_eq!(identity.method, "POST");
        assert_eq!(identity.path, "/api/orders");
        assert_eq!(identity.client_ip, "192.0.2.5");
        assert_eq!(identity.api_key.as_deref(), Some("k-123"));
        assert_eq!(identity.user_id.as_deref(), Some("u-9"));
        assert_eq!(identity.client_ip_addr(), Some("192.0.2.5".parse().unwrap()));
    }
}
