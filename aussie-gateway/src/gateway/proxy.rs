//! Proxy transport: forwards a matched request to its upstream service.
//!
//! Hop-by-hop headers (RFC 7230 §6.1) are stripped in both directions;
//! `X-Forwarded-*` headers are added so the upstream sees the original
//! client. The request and response bodies are streamed rather than
//! buffered so large payloads don't sit fully in memory.

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode};
use once_cell::sync::Lazy;

use crate::config::ProxyConfig;
use crate::error::{Error, Result};

/// RFC 7230 §6.1 hop-by-hop headers, plus the de-facto `proxy-connection`.
/// Stripped before a request crosses the proxy boundary in either
/// direction. `Upgrade` is included here because this is the plain REST
/// forwarding path; WebSocket upgrades are handled separately.
static HOP_BY_HOP_HEADERS: Lazy<[HeaderName; 8]> = Lazy::new(|| {
    [
        axum::http::header::CONNECTION,
        HeaderName::from_static("proxy-connection"),
        HeaderName::from_static("keep-alive"),
        axum::http::header::PROXY_AUTHENTICATE,
        axum::http::header::PROXY_AUTHORIZATION,
        axum::http::header::TE,
        axum::http::header::TRAILER,
        axum::http::header::TRANSFER_ENCODING,
    ]
});

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS.iter() {
        headers.remove(name);
    }
    headers.remove(axum::http::header::UPGRADE);
}

/// Appends `client_ip` to `X-Forwarded-For` (preserving any earlier hops
/// already in the chain) and sets `X-Forwarded-Host`/`X-Forwarded-Proto`.
fn inject_forwarded_headers(headers: &mut HeaderMap, client_ip: &str, host: Option<&str>, scheme: &str) {
    let forwarded_for = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) if !existing.is_empty() => format!("{existing}, {client_ip}"),
        _ => client_ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(HeaderName::from_static("x-forwarded-for"), value);
    }
    if let Some(host) = host {
        if let Ok(value) = HeaderValue::from_str(host) {
            headers.insert(HeaderName::from_static("x-forwarded-host"), value);
        }
    }
    if let Ok(value) = HeaderValue::from_str(scheme) {
        headers.insert(HeaderName::from_static("x-forwarded-proto"), value);
    }
}

/// Forwards requests to upstream services over plain HTTP(S).
pub struct ProxyTransport {
    client: reqwest::Client,
}

impl ProxyTransport {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.deadline())
            .build()
            .map_err(|e| Error::Internal(format!("failed to build proxy client: {e}")))?;
        Ok(Self { client })
    }

    /// Forwards one request to `target_url` and streams the upstream
    /// response straight back. `client_ip` and `incoming_host` populate
    /// the `X-Forwarded-*` headers; `scheme` is the scheme the original
    /// client used to reach the gateway (`"http"` or `"https"`).
    pub async fn forward(
        &self,
        method: Method,
        target_url: &str,
        mut headers: HeaderMap,
        body: Body,
        client_ip: &str,
        incoming_host: Option<&str>,
        scheme: &str,
    ) -> Result<Response<Body>> {
        strip_hop_by_hop(&mut headers);
        inject_forwarded_headers(&mut headers, client_ip, incoming_host, scheme);

        let upstream_body = reqwest::Body::wrap_stream(body.into_data_stream());
        let upstream_response = self
            .client
            .request(method, target_url)
            .headers(headers)
            .body(upstream_body)
            .send()
            .await
            .map_err(|e| Error::External(format!("upstream request to '{target_url}' failed: {e}")))?;

        let status = StatusCode::from_u16(upstream_response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let mut response_headers = upstream_response.headers().clone();
        strip_hop_by_hop(&mut response_headers);

        let mut builder = Response::builder().status(status);
        if let Some(builder_headers) = builder.headers_mut() {
            *builder_headers = response_headers;
        }
        builder
            .body(Body::from_stream(upstream_response.bytes_stream()))
            .map_err(|e| Error::Internal(format!("failed to build proxied response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_for_appends_to_existing_chain() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        inject_forwarded_headers(&mut headers, "10.0.0.2", Some("api.example.com"), "https");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.1, 10.0.0.2");
        assert_eq!(headers.get("x-forwarded-host").unwrap(), "api.example.com");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "https");
    }

    #[test]
    fn forwarded_for_starts_fresh_when_absent() {
        let mut headers = HeaderMap::new();
        inject_forwarded_headers(&mut headers, "10.0.0.2", None, "http");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.2");
        assert!(headers.get("x-forwarded-host").is_none());
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(axum::http::header::TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
        headers.insert(axum::http::header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        strip_hop_by_hop(&mut headers);
        assert!(headers.get(axum::http::header::CONNECTION).is_none());
        assert!(headers.get(axum::http::header::TRANSFER_ENCODING).is_none());
        assert!(headers.get(axum::http::header::UPGRADE).is_none());
        assert!(headers.get(axum::http::header::CONTENT_TYPE).is_some());
    }
}
