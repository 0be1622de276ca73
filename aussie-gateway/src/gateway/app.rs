//! Assembles the admin plane and the gateway surface into one `axum`
//! app. The gateway surface itself is deliberately not expressed as
//! `axum` routes per service — it is one fallback handler that defers
//! entirely to [`GatewayPipeline`], since the set of forwardable paths
//! changes at runtime as services register and deregister.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message as AxumMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router as AxumRouter;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tracing::warn;

use super::admin::{admin_router, AdminState};
use super::orchestrator::{GatewayPipeline, GatewayRequestCtx, GatewayResult};
use super::websocket::{close_code, select_subprotocol, MessageRateLimiter, WebSocketGateway};

#[derive(Clone)]
pub struct GatewayAppState {
    pub pipeline: Arc<GatewayPipeline>,
    pub admin: AdminState,
    pub websockets: Arc<WebSocketGateway>,
    /// Subprotocols this gateway is willing to speak; empty means it never
    /// advertises a selected subprotocol back to the client.
    pub supported_subprotocols: Vec<&'static str>,
}

pub fn build_app(state: GatewayAppState) -> AxumRouter {
    admin_router(state.admin.clone()).fallback(any(gateway_surface)).with_state(state)
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(axum::http::header::COOKIE)?.to_str().ok()?;
    raw.split(';').map(str::trim).find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?.strip_prefix("Bearer ").map(str::to_string)
}

async fn gateway_surface(
    State(state): State<GatewayAppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws_upgrade: Option<WebSocketUpgrade>,
    request: axum::extract::Request,
) -> axum::response::Response {
    let (parts, body) = request.into_parts();
    let default_ip = addr.ip().to_string();
    let client_ip = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .unwrap_or(&default_ip)
        .to_string();
    let host = parts.headers.get(axum::http::header::HOST).and_then(|v| v.to_str().ok()).map(str::to_string);
    let scheme = parts.headers.get("x-forwarded-proto").and_then(|v| v.to_str().ok()).unwrap_or("http").to_string();
    let api_key = parts.headers.get("x-api-key").and_then(|v| v.to_str().ok()).map(str::to_string);
    let bearer_token = extract_bearer(&parts.headers);
    let session_id = extract_cookie(&parts.headers, "session_id");
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(str::to_string);

    if let Some(upgrade) = ws_upgrade {
        let origin = parts.headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok()).unwrap_or(&client_ip);
        if !state.websockets.check_connection_allowed(origin) {
            return StatusCode::TOO_MANY_REQUESTS.into_response();
        }

        let (matched, registration) = match state
            .pipeline
            .authorize_request(
                &path,
                parts.method.as_str(),
                &client_ip,
                api_key.as_deref(),
                bearer_token.as_deref(),
                session_id.as_deref(),
            )
            .await
        {
            Ok(resolved) => resolved,
            Err(result) => return result.into_response(),
        };

        let upstream_url = build_upstream_ws_url(&registration.base_url, &matched.target_path, query.as_deref());

        let subprotocol = parts
            .headers
            .get(axum::http::header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|requested| select_subprotocol(requested, &state.supported_subprotocols));

        let mut upgrade = upgrade;
        if let Some(protocol) = &subprotocol {
            upgrade = upgrade.protocols([protocol.clone()]);
        }

        let message_limiter = state.websockets.new_message_limiter();
        return upgrade.on_upgrade(move |socket| splice_socket(socket, upstream_url, message_limiter));
    }

    let ctx = GatewayRequestCtx {
        method: parts.method,
        path,
        query,
        headers: parts.headers,
        body,
        client_ip,
        host,
        scheme,
        api_key,
        bearer_token,
        session_id,
    };

    state.pipeline.handle(ctx).await.into_response()
}

fn build_upstream_ws_url(base_url: &str, target_path: &str, query: Option<&str>) -> String {
    let scheme_stripped = base_url.trim_end_matches('/');
    let ws_base = scheme_stripped.replacen("https://", "wss://", 1).replacen("http://", "ws://", 1);
    format!("{ws_base}{target_path}{}", query.map(|q| format!("?{q}")).unwrap_or_default())
}

/// Dials the matched upstream's own WebSocket endpoint and splices frames
/// in both directions, applying the per-connection message-rate limiter
/// to frames arriving from the client. A breach closes the client socket
/// with [`close_code::RATE_LIMITED`]; an upstream-side failure closes it
/// with [`close_code::POLICY_VIOLATION`].
async fn splice_socket(client: WebSocket, upstream_url: String, limiter: MessageRateLimiter) {
    let (upstream_stream, _response) = match tokio_tungstenite::connect_async(&upstream_url).await {
        Ok(connected) => connected,
        Err(e) => {
            warn!("failed to connect to upstream websocket '{upstream_url}': {e}");
            let mut client = client;
            let frame = CloseFrame { code: close_code::POLICY_VIOLATION, reason: "upstream unavailable".into() };
            let _ = client.send(AxumMessage::Close(Some(frame))).await;
            return;
        }
    };

    let (mut client_sink, mut client_stream) = client.split();
    let (mut upstream_sink, mut upstream_stream) = upstream_stream.split();

    // Single select loop: either direction finishing (clean close, error,
    // or a rate-limit breach) tears down both sides of the splice.
    loop {
        tokio::select! {
            client_msg = client_stream.next() => {
                match client_msg {
                    Some(Ok(message)) => {
                        if matches!(message, AxumMessage::Close(_)) {
                            let _ = upstream_sink.close().await;
                            break;
                        }
                        if !limiter.check() {
                            let frame = CloseFrame { code: close_code::RATE_LIMITED, reason: "rate limited".into() };
                            let _ = client_sink.send(AxumMessage::Close(Some(frame))).await;
                            let _ = upstream_sink.close().await;
                            break;
                        }
                        if upstream_sink.send(to_upstream_message(message)).await.is_err() {
                            break;
                        }
                    }
                    _ => {
                        let _ = upstream_sink.close().await;
                        break;
                    }
                }
            }
            upstream_msg = upstream_stream.next() => {
                match upstream_msg {
                    Some(Ok(message)) => {
                        let is_close = matches!(message, UpstreamMessage::Close(_));
                        if let Some(converted) = to_axum_message(message) {
                            if client_sink.send(converted).await.is_err() {
                                break;
                            }
                        }
                        if is_close {
                            break;
                        }
                    }
                    _ => {
                        let frame = CloseFrame { code: close_code::POLICY_VIOLATION, reason: "upstream closed".into() };
                        let _ = client_sink.send(AxumMessage::Close(Some(frame))).await;
                        break;
                    }
                }
            }
        }
    }
}

fn to_upstream_message(message: AxumMessage) -> UpstreamMessage {
    match message {
        AxumMessage::Text(t) => UpstreamMessage::Text(t.to_string().into()),
        AxumMessage::Binary(b) => UpstreamMessage::Binary(b),
        AxumMessage::Ping(p) => UpstreamMessage::Ping(p),
        AxumMessage::Pong(p) => UpstreamMessage::Pong(p),
        AxumMessage::Close(_) => UpstreamMessage::Close(None),
    }
}

fn to_axum_message(message: UpstreamMessage) -> Option<AxumMessage> {
    match message {
        UpstreamMessage::Text(t) => Some(AxumMessage::Text(t.to_string().into())),
        UpstreamMessage::Binary(b) => Some(AxumMessage::Binary(b)),
        UpstreamMessage::Ping(p) => Some(AxumMessage::Ping(p)),
        UpstreamMessage::Pong(p) => Some(AxumMessage::Pong(p)),
        UpstreamMessage::Close(frame) => Some(AxumMessage::Close(frame.map(|f| CloseFrame {
            code: f.code.into(),
            reason: f.reason.to_string().into(),
        }))),
        UpstreamMessage::Frame(_) => None,
    }
}
