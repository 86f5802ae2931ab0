//! Router assembly and the middleware stack (§6 "External interfaces").
//!
//! Grounded on the teacher's `gateway::server::{build_gateway_app,
//! apply_middleware_stack, build_cors_layer, is_same_origin}` — the layer
//! order, the CSWSH same-origin check, and the CORS predicate are carried
//! over verbatim; only the routes and the handlers behind them change.

use std::sync::Arc;

use axum::{
    extract::{ws::WebSocketUpgrade, ConnectInfo, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::{AllowOrigin, Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    sensitive_headers::SetSensitiveHeadersLayer,
    set_header::SetResponseHeaderLayer,
    trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{warn, Level};

use crate::{state::AppState, ws};

/// 64 KiB matches the wire protocol's own frame cap (§6); nothing in this
/// process ever needs a larger HTTP body.
const REQUEST_BODY_LIMIT: usize = agentim_protocol::MAX_BUFFER_SIZE;

pub fn build_router(state: AppState, http_request_logs: bool) -> Router {
    let cors = build_cors_layer();

    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/ws/client", get(ws_client_upgrade_handler))
        .route("/ws/gateway", get(ws_gateway_upgrade_handler))
        .with_state(state);

    apply_middleware_stack(router, cors, http_request_logs)
}

/// Validates the `Origin` header against the request `Host` header instead
/// of allowing any origin — secure in deployments where the hostname is not
/// known at build time, since the server allows its own origin dynamically.
fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, parts: &axum::http::request::Parts| {
            let origin_str = origin.to_str().unwrap_or("");
            let host = parts.headers.get(header::HOST).and_then(|v| v.to_str().ok()).unwrap_or("");
            is_same_origin(origin_str, host)
        }))
        .allow_methods(Any)
        .allow_headers(Any)
}

/// Layer order (outermost → innermost for requests):
/// 1. `CatchPanicLayer` — converts handler panics to 500s
/// 2. `SetSensitiveHeadersLayer` — marks Authorization/Cookie as redacted
/// 3. `SetRequestIdLayer` — generates x-request-id before tracing
/// 4. `TraceLayer` (optional) — logs requests with redacted headers + request ID
/// 5. `CorsLayer` — handles preflight; logged by trace
/// 6. `PropagateRequestIdLayer` — copies x-request-id to response
/// 7. Security response headers — X-Content-Type-Options, X-Frame-Options, etc.
/// 8. `RequestBodyLimitLayer` — rejects oversized bodies
/// 9. `CompressionLayer` (innermost) — compresses response body
fn apply_middleware_stack(router: Router, cors: CorsLayer, http_request_logs: bool) -> Router {
    let router = router
        .layer(CompressionLayer::new())
        .layer(RequestBodyLimitLayer::new(REQUEST_BODY_LIMIT))
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("x-frame-options"),
            HeaderValue::from_static("deny"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(cors);

    let router = apply_http_trace_layer(router, http_request_logs);

    router
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE, header::SET_COOKIE]))
        .layer(CatchPanicLayer::new())
}

fn apply_http_trace_layer(router: Router, enabled: bool) -> Router {
    if !enabled {
        return router;
    }
    let http_trace = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_owned();
            let user_agent = request
                .headers()
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("-")
                .to_owned();
            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
                user_agent = %user_agent,
            )
        })
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));
    router.layer(http_trace)
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "protocol": agentim_protocol::PROTOCOL_VERSION,
        "clients": state.registry.client_count().await,
        "gateways": state.registry.gateway_count_total().await,
    }))
}

async fn ws_client_upgrade_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if let Some(rejection) = reject_cross_origin(&headers, addr) {
        return rejection;
    }
    ws.on_upgrade(move |socket| ws::handle_client_connection(socket, state)).into_response()
}

async fn ws_gateway_upgrade_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    ConnectInfo(addr): ConnectInfo<std::net::SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    if let Some(rejection) = reject_cross_origin(&headers, addr) {
        return rejection;
    }
    ws.on_upgrade(move |socket| ws::handle_gateway_connection(socket, state)).into_response()
}

/// CSWSH protection (§6): browsers always send `Origin` on a cross-origin
/// request; non-browser clients (the gateway daemon, SDKs) typically omit
/// it, so an absent header is allowed through.
fn reject_cross_origin(headers: &HeaderMap, addr: std::net::SocketAddr) -> Option<axum::response::Response> {
    let origin = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok())?;
    let host = headers.get(header::HOST).and_then(|v| v.to_str().ok()).unwrap_or("");
    if is_same_origin(origin, host) {
        return None;
    }
    warn!(origin, host, remote = %addr, "rejected cross-origin WebSocket upgrade");
    Some((StatusCode::FORBIDDEN, "cross-origin WebSocket connections are not allowed").into_response())
}

/// Compares a WebSocket `Origin` header against the request `Host` header,
/// treating `localhost` / `127.0.0.1` / `::1` (and `*.localhost`) as
/// interchangeable.
fn is_same_origin(origin: &str, host: &str) -> bool {
    let origin_host = origin.split("://").nth(1).unwrap_or(origin).split('/').next().unwrap_or("");

    fn strip_port(h: &str) -> &str {
        if h.starts_with('[') {
            h.rsplit_once("]:").map_or(h, |(addr, _)| addr).trim_start_matches('[').trim_end_matches(']')
        } else {
            h.rsplit_once(':').map_or(h, |(addr, _)| addr)
        }
    }
    fn get_port(h: &str) -> Option<&str> {
        if h.starts_with('[') {
            h.rsplit_once("]:").map(|(_, p)| p)
        } else {
            h.rsplit_once(':').map(|(_, p)| p)
        }
    }

    let origin_port = get_port(origin_host);
    let host_port = get_port(host);
    let oh = strip_port(origin_host);
    let hh = strip_port(host);

    let is_loopback = |h: &str| matches!(h, "localhost" | "127.0.0.1" | "::1") || h.ends_with(".localhost");

    (oh == hh || (is_loopback(oh) && is_loopback(hh))) && origin_port == host_port
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_host_and_port_matches() {
        assert!(is_same_origin("https://hub.example.com:8787", "hub.example.com:8787"));
    }

    #[test]
    fn different_host_is_rejected() {
        assert!(!is_same_origin("https://evil.example.com", "hub.example.com"));
    }

    #[test]
    fn loopback_variants_are_interchangeable() {
        assert!(is_same_origin("http://localhost:8787", "127.0.0.1:8787"));
    }

    #[test]
    fn mismatched_port_is_rejected() {
        assert!(!is_same_origin("http://localhost:1", "localhost:2"));
    }
}
