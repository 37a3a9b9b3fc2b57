//! HTTP surface: one axum router multiplexing the VLESS WebSocket engine,
//! the H2 tunnel (v1/v2), the router/load-balancer collaborator, and the
//! `/info` diagnostics endpoint over a single listener.
//!
//! A configured route-table prefix always takes priority over the tunnel
//! engines, so operators keep tunnel traffic off any path they've handed to
//! the router.

use crate::config::GatewayConfig;
use crate::dns::Resolver;
use crate::h2tunnel::rendezvous::RendezvousTable;
use crate::h2tunnel;
use crate::router;
use crate::vless;
use axum::body::Body;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state handed to every axum handler. Cheap to clone: the
/// expensive bits (`Resolver`, `RendezvousTable`) are behind `Arc`, and
/// `reqwest::Client` is itself `Arc`-backed internally.
#[derive(Clone)]
pub struct AppState {
    pub config: GatewayConfig,
    pub resolver: Arc<Resolver>,
    pub rendezvous: Arc<RendezvousTable>,
    pub http_client: reqwest::Client,
    pub start: Instant,
}

impl AppState {
    pub fn new(config: GatewayConfig, resolver: Resolver) -> Self {
        AppState {
            config,
            resolver: Arc::new(resolver),
            rendezvous: Arc::new(RendezvousTable::new()),
            http_client: reqwest::Client::new(),
            start: Instant::now(),
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/info", get(info))
        .route("/", get(get_dispatch).post(post_dispatch))
        .route("/*rest", get(get_dispatch).post(post_dispatch))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct InfoResponse {
    hostname: String,
    port: u16,
    version: &'static str,
    active_tunnels: usize,
    uptime_secs: u64,
}

async fn info(State(state): State<AppState>) -> Json<InfoResponse> {
    Json(InfoResponse {
        hostname: state.config.hostname.clone(),
        port: state.config.port,
        version: env!("CARGO_PKG_VERSION"),
        active_tunnels: state.rendezvous.len(),
        uptime_secs: state.start.elapsed().as_secs(),
    })
}

async fn get_dispatch(State(state): State<AppState>, req: Request<Body>) -> Response {
    let (mut parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();

    if state.config.routes.has_match(&path) {
        return if is_websocket_upgrade(&parts.headers) {
            match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
                Ok(ws) => router::forward_websocket(ws, &path, &state.config.routes).await,
                Err(rejection) => rejection.into_response(),
            }
        } else {
            router::forward(
                parts.method,
                path_and_query(&parts),
                parts.headers,
                body,
                &state.config.routes,
                &state.http_client,
            )
            .await
        };
    }

    if h2tunnel::tunnel_id(&parts.headers).is_some() {
        return h2tunnel::v2::handle_get(parts.headers, State(state)).await;
    }

    if is_websocket_upgrade(&parts.headers) {
        return match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
            Ok(ws) => vless::vless_ws(ws, parts.headers, State(state)).await,
            Err(rejection) => rejection.into_response(),
        };
    }

    (StatusCode::NOT_FOUND, "no route configured").into_response()
}

async fn post_dispatch(State(state): State<AppState>, req: Request<Body>) -> Response {
    let (parts, body) = req.into_parts();
    let path = parts.uri.path().to_string();

    if state.config.routes.has_match(&path) {
        return router::forward(
            parts.method,
            path_and_query(&parts),
            parts.headers,
            body,
            &state.config.routes,
            &state.http_client,
        )
        .await;
    }

    if h2tunnel::tunnel_id(&parts.headers).is_some() {
        return h2tunnel::v2::handle_post(parts.headers, State(state), body).await;
    }

    if parts.headers.contains_key("x-target-host") {
        return h2tunnel::v1::handle_v1(parts.headers, State(state), body).await;
    }

    (StatusCode::BAD_REQUEST, "no tunnel headers and no route configured").into_response()
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(axum::http::header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

fn path_and_query(parts: &axum::http::request::Parts) -> &str {
    parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or_else(|| parts.uri.path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_websocket_upgrade() {
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::UPGRADE, "websocket".parse().unwrap());
        assert!(is_websocket_upgrade(&headers));

        let other = HeaderMap::new();
        assert!(!is_websocket_upgrade(&other));
    }
}
