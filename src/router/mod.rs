//! The router/load-balancer collaborator: prefix-match a request path
//! against a small JSON-configured table, pick a backend at random,
//! rewrite the URL, and forward the request (or proxy a WebSocket upgrade).
//!
//! Grounded on the inbound HTTP proxy's request-forwarding shape
//! (parse -> dial/connect -> relay), generalized from a raw-socket proxy to
//! an HTTP-client-based reverse proxy since the backend here is named by
//! URL rather than discovered per-connection.

mod ws_client;

use crate::{Error, Result};
use axum::body::Body;
use axum::extract::ws::{Message, WebSocketUpgrade};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use rand::Rng;
use serde::Deserialize;
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct RouteEntry {
    pub path: String,
    pub backends: Vec<String>,
}

/// Ordered `{path_prefix, [backend_url]}` table; first matching prefix
/// wins, longest-prefix ordering is not required.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn empty() -> Self {
        RouteTable { entries: Vec::new() }
    }

    pub fn parse(json: &str) -> Result<Self> {
        let entries: Vec<RouteEntry> =
            serde_json::from_str(json).map_err(|e| Error::config(format!("invalid CONFIG route table: {e}")))?;
        Ok(RouteTable { entries })
    }

    fn find(&self, path: &str) -> Option<&RouteEntry> {
        self.entries.iter().find(|e| path.starts_with(e.path.as_str()))
    }

    /// Whether a configured route prefix matches `path`, used by the
    /// top-level dispatcher to decide between the router and the tunnel
    /// engines before doing any actual forwarding work.
    pub fn has_match(&self, path: &str) -> bool {
        self.find(path).is_some()
    }
}

fn pick_backend(entry: &RouteEntry) -> Result<&str> {
    if entry.backends.is_empty() {
        return Err(Error::internal(format!("route {} has no backends", entry.path)));
    }
    let idx = rand::thread_rng().gen_range(0..entry.backends.len());
    Ok(&entry.backends[idx])
}

fn rewrite_url(backend: &str, prefix: &str, path: &str, query: Option<&str>) -> String {
    let remainder = &path[prefix.len()..];
    let mut combined = format!("{}{}", backend.trim_end_matches('/'), remainder);
    combined = collapse_duplicate_slashes(&combined);
    if let Some(q) = query {
        combined.push('?');
        combined.push_str(q);
    }
    combined
}

/// Collapses `//` in the path portion of a URL while leaving the
/// scheme's `://` untouched.
fn collapse_duplicate_slashes(url: &str) -> String {
    let split_at = url.find("://").map(|i| i + 3).unwrap_or(0);
    let (head, tail) = url.split_at(split_at);
    let path_start = tail.find('/').unwrap_or(tail.len());
    let (authority, path) = tail.split_at(path_start);

    let mut collapsed = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if last_was_slash {
                continue;
            }
            last_was_slash = true;
        } else {
            last_was_slash = false;
        }
        collapsed.push(c);
    }

    format!("{head}{authority}{collapsed}")
}

/// Forward any non-tunnel request to the configured backend, or respond
/// `404` if no route matches.
pub async fn forward(
    method: Method,
    path_and_query: &str,
    headers: HeaderMap,
    body: Body,
    routes: &RouteTable,
    http_client: &reqwest::Client,
) -> Response {
    let (path, query) = match path_and_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_and_query, None),
    };

    let Some(entry) = routes.find(path) else {
        return (StatusCode::NOT_FOUND, "no route configured").into_response();
    };

    let backend = match pick_backend(entry) {
        Ok(b) => b,
        Err(e) => return e.into_response(),
    };

    let target_url = rewrite_url(backend, &entry.path, path, query);

    match forward_http(method, &target_url, headers, body, http_client).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

async fn forward_http(method: Method, url: &str, headers: HeaderMap, body: Body, client: &reqwest::Client) -> Result<Response> {
    let body_bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|e| Error::bad_request(format!("failed reading request body: {e}")))?;

    let mut request = client.request(method, url).body(body_bytes.to_vec());
    for (name, value) in headers.iter() {
        if name == axum::http::header::HOST {
            continue;
        }
        request = request.header(name, value);
    }

    let upstream = request
        .send()
        .await
        .map_err(|e| Error::dial_failed(format!("backend request failed: {e}")))?;

    let status = upstream.status();
    let mut response_headers = HeaderMap::new();
    for (name, value) in upstream.headers().iter() {
        response_headers.insert(name, value.clone());
    }
    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| Error::upstream_io(format!("failed reading backend response: {e}")))?;

    let mut response = (status, bytes).into_response();
    response.headers_mut().extend(response_headers);
    Ok(response)
}

/// Proxy a client WebSocket upgrade to a backend matched by the route
/// table. The backend connection speaks minimal hand-rolled client-role
/// WebSocket framing (see `ws_client`); a non-101 backend reply is
/// propagated to the client with the same status code and body.
pub async fn forward_websocket(ws: WebSocketUpgrade, path: &str, routes: &RouteTable) -> Response {
    let Some(entry) = routes.find(path) else {
        return (StatusCode::NOT_FOUND, "no route configured").into_response();
    };
    let backend = match pick_backend(entry) {
        Ok(b) => b,
        Err(e) => return e.into_response(),
    };
    let target_url = rewrite_url(backend, &entry.path, path, None);

    let (host, port, backend_path) = match parse_ws_target(&target_url) {
        Ok(parts) => parts,
        Err(e) => return e.into_response(),
    };

    let mut tcp = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(e) => {
            return (
                StatusCode::BAD_GATEWAY,
                format!("Backend connection error: {e}"),
            )
                .into_response()
        }
    };

    match ws_client::handshake(&mut tcp, &host, &backend_path).await {
        Ok(ws_client::HandshakeOutcome::Upgraded) => {}
        Ok(ws_client::HandshakeOutcome::Rejected { status, body }) => {
            return (status, body).into_response();
        }
        Err(e) => {
            return (StatusCode::BAD_GATEWAY, format!("Backend connection error: {e}")).into_response();
        }
    }

    ws.on_upgrade(move |socket| bridge_websocket(socket, tcp))
}

fn parse_ws_target(url: &str) -> Result<(String, u16, String)> {
    let without_scheme = url
        .strip_prefix("ws://")
        .or_else(|| url.strip_prefix("http://"))
        .or_else(|| url.strip_prefix("wss://"))
        .or_else(|| url.strip_prefix("https://"))
        .ok_or_else(|| Error::config(format!("unsupported backend scheme in {url}")))?;

    let (authority, path) = match without_scheme.find('/') {
        Some(idx) => (&without_scheme[..idx], &without_scheme[idx..]),
        None => (without_scheme, "/"),
    };

    let (host, port) = match authority.rsplit_once(':') {
        Some((h, p)) => (h.to_string(), p.parse().unwrap_or(80)),
        None => (authority.to_string(), 80),
    };

    Ok((host, port, path.to_string()))
}

async fn bridge_websocket(socket: axum::extract::ws::WebSocket, backend: TcpStream) {
    use futures_util::{SinkExt, StreamExt};

    let (mut client_tx, mut client_rx) = socket.split();
    let (mut backend_rx, mut backend_tx) = backend.into_split();

    let client_to_backend = async {
        while let Some(Ok(message)) = client_rx.next().await {
            let (opcode, payload) = match message {
                Message::Binary(data) => (ws_client::OPCODE_BINARY_FRAME, data),
                Message::Text(text) => (ws_client::OPCODE_TEXT_FRAME, text.into_bytes()),
                Message::Close(_) => break,
                _ => continue,
            };
            if ws_client::write_frame(&mut backend_tx, opcode, &payload).await.is_err() {
                break;
            }
        }
        let _ = ws_client::write_frame(&mut backend_tx, ws_client::OPCODE_CLOSE_FRAME, &[]).await;
    };

    let backend_to_client = async {
        loop {
            match ws_client::read_frame(&mut backend_rx).await {
                Ok(ws_client::BackendMessage::Binary(data)) => {
                    if client_tx.send(Message::Binary(data)).await.is_err() {
                        break;
                    }
                }
                Ok(ws_client::BackendMessage::Text(data)) => {
                    if let Ok(text) = String::from_utf8(data) {
                        if client_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
                Ok(ws_client::BackendMessage::Close) | Err(_) => break,
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::join!(client_to_backend, backend_to_client);
    debug!("websocket proxy session ended");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_parse_and_find() {
        let json = r#"[{"path": "/api", "backends": ["http://b1:8080"]}]"#;
        let table = RouteTable::parse(json).unwrap();
        assert!(table.find("/api/users").is_some());
        assert!(table.find("/other").is_none());
    }

    #[test]
    fn test_rewrite_url_collapses_slashes() {
        let url = rewrite_url("http://backend:8080/base/", "/api", "/api//users", None);
        assert_eq!(url, "http://backend:8080/base/users");
    }

    #[test]
    fn test_rewrite_url_with_query() {
        let url = rewrite_url("http://backend:8080", "/api", "/api/users", Some("id=1"));
        assert_eq!(url, "http://backend:8080/users?id=1");
    }

    #[test]
    fn test_parse_ws_target() {
        let (host, port, path) = parse_ws_target("ws://backend.local:9001/chat").unwrap();
        assert_eq!(host, "backend.local");
        assert_eq!(port, 9001);
        assert_eq!(path, "/chat");
    }
}
