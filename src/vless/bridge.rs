//! WebSocket <-> TCP bridge: the per-connection pump loop pair that moves
//! bytes between the client's WebSocket and the dialed target socket, plus
//! the UDP-to-DoH detour for port 53.
//!
//! The bridge is a pair of independently-run pump loops rather than a
//! single byte-stream copy, because the inbound side here is
//! message-oriented (`axum::extract::ws::WebSocket`), not an
//! `AsyncRead`/`AsyncWrite` stream.

use super::doh::{forward_dns_query, frame_udp_response, DNS_PORT};
use super::header::{parse_header, Command, VlessHeader};
use crate::common::primitives::decode_base64url;
use crate::dns::Resolver;
use crate::{Error, Result};
use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Per-direction idle timeout; resolves the open question in the design
/// notes with a conservative default.
const IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const READ_CHUNK: usize = 16 * 1024;

/// Everything the bridge needs to parse a header and reach the outside
/// world; kept deliberately small so tests can construct it without an
/// `AppState`.
pub struct ConduitContext<'a> {
    pub user_id: &'a str,
    pub resolver: &'a Resolver,
    pub doh_url: &'a str,
    pub doh_client: &'a Client,
}

/// Extract the first VLESS chunk from the `Sec-WebSocket-Protocol` early-data
/// header, if present.
pub fn early_data_from_header(sec_websocket_protocol: Option<&str>) -> Result<Option<Vec<u8>>> {
    match sec_websocket_protocol {
        Some(v) if !v.is_empty() => Ok(Some(decode_base64url(v)?)),
        _ => Ok(None),
    }
}

/// Drive one full VLESS session to completion: obtain the first chunk,
/// parse the header, dial or redirect to DoH, and pump until either side
/// closes. Errors are logged; this function never propagates a panic to the
/// caller because by the time it runs the HTTP upgrade has already
/// succeeded.
pub async fn run_conduit(mut socket: WebSocket, early_chunk: Option<Vec<u8>>, ctx: ConduitContext<'_>) {
    let first_chunk = match obtain_first_chunk(&mut socket, early_chunk).await {
        Ok(chunk) => chunk,
        Err(e) => {
            debug!("VLESS session closed before first chunk: {e}");
            let _ = socket.close().await;
            return;
        }
    };

    let header = match parse_header(&first_chunk, ctx.user_id) {
        Ok(h) => h,
        Err(e) => {
            // Header parse failures close the socket silently: no preamble
            // has been sent, matching the source's early-abort behavior.
            debug!("VLESS header parse failed: {e}");
            let _ = socket.close().await;
            return;
        }
    };

    let initial_payload = &first_chunk[header.raw_data_offset..];

    match header.command {
        Command::Tcp => run_tcp_bridge(socket, &header, initial_payload, ctx).await,
        Command::Udp => run_dns_bridge(socket, &header, initial_payload, ctx).await,
    }
}

async fn obtain_first_chunk(socket: &mut WebSocket, early_chunk: Option<Vec<u8>>) -> Result<Vec<u8>> {
    if let Some(chunk) = early_chunk {
        if !chunk.is_empty() {
            return Ok(chunk);
        }
    }

    match socket.recv().await {
        Some(Ok(Message::Binary(data))) => Ok(data),
        Some(Ok(Message::Text(text))) => Ok(text.into_bytes()),
        Some(Ok(_)) => Err(Error::protocol("first WebSocket message was not data")),
        Some(Err(e)) => Err(Error::upstream_io(format!("WebSocket error before first chunk: {e}"))),
        None => Err(Error::protocol("WebSocket closed before first chunk")),
    }
}

async fn run_tcp_bridge(socket: WebSocket, header: &VlessHeader, initial_payload: &[u8], ctx: ConduitContext<'_>) {
    let target_addr = match resolve_target(header, ctx.resolver).await {
        Ok(addr) => addr,
        Err(e) => {
            warn!("VLESS target resolve/dial failed for {}: {e}", header.host());
            let mut socket = socket;
            let _ = socket.close().await;
            return;
        }
    };

    let tcp = match TcpStream::connect(target_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("VLESS TCP dial to {target_addr} failed: {e}");
            let mut socket = socket;
            let _ = socket.close().await;
            return;
        }
    };
    crate::common::net::configure_tcp_stream(&tcp);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (mut tcp_rx, mut tcp_tx) = tcp.into_split();

    if ws_tx.send(Message::Binary(header.response_preamble().to_vec())).await.is_err() {
        return;
    }

    if !initial_payload.is_empty() {
        if let Err(e) = tcp_tx.write_all(initial_payload).await {
            warn!("VLESS initial payload write failed: {e}");
            return;
        }
    }

    let client_to_target = async {
        loop {
            let next = tokio::time::timeout(IDLE_TIMEOUT, ws_rx.next()).await;
            let message = match next {
                Ok(Some(Ok(m))) => m,
                _ => break,
            };
            match message {
                Message::Binary(data) => {
                    if tcp_tx.write_all(&data).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => continue,
            }
        }
        let _ = tcp_tx.shutdown().await;
    };

    let target_to_client = async {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let read = tokio::time::timeout(IDLE_TIMEOUT, tcp_rx.read(&mut buf)).await;
            let n = match read {
                Ok(Ok(n)) => n,
                _ => break,
            };
            if n == 0 {
                break;
            }
            if ws_tx.send(Message::Binary(buf[..n].to_vec())).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    };

    tokio::join!(client_to_target, target_to_client);
}

async fn resolve_target(header: &VlessHeader, resolver: &Resolver) -> Result<SocketAddr> {
    let ip = match header.address.to_ip() {
        Some(ip) => ip,
        None => resolver.resolve(&header.host()).await?,
    };
    Ok(SocketAddr::new(ip, header.port))
}

async fn run_dns_bridge(socket: WebSocket, header: &VlessHeader, initial_payload: &[u8], ctx: ConduitContext<'_>) {
    if header.port != DNS_PORT {
        debug!("rejecting VLESS UDP command to non-DNS port {}", header.port);
        let mut socket = socket;
        let _ = socket.close().await;
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    if ws_tx.send(Message::Binary(header.response_preamble().to_vec())).await.is_err() {
        return;
    }

    if !initial_payload.is_empty() {
        if !relay_one_query(&mut ws_tx, initial_payload, ctx.doh_client, ctx.doh_url).await {
            let _ = ws_tx.close().await;
            return;
        }
    }

    loop {
        let next = tokio::time::timeout(IDLE_TIMEOUT, ws_rx.next()).await;
        let message = match next {
            Ok(Some(Ok(m))) => m,
            _ => break,
        };
        let query = match message {
            Message::Binary(data) => data,
            Message::Close(_) => break,
            _ => continue,
        };
        if !relay_one_query(&mut ws_tx, &query, ctx.doh_client, ctx.doh_url).await {
            break;
        }
    }

    let _ = ws_tx.close().await;
}

async fn relay_one_query(
    ws_tx: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    query: &[u8],
    doh_client: &Client,
    doh_url: &str,
) -> bool {
    let response = match forward_dns_query(doh_client, doh_url, query).await {
        Ok(r) => r,
        Err(e) => {
            warn!("DoH forward failed: {e}");
            return false;
        }
    };
    let framed = match frame_udp_response(&response) {
        Ok(f) => f,
        Err(e) => {
            warn!("failed to frame DoH response: {e}");
            return false;
        }
    };
    ws_tx.send(Message::Binary(framed)).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_early_data_absent() {
        assert!(early_data_from_header(None).unwrap().is_none());
        assert!(early_data_from_header(Some("")).unwrap().is_none());
    }

    #[test]
    fn test_early_data_present() {
        use base64::Engine;
        let raw = b"vless-early-chunk";
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        let url_safe = encoded.replace('+', "-").replace('/', "_");
        let chunk = early_data_from_header(Some(&url_safe)).unwrap().unwrap();
        assert_eq!(chunk, raw);
    }
}
