//! H2 TCP Tunnel engine ("TwoPass"): an HTTP POST (v1), or a POST+GET pair
//! keyed by a tunnel id (v2), dials a target TCP endpoint and streams bytes
//! in both directions over the HTTP bodies.

pub mod rendezvous;
pub mod v1;
pub mod v2;

use crate::{Error, Result};
use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use regex::Regex;
use std::net::SocketAddr;
use std::sync::OnceLock;
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::warn;

use crate::dns::Resolver;

/// Resolves `host` (if not already a literal IP) and dials the target TCP
/// endpoint, applying the same socket tuning as the VLESS bridge.
pub async fn dial_target(host: &str, port: u16, resolver: &Resolver) -> Result<TcpStream> {
    let ip = match host.trim_start_matches('[').trim_end_matches(']').parse() {
        Ok(ip) => ip,
        Err(_) => resolver.resolve(host).await?,
    };
    let stream = TcpStream::connect(SocketAddr::new(ip, port))
        .await
        .map_err(|e| Error::dial_failed(e.to_string()))?;
    crate::common::net::configure_tcp_stream(&stream);
    Ok(stream)
}

const READ_CHUNK: usize = 16 * 1024;

fn target_host_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9\-.:\[\]]+$").expect("valid regex"))
}

/// Validates `Authorization: Basic <PASSWORD>` with a constant-time
/// comparison against the configured password.
pub fn check_auth(headers: &HeaderMap, password: &str) -> Result<()> {
    let expected = format!("Basic {password}");
    let actual = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(Error::Unauthorized)?;

    if actual.len() != expected.len() || !bool::from(actual.as_bytes().ct_eq(expected.as_bytes())) {
        return Err(Error::Unauthorized);
    }
    Ok(())
}

/// Validates `X-Target-Host` and `X-Target-Port`, returning the trimmed,
/// lowercased host and the numeric port.
pub fn validate_target(headers: &HeaderMap) -> Result<(String, u16)> {
    let host = headers
        .get("x-target-host")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::bad_request("missing X-Target-Host"))?
        .trim()
        .to_lowercase();

    if host.is_empty() || !target_host_pattern().is_match(&host) {
        return Err(Error::bad_request("invalid X-Target-Host"));
    }

    let port: u16 = headers
        .get("x-target-port")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::bad_request("missing X-Target-Port"))?
        .parse()
        .map_err(|_| Error::bad_request("invalid X-Target-Port"))?;

    if port == 0 {
        return Err(Error::bad_request("invalid X-Target-Port"));
    }

    Ok((host, port))
}

pub fn tunnel_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-tunnel-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// Applies the streaming-reply headers shared by v1 and v2 GET responses.
pub fn streaming_headers(headers: &mut HeaderMap) {
    headers.insert("content-type", HeaderValue::from_static("application/grpc"));
    headers.insert("cache-control", HeaderValue::from_static("no-cache"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
}

/// Wraps an `AsyncRead` as a hyper/axum streaming `Body`, chunked at
/// `READ_CHUNK` bytes.
pub fn stream_body<R>(reader: R) -> Body
where
    R: AsyncRead + Unpin + Send + 'static,
{
    Body::from_stream(read_half_stream(reader))
}

fn read_half_stream<R>(reader: R) -> impl Stream<Item = std::io::Result<Bytes>> + Send + 'static
where
    R: AsyncRead + Unpin + Send + 'static,
{
    futures_util::stream::unfold(reader, |mut reader| async move {
        let mut buf = vec![0u8; READ_CHUNK];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), reader))
            }
            Err(e) => Some((Err(e), reader)),
        }
    })
}

/// Pipes an inbound request body into a TCP write half until the body ends
/// or a write fails. Failures are logged but never surface to the caller:
/// by the time this runs the response may already be streaming.
pub async fn pipe_body_into<W>(body: Body, mut sink: W)
where
    W: AsyncWrite + Unpin,
{
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if let Err(e) = sink.write_all(&bytes).await {
                    warn!("H2 tunnel write to target failed: {e}");
                    break;
                }
            }
            Err(e) => {
                warn!("H2 tunnel request body error: {e}");
                break;
            }
        }
    }
    let _ = sink.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    fn headers_with(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut h = HeaderMap::new();
        for (k, v) in pairs {
            h.insert(
                axum::http::HeaderName::from_bytes(k.as_bytes()).unwrap(),
                HeaderValue::from_str(v).unwrap(),
            );
        }
        h
    }

    #[test]
    fn test_check_auth() {
        let headers = headers_with(&[("authorization", "Basic s3cret")]);
        assert!(check_auth(&headers, "s3cret").is_ok());
        assert!(check_auth(&headers, "wrong").is_err());

        let missing = HeaderMap::new();
        assert!(check_auth(&missing, "s3cret").is_err());
    }

    #[test]
    fn test_validate_target() {
        let headers = headers_with(&[("x-target-host", " Example.COM "), ("x-target-port", "443")]);
        let (host, port) = validate_target(&headers).unwrap();
        assert_eq!(host, "example.com");
        assert_eq!(port, 443);

        let bad_port = headers_with(&[("x-target-host", "example.com"), ("x-target-port", "0")]);
        assert!(validate_target(&bad_port).is_err());

        let bad_host = headers_with(&[("x-target-host", "exa mple.com"), ("x-target-port", "80")]);
        assert!(validate_target(&bad_host).is_err());
    }

    #[test]
    fn test_tunnel_id() {
        let headers = headers_with(&[("x-tunnel-id", "t1")]);
        assert_eq!(tunnel_id(&headers), Some("t1".to_string()));
        assert_eq!(tunnel_id(&HeaderMap::new()), None);
    }
}
