//! Minimal WebSocket client handshake and frame codec used to proxy a
//! client-facing WebSocket upgrade to a plain-HTTP backend. Hand-rolled
//! rather than pulled in from a crate, matching how this codebase already
//! prefers to own its wire-level WebSocket handling on the outbound side.

use crate::{Error, Result};
use axum::http::StatusCode;
use base64::Engine;
use rand::RngCore;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const OPCODE_TEXT: u8 = 0x1;
const OPCODE_BINARY: u8 = 0x2;
const OPCODE_CLOSE: u8 = 0x8;

/// Caps how much of a non-101 backend response body is read back to the
/// client; a misbehaving backend streaming an unbounded body shouldn't be
/// able to stall the handshake indefinitely.
const MAX_REJECTION_BODY: usize = 64 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum BackendMessage {
    Text(Vec<u8>),
    Binary(Vec<u8>),
    Close,
}

/// Outcome of a client-role WebSocket handshake attempt.
pub enum HandshakeOutcome {
    /// The backend replied `101 Switching Protocols`; the stream is now
    /// ready to carry WebSocket frames.
    Upgraded,
    /// The backend replied with some other status; its status and body are
    /// carried through so the caller can report them to the client verbatim.
    Rejected { status: StatusCode, body: Vec<u8> },
}

/// Performs the client-role opening handshake against `host`/`path` over an
/// already-connected TCP stream.
pub async fn handshake(stream: &mut TcpStream, host: &str, path: &str) -> Result<HandshakeOutcome> {
    let mut key_bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut key_bytes);
    let key = base64::engine::general_purpose::STANDARD.encode(key_bytes);

    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: {host}\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await?;

    let mut reader = BufReader::new(stream);
    let mut status_line = String::new();
    read_line_crlf(&mut reader, &mut status_line).await?;
    let status = parse_status_code(&status_line)?;

    let mut content_length: Option<usize> = None;
    loop {
        let mut line = String::new();
        read_line_crlf(&mut reader, &mut line).await?;
        if line.trim().is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().ok();
            }
        }
    }

    if status == StatusCode::SWITCHING_PROTOCOLS {
        return Ok(HandshakeOutcome::Upgraded);
    }

    let mut body = vec![0u8; content_length.unwrap_or(0).min(MAX_REJECTION_BODY)];
    if !body.is_empty() {
        let _ = reader.read_exact(&mut body).await;
    }

    Ok(HandshakeOutcome::Rejected { status, body })
}

/// Parses the numeric status code out of an HTTP status line
/// (`HTTP/1.1 404 Not Found`), defaulting to 502 if it's malformed.
fn parse_status_code(status_line: &str) -> Result<StatusCode> {
    let code = status_line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| Error::upstream_io(format!("malformed status line: {}", status_line.trim())))?;

    code.parse::<u16>()
        .ok()
        .and_then(|c| StatusCode::from_u16(c).ok())
        .ok_or_else(|| Error::upstream_io(format!("malformed status line: {}", status_line.trim())))
}

/// Tiny CRLF-terminated line reader so the handshake doesn't need a full
/// HTTP parser for a handful of header lines.
async fn read_line_crlf<R: AsyncRead + Unpin>(reader: &mut R, out: &mut String) -> Result<()> {
    let mut byte = [0u8; 1];
    loop {
        reader.read_exact(&mut byte).await?;
        if byte[0] == b'\n' {
            if out.ends_with('\r') {
                out.pop();
            }
            return Ok(());
        }
        out.push(byte[0] as char);
    }
}

/// Read one backend frame (backend frames are sent unmasked per RFC 6455).
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<BackendMessage> {
    let mut header = [0u8; 2];
    reader.read_exact(&mut header).await?;

    let opcode = header[0] & 0x0f;
    let masked = header[1] & 0x80 != 0;
    let mut len = (header[1] & 0x7f) as u64;

    if len == 126 {
        let mut ext = [0u8; 2];
        reader.read_exact(&mut ext).await?;
        len = u16::from_be_bytes(ext) as u64;
    } else if len == 127 {
        let mut ext = [0u8; 8];
        reader.read_exact(&mut ext).await?;
        len = u64::from_be_bytes(ext);
    }

    let mask = if masked {
        let mut m = [0u8; 4];
        reader.read_exact(&mut m).await?;
        Some(m)
    } else {
        None
    };

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    if let Some(mask) = mask {
        for (i, b) in payload.iter_mut().enumerate() {
            *b ^= mask[i % 4];
        }
    }

    match opcode {
        OPCODE_TEXT => Ok(BackendMessage::Text(payload)),
        OPCODE_BINARY => Ok(BackendMessage::Binary(payload)),
        OPCODE_CLOSE => Ok(BackendMessage::Close),
        _ => Ok(BackendMessage::Binary(payload)),
    }
}

/// Write one masked client->backend frame (client frames must be masked).
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, opcode: u8, payload: &[u8]) -> Result<()> {
    let mut frame = Vec::with_capacity(payload.len() + 14);
    frame.push(0x80 | opcode);

    let len = payload.len();
    if len < 126 {
        frame.push(0x80 | len as u8);
    } else if len <= u16::MAX as usize {
        frame.push(0x80 | 126);
        frame.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        frame.push(0x80 | 127);
        frame.extend_from_slice(&(len as u64).to_be_bytes());
    }

    let mut mask = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut mask);
    frame.extend_from_slice(&mask);

    let masked: Vec<u8> = payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]).collect();
    frame.extend_from_slice(&masked);

    writer.write_all(&frame).await?;
    Ok(())
}

pub const OPCODE_BINARY_FRAME: u8 = OPCODE_BINARY;
pub const OPCODE_TEXT_FRAME: u8 = OPCODE_TEXT;
pub const OPCODE_CLOSE_FRAME: u8 = OPCODE_CLOSE;
