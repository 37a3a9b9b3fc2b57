//! UDP-to-DoH rewriter: when the VLESS command is UDP and port 53, DNS
//! queries are not sent over a raw UDP socket (the host sandbox forbids
//! them) but forwarded as DNS-over-HTTPS POSTs instead.

use crate::{Error, Result};
use reqwest::Client;

pub const DNS_PORT: u16 = 53;

/// Forward a single raw DNS query message to the configured DoH endpoint
/// and return the raw DNS response message bytes.
pub async fn forward_dns_query(client: &Client, doh_url: &str, query: &[u8]) -> Result<Vec<u8>> {
    let response = client
        .post(doh_url)
        .header("Content-Type", "application/dns-message")
        .header("Accept", "application/dns-message")
        .body(query.to_vec())
        .send()
        .await
        .map_err(|e| Error::dial_failed(format!("DoH request failed: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::upstream_io(format!(
            "DoH endpoint returned {}",
            response.status()
        )));
    }

    response
        .bytes()
        .await
        .map(|b| b.to_vec())
        .map_err(|e| Error::upstream_io(format!("failed reading DoH response body: {e}")))
}

/// Frame a DNS response as a VLESS UDP response: a 2-byte big-endian length
/// prefix followed by the payload.
pub fn frame_udp_response(payload: &[u8]) -> Result<Vec<u8>> {
    let len: u16 = payload
        .len()
        .try_into()
        .map_err(|_| Error::protocol("DoH response too large to frame"))?;

    let mut framed = Vec::with_capacity(2 + payload.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}
