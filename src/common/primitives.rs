//! Shared primitives: URL-safe base64 decode and UUID byte<->string conversion.
//!
//! These are the small, protocol-agnostic building blocks both the VLESS
//! header parser and the WebSocket early-data path rely on.

use crate::{Error, Result};

const HEX: &[u8; 16] = b"0123456789abcdef";

/// Render 16 raw bytes as a lowercase hyphenated UUID string
/// (`xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`) using a byte->hex table, matching
/// the wire format VLESS clients send the configured user id in.
pub fn uuid_bytes_to_string(bytes: &[u8; 16]) -> String {
    let mut out = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            out.push('-');
        }
        out.push(HEX[(b >> 4) as usize] as char);
        out.push(HEX[(b & 0x0f) as usize] as char);
    }
    out
}

/// Decode a URL-safe, padding-tolerant base64 string as carried in the
/// `Sec-WebSocket-Protocol` early-data header: `-` substitutes `+`, `_`
/// substitutes `/`, and trailing `=` padding may be absent.
pub fn decode_base64url(input: &str) -> Result<Vec<u8>> {
    let mut normalized: String = input
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();

    let remainder = normalized.len() % 4;
    if remainder != 0 {
        normalized.push_str(&"=".repeat(4 - remainder));
    }

    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(normalized.as_bytes())
        .map_err(|e| Error::parse(format!("invalid base64url early data: {e}")))
}

/// Minimal sequential reader over a borrowed byte slice, used by the VLESS
/// header parser to walk the first chunk without copying it.
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteCursor { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| Error::parse("unexpected end of buffer"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        let hi = self.read_u8()?;
        let lo = self.read_u8()?;
        Ok(u16::from_be_bytes([hi, lo]))
    }

    pub fn read_exact(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::parse("unexpected end of buffer"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.read_exact(n).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_cursor() {
        let buf = [1u8, 2, 0, 3, 4, 5];
        let mut c = ByteCursor::new(&buf);
        assert_eq!(c.read_u8().unwrap(), 1);
        assert_eq!(c.read_u16_be().unwrap(), 2 << 8);
        assert_eq!(c.read_exact(2).unwrap(), &[3, 4]);
        assert_eq!(c.position(), 5);
        assert_eq!(c.remaining(), &[5]);
        assert!(c.read_exact(10).is_err());
    }

    #[test]
    fn test_uuid_formatting() {
        let bytes: [u8; 16] = [
            0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6, 0x4a, 0x7b, 0x8c, 0x9d, 0x0e, 0x1f, 0x2a, 0x3b,
            0x4c, 0x5d,
        ];
        assert_eq!(
            uuid_bytes_to_string(&bytes),
            "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d"
        );
    }

    #[test]
    fn test_base64url_roundtrip() {
        use base64::Engine;
        let raw = b"hello vless early data \x00\x01\xff";
        let standard = base64::engine::general_purpose::STANDARD.encode(raw);
        let url_safe = standard.replace('+', "-").replace('/', "_");
        let url_safe_no_pad = url_safe.trim_end_matches('=').to_string();

        assert_eq!(decode_base64url(&url_safe_no_pad).unwrap(), raw);
        assert_eq!(decode_base64url(&url_safe).unwrap(), raw);
    }
}
