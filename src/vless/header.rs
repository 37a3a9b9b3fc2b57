//! VLESS first-chunk header parser.
//!
//! Parses the sequential wire format:
//! `version(1) | uuid(16) | addons_len(1) | addons(addons_len) | cmd(1) |
//! port(2,BE) | atype(1) | addr(variable) | payload...`

use crate::common::net::Address;
use crate::common::primitives::{uuid_bytes_to_string, ByteCursor};
use crate::{Error, Result};
use std::net::{Ipv4Addr, Ipv6Addr};

const MIN_CHUNK_LEN: usize = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Tcp,
    Udp,
}

impl Command {
    fn from_byte(b: u8) -> Result<Self> {
        match b {
            0x01 => Ok(Command::Tcp),
            0x02 => Ok(Command::Udp),
            other => Err(Error::protocol(format!("unsupported VLESS command: {other:#x}"))),
        }
    }
}

/// A parsed VLESS request header plus where the initial payload begins.
#[derive(Debug, Clone)]
pub struct VlessHeader {
    pub version: u8,
    pub command: Command,
    pub port: u16,
    pub address: Address,
    pub raw_data_offset: usize,
}

impl VlessHeader {
    /// Host string suitable for dialing (domain as-is, IP formatted plainly).
    pub fn host(&self) -> String {
        self.address.to_host()
    }

    /// The two-byte response preamble echoed to the client before any
    /// target->client bytes: `[version, 0x00]`.
    pub fn response_preamble(&self) -> [u8; 2] {
        [self.version, 0x00]
    }
}

/// Parse the first chunk of a VLESS connection, validating the user id
/// against `configured_uuid` (case-insensitive).
///
/// Returns the parsed header; any bytes in `chunk` beyond
/// `header.raw_data_offset` are the first payload bytes for the target.
pub fn parse_header(chunk: &[u8], configured_uuid: &str) -> Result<VlessHeader> {
    if chunk.len() < MIN_CHUNK_LEN {
        return Err(Error::protocol("insufficient length"));
    }

    let mut cursor = ByteCursor::new(chunk);

    let version = cursor.read_u8()?;

    let uuid_bytes: [u8; 16] = cursor
        .read_exact(16)?
        .try_into()
        .expect("read_exact(16) returns a 16-byte slice");
    let uuid_str = uuid_bytes_to_string(&uuid_bytes);
    if !uuid_str.eq_ignore_ascii_case(configured_uuid) {
        return Err(Error::protocol("invalid user id"));
    }

    let addons_len = cursor.read_u8()? as usize;
    cursor.skip(addons_len)?;

    let command = Command::from_byte(cursor.read_u8()?)?;

    let port = cursor.read_u16_be()?;
    if port == 0 {
        return Err(Error::protocol("invalid port"));
    }

    let atype = cursor.read_u8()?;
    let address = match atype {
        0x01 => {
            let bytes = cursor.read_exact(4)?;
            Address::Ipv4(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
        }
        0x02 => {
            let len = cursor.read_u8()? as usize;
            if len == 0 {
                return Err(Error::protocol("empty domain"));
            }
            let bytes = cursor.read_exact(len)?;
            let domain = std::str::from_utf8(bytes)
                .map_err(|e| Error::protocol(format!("invalid domain bytes: {e}")))?;
            Address::Domain(domain.to_string())
        }
        0x03 => {
            let bytes = cursor.read_exact(16)?;
            let mut octets = [0u8; 16];
            octets.copy_from_slice(bytes);
            Address::Ipv6(Ipv6Addr::from(octets))
        }
        other => return Err(Error::protocol(format!("invalid address type: {other:#x}"))),
    };

    Ok(VlessHeader {
        version,
        command,
        port,
        address,
        raw_data_offset: cursor.position(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "a1b2c3d4-e5f6-4a7b-8c9d-0e1f2a3b4c5d";

    fn uuid_bytes() -> [u8; 16] {
        [
            0xa1, 0xb2, 0xc3, 0xd4, 0xe5, 0xf6, 0x4a, 0x7b, 0x8c, 0x9d, 0x0e, 0x1f, 0x2a, 0x3b,
            0x4c, 0x5d,
        ]
    }

    fn header_prefix(cmd: u8, port: u16) -> Vec<u8> {
        let mut v = vec![0x00];
        v.extend_from_slice(&uuid_bytes());
        v.push(0x00); // addons_len
        v.push(cmd);
        v.extend_from_slice(&port.to_be_bytes());
        v
    }

    #[test]
    fn parse_happy_domain() {
        let mut chunk = header_prefix(0x01, 443);
        chunk.push(0x02); // domain
        let domain = b"example.com";
        chunk.push(domain.len() as u8);
        chunk.extend_from_slice(domain);
        chunk.extend_from_slice(b"GET / HTTP/1.1\r\n");

        let header = parse_header(&chunk, UUID).unwrap();
        assert_eq!(header.command, Command::Tcp);
        assert_eq!(header.port, 443);
        assert_eq!(header.host(), "example.com");
        assert_eq!(header.response_preamble(), [0x00, 0x00]);
        assert_eq!(&chunk[header.raw_data_offset..], b"GET / HTTP/1.1\r\n");
    }

    #[test]
    fn parse_happy_ipv4() {
        let mut chunk = header_prefix(0x01, 53);
        chunk.push(0x01);
        chunk.extend_from_slice(&[8, 8, 8, 8]);
        chunk.extend_from_slice(&[0u8; 8]); // pad past MIN_CHUNK_LEN

        let header = parse_header(&chunk, UUID).unwrap();
        assert_eq!(header.host(), "8.8.8.8");
        assert_eq!(header.port, 53);
    }

    #[test]
    fn parse_happy_ipv6() {
        let mut chunk = header_prefix(0x02, 53);
        chunk.push(0x03);
        chunk.extend_from_slice(&[0u8; 15]);
        chunk.push(1);

        let header = parse_header(&chunk, UUID).unwrap();
        assert_eq!(header.command, Command::Udp);
        assert!(header.host().starts_with('['));
    }

    #[test]
    fn rejects_short_buffer() {
        let chunk = vec![0u8; 10];
        assert!(parse_header(&chunk, UUID).is_err());
    }

    #[test]
    fn rejects_wrong_uuid() {
        let mut chunk = header_prefix(0x01, 80);
        chunk[1] = 0xff; // corrupt uuid
        chunk.push(0x01);
        chunk.extend_from_slice(&[127, 0, 0, 1]);
        chunk.extend_from_slice(&[0u8; 8]);
        assert!(parse_header(&chunk, UUID).is_err());
    }

    #[test]
    fn rejects_bad_command() {
        let mut chunk = header_prefix(0x09, 80);
        chunk.push(0x01);
        chunk.extend_from_slice(&[127, 0, 0, 1]);
        chunk.extend_from_slice(&[0u8; 8]);
        assert!(parse_header(&chunk, UUID).is_err());
    }

    #[test]
    fn rejects_empty_domain() {
        let mut chunk = header_prefix(0x01, 80);
        chunk.push(0x02);
        chunk.push(0); // zero-length domain
        chunk.extend_from_slice(&[0u8; 10]);
        assert!(parse_header(&chunk, UUID).is_err());
    }
}
