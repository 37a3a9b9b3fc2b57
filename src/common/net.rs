//! Network utilities

use socket2::SockRef;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::net::TcpStream;

#[inline]
pub fn configure_tcp_stream(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);
    let sock = SockRef::from(stream);
    let _ = sock.set_keepalive(true);
    let _ = sock.set_reuse_address(true);
    #[cfg(any(target_os = "linux", target_os = "android"))]
    let _ = sock.set_reuse_port(true);
}

/// Target address carried in a tunnel header: either a literal IP or a
/// domain name to be resolved before dialing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl Address {
    /// Get as IP if resolved
    pub fn to_ip(&self) -> Option<IpAddr> {
        match self {
            Address::Ipv4(ip) => Some(IpAddr::V4(*ip)),
            Address::Ipv6(ip) => Some(IpAddr::V6(*ip)),
            Address::Domain(_) => None,
        }
    }

    /// Get as domain string
    pub fn to_host(&self) -> String {
        match self {
            Address::Ipv4(ip) => ip.to_string(),
            Address::Ipv6(ip) => format_ipv6_bracketed(ip),
            Address::Domain(d) => d.clone(),
        }
    }
}

/// Renders an IPv6 address as 8 colon-separated lowercase hex groups
/// wrapped in brackets (`[0000:...:0001]`), never the compressed `::` form.
fn format_ipv6_bracketed(ip: &Ipv6Addr) -> String {
    let segments = ip.segments();
    let mut out = String::with_capacity(41);
    out.push('[');
    for (i, segment) in segments.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        out.push_str(&format!("{segment:04x}"));
    }
    out.push(']');
    out
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Address::Ipv4(ip)
    }
}

impl From<Ipv6Addr> for Address {
    fn from(ip: Ipv6Addr) -> Self {
        Address::Ipv6(ip)
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Address::Ipv4(v4),
            IpAddr::V6(v6) => Address::Ipv6(v6),
        }
    }
}

impl From<String> for Address {
    fn from(domain: String) -> Self {
        if let Ok(ip) = domain.parse::<Ipv4Addr>() {
            return Address::Ipv4(ip);
        }
        if let Ok(ip) = domain.parse::<Ipv6Addr>() {
            return Address::Ipv6(ip);
        }
        Address::Domain(domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_from_ip() {
        let addr = Address::from(Ipv4Addr::new(127, 0, 0, 1));
        assert!(matches!(addr, Address::Ipv4(_)));
    }

    #[test]
    fn test_address_from_domain() {
        let addr = Address::from("example.com".to_string());
        assert!(matches!(addr, Address::Domain(_)));
    }

    #[test]
    fn test_address_to_host_and_ip() {
        let ip = Address::Ipv4(Ipv4Addr::new(8, 8, 8, 8));
        assert_eq!(ip.to_host(), "8.8.8.8");
        assert!(ip.to_ip().is_some());

        let domain = Address::Domain("example.com".to_string());
        assert_eq!(domain.to_host(), "example.com");
        assert!(domain.to_ip().is_none());
    }

    #[test]
    fn test_ipv6_host_is_bracketed_full_form() {
        let ip = Address::Ipv6(Ipv6Addr::new(0, 0, 0, 0, 0, 0, 0, 1));
        assert_eq!(ip.to_host(), "[0000:0000:0000:0000:0000:0000:0000:0001]");
    }
}
