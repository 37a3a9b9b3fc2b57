//! DNS resolver implementation

use super::DnsCache;
use crate::{Error, Result};
use hickory_resolver::config::{Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_CACHE_SIZE: usize = 4096;
const IPV6_WAIT: Duration = Duration::from_millis(100);

/// DNS resolver with caching, used to dial VLESS/H2-tunnel targets by
/// domain name. DNS-over-HTTPS query rewriting (for the VLESS UDP:53
/// command) is handled separately in `vless::doh` and does not go through
/// this resolver.
pub struct Resolver {
    resolver: TokioAsyncResolver,
    cache: Arc<DnsCache>,
    ipv6: bool,
    ipv6_timeout: Duration,
}

impl Resolver {
    /// Builds a resolver from the system's configured nameservers.
    pub fn new() -> Result<Self> {
        let resolver = TokioAsyncResolver::tokio_from_system_conf()
            .map_err(|e| Error::dns(format!("failed to create system resolver: {e}")))?;

        Ok(Resolver {
            resolver,
            cache: Arc::new(DnsCache::new(DEFAULT_CACHE_SIZE)),
            ipv6: false,
            ipv6_timeout: IPV6_WAIT,
        })
    }

    /// Same as [`Resolver::new`] but against an explicit nameserver list
    /// (host or host:port), for tests and non-default deployments.
    pub fn with_nameservers(nameservers: &[String]) -> Result<Self> {
        let mut config = ResolverConfig::new();
        for ns in nameservers {
            let addr = if ns.contains(':') {
                ns.parse().map_err(|_| Error::config(format!("invalid nameserver {ns}")))?
            } else {
                format!("{ns}:53").parse().map_err(|_| Error::config(format!("invalid nameserver {ns}")))?
            };
            config.add_name_server(hickory_resolver::config::NameServerConfig {
                socket_addr: addr,
                protocol: Protocol::Udp,
                tls_dns_name: None,
                trust_negative_responses: true,
                bind_addr: None,
                tls_config: None,
            });
        }

        let mut opts = ResolverOpts::default();
        opts.cache_size = 0;
        opts.timeout = Duration::from_secs(5);
        opts.attempts = 2;
        opts.rotate = true;

        Ok(Resolver {
            resolver: TokioAsyncResolver::tokio(config, opts),
            cache: Arc::new(DnsCache::new(DEFAULT_CACHE_SIZE)),
            ipv6: false,
            ipv6_timeout: IPV6_WAIT,
        })
    }

    /// Resolve a domain to a single IP, preferring a cached or literal
    /// answer over a fresh upstream query.
    pub async fn resolve(&self, domain: &str) -> Result<IpAddr> {
        if let Ok(ip) = domain.parse::<IpAddr>() {
            return Ok(ip);
        }

        if let Some(entry) = self.cache.get(domain) {
            if let Some(ip) = entry.first_ip() {
                debug!("DNS {} -> {} (cache)", domain, ip);
                return Ok(ip);
            }
        }

        let ips = self.lookup(domain).await?;
        if ips.is_empty() {
            return Err(Error::dns(format!("no IP found for {domain}")));
        }

        self.cache.put(domain.to_string(), ips.clone());
        let ip = ips[0];
        debug!("DNS {} -> {}", domain, ip);
        Ok(ip)
    }

    /// Resolve a domain to every IP known for it.
    pub async fn resolve_all(&self, domain: &str) -> Result<Vec<IpAddr>> {
        if let Ok(ip) = domain.parse::<IpAddr>() {
            return Ok(vec![ip]);
        }

        if let Some(entry) = self.cache.get(domain) {
            return Ok(entry.all_ips().to_vec());
        }

        let ips = self.lookup(domain).await?;
        if ips.is_empty() {
            return Err(Error::dns(format!("no IP found for {domain}")));
        }

        self.cache.put(domain.to_string(), ips.clone());
        Ok(ips)
    }

    async fn lookup(&self, domain: &str) -> Result<Vec<IpAddr>> {
        let mut ips = Vec::new();

        if self.ipv6 {
            let ipv4_future = self.resolver.ipv4_lookup(domain);
            let ipv6_future = tokio::time::timeout(self.ipv6_timeout, self.resolver.ipv6_lookup(domain));
            let (ipv4_result, ipv6_result) = tokio::join!(ipv4_future, ipv6_future);

            if let Ok(response) = ipv4_result {
                ips.extend(response.iter().map(|ip| IpAddr::V4(ip.0)));
            }
            match ipv6_result {
                Ok(Ok(response)) => ips.extend(response.iter().map(|ip| IpAddr::V6(ip.0))),
                Ok(Err(e)) => debug!("IPv6 lookup failed for {}: {}", domain, e),
                Err(_) => debug!("IPv6 lookup timed out for {}", domain),
            }
        } else if let Ok(response) = self.resolver.ipv4_lookup(domain).await {
            ips.extend(response.iter().map(|ip| IpAddr::V4(ip.0)));
        }

        Ok(ips)
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("DNS cache cleared");
    }

    pub fn cache_size(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[tokio::test]
    async fn test_resolver_ip_passthrough() {
        let resolver = Resolver::new().unwrap();
        let ip = resolver.resolve("8.8.8.8").await.unwrap();
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)));
    }

    #[tokio::test]
    async fn test_resolver_ipv6_literal_passthrough() {
        let resolver = Resolver::new().unwrap();
        let ip = resolver.resolve("::1").await.unwrap();
        assert_eq!(ip, "::1".parse::<IpAddr>().unwrap());
    }
}
