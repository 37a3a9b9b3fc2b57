//! Configuration module: the gateway is configured entirely from the
//! process environment, not a YAML file. `GatewayConfig::from_env()` keeps
//! the same validate-then-return shape a file-backed loader would use.

use crate::router::RouteTable;
use crate::{Error, Result};
use std::env;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_HOSTNAME: &str = "underpass-gateway";
const DEFAULT_LOG_LEVEL: &str = "INFO";

/// Parsed, validated environment configuration for one gateway instance.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Client UUID (`USER_ID`) VLESS headers are checked against.
    pub user_id: String,
    /// Shared secret (`PASSWORD`) the H2 tunnel's `Authorization: Basic`
    /// header is checked against.
    pub password: String,
    /// Optional upstream relay address (`PROXY_ADDR`); reserved for a
    /// further hop this gateway may be chained in front of.
    pub proxy_addr: Option<String>,
    /// DNS-over-HTTPS endpoint used to rewrite VLESS UDP:53 commands.
    pub doh_url: String,
    /// Reported in `/info`; not used for binding.
    pub hostname: String,
    /// TCP port the axum server binds.
    pub port: u16,
    /// One of ERROR/WARN/INFO/DEBUG.
    pub log_level: String,
    /// Router table parsed from the `CONFIG` JSON array.
    pub routes: RouteTable,
}

impl GatewayConfig {
    /// Loads and validates configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let user_id = env::var("USER_ID").map_err(|_| Error::config("missing USER_ID"))?;
        let password = env::var("PASSWORD").map_err(|_| Error::config("missing PASSWORD"))?;
        let doh_url = env::var("DOH_URL").map_err(|_| Error::config("missing DOH_URL"))?;
        let proxy_addr = env::var("PROXY_ADDR").ok().filter(|s| !s.is_empty());
        let hostname = env::var("HOSTNAME").unwrap_or_else(|_| DEFAULT_HOSTNAME.to_string());
        let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string());

        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| Error::config(format!("invalid PORT: {raw}")))?,
            Err(_) => DEFAULT_PORT,
        };

        let routes = match env::var("CONFIG") {
            Ok(raw) => RouteTable::parse(&raw)?,
            Err(_) => RouteTable::empty(),
        };

        let config = GatewayConfig {
            user_id,
            password,
            proxy_addr,
            doh_url,
            hostname,
            port,
            log_level,
            routes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validates config invariants: `USER_ID` must be a UUID, `PASSWORD`
    /// and `DOH_URL` must be non-empty, and the port must be nonzero.
    pub fn validate(&self) -> Result<()> {
        uuid::Uuid::parse_str(&self.user_id).map_err(|_| Error::config("USER_ID is not a valid UUID"))?;

        if self.password.is_empty() {
            return Err(Error::config("PASSWORD cannot be empty"));
        }
        if self.doh_url.is_empty() || !(self.doh_url.starts_with("http://") || self.doh_url.starts_with("https://")) {
            return Err(Error::config("DOH_URL must be an http(s) URL"));
        }
        if self.port == 0 {
            return Err(Error::config("PORT cannot be 0"));
        }
        if !matches!(self.log_level.to_uppercase().as_str(), "ERROR" | "WARN" | "INFO" | "DEBUG") {
            return Err(Error::config(format!("unsupported LOG_LEVEL: {}", self.log_level)));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> GatewayConfig {
        GatewayConfig {
            user_id: "550e8400-e29b-41d4-a716-446655440000".to_string(),
            password: "s3cret".to_string(),
            proxy_addr: None,
            doh_url: "https://dns.example.com/dns-query".to_string(),
            hostname: "gw1".to_string(),
            port: 8080,
            log_level: "INFO".to_string(),
            routes: RouteTable::empty(),
        }
    }

    #[test]
    fn test_validate_accepts_well_formed_config() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_user_id() {
        let mut config = valid();
        config.user_id = "not-a-uuid".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_password() {
        let mut config = valid();
        config.password = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_doh_url() {
        let mut config = valid();
        config.doh_url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_log_level() {
        let mut config = valid();
        config.log_level = "VERBOSE".to_string();
        assert!(config.validate().is_err());
    }
}
