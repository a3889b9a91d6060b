//! Server configuration.
//!
//! Everything here is decided once, before the listener is bound, and never
//! changes while the server runs.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::Error;

pub const DEFAULT_PORT: u16 = 8080;

/// Largest request body the server will buffer, in bytes.
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Connection-level timeouts.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timeouts {
    /// Limit for receiving a request's headers.
    pub read: Duration,
    /// Limit for a single socket write that makes no progress.
    pub write: Duration,
    /// How long a keep-alive connection may sit without a request.
    pub idle: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(15),
            write: Duration::from_secs(15),
            idle: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub timeouts: Timeouts,
    /// Deadline for in-flight requests once shutdown starts.
    pub drain_timeout: Duration,
    /// Put `/api/v1/*` (except login) behind bearer authentication.
    pub require_auth: bool,
    /// Bodies longer than this are answered `413` without running the chain.
    pub body_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            timeouts: Timeouts::default(),
            drain_timeout: Duration::from_secs(15),
            require_auth: true,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

impl ServerConfig {
    /// Reads `PORT` and `REQUIRE_AUTH` from the environment.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let mut config = Self::default();

        match lookup("PORT").filter(|p| !p.is_empty()) {
            Some(port) => {
                let port: u16 = port
                    .parse()
                    .map_err(|_| Error::Config(format!("PORT must be a port number, got `{port}`")))?;
                config.addr.set_port(port);
            }
            None => {
                tracing::info!(port = DEFAULT_PORT, "No PORT environment variable found, using default");
            }
        }

        if let Some(flag) = lookup("REQUIRE_AUTH").filter(|f| !f.is_empty()) {
            config.require_auth = parse_flag(&flag)
                .ok_or_else(|| Error::Config(format!("REQUIRE_AUTH must be true or false, got `{flag}`")))?;
        }

        Ok(config)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn from(vars: &[(&str, &str)]) -> Result<ServerConfig, Error> {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        ServerConfig::from_lookup(|k| vars.get(k).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let config = from(&[]).unwrap();
        assert_eq!(config.addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.drain_timeout, Duration::from_secs(15));
        assert_eq!(config.timeouts, Timeouts::default());
        assert!(config.require_auth);
        assert_eq!(config.body_limit, DEFAULT_BODY_LIMIT);
    }

    #[test]
    fn port_from_env() {
        let config = from(&[("PORT", "9090")]).unwrap();
        assert_eq!(config.addr.port(), 9090);
    }

    #[test]
    fn empty_port_means_default() {
        assert_eq!(from(&[("PORT", "")]).unwrap().addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn bad_port_is_a_config_error() {
        assert!(matches!(from(&[("PORT", "eighty")]), Err(Error::Config(_))));
        assert!(matches!(from(&[("PORT", "70000")]), Err(Error::Config(_))));
    }

    #[test]
    fn require_auth_flag() {
        assert!(!from(&[("REQUIRE_AUTH", "false")]).unwrap().require_auth);
        assert!(from(&[("REQUIRE_AUTH", "1")]).unwrap().require_auth);
        assert!(matches!(from(&[("REQUIRE_AUTH", "maybe")]), Err(Error::Config(_))));
    }
}
