//! Common types and functions shared across the relay.
//!
//! This module holds the `host:port` address type used by the CLI and the
//! CONNECT handshake, plus the shared DNS resolver every session uses for
//! the outbound leg.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Buffer size for each transfer direction.
pub const TRANSFER_BUFFER_SIZE: usize = 4096;

/// A `host:port` pair as given on the command line.
///
/// `host` may be a DNS name, an IPv4 literal, or an IPv6 literal. IPv6
/// literals are written bracketed (`[::1]:80`) and stored unbracketed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl FromStr for HostPort {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let colon = s
            .rfind(':')
            .ok_or_else(|| format!("address must include port: '{}'", s))?;
        let (host_part, port_part) = (&s[..colon], &s[colon + 1..]);

        let port: u16 = port_part
            .parse()
            .map_err(|_| format!("invalid port in address '{}'", s))?;
        if port == 0 {
            return Err(format!("invalid port in address '{}'", s));
        }

        let bracketed = host_part.starts_with('[') && host_part.ends_with(']');
        let host = if bracketed {
            &host_part[1..host_part.len() - 1]
        } else {
            host_part
        };
        if host.is_empty() {
            return Err(format!("missing host in address '{}'", s));
        }
        if host.contains(':') && !bracketed {
            return Err(format!(
                "IPv6 host must be bracketed in address '{}'",
                s
            ));
        }

        Ok(HostPort {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for HostPort {
    /// Renders `host:port`, bracketing IPv6 hosts the way the CONNECT
    /// authority and log lines expect.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Shared DNS resolver wrapper for reuse across sessions.
///
/// The resolver is lazily initialized on the first lookup and shared by
/// every session the listener spawns.
#[derive(Clone)]
pub struct DnsResolver {
    resolver: Arc<
        Mutex<
            Option<
                hickory_resolver::Resolver<
                    hickory_resolver::name_server::TokioConnectionProvider,
                >,
            >,
        >,
    >,
}

impl DnsResolver {
    /// Creates a new DNS resolver.
    pub fn new() -> Self {
        Self {
            resolver: Arc::new(Mutex::new(None)),
        }
    }

    /// Resolves `host` into the ordered list of connect candidates.
    ///
    /// IP literals bypass DNS and yield a single candidate; DNS names
    /// produce every resolved address in answer order.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<SocketAddr>> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        let mut resolver_guard = self.resolver.lock().await;
        if resolver_guard.is_none() {
            let resolver = hickory_resolver::Resolver::builder_tokio()
                .map_err(|e| self.resolve_error(host, port, e.to_string()))?
                .build();
            *resolver_guard = Some(resolver);
        }
        let resolver = resolver_guard.as_ref().unwrap();

        let response = resolver
            .lookup_ip(host)
            .await
            .map_err(|e| self.resolve_error(host, port, e.to_string()))?;

        let candidates: Vec<SocketAddr> = response
            .iter()
            .map(|ip| SocketAddr::new(ip, port))
            .collect();
        if candidates.is_empty() {
            return Err(self.resolve_error(host, port, "no addresses found".to_string()));
        }
        Ok(candidates)
    }

    fn resolve_error(&self, host: &str, port: u16, message: String) -> Error {
        Error::Resolve {
            address: HostPort {
                host: host.to_string(),
                port,
            },
            message,
        }
    }
}

impl Default for DnsResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_port_name() {
        let hp: HostPort = "example.com:8080".parse().unwrap();
        assert_eq!(hp.host, "example.com");
        assert_eq!(hp.port, 8080);
    }

    #[test]
    fn parse_host_port_ipv4() {
        let hp: HostPort = "127.0.0.1:22".parse().unwrap();
        assert_eq!(hp.host, "127.0.0.1");
        assert_eq!(hp.port, 22);
    }

    #[test]
    fn parse_host_port_bracketed_ipv6() {
        let hp: HostPort = "[::1]:80".parse().unwrap();
        assert_eq!(hp.host, "::1");
        assert_eq!(hp.port, 80);
    }

    #[test]
    fn parse_host_port_rejects_unbracketed_ipv6() {
        assert!("::1:80".parse::<HostPort>().is_err());
    }

    #[test]
    fn parse_host_port_rejects_missing_port() {
        assert!("example.com".parse::<HostPort>().is_err());
    }

    #[test]
    fn parse_host_port_rejects_bad_port() {
        assert!("example.com:http".parse::<HostPort>().is_err());
        assert!("example.com:0".parse::<HostPort>().is_err());
        assert!("example.com:65536".parse::<HostPort>().is_err());
    }

    #[test]
    fn parse_host_port_rejects_empty_host() {
        assert!(":80".parse::<HostPort>().is_err());
    }

    #[test]
    fn display_brackets_ipv6() {
        let hp = HostPort {
            host: "::1".to_string(),
            port: 80,
        };
        assert_eq!(hp.to_string(), "[::1]:80");
    }

    #[test]
    fn display_plain_host() {
        let hp = HostPort {
            host: "example.com".to_string(),
            port: 443,
        };
        assert_eq!(hp.to_string(), "example.com:443");
    }

    #[test]
    fn parse_display_roundtrip_ipv6() {
        let hp: HostPort = "[fe80::1]:9999".parse().unwrap();
        assert_eq!(hp.to_string(), "[fe80::1]:9999");
    }

    #[tokio::test]
    async fn resolver_ipv4_literal_fast_path() {
        let resolver = DnsResolver::new();
        let candidates = resolver.resolve("127.0.0.1", 8080).await.unwrap();
        assert_eq!(candidates, vec!["127.0.0.1:8080".parse().unwrap()]);
    }

    #[tokio::test]
    async fn resolver_ipv6_literal_fast_path() {
        let resolver = DnsResolver::new();
        let candidates = resolver.resolve("::1", 8080).await.unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].port(), 8080);
        assert!(candidates[0].is_ipv6());
    }
}
