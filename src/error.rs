//! Error types for tcp-relay.

use std::net::SocketAddr;

use thiserror::Error;

use crate::common::HostPort;

/// Main error type for tcp-relay.
///
/// Everything past the accept is a per-session failure: sessions absorb
/// their own errors and never take the listener down with them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(std::io::Error),

    #[error("resolve {0} timeout")]
    ResolveTimeout(HostPort),

    #[error("resolve {address} error: {message}")]
    Resolve { address: HostPort, message: String },

    #[error("failed to connect to {0}")]
    ConnectFailed(HostPort),

    #[error("http-proxy handshake {phase} timeout")]
    HandshakeTimeout { phase: &'static str },

    #[error("http-proxy handshake {phase} error: {source}")]
    HandshakeIo {
        phase: &'static str,
        source: std::io::Error,
    },

    #[error("bad HTTP response header")]
    BadResponseHeader,

    #[error("HTTP connect failed with status {status}")]
    HandshakeRefused { status: String },

    #[error("HTTP response header exceeds {limit} bytes")]
    ResponseHeaderTooLarge { limit: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tcp-relay operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn host_port(host: &str, port: u16) -> HostPort {
        HostPort {
            host: host.to_string(),
            port,
        }
    }

    #[test]
    fn connect_failed_display_includes_address() {
        let err = Error::ConnectFailed(host_port("example.com", 443));
        assert_eq!(err.to_string(), "failed to connect to example.com:443");
    }

    #[test]
    fn connect_failed_display_brackets_ipv6() {
        let err = Error::ConnectFailed(host_port("::1", 80));
        assert_eq!(err.to_string(), "failed to connect to [::1]:80");
    }

    #[test]
    fn refused_display_includes_status() {
        let err = Error::HandshakeRefused {
            status: "407".to_string(),
        };
        assert!(err.to_string().contains("407"));
    }
}
