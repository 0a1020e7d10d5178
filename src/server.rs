//! Accept loop and process-level wiring for the relay.
//!
//! The listener binds once at startup (failure is fatal), then accepts
//! forever, spawning one independent [`Session`] task per connection.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::cli::{Cli, ViaType};
use crate::common::{DnsResolver, HostPort};
use crate::error::{Error, Result};
use crate::session::{Session, SessionConfig};

/// First session id handed out by the accept loop.
pub const FIRST_SESSION_ID: u64 = 10000;

/// Immutable relay configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: IpAddr,
    pub listen_port: u16,
    pub target: HostPort,
    pub idle_timeout: Duration,
    pub via: ViaType,
    pub http_proxy: Option<HostPort>,
    pub threads: usize,
    pub log_level: String,
}

impl From<&Cli> for RelayConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            listen_addr: cli.listen_addr,
            listen_port: cli.port,
            target: cli.target.clone(),
            idle_timeout: cli.idle_timeout(),
            via: cli.via,
            http_proxy: cli.http_proxy.clone(),
            threads: cli.threads,
            log_level: cli.log_level.clone(),
        }
    }
}

/// Listener bound to the configured address, ready to accept sessions.
pub struct RelayServer {
    listener: TcpListener,
    config: RelayConfig,
}

impl RelayServer {
    /// Binds the listening socket. Failure here is fatal for the process.
    pub async fn bind(config: RelayConfig) -> Result<Self> {
        let addr = SocketAddr::new(config.listen_addr, config.listen_port);
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::Bind { addr, source })?;
        Ok(Self { listener, config })
    }

    /// The address the listener actually bound to (port 0 resolves here).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, spawning an independent session per
    /// accept with a monotonically increasing id.
    ///
    /// Transient accept errors are logged and skipped; anything else aborts
    /// the loop and takes the process down.
    pub async fn run(self) -> Result<()> {
        let resolver = DnsResolver::new();
        let session_config = SessionConfig {
            target: self.config.target.clone(),
            idle_timeout: self.config.idle_timeout,
            via: self.config.via,
            http_proxy: self.config.http_proxy.clone(),
        };

        let mut session_id = FIRST_SESSION_ID;
        loop {
            match self.listener.accept().await {
                Ok((client, _)) => {
                    let session = Session::new(session_id, session_config.clone(), resolver.clone());
                    session_id += 1;
                    tokio::spawn(session.relay(client));
                }
                Err(err) if is_transient_accept_error(&err) => {
                    warn!("accept error: {err}");
                    if is_fd_exhaustion(&err) {
                        // let in-flight sessions release descriptors
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
                Err(err) => return Err(Error::Accept(err)),
            }
        }
    }
}

/// Accept errors worth retrying: aborted handshakes and fd exhaustion.
fn is_transient_accept_error(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::Interrupted
    ) || is_fd_exhaustion(err)
}

fn is_fd_exhaustion(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(code) if code == libc::EMFILE || code == libc::ENFILE)
}

/// Resolves when the process receives SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn transient_accept_errors_are_retried() {
        let aborted = std::io::Error::from(std::io::ErrorKind::ConnectionAborted);
        assert!(is_transient_accept_error(&aborted));

        let emfile = std::io::Error::from_raw_os_error(libc::EMFILE);
        assert!(is_transient_accept_error(&emfile));
        assert!(is_fd_exhaustion(&emfile));

        let enfile = std::io::Error::from_raw_os_error(libc::ENFILE);
        assert!(is_transient_accept_error(&enfile));
    }

    #[test]
    fn fatal_accept_errors_are_not_retried() {
        let ebadf = std::io::Error::from_raw_os_error(libc::EBADF);
        assert!(!is_transient_accept_error(&ebadf));
    }

    #[test]
    fn relay_config_from_cli() {
        let cli = Cli::parse_from([
            "tcp-relay",
            "-t",
            "example.com:80",
            "--timeout",
            "30",
            "--via",
            "http_proxy",
            "--http_proxy",
            "proxy.local:3128",
        ]);
        let config = RelayConfig::from(&cli);
        assert_eq!(config.listen_port, 8886);
        assert_eq!(config.target.host, "example.com");
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.via, ViaType::HttpProxy);
        assert_eq!(config.http_proxy.unwrap().host, "proxy.local");
        assert_eq!(config.threads, 4);
        assert_eq!(config.log_level, "info");
    }

    #[tokio::test]
    async fn bind_resolves_ephemeral_port() {
        let config = RelayConfig {
            listen_addr: "127.0.0.1".parse().unwrap(),
            listen_port: 0,
            target: HostPort {
                host: "127.0.0.1".to_string(),
                port: 1,
            },
            idle_timeout: Duration::from_secs(240),
            via: ViaType::None,
            http_proxy: None,
            threads: 1,
            log_level: "info".to_string(),
        };
        let server = RelayServer::bind(config).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn bind_failure_is_fatal() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let taken = listener.local_addr().unwrap();

        let config = RelayConfig {
            listen_addr: taken.ip(),
            listen_port: taken.port(),
            target: HostPort {
                host: "127.0.0.1".to_string(),
                port: 1,
            },
            idle_timeout: Duration::from_secs(240),
            via: ViaType::None,
            http_proxy: None,
            threads: 1,
            log_level: "info".to_string(),
        };
        assert!(matches!(
            RelayServer::bind(config).await,
            Err(Error::Bind { .. })
        ));
    }
}
