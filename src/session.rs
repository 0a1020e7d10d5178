//! Per-connection relay session.
//!
//! A session owns the inbound socket from accept time and, once the connect
//! phase succeeds, the outbound socket too. It drives connect → optional
//! CONNECT handshake → duplex transfer, and absorbs every failure so a bad
//! session never reaches the listener.

use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace};

use crate::cli::ViaType;
use crate::common::{DnsResolver, HostPort, TRANSFER_BUFFER_SIZE};
use crate::error::{Error, Result};
use crate::handshake::http_proxy_handshake;
use crate::timeout::{Deadline, Watchdog};

/// Bound on the whole name resolution.
pub const RESOLVE_TIMEOUT: Duration = Duration::from_secs(20);

/// Bound on each connect attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Per-session relay options, value-copied out of the server config at
/// spawn time and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub target: HostPort,
    pub idle_timeout: Duration,
    pub via: ViaType,
    pub http_proxy: Option<HostPort>,
}

/// Transfer direction, used in log lines only.
#[derive(Debug, Clone, Copy)]
enum TransferType {
    Uplink,
    Downlink,
}

impl TransferType {
    fn as_str(self) -> &'static str {
        match self {
            TransferType::Uplink => "uplink",
            TransferType::Downlink => "downlink",
        }
    }
}

/// A single relayed connection.
pub struct Session {
    id: u64,
    config: SessionConfig,
    resolver: DnsResolver,
}

impl Session {
    pub fn new(id: u64, config: SessionConfig, resolver: DnsResolver) -> Self {
        Self {
            id,
            config,
            resolver,
        }
    }

    /// Runs the session to completion.
    ///
    /// Every error is absorbed here; the sockets are released on all exit
    /// paths when the owning futures drop.
    pub async fn relay(self, client: TcpStream) {
        match client.peer_addr() {
            Ok(peer) => info!(session = self.id, "start connection from {peer}"),
            Err(_) => info!(session = self.id, "start connection"),
        }
        if let Err(err) = self.run(client).await {
            debug!(session = self.id, "session terminated: {err}");
        }
        info!(session = self.id, "end connection");
    }

    async fn run(&self, client: TcpStream) -> Result<()> {
        let mut server = self.connect_to_server().await?;
        let leftover = match self.config.via {
            ViaType::HttpProxy => {
                http_proxy_handshake(self.id, &mut server, &self.config.target).await?
            }
            ViaType::None => Bytes::new(),
        };
        self.tunnel_transfer(client, server, leftover).await;
        Ok(())
    }

    /// Resolves the server address and connects to the first reachable
    /// candidate, each attempt under its own watchdog.
    async fn connect_to_server(&self) -> Result<TcpStream> {
        let address = self.server_address();
        if self.config.via == ViaType::HttpProxy {
            debug!(
                session = self.id,
                "start connecting to the http proxy server {address}"
            );
        } else {
            debug!(session = self.id, "start connecting to {address}");
        }

        let mut watchdog = Watchdog::new();
        watchdog.arm(RESOLVE_TIMEOUT);
        trace!(session = self.id, "start resolving {address}");
        let candidates = match watchdog
            .watch(self.resolver.resolve(&address.host, address.port))
            .await
        {
            None => {
                error!(session = self.id, "resolve {address} timeout");
                return Err(Error::ResolveTimeout(address.clone()));
            }
            Some(Err(err)) => {
                // the resolve error already names the address
                error!(session = self.id, "{err}");
                return Err(err);
            }
            Some(Ok(candidates)) => candidates,
        };
        trace!(session = self.id, "resolve {address} success");

        for endpoint in candidates {
            watchdog.arm(CONNECT_TIMEOUT);
            trace!(session = self.id, "start connecting {address}({endpoint})");
            match watchdog.watch(TcpStream::connect(endpoint)).await {
                None => trace!(
                    session = self.id,
                    "connect to {address}({endpoint}) error: timed out"
                ),
                Some(Err(err)) => trace!(
                    session = self.id,
                    "connect to {address}({endpoint}) error: {err}"
                ),
                Some(Ok(stream)) => {
                    debug!(
                        session = self.id,
                        "successfully connected to {address}({endpoint})"
                    );
                    return Ok(stream);
                }
            }
        }

        error!(session = self.id, "failed to connect to {address}");
        Err(Error::ConnectFailed(address.clone()))
    }

    /// The endpoint the outbound socket targets: the proxy in http_proxy
    /// mode, the final target otherwise.
    fn server_address(&self) -> &HostPort {
        match self.config.via {
            ViaType::HttpProxy => self
                .config
                .http_proxy
                .as_ref()
                .expect("http_proxy address validated at startup"),
            ViaType::None => &self.config.target,
        }
    }

    /// Drives both directions until they finish or the idle deadline fires.
    ///
    /// The deadline is shared: progress in either direction pushes it, so
    /// the session dies only after `idle_timeout` with no bytes at all.
    async fn tunnel_transfer(&self, client: TcpStream, server: TcpStream, initial: Bytes) {
        debug!(session = self.id, "start tunnel transfer");
        let deadline = Deadline::new();
        deadline.expires_after(self.config.idle_timeout);

        let (client_read, client_write) = client.into_split();
        let (server_read, server_write) = server.into_split();

        tokio::select! {
            _ = async {
                tokio::join!(
                    self.transfer(
                        TransferType::Uplink,
                        client_read,
                        server_write,
                        &deadline,
                        Bytes::new(),
                    ),
                    self.transfer(
                        TransferType::Downlink,
                        server_read,
                        client_write,
                        &deadline,
                        initial,
                    ),
                )
            } => {}
            _ = deadline.expired() => {
                debug!(
                    session = self.id,
                    "tunnel transfer connection closed due to timeout"
                );
            }
        }
        debug!(session = self.id, "end tunnel transfer");
    }

    /// One direction of the tunnel. An error ends only this direction; the
    /// opposite one keeps running until its own EOF, error, or the shared
    /// idle timeout.
    async fn transfer<R, W>(
        &self,
        direction: TransferType,
        mut from: R,
        mut to: W,
        deadline: &Deadline,
        initial: Bytes,
    ) where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let tag = direction.as_str();
        if !initial.is_empty() {
            trace!(
                session = self.id,
                "{tag} transfer starts with {} carried-over bytes",
                initial.len()
            );
            if !self.write_chunk(direction, &mut to, &initial, deadline).await {
                return;
            }
        }

        let mut buffer = [0u8; TRANSFER_BUFFER_SIZE];
        loop {
            deadline.expires_after(self.config.idle_timeout);
            let read = match from.read(&mut buffer).await {
                Ok(0) => {
                    debug!(session = self.id, "{tag} transfer read eof");
                    return;
                }
                Ok(n) => n,
                Err(err) => {
                    debug!(session = self.id, "{tag} transfer read error: {err}");
                    return;
                }
            };
            if !self
                .write_chunk(direction, &mut to, &buffer[..read], deadline)
                .await
            {
                return;
            }
        }
    }

    /// Writes `chunk` fully, pushing the deadline before each partial write.
    /// Returns false once the direction is dead; the failure is already
    /// logged.
    async fn write_chunk<W>(
        &self,
        direction: TransferType,
        to: &mut W,
        chunk: &[u8],
        deadline: &Deadline,
    ) -> bool
    where
        W: AsyncWrite + Unpin,
    {
        let tag = direction.as_str();
        let mut written = 0;
        while written < chunk.len() {
            deadline.expires_after(self.config.idle_timeout);
            match to.write(&chunk[written..]).await {
                Ok(0) => {
                    debug!(
                        session = self.id,
                        "{tag} transfer write error: connection closed"
                    );
                    return false;
                }
                Ok(n) => written += n,
                Err(err) => {
                    debug!(session = self.id, "{tag} transfer write error: {err}");
                    return false;
                }
            }
        }
        true
    }
}
