//! tcp-relay - TCP relay with optional HTTP CONNECT proxy egress.
//!
//! Accepts TCP connections on a listening endpoint and forwards each one to
//! a configured target, optionally tunneling the outbound leg through an
//! HTTP CONNECT proxy. Sessions share one multi-threaded runtime and die
//! independently; an idle session is reaped once neither direction has
//! moved a byte for the configured timeout.

pub mod cli;
pub mod common;
pub mod error;
pub mod handshake;
pub mod logging;
pub mod server;
pub mod session;
pub mod timeout;

pub use cli::{
    Cli, ViaType, DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_LISTEN_PORT, DEFAULT_WORKER_THREADS,
};
pub use common::{DnsResolver, HostPort, TRANSFER_BUFFER_SIZE};
pub use error::{Error, Result};
pub use handshake::{http_proxy_handshake, HANDSHAKE_TIMEOUT, MAX_RESPONSE_HEADER_SIZE};
pub use server::{shutdown_signal, RelayConfig, RelayServer, FIRST_SESSION_ID};
pub use session::{Session, SessionConfig, CONNECT_TIMEOUT, RESOLVE_TIMEOUT};
pub use timeout::{Deadline, Watchdog};
