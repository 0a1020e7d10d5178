//! CLI definitions for tcp-relay.

use std::net::IpAddr;
use std::time::Duration;

use clap::{
    builder::{PossibleValuesParser, TypedValueParser},
    ArgAction, Parser, ValueEnum,
};

use crate::common::HostPort;

/// Default listen port.
pub const DEFAULT_LISTEN_PORT: u16 = 8886;

/// Default idle timeout in seconds for the transfer phase.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 240;

/// Default worker thread count.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Outbound routing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ViaType {
    /// Connect to the target directly.
    #[value(name = "none")]
    None,
    /// Tunnel the outbound leg through an HTTP CONNECT proxy.
    #[value(name = "http_proxy")]
    HttpProxy,
}

/// TCP relay with optional HTTP CONNECT proxy egress.
#[derive(Debug, Parser)]
#[command(name = "tcp-relay", version, disable_version_flag = true)]
pub struct Cli {
    /// Local address to listen on
    #[arg(short = 'l', long = "listen_addr", default_value = "0.0.0.0")]
    pub listen_addr: IpAddr,

    /// Local port to listen on
    #[arg(
        short = 'p',
        long = "port",
        default_value_t = DEFAULT_LISTEN_PORT,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    pub port: u16,

    /// Target address (host:port) to connect
    #[arg(short = 't', long = "target")]
    pub target: HostPort,

    /// Idle timeout (in seconds) for established tunnels
    #[arg(
        long = "timeout",
        default_value_t = DEFAULT_IDLE_TIMEOUT_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub timeout: u64,

    /// Transfer via another proxy
    #[arg(long = "via", value_enum, default_value_t = ViaType::None)]
    pub via: ViaType,

    /// HTTP proxy address (host:port), required with --via http_proxy
    #[arg(long = "http_proxy", required_if_eq("via", "http_proxy"))]
    pub http_proxy: Option<HostPort>,

    /// Log level
    #[arg(
        long = "log_level",
        default_value = "info",
        value_parser = PossibleValuesParser::new(["trace", "debug", "info", "warn", "error", "disable"])
    )]
    pub log_level: String,

    /// Worker thread count
    #[arg(
        long = "threads",
        default_value_t = DEFAULT_WORKER_THREADS,
        value_parser = clap::value_parser!(u64).range(1..).map(|v| v as usize)
    )]
    pub threads: usize,

    /// Print the program version and exit
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: Option<bool>,
}

impl Cli {
    /// Idle timeout as a `Duration`.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Prints the startup summary before the runtime comes up.
    pub fn print_startup(&self) {
        if self.listen_addr.is_ipv6() {
            eprintln!("Listen address: [{}]:{}", self.listen_addr, self.port);
        } else {
            eprintln!("Listen address: {}:{}", self.listen_addr, self.port);
        }
        eprintln!("Target address: {}", self.target);
        if self.via == ViaType::HttpProxy {
            if let Some(proxy) = &self.http_proxy {
                eprintln!("Via HTTP-Proxy: {}", proxy);
            }
        }
        eprintln!("Connection timeout: {}", self.timeout);
    }
}
