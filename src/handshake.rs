//! HTTP CONNECT handshake with an upstream proxy.
//!
//! The exchange is a single request and a single response header section.
//! Anything the proxy sends past the `\r\n\r\n` terminator already belongs
//! to the tunnel and is handed back to the caller for the downlink stream.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

use crate::common::HostPort;
use crate::error::{Error, Result};
use crate::timeout::Watchdog;

/// Bound on each individual handshake read or write.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// Largest response header section the proxy may send.
pub const MAX_RESPONSE_HEADER_SIZE: usize = 2048;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Performs the CONNECT exchange on `stream` for `target`.
///
/// On success returns any bytes the proxy sent past the response
/// terminator; those must open the downlink stream ahead of anything read
/// from the proxy socket afterwards.
pub async fn http_proxy_handshake<S>(
    session: u64,
    stream: &mut S,
    target: &HostPort,
) -> Result<Bytes>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let authority = target.to_string();
    debug!(session, "http-proxy handshake CONNECT {authority} HTTP/1.1");

    let request = connect_request(&authority);
    write_request(session, stream, request.as_bytes()).await?;

    let (header, leftover) = read_response_header(session, stream).await?;
    validate_response(session, &header)?;

    debug!(session, "http-proxy handshake success");
    Ok(leftover)
}

fn connect_request(authority: &str) -> String {
    format!(
        "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\nProxy-Connection: keep-alive\r\n\r\n"
    )
}

/// Writes the request, rearming the watchdog before every chunk.
async fn write_request<S>(session: u64, stream: &mut S, request: &[u8]) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let mut watchdog = Watchdog::new();
    let mut written = 0;
    while written < request.len() {
        watchdog.arm(HANDSHAKE_TIMEOUT);
        match watchdog.watch(stream.write(&request[written..])).await {
            None => {
                error!(session, "http-proxy handshake write request header timeout");
                return Err(Error::HandshakeTimeout {
                    phase: "write request header",
                });
            }
            Some(Err(err)) => {
                error!(
                    session,
                    "http-proxy handshake write request header error: {err}"
                );
                return Err(Error::HandshakeIo {
                    phase: "write request header",
                    source: err,
                });
            }
            Some(Ok(0)) => {
                error!(
                    session,
                    "http-proxy handshake write request header error: connection closed"
                );
                return Err(Error::HandshakeIo {
                    phase: "write request header",
                    source: std::io::ErrorKind::WriteZero.into(),
                });
            }
            Some(Ok(n)) => written += n,
        }
    }
    Ok(())
}

/// Reads up to and including `\r\n\r\n` under one watchdog, returning the
/// header section and any overshoot.
async fn read_response_header<S>(session: u64, stream: &mut S) -> Result<(BytesMut, Bytes)>
where
    S: AsyncRead + Unpin,
{
    let mut watchdog = Watchdog::new();
    watchdog.arm(HANDSHAKE_TIMEOUT);

    let mut header = BytesMut::with_capacity(MAX_RESPONSE_HEADER_SIZE);
    loop {
        if let Some(end) = find_terminator(&header) {
            let leftover = header.split_off(end).freeze();
            return Ok((header, leftover));
        }
        if header.len() >= MAX_RESPONSE_HEADER_SIZE {
            error!(
                session,
                "http-proxy handshake response header exceeds {MAX_RESPONSE_HEADER_SIZE} bytes"
            );
            return Err(Error::ResponseHeaderTooLarge {
                limit: MAX_RESPONSE_HEADER_SIZE,
            });
        }
        match watchdog.watch(stream.read_buf(&mut header)).await {
            None => {
                error!(session, "http-proxy handshake read response header timeout");
                return Err(Error::HandshakeTimeout {
                    phase: "read response header",
                });
            }
            Some(Err(err)) => {
                error!(
                    session,
                    "http-proxy handshake read response header error: {err}"
                );
                return Err(Error::HandshakeIo {
                    phase: "read response header",
                    source: err,
                });
            }
            Some(Ok(0)) => {
                error!(
                    session,
                    "http-proxy handshake read response header error: connection closed"
                );
                return Err(Error::HandshakeIo {
                    phase: "read response header",
                    source: std::io::ErrorKind::UnexpectedEof.into(),
                });
            }
            Some(Ok(_)) => {}
        }
    }
}

/// Returns the index one past the `\r\n\r\n` terminator, if present.
fn find_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|window| window == HEADER_TERMINATOR)
        .map(|index| index + HEADER_TERMINATOR.len())
}

fn validate_response(session: u64, header: &[u8]) -> Result<()> {
    let status = match parse_status_line(header) {
        Some(status) => status,
        None => {
            error!(session, "http-proxy handshake failed bad HTTP response header");
            return Err(Error::BadResponseHeader);
        }
    };
    if status != "200" {
        error!(
            session,
            "http-proxy handshake failed response status_code: {status}"
        );
        return Err(Error::HandshakeRefused {
            status: status.to_string(),
        });
    }
    Ok(())
}

/// Extracts the status code from the first response line.
///
/// Accepts `HTTP/1.0` and `HTTP/1.1` case-insensitively: the version token,
/// whitespace, the status digits, then at least one more whitespace byte
/// before the reason phrase.
fn parse_status_line(header: &[u8]) -> Option<&str> {
    let line_end = header.windows(2).position(|window| window == b"\r\n")?;
    let line = std::str::from_utf8(&header[..line_end]).ok()?;

    let rest = strip_prefix_ignore_case(line, "HTTP/1.")?;
    let rest = match rest.as_bytes().first()? {
        b'0' | b'1' => &rest[1..],
        _ => return None,
    };

    if !rest.starts_with(|c: char| c.is_ascii_whitespace()) {
        return None;
    }
    let rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace());

    let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let (code, tail) = rest.split_at(digits);
    if !tail.starts_with(|c: char| c.is_ascii_whitespace()) {
        return None;
    }
    Some(code)
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
