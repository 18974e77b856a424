//! Connection utilities shared by the relay and its clients.
//!
//! Address parsing for the `--server` style arguments, bounded TCP
//! connects and TCP keep-alive setup for long-lived chat connections.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

use crate::error::{Error, Result};
use crate::protocol::duration_millis;
use crate::DEFAULT_PORT;

/// Parse a host address string into a `SocketAddr`.
///
/// Accepts formats:
/// - `IP` (e.g., `192.168.1.100`) - uses default port 5476
/// - `IP:PORT` (e.g., `192.168.1.100:6000`) - uses specified port
/// - `[IPv6]` (e.g., `[::1]`) - uses default port 5476
/// - `[IPv6]:PORT` (e.g., `[::1]:6000`) - uses specified port
///
/// # Examples
///
/// ```
/// use parley_core::connection::parse_host_address;
///
/// let addr = parse_host_address("192.168.1.100").unwrap();
/// assert_eq!(addr.port(), 5476);
///
/// let addr = parse_host_address("192.168.1.100:6000").unwrap();
/// assert_eq!(addr.port(), 6000);
/// ```
///
/// # Errors
///
/// Returns an error if the host string cannot be parsed.
pub fn parse_host_address(host: &str) -> Result<SocketAddr> {
    let host = host.trim();

    if let Ok(addr) = host.parse::<SocketAddr>() {
        return Ok(addr);
    }

    if let Some(inner) = host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
        let ip: IpAddr = inner.parse().map_err(|_| invalid_host(host))?;
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }

    if let Some((ip_part, port_part)) = host.rsplit_once(':') {
        if !ip_part.contains(':') {
            let ip: IpAddr = ip_part.parse().map_err(|_| invalid_host(host))?;
            let port = parse_port(port_part)?;
            return Ok(SocketAddr::new(ip, port));
        }
    }

    Err(invalid_host(host))
}

/// Resolve a host that may also be a DNS name (`relay.lan`, `localhost:6000`).
///
/// Literal addresses go through [`parse_host_address`]; anything else is
/// looked up, using port 5476 when none is given.
///
/// # Errors
///
/// Returns an error if the name does not resolve.
pub async fn resolve_host(host: &str) -> Result<SocketAddr> {
    if let Ok(addr) = parse_host_address(host) {
        return Ok(addr);
    }

    let host = host.trim();
    let (name, port) = match host.rsplit_once(':') {
        Some((name, port)) if !name.contains(':') => (name, parse_port(port)?),
        _ => (host, DEFAULT_PORT),
    };

    tokio::net::lookup_host((name, port))
        .await
        .map_err(|_| invalid_host(host))?
        .next()
        .ok_or_else(|| invalid_host(host))
}

/// Open a TCP connection, giving up after `limit`.
///
/// The returned stream has TCP keep-alive enabled.
///
/// # Errors
///
/// Returns `Error::Timeout` if the connect does not finish in time, or the
/// underlying I/O error.
pub async fn connect(addr: SocketAddr, limit: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(limit, TcpStream::connect(addr))
        .await
        .map_err(|_| Error::Timeout(duration_millis(limit)))??;
    stream.set_nodelay(true)?;
    configure_tcp_keepalive(&stream)?;
    Ok(stream)
}

/// Enable TCP keep-alive so dead peers are noticed on idle connections.
pub(crate) fn configure_tcp_keepalive(stream: &TcpStream) -> Result<()> {
    let socket_ref = SockRef::from(stream);

    let keepalive = TcpKeepalive::new()
        .with_time(Duration::from_secs(10))
        .with_interval(Duration::from_secs(5));

    socket_ref
        .set_tcp_keepalive(&keepalive)
        .map_err(|e| Error::Io(std::io::Error::other(e)))?;

    tracing::debug!("TCP keep-alive enabled on socket");
    Ok(())
}

fn parse_port(port: &str) -> Result<u16> {
    port.parse().map_err(|_| {
        Error::InvalidInput(format!(
            "Invalid port '{port}'. Port must be a number between 1 and 65535"
        ))
    })
}

fn invalid_host(host: &str) -> Error {
    Error::InvalidInput(format!(
        "Invalid host format '{host}'. Use IP or IP:PORT (e.g., 192.168.1.100 or 192.168.1.100:5476)"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_ipv4_only() {
        let addr = parse_host_address("192.168.1.100").unwrap();
        assert_eq!(addr.ip().to_string(), "192.168.1.100");
        assert_eq!(addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn test_parse_host_ipv4_with_port() {
        let addr = parse_host_address("10.0.0.7:6000").unwrap();
        assert_eq!(addr.port(), 6000);
    }

    #[test]
    fn test_parse_host_ipv6() {
        let addr = parse_host_address("[::1]").unwrap();
        assert_eq!(addr.ip().to_string(), "::1");
        assert_eq!(addr.port(), DEFAULT_PORT);

        let addr = parse_host_address("[2001:db8::1]:6000").unwrap();
        assert_eq!(addr.ip().to_string(), "2001:db8::1");
        assert_eq!(addr.port(), 6000);
    }

    #[test]
    fn test_parse_host_invalid() {
        assert!(parse_host_address("not-an-ip").is_err());
        assert!(parse_host_address("192.168.1.100:abc").is_err());
        assert!(parse_host_address("192.168.1.256").is_err());
        assert!(parse_host_address("[nope]").is_err());
    }

    #[test]
    fn test_parse_host_whitespace() {
        let addr = parse_host_address("  127.0.0.1  ").unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_resolve_localhost() {
        let addr = resolve_host("localhost:6001").await.expect("resolve");
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 6001);
    }

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");

        let (client, accepted) = tokio::join!(
            connect(addr, Duration::from_secs(2)),
            listener.accept()
        );
        let client = client.expect("connect");
        accepted.expect("accept");
        assert_eq!(client.peer_addr().expect("peer"), addr);
    }
}
