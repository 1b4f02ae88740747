//! UDP ping probe. Entirely stateless — no TLS handshake, no login, just
//! one datagram out and one back.

use std::net::ToSocketAddrs;
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use rand::RngCore;
use tokio::net::UdpSocket;

use crate::error::{Error, Result, TransportError};

pub const DEFAULT_PORT: u16 = 64738;

#[derive(Debug, Clone)]
pub struct PingResponse {
    pub version: u32,
    pub connected_users: u32,
    pub max_users: u32,
    pub max_bitrate: u32,
    pub rtt: Duration,
}

/// Queries `address` (`host:port`, defaulting the port to 64738) without
/// logging in. `timeout` bounds both the reply wait and the read deadline.
pub async fn ping(address: &str, timeout: Duration) -> Result<PingResponse> {
    let addr = resolve(address)?;

    let socket = UdpSocket::bind("0.0.0.0:0")
        .await
        .map_err(TransportError::Io)?;

    let mut request = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut request[4..12]);

    let started = Instant::now();
    socket.send_to(&request, addr).await.map_err(TransportError::Io)?;

    let reply = tokio::time::timeout(timeout, recv_matching(&socket, &request[4..12]))
        .await
        .map_err(|_| TransportError::ReadTimeout)??;
    let rtt = started.elapsed();

    Ok(PingResponse {
        version: BigEndian::read_u32(&reply[0..4]),
        connected_users: BigEndian::read_u32(&reply[12..16]),
        max_users: BigEndian::read_u32(&reply[16..20]),
        max_bitrate: BigEndian::read_u32(&reply[20..24]),
        rtt,
    })
}

/// Keeps reading until a 24-byte reply whose echoed nonce matches arrives;
/// anything else (wrong size, wrong nonce) is silently discarded and
/// reading continues.
async fn recv_matching(socket: &UdpSocket, nonce: &[u8]) -> Result<[u8; 24]> {
    let mut buf = [0u8; 512];
    loop {
        let (n, _) = socket.recv_from(&mut buf).await.map_err(TransportError::Io)?;
        if n == 24 && buf[4..12] == *nonce {
            let mut reply = [0u8; 24];
            reply.copy_from_slice(&buf[..24]);
            return Ok(reply);
        }
    }
}

fn resolve(address: &str) -> Result<std::net::SocketAddr> {
    let candidate = if address.contains(':') {
        address.to_string()
    } else {
        format!("{address}:{DEFAULT_PORT}")
    };

    candidate
        .to_socket_addrs()
        .map_err(TransportError::Io)?
        .next()
        .ok_or_else(|| Error::Config(format!("could not resolve address {address}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_defaults_the_port() {
        let addr = resolve("127.0.0.1").unwrap();
        assert_eq!(addr.port(), DEFAULT_PORT);
    }

    #[test]
    fn resolve_keeps_explicit_port() {
        let addr = resolve("127.0.0.1:12345").unwrap();
        assert_eq!(addr.port(), 12345);
    }
}
