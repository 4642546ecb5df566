use log::{debug, warn};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use tokio::net::TcpListener;
use tokio::time::{sleep, Duration, Instant};

use crate::utils::{P2PError, Result};

const LISTEN_BACKLOG: i32 = 128;

pub struct NodeUtils;

impl NodeUtils {
    /// Bind a TCP listener with SO_REUSEADDR so restarts don't trip over TIME_WAIT.
    pub fn bind_reusable_tcp_listener(addr: SocketAddr) -> Result<TcpListener> {
        let domain = if addr.is_ipv4() {
            Domain::IPV4
        } else {
            Domain::IPV6
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| P2PError::TransportError(format!("Failed to create socket: {}", e)))?;

        socket
            .set_reuse_address(true)
            .map_err(|e| P2PError::TransportError(format!("Failed to set reuse_address: {}", e)))?;

        socket
            .bind(&addr.into())
            .map_err(|e| P2PError::TransportError(format!("Failed to bind to {}: {}", addr, e)))?;

        socket
            .listen(LISTEN_BACKLOG)
            .map_err(|e| P2PError::TransportError(format!("Failed to listen on {}: {}", addr, e)))?;

        socket
            .set_nonblocking(true)
            .map_err(|e| P2PError::TransportError(format!("Failed to set nonblocking: {}", e)))?;

        let std_listener: std::net::TcpListener = socket.into();
        TcpListener::from_std(std_listener).map_err(|e| {
            P2PError::TransportError(format!("Failed to convert to tokio listener: {}", e))
        })
    }

    /// Primary non-loopback IPv4 of this host, falling back to loopback.
    ///
    /// Connecting a UDP socket sends nothing; it only asks the OS which
    /// interface would route to the target.
    pub fn local_ip() -> IpAddr {
        let routed = UdpSocket::bind("0.0.0.0:0").and_then(|socket| {
            socket.connect("192.0.2.1:9")?;
            socket.local_addr()
        });

        match routed {
            Ok(addr) if !addr.ip().is_unspecified() => addr.ip(),
            Ok(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            Err(e) => {
                warn!("Could not determine local IP ({}), using loopback", e);
                IpAddr::V4(Ipv4Addr::LOCALHOST)
            }
        }
    }

    /// Address other peers should dial to reach a listener bound at `bound`.
    pub fn advertised_address(bound: SocketAddr, advertise_ip: Option<IpAddr>) -> SocketAddr {
        let ip = match advertise_ip {
            Some(ip) => ip,
            None if bound.ip().is_unspecified() => Self::local_ip(),
            None => bound.ip(),
        };
        debug!("Advertising {}:{} for listener on {}", ip, bound.port(), bound);
        SocketAddr::new(ip, bound.port())
    }

    pub async fn is_port_available(port: u16) -> bool {
        TcpListener::bind(("127.0.0.1", port)).await.is_ok()
    }

    /// Wait until something accepts connections on `addr`.
    pub async fn wait_for_listener(addr: SocketAddr, timeout_duration: Duration) -> bool {
        let start = Instant::now();

        while start.elapsed() < timeout_duration {
            if tokio::net::TcpStream::connect(addr).await.is_ok() {
                return true;
            }
            sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let listener = NodeUtils::bind_reusable_tcp_listener("127.0.0.1:0".parse().unwrap())
            .unwrap();
        let addr = listener.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(!NodeUtils::is_port_available(addr.port()).await);
        assert!(NodeUtils::wait_for_listener(addr, Duration::from_secs(1)).await);
    }

    #[test]
    fn test_advertised_address() {
        let bound: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(NodeUtils::advertised_address(bound, None), bound);

        let override_ip: IpAddr = "10.0.0.7".parse().unwrap();
        assert_eq!(
            NodeUtils::advertised_address(bound, Some(override_ip)),
            "10.0.0.7:4000".parse::<SocketAddr>().unwrap()
        );

        let wildcard: SocketAddr = "0.0.0.0:4000".parse().unwrap();
        let advertised = NodeUtils::advertised_address(wildcard, None);
        assert!(!advertised.ip().is_unspecified());
        assert_eq!(advertised.port(), 4000);
    }
}
