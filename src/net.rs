//! Listening socket setup and the human-readable address shown to users.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::TcpStream;

use crate::ServerConfig;

/// IPv4 TCP listener on `0.0.0.0:port`.
///
/// `SO_REUSEADDR` and `SO_RCVBUF` are best-effort; failing to bind or listen
/// is an error.
pub fn bind_listener(config: &ServerConfig) -> io::Result<std::net::TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;

    if let Err(e) = socket.set_reuse_address(true) {
        tracing::warn!(error = %e, "failed to set SO_REUSEADDR");
    }
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        tracing::warn!(
            requested = config.recv_buffer_size,
            error = %e,
            "failed to set SO_RCVBUF on listener"
        );
    }

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port));
    socket.bind(&addr.into())?;
    socket.listen(config.listen_backlog)?;
    socket.set_nonblocking(true)?;

    Ok(socket.into())
}

/// Per-connection socket options. Failures are logged and ignored.
pub fn configure_connection(stream: &TcpStream, config: &ServerConfig) {
    if let Err(e) = stream.set_nodelay(config.no_delay) {
        tracing::debug!(error = %e, "failed to set TCP_NODELAY");
    }

    let socket = SockRef::from(stream);
    if let Err(e) = socket.set_recv_buffer_size(config.recv_buffer_size) {
        tracing::warn!(
            requested = config.recv_buffer_size,
            error = %e,
            "failed to set SO_RCVBUF on connection"
        );
    }
    if let Ok(actual) = socket.recv_buffer_size() {
        tracing::trace!(requested = config.recv_buffer_size, actual, "connection receive buffer");
    }
}

/// Best LAN-facing IPv4 address of this host, or `127.0.0.1`.
pub fn advertised_ip() -> Ipv4Addr {
    select_advertised_ip(interface_addresses())
}

/// Picks by preference `192.168.*`, `10.*`, `172.16.*`-`172.31.*`, then any
/// other non-loopback address; the first candidate wins within a class.
pub fn select_advertised_ip<I>(candidates: I) -> Ipv4Addr
where
    I: IntoIterator<Item = Ipv4Addr>,
{
    candidates
        .into_iter()
        .filter(|ip| !ip.is_loopback() && !ip.is_unspecified())
        .enumerate()
        .min_by_key(|(index, ip)| (preference(ip), *index))
        .map(|(_, ip)| ip)
        .unwrap_or(Ipv4Addr::LOCALHOST)
}

fn preference(ip: &Ipv4Addr) -> u8 {
    match ip.octets() {
        [192, 168, _, _] => 0,
        [10, _, _, _] => 1,
        [172, 16..=31, _, _] => 2,
        _ => 3,
    }
}

#[cfg(unix)]
fn interface_addresses() -> Vec<Ipv4Addr> {
    use nix::net::if_::InterfaceFlags;

    let addrs = match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::warn!(error = %e, "failed to enumerate network interfaces");
            return Vec::new();
        }
    };

    addrs
        .filter(|ifaddr| !ifaddr.flags.contains(InterfaceFlags::IFF_LOOPBACK))
        .filter_map(|ifaddr| {
            let sin = ifaddr.address.as_ref()?.as_sockaddr_in()?;
            let ip = Ipv4Addr::from(sin.ip());
            tracing::trace!(interface = %ifaddr.interface_name, %ip, "interface address");
            Some(ip)
        })
        .collect()
}

#[cfg(not(unix))]
fn interface_addresses() -> Vec<Ipv4Addr> {
    Vec::new()
}
