// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Socket setup for the two transports.

use crate::config::{EndpointConfig, RemoteConfig, WsServerConfig};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use tokio::net::{lookup_host, TcpListener, UdpSocket};

/// Largest possible UDP payload.
pub(crate) const MAX_DATAGRAM: usize = 65_535;

/// Resolve `host:port`, preferring IPv4 results.
///
/// `localhost` commonly resolves to `::1` first, while OSC controllers
/// almost always talk IPv4.
pub(crate) async fn resolve(host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
    let mut addrs: Vec<SocketAddr> = lookup_host((host, port)).await?.collect();
    if addrs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no address found for {}", host),
        ));
    }
    addrs.sort_by_key(|a| !a.is_ipv4());
    Ok(addrs)
}

/// Bind the UDP listen socket.
///
/// Without `exclusive`, `SO_REUSEADDR` is set so several tools can share
/// the controller port.
pub(crate) async fn bind_udp(config: &EndpointConfig) -> io::Result<UdpSocket> {
    let addr = resolve(&config.host, config.port).await?[0];
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if !config.exclusive {
        socket.set_reuse_address(true)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    tracing::debug!(
        "UDP bind addr={} exclusive={}",
        addr,
        config.exclusive
    );
    UdpSocket::from_std(socket.into())
}

/// Resolve the UDP peer, matching the address family of `local`.
pub(crate) async fn resolve_remote(config: &RemoteConfig, local: SocketAddr) -> io::Result<SocketAddr> {
    let addrs = resolve(&config.host, config.port).await?;
    Ok(addrs
        .iter()
        .copied()
        .find(|a| a.is_ipv4() == local.is_ipv4())
        .unwrap_or(addrs[0]))
}

/// Bind the WebSocket (TCP) listener.
pub(crate) async fn bind_ws(config: &WsServerConfig) -> io::Result<TcpListener> {
    let addr = resolve(&config.host, config.port).await?[0];
    let listener = TcpListener::bind(addr).await?;
    tracing::debug!("WebSocket bind addr={}", addr);
    Ok(listener)
}

/// Whether a UDP receive error only reflects an earlier failed send.
///
/// Some platforms report ICMP "port unreachable" for a previous `send_to`
/// on the next receive call; that is not a failure of the listen socket.
pub(crate) fn is_transient_recv_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

/// Non-loopback IPv4 addresses of this host, with interface names.
pub fn local_ipv4_addresses() -> Vec<(String, Ipv4Addr)> {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter_map(|(name, ip)| match ip {
                IpAddr::V4(v4) if !v4.is_loopback() => Some((name, v4)),
                _ => None,
            })
            .collect(),
        Err(e) => {
            tracing::debug!("Failed to list network interfaces: {}", e);
            Vec::new()
        }
    }
}
