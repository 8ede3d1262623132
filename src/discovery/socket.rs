//! Multicast rendezvous socket setup. Adapted from the mDNS socket
//! construction this crate started from, generalised from a fixed mDNS
//! group/port to whatever `addr`/`port` the container is configured with
//! (spec §4.3 `start({addr, port})`).

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::MeshError;

#[derive(Clone)]
pub struct MulticastSocket {
    inner: Arc<UdpSocket>,
    group: SocketAddr,
}

impl MulticastSocket {
    pub async fn send_to_group(&self, bytes: &[u8]) {
        if let Err(e) = self.inner.send_to(bytes, self.group).await {
            tracing::debug!(error = %e, "multicast send failed");
        }
    }

    pub async fn recv(&self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)> {
        self.inner.recv_from(buf).await
    }
}

pub fn bind_multicast(addr: &str, port: u16) -> Result<MulticastSocket, MeshError> {
    let group: Ipv4Addr = addr
        .parse()
        .map_err(|_| MeshError::InvalidParams(format!("bad discovery address {addr:?}")))?;

    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    socket.set_multicast_loop_v4(true)?;
    socket.join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
    socket.set_multicast_ttl_v4(16)?;
    socket.set_nonblocking(true)?;

    let std_socket = std::net::UdpSocket::from(socket);
    let tokio_socket = UdpSocket::from_std(std_socket)?;
    Ok(MulticastSocket {
        inner: Arc::new(tokio_socket),
        group: SocketAddr::V4(SocketAddrV4::new(group, port)),
    })
}
