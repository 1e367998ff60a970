// Copyright 2026 Anapaya Systems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Overlay tunnel channel.
//!
//! The channel carries one raw IP packet per UDP datagram between the gateway and
//! the relay. Encryption is provided by the secure interface the datagrams are
//! routed through, the channel itself is plain UDP. There is no reconnect logic
//! and no retransmission: loss and reordering are passed on to the transports
//! inside the packets.

use std::{
    io,
    net::SocketAddr,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use bytes::BytesMut;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::{InnerPacket, PacketIoError, PacketSink, PacketSource};

/// Largest payload of a UDP datagram.
const MAX_DATAGRAM: usize = 65_535;

/// Endpoints of the overlay link, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    /// Local address the channel binds to.
    pub local_bind: SocketAddr,
    /// Address of the peer node.
    pub remote_peer: SocketAddr,
    /// Name of the virtual interface bridged by this node.
    pub virtual_interface: String,
    /// Secure interface to pin the channel's socket to.
    pub overlay_interface: Option<String>,
}

/// Error binding the overlay channel.
#[derive(Debug, thiserror::Error)]
pub enum OverlayBindError {
    /// The local port is taken.
    #[error("overlay port {0} already in use")]
    PortAlreadyInUse(u16),
    /// The local address cannot be bound.
    #[error("cannot bind overlay channel to {addr}: {source}")]
    InvalidBindAddress {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        source: io::Error,
    },
    /// Pinning the socket to the overlay interface failed.
    #[error("cannot bind overlay channel to interface {interface}: {source}")]
    BindDevice {
        /// Interface name.
        interface: String,
        /// Underlying error.
        source: io::Error,
    },
    /// Any other socket error.
    #[error("overlay socket error: {0}")]
    Other(#[from] io::Error),
}

/// A UDP channel connected to the peer node.
///
/// Connecting the socket makes the kernel discard datagrams from any other
/// sender.
#[derive(Debug)]
pub struct UdpOverlayChannel {
    socket: UdpSocket,
    peer: SocketAddr,
    // Received packets are split off this buffer. Its allocation is reused once
    // they are dropped.
    recv_buffer: Mutex<BytesMut>,
}

impl UdpOverlayChannel {
    /// Binds the local end and connects it to the peer.
    pub async fn open(endpoint: &TunnelEndpoint) -> Result<Self, OverlayBindError> {
        let socket = bind_overlay_socket(endpoint)?;
        socket.connect(endpoint.remote_peer).await?;
        tracing::info!(
            local = %socket.local_addr()?,
            peer = %endpoint.remote_peer,
            interface = ?endpoint.overlay_interface,
            "Overlay channel ready"
        );
        Ok(UdpOverlayChannel {
            socket,
            peer: endpoint.remote_peer,
            recv_buffer: Mutex::new(BytesMut::new()),
        })
    }

    /// The bound local address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// The peer address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Sends one packet to the peer.
    pub async fn send(&self, packet: &InnerPacket) -> Result<(), PacketIoError> {
        self.socket
            .send(packet.as_bytes())
            .await
            .map(|_| ())
            .map_err(PacketIoError::from_io)
    }

    /// Waits for the next packet from the peer.
    pub async fn receive(&self) -> Result<InnerPacket, PacketIoError> {
        loop {
            self.socket
                .readable()
                .await
                .map_err(PacketIoError::from_io)?;
            let received = {
                let mut buf = self
                    .recv_buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                buf.clear();
                buf.reserve(MAX_DATAGRAM);
                self.socket
                    .try_recv_buf(&mut *buf)
                    .map(|n| buf.split_to(n).freeze())
            };
            match received {
                Ok(datagram) => return Ok(InnerPacket::parse(datagram)?),
                // Readiness was a false positive.
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(PacketIoError::from_io(e)),
            }
        }
    }
}

#[async_trait]
impl PacketSource for UdpOverlayChannel {
    async fn read_packet(&self) -> Result<InnerPacket, PacketIoError> {
        self.receive().await
    }
}

#[async_trait]
impl PacketSink for UdpOverlayChannel {
    async fn write_packet(&self, packet: &InnerPacket) -> Result<(), PacketIoError> {
        self.send(packet).await
    }
}

fn bind_overlay_socket(endpoint: &TunnelEndpoint) -> Result<UdpSocket, OverlayBindError> {
    let addr = endpoint.local_bind;
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;

    if let Some(interface) = &endpoint.overlay_interface {
        socket
            .bind_device(Some(interface.as_bytes()))
            .map_err(|source| OverlayBindError::BindDevice {
                interface: interface.clone(),
                source,
            })?;
    }

    socket.bind(&addr.into()).map_err(|e| match e.kind() {
        io::ErrorKind::AddrInUse => OverlayBindError::PortAlreadyInUse(addr.port()),
        io::ErrorKind::AddrNotAvailable | io::ErrorKind::InvalidInput => {
            OverlayBindError::InvalidBindAddress { addr, source: e }
        }
        _ => OverlayBindError::Other(e),
    })?;

    Ok(UdpSocket::from_std(std::net::UdpSocket::from(socket))?)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use test_log::test;

    use super::*;

    fn endpoint(local: SocketAddr, peer: SocketAddr) -> TunnelEndpoint {
        TunnelEndpoint {
            local_bind: local,
            remote_peer: peer,
            virtual_interface: "geneveTun".to_string(),
            overlay_interface: None,
        }
    }

    fn udp_packet() -> InnerPacket {
        InnerPacket::parse(Bytes::from_static(&[
            0x45, 0, 0, 28, 0, 0, 0, 0, 64, 17, 0, 0, 192, 0, 2, 10, 10, 50, 0, 5, 0x30, 0x39,
            0x00, 0x35, 0, 8, 0, 0,
        ]))
        .unwrap()
    }

    #[test(tokio::test)]
    #[ntest::timeout(10_000)]
    async fn carries_packets_unmodified() {
        let peer = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let peer_addr = peer.local_addr().unwrap();
        let a = UdpOverlayChannel::open(&endpoint("127.0.0.1:0".parse().unwrap(), peer_addr))
            .await
            .unwrap();
        drop(peer);
        let b = UdpOverlayChannel::open(&endpoint(peer_addr, a.local_addr().unwrap()))
            .await
            .unwrap();

        a.send(&udp_packet()).await.unwrap();
        let received = b.receive().await.unwrap();
        assert_eq!(received, udp_packet());
        assert_eq!(received.source(), udp_packet().source());

        b.write_packet(&udp_packet()).await.unwrap();
        assert_eq!(a.read_packet().await.unwrap(), udp_packet());
    }

    #[test(tokio::test)]
    #[ntest::timeout(10_000)]
    async fn received_packets_do_not_alias() {
        let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let channel =
            UdpOverlayChannel::open(&endpoint("127.0.0.1:0".parse().unwrap(), raw.local_addr().unwrap()))
                .await
                .unwrap();
        let target = channel.local_addr().unwrap();

        let mut larger = udp_packet().into_bytes().to_vec();
        larger[3] = 32;
        larger.extend_from_slice(b"tail");
        raw.send_to(&larger, target).await.unwrap();
        raw.send_to(udp_packet().as_bytes(), target).await.unwrap();
        raw.send_to(&larger, target).await.unwrap();

        let first = channel.receive().await.unwrap();
        let second = channel.receive().await.unwrap();
        let third = channel.receive().await.unwrap();
        assert_eq!(first.as_bytes(), &larger[..]);
        assert_eq!(second, udp_packet());
        assert_eq!(third.as_bytes(), &larger[..]);
    }

    #[test(tokio::test)]
    #[ntest::timeout(10_000)]
    async fn non_ip_datagram_is_malformed() {
        let raw = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let channel =
            UdpOverlayChannel::open(&endpoint("127.0.0.1:0".parse().unwrap(), raw.local_addr().unwrap()))
                .await
                .unwrap();

        raw.send_to(&[0x00, 0x01], channel.local_addr().unwrap())
            .await
            .unwrap();
        assert_matches!(channel.receive().await, Err(PacketIoError::Malformed(_)));
    }

    #[test(tokio::test)]
    #[ntest::timeout(10_000)]
    async fn port_in_use_is_reported() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let result = UdpOverlayChannel::open(&endpoint(
            taken.local_addr().unwrap(),
            "127.0.0.1:9".parse().unwrap(),
        ))
        .await;
        assert_matches!(result, Err(OverlayBindError::PortAlreadyInUse(_)));
    }
}
