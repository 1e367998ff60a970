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

//! GENEVE ingress listener.

use std::{
    io,
    net::{SocketAddr, SocketAddrV4},
};

use bytes::BytesMut;
use dsr_tun::PacketIoError;
use geneve_proto::{GeneveFrame, MalformedFrame, decapsulate};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

/// Largest datagram the listener accepts.
pub const MAX_GENEVE_DATAGRAM: usize = 65_535;

/// Error binding the ingress socket.
#[derive(Debug, thiserror::Error)]
pub enum IngressBindError {
    /// The listen address is not IPv4.
    #[error("GENEVE listen address {0} is not IPv4")]
    NotIpv4(SocketAddr),
    /// The port is taken.
    #[error("GENEVE port {0} already in use")]
    PortAlreadyInUse(u16),
    /// Any other socket error.
    #[error("failed to bind GENEVE listener on {addr}: {source}")]
    Other {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        source: io::Error,
    },
}

/// Error receiving one GENEVE datagram.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    /// The socket failed.
    #[error(transparent)]
    Io(#[from] PacketIoError),
    /// The datagram is not a valid GENEVE frame.
    #[error("malformed GENEVE frame from {from}: {error}")]
    Malformed {
        /// Sender of the datagram.
        from: SocketAddr,
        /// Decoding error.
        error: MalformedFrame,
    },
}

/// UDP socket receiving GENEVE frames from the load balancer.
///
/// The same socket sends re-encapsulated return traffic, so the load balancer
/// sees replies coming from the port it sends to.
#[derive(Debug)]
pub struct IngressListener {
    socket: UdpSocket,
}

impl IngressListener {
    /// Binds the listener.
    ///
    /// The socket is an explicit `AF_INET` socket. A dual-stack socket bound to
    /// `[::]` may silently miss IPv4 traffic, so IPv6 addresses are rejected.
    pub fn bind(addr: SocketAddr) -> Result<Self, IngressBindError> {
        let SocketAddr::V4(v4) = addr else {
            return Err(IngressBindError::NotIpv4(addr));
        };
        let socket = bind_ipv4_udp(v4).map_err(|e| match e.kind() {
            io::ErrorKind::AddrInUse => IngressBindError::PortAlreadyInUse(addr.port()),
            _ => IngressBindError::Other { addr, source: e },
        })?;
        tracing::info!(%addr, "GENEVE listener bound");
        Ok(Self { socket })
    }

    /// The bound address.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Waits for the next datagram and decodes it.
    ///
    /// The datagram is received into `buf` and split off from it, so the frame
    /// owns its bytes. Passing the same buffer on every call reuses its
    /// allocation once earlier frames are dropped.
    pub async fn recv_frame(
        &self,
        buf: &mut BytesMut,
    ) -> Result<(GeneveFrame, SocketAddr), IngressError> {
        buf.clear();
        buf.reserve(MAX_GENEVE_DATAGRAM);
        let (n, from) = self
            .socket
            .recv_buf_from(buf)
            .await
            .map_err(PacketIoError::from_io)?;
        let datagram = buf.split_to(n).freeze();
        let frame =
            decapsulate(datagram).map_err(|error| IngressError::Malformed { from, error })?;
        Ok((frame, from))
    }

    /// Sends an encoded GENEVE datagram to `target`.
    pub async fn send_to(&self, datagram: &[u8], target: SocketAddr) -> Result<(), PacketIoError> {
        self.socket
            .send_to(datagram, target)
            .await
            .map(|_| ())
            .map_err(PacketIoError::from_io)
    }
}

fn bind_ipv4_udp(addr: SocketAddrV4) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_nonblocking(true)?;
    socket.bind(&SocketAddr::V4(addr).into())?;
    UdpSocket::from_std(std::net::UdpSocket::from(socket))
}
