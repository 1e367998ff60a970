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

//! # Packet pipes for the DSR appliance
//!
//! This crate provides the two raw IP packet pipes a DSR node forwards between:
//!
//! - [`bridge::TunBridge`]: a TUN device through which packets enter and leave the
//!   kernel's IP stack.
//! - [`overlay::UdpOverlayChannel`]: a point-to-point UDP link to the peer node, sent
//!   through the already established secure overlay interface.
//!
//! Both implement [`PacketSource`] and [`PacketSink`], so forwarding loops can be
//! written once and tested against the in-memory [`bridge::MemoryBridge`].
//!
//! Packets are carried as [`InnerPacket`]s. Neither pipe touches packet contents:
//! addresses, ports and checksums leave exactly as they arrived.

pub mod bridge;
pub mod error;
pub mod overlay;
pub mod packet;

use async_trait::async_trait;
pub use error::{DeviceError, PacketIoError};
pub use packet::{FlowTuple, InnerPacket, IpVersion, MalformedPacket};

/// A source of raw IP packets.
///
/// Implementations are safe for concurrent use, reading only requires `&self`.
#[async_trait]
pub trait PacketSource: Send + Sync {
    /// Waits for the next packet.
    ///
    /// Returns [`PacketIoError::Fatal`] once the source is gone for good. Other
    /// errors concern a single packet only.
    async fn read_packet(&self) -> Result<InnerPacket, PacketIoError>;
}

/// A sink for raw IP packets.
#[async_trait]
pub trait PacketSink: Send + Sync {
    /// Writes one packet unmodified.
    ///
    /// Failures are not retried, the packet is lost on a transient error.
    async fn write_packet(&self, packet: &InnerPacket) -> Result<(), PacketIoError>;
}

/// Reports whether a link is administratively up.
pub trait LinkStatus: Send + Sync {
    /// Returns true if the link is up.
    fn is_up(&self) -> bool;
}
