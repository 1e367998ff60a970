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

//! Raw IP packets.

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
};

use bytes::Bytes;

/// IP protocol version of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    /// IPv4
    V4,
    /// IPv6
    V6,
}

/// Transport flow of a packet, as seen from its sender.
///
/// Ports are only read for TCP, UDP, UDP-Lite and SCTP, and only from the first
/// fragment of a packet. Everything else is keyed by addresses and protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowTuple {
    /// Source address.
    pub source: IpAddr,
    /// Destination address.
    pub destination: IpAddr,
    /// IP protocol number of the transport header.
    pub protocol: u8,
    /// Source and destination port, if the transport has them.
    pub ports: Option<(u16, u16)>,
}

impl FlowTuple {
    /// The same flow seen from the other end.
    pub fn reversed(self) -> Self {
        Self {
            source: self.destination,
            destination: self.source,
            protocol: self.protocol,
            ports: self.ports.map(|(src, dst)| (dst, src)),
        }
    }
}

/// A raw IP packet.
///
/// The packet is immutable. Construction only checks that the fixed IP header is
/// present, which is all that is needed to read the addresses.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct InnerPacket {
    bytes: Bytes,
    version: IpVersion,
}

impl InnerPacket {
    const IPV4_MIN_HEADER: usize = 20;
    const IPV6_HEADER: usize = 40;
    const PORTED_PROTOCOLS: [u8; 4] = [6, 17, 132, 136];

    /// Wraps `bytes` after checking for an IPv4 or IPv6 header.
    pub fn parse(bytes: Bytes) -> Result<Self, MalformedPacket> {
        let Some(first) = bytes.first() else {
            return Err(MalformedPacket::Empty);
        };
        let (version, min_len) = match first >> 4 {
            4 => (IpVersion::V4, Self::IPV4_MIN_HEADER),
            6 => (IpVersion::V6, Self::IPV6_HEADER),
            other => return Err(MalformedPacket::UnknownVersion(other)),
        };
        if bytes.len() < min_len {
            return Err(MalformedPacket::Truncated {
                version,
                len: bytes.len(),
            });
        }
        Ok(InnerPacket { bytes, version })
    }

    /// IP version of the packet.
    pub fn version(&self) -> IpVersion {
        self.version
    }

    /// Source address.
    pub fn source(&self) -> IpAddr {
        match self.version {
            IpVersion::V4 => IpAddr::V4(self.v4_addr(12)),
            IpVersion::V6 => IpAddr::V6(self.v6_addr(8)),
        }
    }

    /// Destination address.
    pub fn destination(&self) -> IpAddr {
        match self.version {
            IpVersion::V4 => IpAddr::V4(self.v4_addr(16)),
            IpVersion::V6 => IpAddr::V6(self.v6_addr(24)),
        }
    }

    /// Transport protocol number. For IPv6 this is the first next header, so
    /// packets with extension headers carry the extension's number.
    pub fn protocol(&self) -> u8 {
        match self.version {
            IpVersion::V4 => self.bytes[9],
            IpVersion::V6 => self.bytes[6],
        }
    }

    /// The packet's transport flow.
    pub fn flow(&self) -> FlowTuple {
        let protocol = self.protocol();
        FlowTuple {
            source: self.source(),
            destination: self.destination(),
            protocol,
            ports: Self::PORTED_PROTOCOLS
                .contains(&protocol)
                .then(|| self.ports())
                .flatten(),
        }
    }

    /// The packet bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the packet, returning its bytes.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }

    /// Packet length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false, a parsed packet holds at least an IP header.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn ports(&self) -> Option<(u16, u16)> {
        let offset = match self.version {
            IpVersion::V4 => {
                // Later fragments carry no transport header.
                let fragment_offset = u16::from_be_bytes([self.bytes[6], self.bytes[7]]) & 0x1fff;
                let header_len = usize::from(self.bytes[0] & 0x0f) * 4;
                if fragment_offset != 0 || header_len < Self::IPV4_MIN_HEADER {
                    return None;
                }
                header_len
            }
            IpVersion::V6 => Self::IPV6_HEADER,
        };
        let ports = self.bytes.get(offset..offset + 4)?;
        Some((
            u16::from_be_bytes([ports[0], ports[1]]),
            u16::from_be_bytes([ports[2], ports[3]]),
        ))
    }

    fn v4_addr(&self, offset: usize) -> Ipv4Addr {
        let mut octets = [0u8; 4];
        octets.copy_from_slice(&self.bytes[offset..offset + 4]);
        Ipv4Addr::from(octets)
    }

    fn v6_addr(&self, offset: usize) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.bytes[offset..offset + 16]);
        Ipv6Addr::from(octets)
    }
}

impl fmt::Debug for InnerPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InnerPacket")
            .field("src", &self.source())
            .field("dst", &self.destination())
            .field("len", &self.len())
            .finish()
    }
}

impl AsRef<[u8]> for InnerPacket {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl TryFrom<Bytes> for InnerPacket {
    type Error = MalformedPacket;

    fn try_from(bytes: Bytes) -> Result<Self, Self::Error> {
        InnerPacket::parse(bytes)
    }
}

/// Errors for bytes that are not an IP packet.
#[derive(Clone, Copy, Debug, thiserror::Error, PartialEq, Eq)]
pub enum MalformedPacket {
    /// No bytes at all.
    #[error("empty packet")]
    Empty,
    /// Version nibble is neither 4 nor 6.
    #[error("unknown IP version {0}")]
    UnknownVersion(u8),
    /// Too short for the fixed IP header.
    #[error("truncated {version:?} packet of {len} bytes")]
    Truncated {
        /// Announced version.
        version: IpVersion,
        /// Actual length.
        len: usize,
    },
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn ipv4(src: [u8; 4], dst: [u8; 4]) -> Bytes {
        let mut p = vec![0x45, 0, 0, 20, 0, 0, 0, 0, 64, 17, 0, 0];
        p.extend_from_slice(&src);
        p.extend_from_slice(&dst);
        Bytes::from(p)
    }

    #[test]
    fn reads_ipv4_addresses() {
        let packet = InnerPacket::parse(ipv4([192, 0, 2, 1], [10, 50, 0, 5])).unwrap();
        assert_eq!(packet.version(), IpVersion::V4);
        assert_eq!(packet.source(), "192.0.2.1".parse::<IpAddr>().unwrap());
        assert_eq!(packet.destination(), "10.50.0.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn reads_ipv6_addresses() {
        let mut p = vec![0x60, 0, 0, 0, 0, 0, 17, 64];
        p.extend_from_slice(&"2001:db8::1".parse::<Ipv6Addr>().unwrap().octets());
        p.extend_from_slice(&"2001:db8::2".parse::<Ipv6Addr>().unwrap().octets());
        let packet = InnerPacket::parse(Bytes::from(p)).unwrap();
        assert_eq!(packet.version(), IpVersion::V6);
        assert_eq!(packet.source(), "2001:db8::1".parse::<IpAddr>().unwrap());
        assert_eq!(packet.destination(), "2001:db8::2".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn rejects_non_ip() {
        assert_matches!(InnerPacket::parse(Bytes::new()), Err(MalformedPacket::Empty));
        assert_matches!(
            InnerPacket::parse(Bytes::from_static(&[0x20; 40])),
            Err(MalformedPacket::UnknownVersion(2))
        );
        assert_matches!(
            InnerPacket::parse(Bytes::from_static(&[0x45; 19])),
            Err(MalformedPacket::Truncated {
                version: IpVersion::V4,
                len: 19
            })
        );
    }

    fn udp_ipv4(src: [u8; 4], dst: [u8; 4], sport: u16, dport: u16) -> InnerPacket {
        let mut p = ipv4(src, dst).to_vec();
        p[3] = 28;
        p.extend_from_slice(&sport.to_be_bytes());
        p.extend_from_slice(&dport.to_be_bytes());
        p.extend_from_slice(&[0, 8, 0, 0]);
        InnerPacket::parse(Bytes::from(p)).unwrap()
    }

    #[test]
    fn reads_udp_flow() {
        let packet = udp_ipv4([198, 51, 100, 7], [10, 50, 0, 5], 40_000, 443);
        let flow = packet.flow();
        assert_eq!(flow.source, "198.51.100.7".parse::<IpAddr>().unwrap());
        assert_eq!(flow.destination, "10.50.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(flow.protocol, 17);
        assert_eq!(flow.ports, Some((40_000, 443)));
    }

    #[test]
    fn reply_flow_matches_reversed_request() {
        let request = udp_ipv4([198, 51, 100, 7], [10, 50, 0, 5], 40_000, 443);
        let reply = udp_ipv4([10, 50, 0, 5], [198, 51, 100, 7], 443, 40_000);
        assert_eq!(reply.flow().reversed(), request.flow());
        assert_ne!(
            udp_ipv4([10, 50, 0, 5], [198, 51, 100, 7], 443, 40_001).flow(),
            request.flow().reversed()
        );
    }

    #[test]
    fn ports_are_absent_without_transport_header() {
        // UDP header cut off.
        let packet = InnerPacket::parse(ipv4([198, 51, 100, 7], [10, 50, 0, 5])).unwrap();
        assert_eq!(packet.flow().ports, None);

        // Non-first fragment.
        let mut raw = udp_ipv4([198, 51, 100, 7], [10, 50, 0, 5], 1, 2)
            .into_bytes()
            .to_vec();
        raw[7] = 0x10;
        assert_eq!(InnerPacket::parse(Bytes::from(raw)).unwrap().flow().ports, None);

        // ICMP has no ports.
        let mut raw = udp_ipv4([198, 51, 100, 7], [10, 50, 0, 5], 1, 2)
            .into_bytes()
            .to_vec();
        raw[9] = 1;
        let flow = InnerPacket::parse(Bytes::from(raw)).unwrap().flow();
        assert_eq!(flow.protocol, 1);
        assert_eq!(flow.ports, None);
    }

    #[test]
    fn reads_ipv6_flow() {
        let mut p = vec![0x60, 0, 0, 0, 0, 8, 6, 64];
        p.extend_from_slice(&"2001:db8::1".parse::<Ipv6Addr>().unwrap().octets());
        p.extend_from_slice(&"2001:db8::2".parse::<Ipv6Addr>().unwrap().octets());
        p.extend_from_slice(&[0x01, 0xbb, 0x9c, 0x40, 0, 0, 0, 0]);
        let flow = InnerPacket::parse(Bytes::from(p)).unwrap().flow();
        assert_eq!(flow.protocol, 6);
        assert_eq!(flow.ports, Some((443, 40_000)));
    }

    #[test]
    fn bytes_are_untouched() {
        let raw = ipv4([198, 51, 100, 7], [203, 0, 113, 9]);
        let packet = InnerPacket::parse(raw.clone()).unwrap();
        assert_eq!(packet.into_bytes(), raw);
    }
}
