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

//! Scalar GENEVE field types.

use std::fmt;

use crate::encode::EncodeError;

/// IANA assigned UDP port for GENEVE.
pub const GENEVE_PORT: u16 = 6081;

/// Virtual Network Identifier, a 24-bit value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Vni(u32);

impl Vni {
    /// Largest representable VNI.
    pub const MAX: Vni = Vni(0x00FF_FFFF);

    /// Creates a new VNI, failing if `value` does not fit into 24 bits.
    pub const fn new(value: u32) -> Result<Self, EncodeError> {
        if value > Self::MAX.0 {
            return Err(EncodeError::VniOutOfRange(value));
        }
        Ok(Vni(value))
    }

    /// Builds a VNI from the three wire bytes.
    pub(crate) const fn from_be_bytes(bytes: [u8; 3]) -> Self {
        Vni(u32::from_be_bytes([0, bytes[0], bytes[1], bytes[2]]))
    }

    /// Returns the three wire bytes.
    pub(crate) const fn to_be_bytes(self) -> [u8; 3] {
        let b = self.0.to_be_bytes();
        [b[1], b[2], b[3]]
    }

    /// Returns the numeric value.
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for Vni {
    type Error = EncodeError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Vni::new(value)
    }
}

impl fmt::Display for Vni {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ethertype of the encapsulated packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolType(pub u16);

impl ProtocolType {
    /// IPv4 inner packet.
    pub const IPV4: ProtocolType = ProtocolType(0x0800);
    /// IPv6 inner packet.
    pub const IPV6: ProtocolType = ProtocolType(0x86DD);

    /// Derives the protocol type from the IP version nibble of `inner`.
    pub fn for_inner(inner: &[u8]) -> Result<Self, EncodeError> {
        match inner.first().map(|b| b >> 4) {
            Some(4) => Ok(Self::IPV4),
            Some(6) => Ok(Self::IPV6),
            Some(other) => Err(EncodeError::UnknownInnerProtocol(other)),
            None => Err(EncodeError::UnknownInnerProtocol(0)),
        }
    }

    /// Returns true if the protocol type denotes an IP packet.
    pub fn is_ip(self) -> bool {
        self == Self::IPV4 || self == Self::IPV6
    }
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn vni_bounds() {
        assert_eq!(Vni::new(0xFF_FFFF).unwrap(), Vni::MAX);
        assert_matches!(Vni::new(0x100_0000), Err(EncodeError::VniOutOfRange(0x100_0000)));
    }

    #[test]
    fn vni_wire_bytes() {
        let vni = Vni::new(0x12_3456).unwrap();
        assert_eq!(vni.to_be_bytes(), [0x12, 0x34, 0x56]);
        assert_eq!(Vni::from_be_bytes([0x12, 0x34, 0x56]), vni);
    }

    #[test]
    fn protocol_type_from_version_nibble() {
        assert_eq!(ProtocolType::for_inner(&[0x45]).unwrap(), ProtocolType::IPV4);
        assert_eq!(ProtocolType::for_inner(&[0x60]).unwrap(), ProtocolType::IPV6);
        assert_matches!(
            ProtocolType::for_inner(&[0x10]),
            Err(EncodeError::UnknownInnerProtocol(1))
        );
        assert_matches!(
            ProtocolType::for_inner(&[]),
            Err(EncodeError::UnknownInnerProtocol(0))
        );
    }
}
