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

//! GENEVE header model

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    encode::{EncodeError, InvalidStructureError, WireEncode},
    frame::MalformedFrame,
    option::GeneveOption,
    types::{ProtocolType, Vni},
};

/// Represents a GENEVE header, the fixed part plus its options.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeneveHeader {
    /// OAM flag, set on control frames that carry no user traffic.
    pub oam: bool,
    /// Critical flag, set if any option is marked critical.
    pub critical: bool,
    /// Ethertype of the inner packet.
    pub protocol_type: ProtocolType,
    /// Virtual network identifier.
    pub vni: Vni,
    /// Options in wire order.
    pub options: Vec<GeneveOption>,
}

impl GeneveHeader {
    /// Size of the fixed header.
    pub const FIXED_LEN: usize = 8;
    /// The only supported protocol version.
    pub const VERSION: u8 = 0;
    /// Maximum size of the options area (6-bit length in 4-byte words).
    pub const MAX_OPTIONS_LEN: usize = 0x3F * 4;

    const OAM_BIT: u8 = 0x80;
    const CRITICAL_BIT: u8 = 0x40;
    const OPT_LEN_MASK: u8 = 0x3F;

    /// Creates a header without options or flags.
    pub fn new(vni: Vni, protocol_type: ProtocolType) -> Self {
        GeneveHeader {
            oam: false,
            critical: false,
            protocol_type,
            vni,
            options: Vec::new(),
        }
    }

    /// Decodes the header at the start of `datagram`.
    ///
    /// Returns the header and its total length, i.e. the offset of the inner packet.
    pub fn decode(datagram: &Bytes) -> Result<(Self, usize), MalformedFrame> {
        if datagram.len() < Self::FIXED_LEN {
            return Err(MalformedFrame::TooShort {
                actual: datagram.len(),
            });
        }

        let version = datagram[0] >> 6;
        if version != Self::VERSION {
            return Err(MalformedFrame::UnsupportedVersion(version));
        }

        let options_len = usize::from(datagram[0] & Self::OPT_LEN_MASK) * 4;
        let header_len = Self::FIXED_LEN + options_len;
        if header_len > datagram.len() {
            return Err(MalformedFrame::OptionsOverrun {
                declared: options_len,
                available: datagram.len() - Self::FIXED_LEN,
            });
        }

        let options = GeneveOption::decode_all(&datagram.slice(Self::FIXED_LEN..header_len))?;

        let header = GeneveHeader {
            oam: datagram[1] & Self::OAM_BIT != 0,
            critical: datagram[1] & Self::CRITICAL_BIT != 0,
            protocol_type: ProtocolType(u16::from_be_bytes([datagram[2], datagram[3]])),
            vni: Vni::from_be_bytes([datagram[4], datagram[5], datagram[6]]),
            options,
        };
        Ok((header, header_len))
    }

    /// Returns the size of the options area in bytes.
    pub fn options_len(&self) -> usize {
        self.options.iter().map(WireEncode::required_size).sum()
    }

    /// Emits this header, options included, in front of `inner`.
    ///
    /// The protocol type is derived from the IP version of `inner`, so a header
    /// recorded for one packet can be reused for a reply of another IP version.
    pub fn encapsulate(&self, inner: &[u8]) -> Result<Bytes, EncodeError> {
        let header = GeneveHeader {
            protocol_type: ProtocolType::for_inner(inner)?,
            ..self.clone()
        };
        header.wire_valid()?;

        let header_len = header.required_size();
        let mut buf = BytesMut::zeroed(header_len);
        header.encode_valid(&mut buf);
        buf.reserve(inner.len());
        buf.put_slice(inner);
        Ok(buf.freeze())
    }
}

impl WireEncode for GeneveHeader {
    fn required_size(&self) -> usize {
        Self::FIXED_LEN + self.options_len()
    }

    fn wire_valid(&self) -> Result<(), InvalidStructureError> {
        for option in &self.options {
            option.wire_valid()?;
        }
        if self.options_len() > Self::MAX_OPTIONS_LEN {
            return Err("options exceed 252 bytes".into());
        }
        Ok(())
    }

    fn encode_valid(&self, buf: &mut [u8]) -> usize {
        let options_words = (self.options_len() / 4) as u8;
        buf[0] = (Self::VERSION << 6) | (options_words & Self::OPT_LEN_MASK);
        buf[1] = 0;
        if self.oam {
            buf[1] |= Self::OAM_BIT;
        }
        if self.critical {
            buf[1] |= Self::CRITICAL_BIT;
        }
        buf[2..4].copy_from_slice(&self.protocol_type.0.to_be_bytes());
        buf[4..7].copy_from_slice(&self.vni.to_be_bytes());
        buf[7] = 0;

        let mut offset = Self::FIXED_LEN;
        for option in &self.options {
            offset += option.encode_valid(&mut buf[offset..]);
        }
        offset
    }
}
