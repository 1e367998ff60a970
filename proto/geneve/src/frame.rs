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

//! Whole GENEVE datagrams.

use bytes::Bytes;

use crate::{
    encode::EncodeError,
    header::GeneveHeader,
    types::{ProtocolType, Vni},
};

/// A decoded GENEVE datagram.
///
/// The payload shares the receive buffer, decoding does not copy the inner packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneveFrame {
    /// The GENEVE header.
    pub header: GeneveHeader,
    /// The inner packet.
    pub payload: Bytes,
}

impl GeneveFrame {
    /// Decodes a UDP datagram into header and payload.
    pub fn decode(datagram: Bytes) -> Result<Self, MalformedFrame> {
        let (header, header_len) = GeneveHeader::decode(&datagram)?;
        Ok(GeneveFrame {
            header,
            payload: datagram.slice(header_len..),
        })
    }
}

/// Errors that can occur when decoding a GENEVE datagram.
#[derive(Clone, Copy, Debug, thiserror::Error, PartialEq, Eq, Hash)]
pub enum MalformedFrame {
    /// The datagram cannot hold the fixed header.
    #[error("datagram too short: {actual} bytes, need at least 8")]
    TooShort {
        /// Datagram length.
        actual: usize,
    },
    /// The version field is not 0.
    #[error("unsupported GENEVE version {0}")]
    UnsupportedVersion(u8),
    /// The announced options area extends past the datagram.
    #[error("options area overruns datagram: declared {declared}, available {available}")]
    OptionsOverrun {
        /// Options length announced in the fixed header, in bytes.
        declared: usize,
        /// Bytes available after the fixed header.
        available: usize,
    },
    /// A single option extends past the options area.
    #[error("option at offset {offset} overruns options area: required {required}, available {available}")]
    OptionOverrun {
        /// Offset of the option within the options area.
        offset: usize,
        /// Bytes required by the option.
        required: usize,
        /// Bytes left in the options area.
        available: usize,
    },
}

/// Decodes a GENEVE datagram.
///
/// Fails if the datagram is shorter than the fixed header, carries a version
/// other than 0, or announces more option bytes than it contains.
pub fn decapsulate(datagram: Bytes) -> Result<GeneveFrame, MalformedFrame> {
    GeneveFrame::decode(datagram)
}

/// Wraps `inner` in a version 0 GENEVE header without options.
///
/// The protocol type is set from the IP version of `inner`.
pub fn encapsulate(inner: &[u8], vni: Vni) -> Result<Bytes, EncodeError> {
    GeneveHeader::new(vni, ProtocolType::for_inner(inner)?).encapsulate(inner)
}
