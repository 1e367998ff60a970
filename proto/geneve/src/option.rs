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

//! GENEVE option TLVs.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Option Class         |      Type     |R|R|R| Length  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ~                  Variable-Length Option Data                  ~
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Options are kept opaque. The codec never interprets class or type, it only
//! preserves them so a header can be echoed back to its sender unchanged.

use bytes::Bytes;

use crate::{
    encode::{InvalidStructureError, WireEncode},
    frame::MalformedFrame,
};

/// A single GENEVE option record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeneveOption {
    /// Namespace of the option type.
    pub class: u16,
    /// Option type. The top bit marks the option as critical.
    pub option_type: u8,
    /// Option data, a multiple of 4 bytes and at most [`GeneveOption::MAX_DATA_LEN`].
    pub data: Bytes,
}

impl GeneveOption {
    /// Size of the option header.
    pub const HEADER_LEN: usize = 4;
    /// Maximum option data length (5-bit length in 4-byte words).
    pub const MAX_DATA_LEN: usize = 0x1F * 4;

    const CRITICAL_BIT: u8 = 0x80;
    const LENGTH_MASK: u8 = 0x1F;

    /// Returns true if the receiver must understand this option to process the frame.
    pub fn is_critical(&self) -> bool {
        self.option_type & Self::CRITICAL_BIT != 0
    }

    /// Decodes all options contained in `area`, which must be exactly the options
    /// area announced by the fixed header.
    pub(crate) fn decode_all(area: &Bytes) -> Result<Vec<GeneveOption>, MalformedFrame> {
        let mut options = Vec::new();
        let mut offset = 0;
        while offset < area.len() {
            let remaining = area.len() - offset;
            if remaining < Self::HEADER_LEN {
                return Err(MalformedFrame::OptionOverrun {
                    offset,
                    required: Self::HEADER_LEN,
                    available: remaining,
                });
            }

            let class = u16::from_be_bytes([area[offset], area[offset + 1]]);
            let option_type = area[offset + 2];
            let data_len = usize::from(area[offset + 3] & Self::LENGTH_MASK) * 4;
            let required = Self::HEADER_LEN + data_len;
            if remaining < required {
                return Err(MalformedFrame::OptionOverrun {
                    offset,
                    required,
                    available: remaining,
                });
            }

            let data_start = offset + Self::HEADER_LEN;
            options.push(GeneveOption {
                class,
                option_type,
                data: area.slice(data_start..data_start + data_len),
            });
            offset += required;
        }
        Ok(options)
    }
}

impl WireEncode for GeneveOption {
    fn required_size(&self) -> usize {
        Self::HEADER_LEN + self.data.len()
    }

    fn wire_valid(&self) -> Result<(), InvalidStructureError> {
        if self.data.len() % 4 != 0 {
            return Err("option data length must be a multiple of 4".into());
        }
        if self.data.len() > Self::MAX_DATA_LEN {
            return Err("option data exceeds 124 bytes".into());
        }
        Ok(())
    }

    fn encode_valid(&self, buf: &mut [u8]) -> usize {
        buf[0..2].copy_from_slice(&self.class.to_be_bytes());
        buf[2] = self.option_type;
        // Reserved bits are sent as zero.
        buf[3] = (self.data.len() / 4) as u8 & Self::LENGTH_MASK;
        buf[Self::HEADER_LEN..self.required_size()].copy_from_slice(&self.data);
        self.required_size()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::encode::EncodeError;

    #[test]
    fn decodes_consecutive_options() {
        let area = Bytes::from_static(&[
            0x01, 0x08, 0x01, 0x01, 0xAA, 0xBB, 0xCC, 0xDD, // class 0x0108, 1 word
            0xFF, 0xFF, 0x80, 0x00, // experimental class, critical, no data
        ]);
        let options = GeneveOption::decode_all(&area).unwrap();
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].class, 0x0108);
        assert_eq!(&options[0].data[..], &[0xAA, 0xBB, 0xCC, 0xDD]);
        assert!(!options[0].is_critical());
        assert!(options[1].is_critical());
        assert!(options[1].data.is_empty());
    }

    #[test]
    fn reserved_bits_in_length_byte_are_ignored() {
        let area = Bytes::from_static(&[0x00, 0x01, 0x02, 0xE0]);
        let options = GeneveOption::decode_all(&area).unwrap();
        assert!(options[0].data.is_empty());
    }

    #[test]
    fn option_overrunning_area_is_malformed() {
        let area = Bytes::from_static(&[0x00, 0x01, 0x02, 0x02, 0x00, 0x00, 0x00, 0x00]);
        assert_matches!(
            GeneveOption::decode_all(&area),
            Err(MalformedFrame::OptionOverrun {
                offset: 0,
                required: 12,
                available: 8
            })
        );
    }

    #[test]
    fn unaligned_option_data_is_rejected_on_encode() {
        let option = GeneveOption {
            class: 1,
            option_type: 2,
            data: Bytes::from_static(&[1, 2, 3]),
        };
        assert_matches!(option.encode_to_vec(), Err(EncodeError::InvalidStructure(_)));
    }
}
