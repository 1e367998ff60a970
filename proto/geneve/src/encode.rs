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

//! Utilities for encoding GENEVE models into byte buffers.
//!
//! All model structures intended for encoding implement [`WireEncode`], which
//! has three responsibilities:
//!
//! 1. Calculating the required size for the wire encoding
//! 2. Validating that the structure can be represented on the wire
//! 3. Writing the wire format into a provided byte buffer
//!
//! ### Validation
//!
//! Validation only covers what is needed to produce a well-formed encoding,
//! e.g. option data must be a multiple of 4 bytes and the total option area must
//! fit the 6-bit length field. It is not a semantic check of field values.

/// Allows encoding to wire format.
pub trait WireEncode {
    /// Returns the size required for the wire encoding.
    fn required_size(&self) -> usize;

    /// Validates that all fields in the structure are valid for encoding.
    fn wire_valid(&self) -> Result<(), InvalidStructureError>;

    /// Writes the wire encoding into `buf`, which is at least
    /// [`WireEncode::required_size`] bytes long and belongs to a structure for
    /// which [`WireEncode::wire_valid`] returned `Ok`.
    ///
    /// Returns the number of bytes written.
    fn encode_valid(&self, buf: &mut [u8]) -> usize;

    /// Writes the wire encoding into the provided buffer.
    ///
    /// Returns the number of bytes written on success.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, EncodeError> {
        self.wire_valid()?;

        let required_size = self.required_size();
        if buf.len() < required_size {
            return Err(EncodeError::BufferTooSmall(required_size));
        }

        Ok(self.encode_valid(&mut buf[..required_size]))
    }

    /// Encodes into a newly allocated vector of exactly the required size.
    fn encode_to_vec(&self) -> Result<Vec<u8>, EncodeError> {
        let mut buf = vec![0u8; self.required_size()];
        self.encode(&mut buf)?;
        Ok(buf)
    }
}

/// Errors that can occur during encoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The structure which was attempted to be encoded is invalid.
    #[error(transparent)]
    InvalidStructure(#[from] InvalidStructureError),
    /// The provided buffer is too small.
    #[error("buffer too small: required {0}")]
    BufferTooSmall(usize),
    /// The VNI does not fit into 24 bits.
    #[error("vni {0:#x} exceeds 24 bits")]
    VniOutOfRange(u32),
    /// The inner packet is neither IPv4 nor IPv6.
    #[error("inner packet is not an IP packet (version nibble {0})")]
    UnknownInnerProtocol(u8),
}

/// Given structure has invalid fields to encode correctly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot encode structure: {0}")]
pub struct InvalidStructureError(&'static str);

impl From<&'static str> for InvalidStructureError {
    fn from(s: &'static str) -> Self {
        InvalidStructureError(s)
    }
}
