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

//! GENEVE: parsing and construction of GENEVE-encapsulated frames.
//!
//! A gateway load balancer wraps every packet it steers through an appliance
//! in a GENEVE header (RFC 8926) and sends it as a UDP datagram to port 6081.
//! This crate converts between such datagrams and their parts:
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Ver|  Opt Len  |O|C|    Rsvd.  |          Protocol Type        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |        Virtual Network Identifier (VNI)       |    Reserved   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ~                    Variable-Length Options                    ~
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ~                         Inner packet                          ~
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The codec is a pure transform, it performs no I/O. All numeric fields are
//! big-endian on the wire.
//!
//! ## Example
//!
//! ```
//! use geneve_proto::{Vni, decapsulate, encapsulate};
//!
//! // Minimal IPv4 header (version nibble 4, IHL 5) followed by nothing.
//! let mut inner = [0u8; 20];
//! inner[0] = 0x45;
//!
//! let datagram = encapsulate(&inner, Vni::new(42).unwrap()).unwrap();
//! let frame = decapsulate(datagram).unwrap();
//!
//! assert_eq!(frame.header.vni, Vni::new(42).unwrap());
//! assert_eq!(&frame.payload[..], &inner[..]);
//! ```

pub mod encode;
pub mod frame;
pub mod header;
pub mod option;
pub mod types;

pub use encode::{EncodeError, WireEncode};
pub use frame::{GeneveFrame, MalformedFrame, decapsulate, encapsulate};
pub use header::GeneveHeader;
pub use option::GeneveOption;
pub use types::{GENEVE_PORT, ProtocolType, Vni};
