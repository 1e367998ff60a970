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

//! Contains tests for GENEVE frame encoding/decoding
//!
//! 1. Every IP packet and VNI roundtrips through encapsulate/decapsulate unchanged
//! 2. Headers with options roundtrip and the options are echoed verbatim
//! 3. Arbitrary bytes never panic during decoding
//! 4. Datagrams whose options area overruns the datagram are rejected

use assert_matches::assert_matches;
use bytes::Bytes;
use geneve_proto::{
    GeneveHeader, GeneveOption, MalformedFrame, ProtocolType, Vni, WireEncode, decapsulate,
    encapsulate,
};
use proptest::{
    collection::vec,
    prelude::{ProptestConfig, Strategy, any},
    strategy::Just,
    prop_assert, prop_assert_eq, prop_oneof, proptest,
};

/// Inner packets beginning with an IPv4 or IPv6 version nibble.
fn inner_packet() -> impl Strategy<Value = Vec<u8>> {
    (prop_oneof![Just(0x40u8), Just(0x60u8)], any::<u8>(), vec(any::<u8>(), 0..1500)).prop_map(
        |(version, low, mut rest)| {
            rest.insert(0, version | (low & 0x0F));
            rest
        },
    )
}

fn vni() -> impl Strategy<Value = Vni> {
    (0u32..=Vni::MAX.get()).prop_map(|v| Vni::new(v).unwrap())
}

fn option() -> impl Strategy<Value = GeneveOption> {
    (any::<u16>(), any::<u8>(), 0usize..=4).prop_flat_map(|(class, option_type, words)| {
        vec(any::<u8>(), words * 4).prop_map(move |data| {
            GeneveOption {
                class,
                option_type,
                data: Bytes::from(data),
            }
        })
    })
}

#[test]
fn valid_frames_should_roundtrip() {
    proptest!(
        ProptestConfig::with_cases(2_000),
        |(inner in inner_packet(), vni in vni())| {
            let datagram = encapsulate(&inner, vni).unwrap();
            let frame = decapsulate(datagram).unwrap();

            prop_assert_eq!(frame.header.vni, vni);
            prop_assert!(frame.header.options.is_empty());
            prop_assert!(frame.header.protocol_type.is_ip());
            prop_assert_eq!(&frame.payload[..], &inner[..]);
        }
    );
}

#[test]
fn headers_with_options_should_roundtrip() {
    proptest!(
        ProptestConfig::with_cases(2_000),
        |(
            inner in inner_packet(),
            vni in vni(),
            options in vec(option(), 0..8),
            oam in any::<bool>(),
            critical in any::<bool>(),
        )| {
            let mut header = GeneveHeader::new(vni, ProtocolType::for_inner(&inner).unwrap());
            header.options = options;
            header.oam = oam;
            header.critical = critical;
            prop_assert!(header.wire_valid().is_ok());

            let datagram = header.encapsulate(&inner).unwrap();
            prop_assert_eq!(datagram.len(), header.required_size() + inner.len());

            let frame = decapsulate(datagram).unwrap();
            prop_assert_eq!(frame.header, header);
            prop_assert_eq!(&frame.payload[..], &inner[..]);
        }
    );
}

#[test]
fn arbitrary_bytes_must_not_panic() {
    proptest!(
        ProptestConfig::with_cases(10_000),
        |(bytes in vec(any::<u8>(), 0..600))| {
            let len = bytes.len();
            if let Ok(frame) = decapsulate(Bytes::from(bytes)) {
                let header_len = frame.header.required_size();
                prop_assert_eq!(header_len + frame.payload.len(), len);
            }
        }
    );
}

#[test]
fn overrunning_options_are_rejected() {
    proptest!(
        ProptestConfig::with_cases(2_000),
        |(opt_words in 1u8..0x40, tail in vec(any::<u8>(), 0..252))| {
            let declared = usize::from(opt_words) * 4;
            if tail.len() >= declared {
                return Ok(());
            }
            let mut datagram = vec![opt_words, 0, 0x08, 0x00, 0, 0, 1, 0];
            datagram.extend_from_slice(&tail);

            let result = decapsulate(Bytes::from(datagram));
            prop_assert!(
                matches!(result, Err(MalformedFrame::OptionsOverrun { .. })),
                "unexpected result {:?}",
                result
            );
        }
    );
}

#[test]
fn load_balancer_probe_frame_decodes() {
    // One 4-byte option (OptLen=1) ahead of an IPv4/ICMP packet.
    let mut datagram = vec![0x01, 0x00, 0x08, 0x00, 0x00, 0x00, 0x01, 0x00];
    datagram.extend_from_slice(&[0x01, 0x08, 0x01, 0x00]);
    let inner = [
        0x45, 0x00, 0x00, 0x1C, 0x00, 0x01, 0x00, 0x00, 0x40, 0x01, 0x00, 0x00, 10, 0, 0, 1, 10,
        50, 0, 5, 0x08, 0x00, 0xF7, 0xFF, 0x00, 0x00, 0x00, 0x00,
    ];
    datagram.extend_from_slice(&inner);

    let frame = decapsulate(Bytes::from(datagram)).unwrap();
    assert_eq!(frame.header.vni.get(), 1);
    assert_eq!(frame.header.options.len(), 1);
    assert_eq!(&frame.payload[..], &inner[..]);
}

#[test]
fn datagrams_shorter_than_fixed_header_are_rejected() {
    for len in 0..GeneveHeader::FIXED_LEN {
        assert_matches!(
            decapsulate(Bytes::from(vec![0u8; len])),
            Err(MalformedFrame::TooShort { actual }) if actual == len
        );
    }
}
