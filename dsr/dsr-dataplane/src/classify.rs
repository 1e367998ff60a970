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

//! DSR classification of decapsulated packets.

use std::net::IpAddr;

use dsr_tun::InnerPacket;
use ipnet::IpNet;

/// Where a decapsulated packet goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForwardingDecision {
    /// Destination is a backend: send over the overlay to the relay node.
    ToRelay,
    /// Destination is outside the backend network: hand the packet to the
    /// local IP stack, which delivers it without the load balancer.
    DirectReturn,
}

/// Classifies packets by destination membership in the backend network.
///
/// The decision depends on nothing but the destination address and the
/// configured network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DsrClassifier {
    backend: IpNet,
}

impl DsrClassifier {
    /// Creates a classifier for the given backend network.
    pub fn new(backend: IpNet) -> Self {
        Self {
            backend: backend.trunc(),
        }
    }

    /// The backend network.
    pub fn backend(&self) -> IpNet {
        self.backend
    }

    /// Returns true if `addr` belongs to the backend network.
    pub fn is_backend(&self, addr: IpAddr) -> bool {
        self.backend.contains(&addr)
    }

    /// Decides how to forward `packet`.
    pub fn classify(&self, packet: &InnerPacket) -> ForwardingDecision {
        if self.is_backend(packet.destination()) {
            ForwardingDecision::ToRelay
        } else {
            ForwardingDecision::DirectReturn
        }
    }
}
