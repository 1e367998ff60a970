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

//! # DSR data plane
//!
//! Forwarding logic of the gateway and relay nodes: GENEVE ingress, the DSR
//! classification of decapsulated packets, the forwarding loops between ingress,
//! bridge and overlay, and the health state the load balancer observes.

pub mod classify;
pub mod health;
pub mod ingress;
pub mod metrics;
pub mod pump;
pub mod return_path;

pub use classify::{DsrClassifier, ForwardingDecision};
pub use health::{
    HealthProtocol, HealthResponder, HealthResponderError, HealthState, HealthStatus,
    ReadinessMonitor,
};
pub use ingress::{IngressBindError, IngressListener};
pub use metrics::DataplaneMetrics;
pub use pump::{GatewayDataplane, RelayDataplane};
pub use return_path::{RecordOutcome, ReturnPathCache};
