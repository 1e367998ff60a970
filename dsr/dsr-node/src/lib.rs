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

//! # DSR node
//!
//! Configuration and lifecycle of the gateway and relay nodes. The binary in
//! `main.rs` only parses the command line and hands over to [`runtime`].

pub mod config;
pub mod metrics;
pub mod runtime;

pub use config::{Cli, Command, ConfigError, GatewayConfig, NodeConfig, RelayConfig};
pub use runtime::{NodeAddrs, RunningNode, RuntimeError, start_gateway, start_relay};
