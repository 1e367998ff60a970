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

//! Command line interface and validated node configuration.
//!
//! Arguments are parsed by clap and then converted into [`GatewayConfig`] or
//! [`RelayConfig`]. The conversion checks every value; no resource is acquired
//! before it succeeds.

use std::{
    net::{AddrParseError, SocketAddr},
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueEnum};
use dsr_dataplane::HealthProtocol;
use dsr_tun::{bridge::TunConfig, overlay::TunnelEndpoint};
use ipnet::IpNet;

const MIN_MTU: u32 = 68;
const MAX_MTU: u32 = 65_535;
const IFNAMSIZ: usize = 16;

/// GENEVE gateway and relay for a gateway load balancer with direct server return.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Log filter, e.g. `info` or `dsr_dataplane=debug`. `RUST_LOG` takes precedence.
    #[arg(long, env = "DSR_LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    /// Node role.
    #[command(subcommand)]
    pub command: Command,
}

/// Node roles.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Terminates GENEVE from the load balancer and relays backend traffic.
    Gateway(GatewayArgs),
    /// Receives relayed traffic behind the gateway.
    Relay(RelayArgs),
}

/// Health check protocol as given on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum HealthProtocolArg {
    /// Accept and close.
    Tcp,
    /// Reply `200 OK`.
    Http,
}

impl From<HealthProtocolArg> for HealthProtocol {
    fn from(value: HealthProtocolArg) -> Self {
        match value {
            HealthProtocolArg::Tcp => HealthProtocol::Tcp,
            HealthProtocolArg::Http => HealthProtocol::Http,
        }
    }
}

/// Options shared by both roles.
#[derive(Debug, Clone, Args)]
pub struct NodeArgs {
    /// Health check listen address.
    #[arg(long, env = "DSR_HEALTH_LISTEN", default_value = "0.0.0.0:80")]
    pub health_listen: String,

    /// Health check protocol.
    #[arg(long, env = "DSR_HEALTH_PROTOCOL", value_enum, default_value = "tcp")]
    pub health_protocol: HealthProtocolArg,

    /// Name of the TUN device.
    #[arg(long, env = "DSR_TUN_NAME", default_value = "geneveTun")]
    pub tun_name: String,

    /// Address with prefix length to assign to the TUN device.
    #[arg(long, env = "DSR_TUN_ADDRESS")]
    pub tun_address: Option<String>,

    /// MTU of the TUN device.
    #[arg(long, env = "DSR_TUN_MTU", default_value_t = 8500)]
    pub tun_mtu: u32,

    /// Local address of the overlay channel.
    #[arg(long, env = "DSR_OVERLAY_BIND", default_value = "0.0.0.0:6082")]
    pub overlay_bind: String,

    /// Address of the peer node's overlay channel.
    #[arg(long, env = "DSR_OVERLAY_PEER")]
    pub overlay_peer: String,

    /// Secure interface carrying the overlay. Its link state gates health.
    #[arg(long, env = "DSR_OVERLAY_INTERFACE")]
    pub overlay_interface: Option<String>,

    /// Seconds to keep forwarding after turning unhealthy on shutdown.
    #[arg(long, env = "DSR_DRAIN_TIMEOUT", default_value_t = 0)]
    pub drain_timeout: u64,

    /// Prometheus metrics listen address.
    #[arg(long, env = "DSR_METRICS_LISTEN")]
    pub metrics_listen: Option<String>,
}

/// Gateway options.
#[derive(Debug, Clone, Args)]
pub struct GatewayArgs {
    /// GENEVE listen address. Must be IPv4.
    #[arg(long, env = "DSR_GENEVE_LISTEN", default_value = "0.0.0.0:6081")]
    pub geneve_listen: String,

    /// Backend network; packets to it are relayed, all others returned directly.
    #[arg(long, env = "DSR_BACKEND_CIDR")]
    pub backend_cidr: String,

    /// Seconds after which an idle client is forgotten by the return path.
    #[arg(long, env = "DSR_FLOW_IDLE_TIMEOUT", default_value_t = 300)]
    pub flow_idle_timeout: u64,

    /// Maximum number of client flows held for the return path.
    #[arg(long, env = "DSR_FLOW_TABLE_CAPACITY", default_value_t = 65_536)]
    pub flow_table_capacity: usize,

    #[command(flatten)]
    #[allow(missing_docs)]
    pub node: NodeArgs,
}

/// Relay options.
#[derive(Debug, Clone, Args)]
pub struct RelayArgs {
    #[command(flatten)]
    #[allow(missing_docs)]
    pub node: NodeArgs,
}

/// Invalid configuration value.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Not a socket address.
    #[error("--{field}: invalid address {value:?}: {source}")]
    InvalidAddress {
        /// Option name.
        field: &'static str,
        /// Given value.
        value: String,
        /// Parse error.
        source: AddrParseError,
    },
    /// Not a CIDR.
    #[error("--{field}: invalid network {value:?}: {source}")]
    InvalidCidr {
        /// Option name.
        field: &'static str,
        /// Given value.
        value: String,
        /// Parse error.
        source: ipnet::AddrParseError,
    },
    /// The GENEVE listener requires an IPv4 address.
    #[error("--geneve-listen: {0} is not an IPv4 address")]
    GeneveListenNotIpv4(SocketAddr),
    /// Interface names are 1 to 15 bytes without `/`, `%` or whitespace.
    #[error("--{field}: invalid interface name {value:?}")]
    InvalidInterfaceName {
        /// Option name.
        field: &'static str,
        /// Given value.
        value: String,
    },
    /// MTU out of range.
    #[error("--tun-mtu: {0} is outside {MIN_MTU}..={MAX_MTU}")]
    InvalidMtu(u32),
    /// Overlay endpoints of different address families.
    #[error("--overlay-bind {bind} and --overlay-peer {peer} differ in address family")]
    AddressFamilyMismatch {
        /// Local address.
        bind: SocketAddr,
        /// Peer address.
        peer: SocketAddr,
    },
    /// A zero duration where a positive one is needed.
    #[error("--{0} must be positive")]
    ZeroDuration(&'static str),
    /// A zero size where a positive one is needed.
    #[error("--{0} must be positive")]
    ZeroCapacity(&'static str),
}

/// Settings common to both roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    /// Health check listen address.
    pub health_listen: SocketAddr,
    /// Health check protocol.
    pub health_protocol: HealthProtocol,
    /// Bridge device settings.
    pub tun: TunConfig,
    /// Overlay endpoints.
    pub endpoint: TunnelEndpoint,
    /// Time between turning unhealthy and stopping the forwarding loops.
    pub drain_timeout: Duration,
    /// Metrics listen address.
    pub metrics_listen: Option<SocketAddr>,
}

/// Validated gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// GENEVE listen address.
    pub geneve_listen: SocketAddr,
    /// Backend network.
    pub backend: IpNet,
    /// Idle timeout of return paths.
    pub flow_idle_timeout: Duration,
    /// Maximum number of cached return paths.
    pub flow_table_capacity: usize,
    /// Common settings.
    pub node: NodeConfig,
}

/// Validated relay configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    /// Common settings.
    pub node: NodeConfig,
}

impl TryFrom<GatewayArgs> for GatewayConfig {
    type Error = ConfigError;

    fn try_from(args: GatewayArgs) -> Result<Self, Self::Error> {
        let geneve_listen = parse_addr("geneve-listen", &args.geneve_listen)?;
        if !geneve_listen.is_ipv4() {
            return Err(ConfigError::GeneveListenNotIpv4(geneve_listen));
        }
        let backend = args
            .backend_cidr
            .parse::<IpNet>()
            .map_err(|source| ConfigError::InvalidCidr {
                field: "backend-cidr",
                value: args.backend_cidr.clone(),
                source,
            })?;
        if args.flow_idle_timeout == 0 {
            return Err(ConfigError::ZeroDuration("flow-idle-timeout"));
        }
        if args.flow_table_capacity == 0 {
            return Err(ConfigError::ZeroCapacity("flow-table-capacity"));
        }
        Ok(GatewayConfig {
            geneve_listen,
            backend: backend.trunc(),
            flow_idle_timeout: Duration::from_secs(args.flow_idle_timeout),
            flow_table_capacity: args.flow_table_capacity,
            node: NodeConfig::try_from(args.node)?,
        })
    }
}

impl TryFrom<RelayArgs> for RelayConfig {
    type Error = ConfigError;

    fn try_from(args: RelayArgs) -> Result<Self, Self::Error> {
        Ok(RelayConfig {
            node: NodeConfig::try_from(args.node)?,
        })
    }
}

impl TryFrom<NodeArgs> for NodeConfig {
    type Error = ConfigError;

    fn try_from(args: NodeArgs) -> Result<Self, Self::Error> {
        let health_listen = parse_addr("health-listen", &args.health_listen)?;
        let local_bind = parse_addr("overlay-bind", &args.overlay_bind)?;
        let remote_peer = parse_addr("overlay-peer", &args.overlay_peer)?;
        if local_bind.is_ipv4() != remote_peer.is_ipv4() {
            return Err(ConfigError::AddressFamilyMismatch {
                bind: local_bind,
                peer: remote_peer,
            });
        }

        check_interface_name("tun-name", &args.tun_name)?;
        if let Some(name) = &args.overlay_interface {
            check_interface_name("overlay-interface", name)?;
        }
        if !(MIN_MTU..=MAX_MTU).contains(&args.tun_mtu) {
            return Err(ConfigError::InvalidMtu(args.tun_mtu));
        }

        let tun_address = args
            .tun_address
            .as_deref()
            .map(|value| {
                value.parse::<IpNet>().map_err(|source| ConfigError::InvalidCidr {
                    field: "tun-address",
                    value: value.to_string(),
                    source,
                })
            })
            .transpose()?;
        let metrics_listen = args
            .metrics_listen
            .as_deref()
            .map(|value| parse_addr("metrics-listen", value))
            .transpose()?;

        Ok(NodeConfig {
            health_listen,
            health_protocol: args.health_protocol.into(),
            tun: TunConfig {
                name: args.tun_name.clone(),
                mtu: Some(args.tun_mtu),
                address: tun_address,
                bring_up: true,
            },
            endpoint: TunnelEndpoint {
                local_bind,
                remote_peer,
                virtual_interface: args.tun_name,
                overlay_interface: args.overlay_interface,
            },
            drain_timeout: Duration::from_secs(args.drain_timeout),
            metrics_listen,
        })
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value
        .parse::<SocketAddr>()
        .map_err(|source| ConfigError::InvalidAddress {
            field,
            value: value.to_string(),
            source,
        })
}

fn check_interface_name(field: &'static str, value: &str) -> Result<(), ConfigError> {
    let valid = !value.is_empty()
        && value.len() < IFNAMSIZ
        && !value
            .chars()
            .any(|c| c == '/' || c == '%' || c.is_whitespace() || c == '\0');
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidInterfaceName {
            field,
            value: value.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn gateway(args: &[&str]) -> Result<GatewayConfig, ConfigError> {
        let cli = Cli::try_parse_from(
            ["dsr-node", "gateway"]
                .iter()
                .chain(args.iter())
                .copied()
                .collect::<Vec<_>>(),
        )
        .unwrap();
        match cli.command {
            Command::Gateway(args) => GatewayConfig::try_from(args),
            Command::Relay(_) => unreachable!(),
        }
    }

    const REQUIRED: [&str; 4] = [
        "--backend-cidr",
        "10.50.0.0/16",
        "--overlay-peer",
        "10.99.0.2:6082",
    ];

    #[test]
    fn defaults_match_the_load_balancer_setup() {
        let config = gateway(&REQUIRED).unwrap();
        assert_eq!(config.geneve_listen, "0.0.0.0:6081".parse().unwrap());
        assert_eq!(config.node.health_listen, "0.0.0.0:80".parse().unwrap());
        assert_eq!(config.node.health_protocol, HealthProtocol::Tcp);
        assert_eq!(config.node.tun.name, "geneveTun");
        assert_eq!(config.node.tun.mtu, Some(8500));
        assert_eq!(config.node.endpoint.virtual_interface, "geneveTun");
        assert_eq!(config.backend, "10.50.0.0/16".parse::<IpNet>().unwrap());
        assert_eq!(config.flow_idle_timeout, Duration::from_secs(300));
        assert_eq!(config.flow_table_capacity, 65_536);
        assert_eq!(config.node.drain_timeout, Duration::ZERO);
        assert!(config.node.metrics_listen.is_none());
    }

    #[test]
    fn missing_required_option_is_rejected() {
        assert!(Cli::try_parse_from(["dsr-node", "gateway", "--overlay-peer", "10.0.0.1:1"]).is_err());
        assert!(Cli::try_parse_from(["dsr-node", "relay"]).is_err());
    }

    #[test]
    fn ipv6_geneve_listen_is_rejected() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--geneve-listen", "[::]:6081"]);
        assert_matches!(gateway(&args), Err(ConfigError::GeneveListenNotIpv4(_)));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let mut bad_cidr = REQUIRED.to_vec();
        bad_cidr[1] = "10.50.0.0/33";
        assert_matches!(
            gateway(&bad_cidr),
            Err(ConfigError::InvalidCidr {
                field: "backend-cidr",
                ..
            })
        );

        let mut bad_peer = REQUIRED.to_vec();
        bad_peer[3] = "relay:6082";
        assert_matches!(
            gateway(&bad_peer),
            Err(ConfigError::InvalidAddress {
                field: "overlay-peer",
                ..
            })
        );

        let mut long_name = REQUIRED.to_vec();
        long_name.extend(["--tun-name", "a-very-long-tun-name"]);
        assert_matches!(
            gateway(&long_name),
            Err(ConfigError::InvalidInterfaceName { .. })
        );

        let mut mixed = REQUIRED.to_vec();
        mixed.extend(["--overlay-bind", "[::]:6082"]);
        assert_matches!(
            gateway(&mixed),
            Err(ConfigError::AddressFamilyMismatch { .. })
        );

        let mut tiny_mtu = REQUIRED.to_vec();
        tiny_mtu.extend(["--tun-mtu", "10"]);
        assert_matches!(gateway(&tiny_mtu), Err(ConfigError::InvalidMtu(10)));

        let mut no_flows = REQUIRED.to_vec();
        no_flows.extend(["--flow-table-capacity", "0"]);
        assert_matches!(
            gateway(&no_flows),
            Err(ConfigError::ZeroCapacity("flow-table-capacity"))
        );
    }

    #[test]
    fn relay_parses_shared_options() {
        let cli = Cli::try_parse_from([
            "dsr-node",
            "relay",
            "--overlay-peer",
            "10.99.0.1:6082",
            "--overlay-interface",
            "wg0",
            "--health-protocol",
            "http",
            "--tun-address",
            "10.200.0.1/30",
        ])
        .unwrap();
        let Command::Relay(args) = cli.command else {
            panic!("expected relay");
        };
        let config = RelayConfig::try_from(args).unwrap();
        assert_eq!(config.node.health_protocol, HealthProtocol::Http);
        assert_eq!(
            config.node.endpoint.overlay_interface.as_deref(),
            Some("wg0")
        );
        assert_eq!(
            config.node.tun.address,
            Some("10.200.0.1/30".parse().unwrap())
        );
    }
}
