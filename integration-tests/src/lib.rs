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

//! Integration tests for the DSR nodes
//!
//! Nodes run with in-memory bridges in place of TUN devices, so the tests need
//! no privileges. Everything else (GENEVE listener, overlay channel, health
//! port) uses real loopback sockets.

use std::{
    net::{Ipv4Addr, SocketAddr, TcpStream},
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use dsr_dataplane::HealthProtocol;
use dsr_node::{GatewayConfig, NodeConfig, RelayConfig, RunningNode, start_gateway, start_relay};
use dsr_tun::{
    InnerPacket,
    bridge::{MemoryBridge, MemoryBridgeHandle, TunConfig},
    overlay::TunnelEndpoint,
};
use prometheus::{Registry, TextEncoder};
use tokio::net::UdpSocket;

/// Backend network used by all test gateways.
pub const BACKEND_CIDR: &str = "10.50.0.0/16";

const BRIDGE_CAPACITY: usize = 64;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Client port used by [`udp_ipv4`].
pub const CLIENT_PORT: u16 = 40_000;
/// Service port used by [`udp_ipv4`].
pub const SERVICE_PORT: u16 = 8_080;

/// Builds a minimal UDP/IPv4 packet from the client port to the service port.
pub fn udp_ipv4(src: Ipv4Addr, dst: Ipv4Addr, payload: &[u8]) -> InnerPacket {
    udp_ipv4_ports((src, CLIENT_PORT), (dst, SERVICE_PORT), payload)
}

/// Builds a minimal UDP/IPv4 packet between the given endpoints.
pub fn udp_ipv4_ports(
    (src, src_port): (Ipv4Addr, u16),
    (dst, dst_port): (Ipv4Addr, u16),
    payload: &[u8],
) -> InnerPacket {
    let udp_len = 8 + payload.len();
    let total_len = 20 + udp_len;
    let mut packet = Vec::with_capacity(total_len);
    packet.extend_from_slice(&[0x45, 0]);
    packet.extend_from_slice(&(total_len as u16).to_be_bytes());
    packet.extend_from_slice(&[0, 0, 0x40, 0, 64, 17, 0, 0]);
    packet.extend_from_slice(&src.octets());
    packet.extend_from_slice(&dst.octets());
    packet.extend_from_slice(&src_port.to_be_bytes());
    packet.extend_from_slice(&dst_port.to_be_bytes());
    packet.extend_from_slice(&(udp_len as u16).to_be_bytes());
    packet.extend_from_slice(&[0, 0]);
    packet.extend_from_slice(payload);
    InnerPacket::parse(Bytes::from(packet)).expect("valid IPv4 packet")
}

/// Node settings on loopback with ephemeral ports.
pub fn node_config(overlay_bind: SocketAddr, overlay_peer: SocketAddr) -> NodeConfig {
    NodeConfig {
        health_listen: "127.0.0.1:0".parse().expect("valid address"),
        health_protocol: HealthProtocol::Tcp,
        tun: TunConfig::new("geneveTun"),
        endpoint: TunnelEndpoint {
            local_bind: overlay_bind,
            remote_peer: overlay_peer,
            virtual_interface: "geneveTun".to_string(),
            overlay_interface: None,
        },
        drain_timeout: Duration::ZERO,
        metrics_listen: None,
    }
}

/// Gateway settings on loopback.
pub fn gateway_config(overlay_bind: SocketAddr, overlay_peer: SocketAddr) -> GatewayConfig {
    GatewayConfig {
        geneve_listen: "127.0.0.1:0".parse().expect("valid address"),
        backend: BACKEND_CIDR.parse().expect("valid network"),
        flow_idle_timeout: Duration::from_secs(300),
        flow_table_capacity: 1_024,
        node: node_config(overlay_bind, overlay_peer),
    }
}

/// A running gateway whose overlay peer is a plain UDP socket.
pub struct GatewayEnv {
    /// The gateway.
    pub node: RunningNode,
    /// Kernel side of the gateway's bridge.
    pub bridge: MemoryBridgeHandle,
    /// Stand-in for the relay.
    pub relay: UdpSocket,
    /// Stand-in for the load balancer.
    pub load_balancer: UdpSocket,
}

impl GatewayEnv {
    /// Starts a gateway with default test settings.
    pub async fn start() -> Self {
        Self::start_with(|_| {}).await
    }

    /// Starts a gateway after applying `adjust` to the test settings.
    pub async fn start_with(adjust: impl FnOnce(&mut GatewayConfig)) -> Self {
        let relay = UdpSocket::bind("127.0.0.1:0").await.expect("bind relay");
        let load_balancer = UdpSocket::bind("127.0.0.1:0").await.expect("bind LB");
        let mut config = gateway_config(
            "127.0.0.1:0".parse().expect("valid address"),
            relay.local_addr().expect("relay address"),
        );
        adjust(&mut config);

        let (bridge, handle) = MemoryBridge::new(BRIDGE_CAPACITY);
        let node = start_gateway(&config, Arc::new(bridge))
            .await
            .expect("gateway starts");
        Self {
            node,
            bridge: handle,
            relay,
            load_balancer,
        }
    }

    /// The gateway's GENEVE address.
    pub fn geneve_addr(&self) -> SocketAddr {
        self.node.addrs().geneve.expect("gateway has a GENEVE listener")
    }

    /// Sends a raw datagram from the load balancer to the gateway.
    pub async fn send_from_lb(&self, datagram: &[u8]) {
        self.load_balancer
            .send_to(datagram, self.geneve_addr())
            .await
            .expect("send to gateway");
    }

    /// Sends a raw datagram from the relay to the gateway's overlay channel.
    pub async fn send_from_relay(&self, datagram: &[u8]) {
        self.relay
            .send_to(datagram, self.node.addrs().overlay)
            .await
            .expect("send to gateway overlay");
    }

    /// Receives the next overlay datagram the gateway sent to the relay.
    pub async fn recv_at_relay(&self, within: Duration) -> Option<Vec<u8>> {
        recv_within(&self.relay, within).await
    }

    /// Receives the next datagram the gateway sent to the load balancer.
    pub async fn recv_at_lb(&self, within: Duration) -> Option<Vec<u8>> {
        recv_within(&self.load_balancer, within).await
    }

    /// Current value of a counter or gauge of the gateway.
    pub fn metric(&self, name: &str) -> u64 {
        metric_value(self.node.registry(), name)
    }
}

/// A gateway and a relay connected by their overlay channels.
pub struct PairEnv {
    /// The gateway.
    pub gateway: RunningNode,
    /// Kernel side of the gateway's bridge.
    pub gateway_bridge: MemoryBridgeHandle,
    /// The relay.
    pub relay: RunningNode,
    /// Kernel side of the relay's bridge.
    pub relay_bridge: MemoryBridgeHandle,
    /// Stand-in for the load balancer.
    pub load_balancer: UdpSocket,
}

impl PairEnv {
    /// Starts both nodes.
    pub async fn start() -> Self {
        // Overlay channels are connected, so each side must know the other's
        // port before binding.
        let gateway_overlay = reserve_udp_port();
        let relay_overlay = reserve_udp_port();

        let (relay_bridge, relay_bridge_handle) = MemoryBridge::new(BRIDGE_CAPACITY);
        let relay = start_relay(
            &RelayConfig {
                node: node_config(relay_overlay, gateway_overlay),
            },
            Arc::new(relay_bridge),
        )
        .await
        .expect("relay starts");

        let (gateway_bridge, gateway_bridge_handle) = MemoryBridge::new(BRIDGE_CAPACITY);
        let gateway = start_gateway(
            &gateway_config(gateway_overlay, relay_overlay),
            Arc::new(gateway_bridge),
        )
        .await
        .expect("gateway starts");

        Self {
            gateway,
            gateway_bridge: gateway_bridge_handle,
            relay,
            relay_bridge: relay_bridge_handle,
            load_balancer: UdpSocket::bind("127.0.0.1:0").await.expect("bind LB"),
        }
    }
}

/// Returns a loopback address whose UDP port was free a moment ago.
pub fn reserve_udp_port() -> SocketAddr {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").expect("bind probe socket");
    socket.local_addr().expect("probe address")
}

/// Reads a counter or gauge from `registry`. Missing metrics read as zero.
pub fn metric_value(registry: &Registry, name: &str) -> u64 {
    let Ok(text) = TextEncoder::new().encode_to_string(&registry.gather()) else {
        return 0;
    };
    text.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (metric, value) = line.split_once(' ')?;
            (metric == name).then(|| value.trim().parse::<f64>().ok())?
        })
        .map(|value| value as u64)
        .unwrap_or(0)
}

/// Polls `condition` until it holds or `within` elapses.
pub async fn eventually(within: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Whether a TCP connection to `addr` is accepted, as a load balancer probe sees it.
pub fn probe_accepts(addr: SocketAddr) -> bool {
    TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_ok()
}

async fn recv_within(socket: &UdpSocket, within: Duration) -> Option<Vec<u8>> {
    let mut buf = vec![0u8; 65_535];
    let (n, _) = tokio::time::timeout(within, socket.recv_from(&mut buf))
        .await
        .ok()?
        .ok()?;
    buf.truncate(n);
    Some(buf)
}
