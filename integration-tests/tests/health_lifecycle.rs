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
//! Integration tests for health reporting and node lifecycle.

use std::{sync::Arc, time::Duration};

use assert_matches::assert_matches;
use dsr_dataplane::{HealthResponderError, HealthStatus};
use dsr_node::{RuntimeError, start_gateway};
use dsr_tun::bridge::MemoryBridge;
use integration_tests::{GatewayEnv, eventually, gateway_config, probe_accepts, reserve_udp_port};
use test_log::test;

const WAIT: Duration = Duration::from_secs(5);

#[test(tokio::test(flavor = "multi_thread"))]
#[ntest::timeout(20_000)]
async fn probes_follow_bridge_link_state() {
    let env = GatewayEnv::start().await;
    let health = env.node.addrs().health;

    assert!(eventually(WAIT, || probe_accepts(health)).await, "node becomes healthy");
    assert_eq!(env.metric("dsr_healthy"), 1);

    env.bridge.set_up(false);
    assert!(
        eventually(WAIT, || !probe_accepts(health)).await,
        "probes are refused while the bridge is down"
    );
    assert_eq!(env.node.health().status(), HealthStatus::Unhealthy);

    env.bridge.set_up(true);
    assert!(
        eventually(WAIT, || probe_accepts(health)).await,
        "node recovers"
    );
}

#[test(tokio::test(flavor = "multi_thread"))]
#[ntest::timeout(20_000)]
async fn shutdown_turns_unhealthy_before_stopping() {
    let env = GatewayEnv::start_with(|config| {
        config.node.drain_timeout = Duration::from_millis(500);
    })
    .await;
    let health = env.node.addrs().health;
    assert!(eventually(WAIT, || probe_accepts(health)).await);

    let state = env.node.health().clone();
    let GatewayEnv { node, bridge, .. } = env;
    let shutdown = tokio::spawn(node.shutdown());

    assert!(eventually(WAIT, || !probe_accepts(health)).await);
    assert!(state.is_draining());
    shutdown.await.unwrap().unwrap();
    drop(bridge);
}

#[test(tokio::test(flavor = "multi_thread"))]
#[ntest::timeout(20_000)]
async fn lost_bridge_stops_the_node_with_an_error() {
    let env = GatewayEnv::start().await;
    let GatewayEnv { node, bridge, .. } = env;
    drop(bridge);

    let result = node.run_until(std::future::pending()).await;
    assert!(result.is_err(), "unexpected exit must be reported");
}

#[test(tokio::test)]
#[ntest::timeout(10_000)]
async fn occupied_health_port_fails_startup() {
    let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = gateway_config(
        "127.0.0.1:0".parse().unwrap(),
        reserve_udp_port(),
    );
    config.node.health_listen = taken.local_addr().unwrap();

    let (bridge, _handle) = MemoryBridge::new(4);
    assert_matches!(
        start_gateway(&config, Arc::new(bridge)).await,
        Err(RuntimeError::HealthBind(HealthResponderError::Bind { .. }))
    );
}

#[test(tokio::test)]
#[ntest::timeout(10_000)]
async fn occupied_geneve_port_fails_startup() {
    let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut config = gateway_config(
        "127.0.0.1:0".parse().unwrap(),
        reserve_udp_port(),
    );
    config.geneve_listen = taken.local_addr().unwrap();

    let (bridge, _handle) = MemoryBridge::new(4);
    assert_matches!(
        start_gateway(&config, Arc::new(bridge)).await,
        Err(RuntimeError::IngressBind(_))
    );
}
