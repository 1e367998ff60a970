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

//! Data plane metrics.

use prometheus::{IntCounter, IntGauge, Registry};

/// Counters shared by all forwarding loops of a node.
#[derive(Debug, Clone)]
pub struct DataplaneMetrics {
    /// GENEVE datagrams received on the ingress socket.
    pub geneve_frames_received: IntCounter,
    /// GENEVE datagrams dropped because they could not be decoded.
    pub malformed_frames_dropped: IntCounter,
    /// GENEVE control (OAM) frames dropped.
    pub oam_frames_dropped: IntCounter,
    /// Packets dropped because they are not IP packets.
    pub malformed_packets_dropped: IntCounter,
    /// Packets sent to the peer node.
    pub overlay_packets_sent: IntCounter,
    /// Packets written into the bridge device.
    pub bridge_packets_written: IntCounter,
    /// Packets encapsulated again and sent back to the load balancer.
    pub reencapsulated_packets: IntCounter,
    /// Packets lost to a transient write error.
    pub transient_write_failures: IntCounter,
    /// Packets dropped because no path applies to their destination.
    pub no_route_drops: IntCounter,
    /// Client flows not recorded because the return-path cache was full.
    pub return_paths_rejected: IntCounter,
    /// Client flows currently held in the return-path cache.
    pub return_path_entries: IntGauge,
    /// 1 while the node reports healthy, 0 otherwise.
    pub healthy: IntGauge,
}

impl DataplaneMetrics {
    /// Creates the metrics and registers them with `registry`.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            geneve_frames_received: counter(
                registry,
                "dsr_geneve_frames_received_total",
                "GENEVE datagrams received from the load balancer",
            )?,
            malformed_frames_dropped: counter(
                registry,
                "dsr_malformed_frames_dropped_total",
                "GENEVE datagrams dropped as malformed",
            )?,
            oam_frames_dropped: counter(
                registry,
                "dsr_oam_frames_dropped_total",
                "GENEVE OAM frames dropped",
            )?,
            malformed_packets_dropped: counter(
                registry,
                "dsr_malformed_packets_dropped_total",
                "Inner packets dropped because they are not IP",
            )?,
            overlay_packets_sent: counter(
                registry,
                "dsr_overlay_packets_sent_total",
                "Packets sent over the overlay channel",
            )?,
            bridge_packets_written: counter(
                registry,
                "dsr_bridge_packets_written_total",
                "Packets written into the bridge device",
            )?,
            reencapsulated_packets: counter(
                registry,
                "dsr_reencapsulated_packets_total",
                "Return packets encapsulated towards the load balancer",
            )?,
            transient_write_failures: counter(
                registry,
                "dsr_transient_write_failures_total",
                "Packets lost to transient write errors",
            )?,
            no_route_drops: counter(
                registry,
                "dsr_no_route_drops_total",
                "Packets dropped without a forwarding path",
            )?,
            return_paths_rejected: counter(
                registry,
                "dsr_return_paths_rejected_total",
                "Client flows not recorded because the return-path cache was full",
            )?,
            return_path_entries: gauge(
                registry,
                "dsr_return_path_entries",
                "Client flows in the return-path cache",
            )?,
            healthy: gauge(registry, "dsr_healthy", "Health reported to the load balancer")?,
        })
    }
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn gauge(registry: &Registry, name: &str, help: &str) -> Result<IntGauge, prometheus::Error> {
    let gauge = IntGauge::new(name, help)?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registers_all_metrics_once() {
        let registry = Registry::new();
        let metrics = DataplaneMetrics::new(&registry).unwrap();
        metrics.malformed_frames_dropped.inc();

        let families = registry.gather();
        assert_eq!(families.len(), 12);
        assert!(DataplaneMetrics::new(&registry).is_err());
    }
}
