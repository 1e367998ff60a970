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

//! Forwarding loops.
//!
//! Gateway node:
//!
//! ```text
//!  load balancer ──GENEVE──▶ ingress ──┬─ backend dst ──▶ overlay ──▶ relay
//!                                      └─ other dst ────▶ bridge (kernel, DSR)
//!  relay ──▶ overlay-rx ──▶ bridge (kernel)
//!  kernel ──▶ bridge-rx ──┬─ backend dst ───────────▶ overlay ──▶ relay
//!                         ├─ known client flow ─GENEVE─▶ load balancer
//!                         └─ otherwise: dropped
//! ```
//!
//! Only client flows are recorded for the return leg. Frames whose inner source
//! lies in the backend network never create a return path, and traffic towards
//! the backend network always takes the overlay.
//!
//! Relay node: overlay-rx writes into the bridge, bridge-rx sends to the overlay.
//!
//! Every loop runs until its input fails for good. Per-packet problems are
//! counted, logged at debug level and skipped.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use bytes::BytesMut;
use dsr_tun::{InnerPacket, PacketIoError, PacketSink, PacketSource};
use geneve_proto::{GeneveFrame, GeneveHeader};
use gwlb_dsr_utils::task_handler::CancelTaskSet;
use prometheus::IntCounter;
use tracing::{Instrument, info_span};

use crate::{
    classify::{DsrClassifier, ForwardingDecision},
    ingress::{IngressError, IngressListener},
    metrics::DataplaneMetrics,
    return_path::{RecordOutcome, ReturnPathCache, SWEEP_INTERVAL},
};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// The gateway's forwarding loops and the state they share.
pub struct GatewayDataplane<B, O> {
    ingress: Arc<IngressListener>,
    bridge: Arc<B>,
    overlay: Arc<O>,
    classifier: DsrClassifier,
    return_paths: Arc<ReturnPathCache>,
    metrics: DataplaneMetrics,
}

impl<B, O> Clone for GatewayDataplane<B, O> {
    fn clone(&self) -> Self {
        Self {
            ingress: self.ingress.clone(),
            bridge: self.bridge.clone(),
            overlay: self.overlay.clone(),
            classifier: self.classifier,
            return_paths: self.return_paths.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<B, O> GatewayDataplane<B, O>
where
    B: PacketSource + PacketSink + 'static,
    O: PacketSource + PacketSink + 'static,
{
    /// Creates the gateway data plane.
    pub fn new(
        ingress: Arc<IngressListener>,
        bridge: Arc<B>,
        overlay: Arc<O>,
        classifier: DsrClassifier,
        return_paths: Arc<ReturnPathCache>,
        metrics: DataplaneMetrics,
    ) -> Self {
        Self {
            ingress,
            bridge,
            overlay,
            classifier,
            return_paths,
            metrics,
        }
    }

    /// Spawns the ingress, overlay-rx and bridge-rx loops and the return-path
    /// sweeper onto `tasks`.
    pub fn start(&self, tasks: &mut CancelTaskSet) {
        let this = self.clone();
        tasks.spawn_cancellable_task(async move {
            this.run_ingress().instrument(info_span!("ingress")).await?;
            Ok(())
        });

        let this = self.clone();
        tasks.spawn_cancellable_task(async move {
            forward(
                this.overlay.as_ref(),
                this.bridge.as_ref(),
                &this.metrics.bridge_packets_written,
                &this.metrics,
            )
            .instrument(info_span!("overlay-rx"))
            .await?;
            Ok(())
        });

        let this = self.clone();
        tasks.spawn_cancellable_task(async move {
            this.run_bridge_rx()
                .instrument(info_span!("bridge-rx"))
                .await?;
            Ok(())
        });

        let cache = self.return_paths.clone();
        let gauge = self.metrics.return_path_entries.clone();
        let interval = cache
            .idle_timeout()
            .min(SWEEP_INTERVAL)
            .max(MIN_SWEEP_INTERVAL);
        let token = tasks.cancellation_token();
        tasks.spawn_cancellable_task(async move {
            cache.run_sweeper(interval, gauge, token).await;
            Ok(())
        });
    }

    /// Receives GENEVE frames and dispatches their inner packets.
    pub async fn run_ingress(&self) -> Result<(), PacketIoError> {
        let mut buf = BytesMut::new();
        loop {
            match self.ingress.recv_frame(&mut buf).await {
                Ok((frame, from)) => {
                    self.metrics.geneve_frames_received.inc();
                    self.handle_frame(frame, from).await?;
                }
                Err(IngressError::Malformed { from, error }) => {
                    self.metrics.geneve_frames_received.inc();
                    self.metrics.malformed_frames_dropped.inc();
                    tracing::debug!(%from, %error, "Dropped malformed GENEVE frame");
                }
                Err(IngressError::Io(e)) if e.is_fatal() => {
                    tracing::error!(error=%e, "GENEVE listener failed");
                    return Err(e);
                }
                Err(IngressError::Io(e)) => {
                    tracing::debug!(error=%e, "Failed to receive GENEVE frame");
                }
            }
        }
    }

    async fn handle_frame(&self, frame: GeneveFrame, from: SocketAddr) -> Result<(), PacketIoError> {
        if frame.header.oam {
            self.metrics.oam_frames_dropped.inc();
            tracing::trace!(%from, "Dropped GENEVE OAM frame");
            return Ok(());
        }

        let packet = match InnerPacket::parse(frame.payload) {
            Ok(packet) => packet,
            Err(e) => {
                self.metrics.malformed_packets_dropped.inc();
                tracing::debug!(%from, error=%e, "Dropped GENEVE frame without IP payload");
                return Ok(());
            }
        };

        if !self.classifier.is_backend(packet.source()) {
            self.record_return_path(&packet, from, &frame.header);
        }

        match self.classifier.classify(&packet) {
            ForwardingDecision::ToRelay => {
                deliver(
                    self.overlay.as_ref(),
                    &packet,
                    &self.metrics.overlay_packets_sent,
                    &self.metrics,
                )
                .await
            }
            ForwardingDecision::DirectReturn => {
                deliver(
                    self.bridge.as_ref(),
                    &packet,
                    &self.metrics.bridge_packets_written,
                    &self.metrics,
                )
                .await
            }
        }
    }

    fn record_return_path(&self, packet: &InnerPacket, from: SocketAddr, header: &GeneveHeader) {
        match self.return_paths.record(packet.flow(), from, header) {
            RecordOutcome::Inserted => self
                .metrics
                .return_path_entries
                .set(self.return_paths.len() as i64),
            RecordOutcome::Rejected => {
                self.metrics.return_paths_rejected.inc();
                tracing::debug!(
                    capacity = self.return_paths.capacity(),
                    flow = ?packet.flow(),
                    "Return-path cache full, flow not recorded"
                );
            }
            RecordOutcome::Refreshed | RecordOutcome::Replaced => {}
        }
    }

    /// Forwards packets the kernel routed into the bridge.
    ///
    /// Backend-bound packets always go to the overlay. Anything else is sent
    /// back to the load balancer if its flow is known, and dropped otherwise.
    /// Nothing read from the bridge is ever written back into it.
    pub async fn run_bridge_rx(&self) -> Result<(), PacketIoError> {
        loop {
            let Some(packet) = next_packet(self.bridge.as_ref(), &self.metrics).await? else {
                continue;
            };
            let destination = packet.destination();

            if self.classifier.is_backend(destination) {
                deliver(
                    self.overlay.as_ref(),
                    &packet,
                    &self.metrics.overlay_packets_sent,
                    &self.metrics,
                )
                .await?;
            } else if let Some(path) = self.return_paths.lookup(&packet.flow()) {
                let datagram = match path.header.encapsulate(packet.as_bytes()) {
                    Ok(datagram) => datagram,
                    Err(e) => {
                        self.metrics.malformed_packets_dropped.inc();
                        tracing::debug!(error=%e, %destination, "Failed to encapsulate return packet");
                        continue;
                    }
                };
                match self.ingress.send_to(&datagram, path.load_balancer).await {
                    Ok(()) => self.metrics.reencapsulated_packets.inc(),
                    Err(e) => self.write_failed(e)?,
                }
            } else {
                self.metrics.no_route_drops.inc();
                tracing::trace!(%destination, "Dropped packet without route");
            }
        }
    }

    fn write_failed(&self, error: PacketIoError) -> Result<(), PacketIoError> {
        write_failed(error, &self.metrics)
    }
}

/// The relay's forwarding loops.
pub struct RelayDataplane<B, O> {
    bridge: Arc<B>,
    overlay: Arc<O>,
    metrics: DataplaneMetrics,
}

impl<B, O> RelayDataplane<B, O>
where
    B: PacketSource + PacketSink + 'static,
    O: PacketSource + PacketSink + 'static,
{
    /// Creates the relay data plane.
    pub fn new(bridge: Arc<B>, overlay: Arc<O>, metrics: DataplaneMetrics) -> Self {
        Self {
            bridge,
            overlay,
            metrics,
        }
    }

    /// Spawns the overlay-rx and bridge-rx loops onto `tasks`.
    pub fn start(&self, tasks: &mut CancelTaskSet) {
        let (bridge, overlay, metrics) = (
            self.bridge.clone(),
            self.overlay.clone(),
            self.metrics.clone(),
        );
        tasks.spawn_cancellable_task(async move {
            forward(
                overlay.as_ref(),
                bridge.as_ref(),
                &metrics.bridge_packets_written,
                &metrics,
            )
            .instrument(info_span!("overlay-rx"))
            .await?;
            Ok(())
        });

        let (bridge, overlay, metrics) = (
            self.bridge.clone(),
            self.overlay.clone(),
            self.metrics.clone(),
        );
        tasks.spawn_cancellable_task(async move {
            forward(
                bridge.as_ref(),
                overlay.as_ref(),
                &metrics.overlay_packets_sent,
                &metrics,
            )
            .instrument(info_span!("bridge-rx"))
            .await?;
            Ok(())
        });
    }
}

/// Copies packets from `source` to `sink` unmodified.
pub async fn forward<S, D>(
    source: &S,
    sink: &D,
    forwarded: &IntCounter,
    metrics: &DataplaneMetrics,
) -> Result<(), PacketIoError>
where
    S: PacketSource + ?Sized,
    D: PacketSink + ?Sized,
{
    loop {
        if let Some(packet) = next_packet(source, metrics).await? {
            deliver(sink, &packet, forwarded, metrics).await?;
        }
    }
}

/// Reads the next packet. `None` means a packet was lost and the source is still usable.
async fn next_packet<S>(
    source: &S,
    metrics: &DataplaneMetrics,
) -> Result<Option<InnerPacket>, PacketIoError>
where
    S: PacketSource + ?Sized,
{
    match source.read_packet().await {
        Ok(packet) => Ok(Some(packet)),
        Err(PacketIoError::Malformed(e)) => {
            metrics.malformed_packets_dropped.inc();
            tracing::debug!(error=%e, "Dropped non-IP packet");
            Ok(None)
        }
        Err(PacketIoError::Transient(e)) => {
            tracing::debug!(error=%e, "Transient read error");
            Ok(None)
        }
        Err(e) => {
            tracing::error!(error=%e, "Packet source failed");
            Err(e)
        }
    }
}

/// Writes one packet. Only fatal errors are returned.
async fn deliver<D>(
    sink: &D,
    packet: &InnerPacket,
    delivered: &IntCounter,
    metrics: &DataplaneMetrics,
) -> Result<(), PacketIoError>
where
    D: PacketSink + ?Sized,
{
    match sink.write_packet(packet).await {
        Ok(()) => {
            delivered.inc();
            Ok(())
        }
        Err(e) => write_failed(e, metrics),
    }
}

fn write_failed(error: PacketIoError, metrics: &DataplaneMetrics) -> Result<(), PacketIoError> {
    if error.is_fatal() {
        tracing::error!(%error, "Packet sink failed");
        return Err(error);
    }
    metrics.transient_write_failures.inc();
    tracing::debug!(%error, "Dropped packet on write error");
    Ok(())
}
