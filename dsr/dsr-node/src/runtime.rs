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

//! Node lifecycle.
//!
//! Startup acquires every resource before any forwarding task runs: the bridge,
//! the GENEVE listener (gateway only), the overlay channel, the health port and
//! the metrics port. A failure at any step aborts startup and releases whatever
//! was acquired so far. Once running, the node forwards until a termination
//! signal arrives or one of its tasks exits on its own.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use dsr_dataplane::{
    DataplaneMetrics, DsrClassifier, GatewayDataplane, HealthResponder, HealthResponderError,
    HealthState, IngressBindError, IngressListener, ReadinessMonitor, RelayDataplane,
    ReturnPathCache,
};
use dsr_tun::{
    DeviceError, LinkStatus, PacketSink, PacketSource,
    bridge::{NamedInterface, TunBridge},
    overlay::{OverlayBindError, UdpOverlayChannel},
};
use gwlb_dsr_utils::task_handler::{CancelTaskSet, TaskSetError};
use prometheus::Registry;
use tokio::{
    net::TcpListener,
    signal::unix::{Signal, SignalKind, signal},
};

use crate::{
    config::{GatewayConfig, NodeConfig, RelayConfig},
    metrics,
};

/// Error starting or running a node.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The bridge device could not be set up.
    #[error(transparent)]
    Device(#[from] DeviceError),
    /// The GENEVE listener could not be bound.
    #[error(transparent)]
    IngressBind(#[from] IngressBindError),
    /// The overlay channel could not be opened.
    #[error(transparent)]
    OverlayBind(#[from] OverlayBindError),
    /// The health port could not be bound.
    #[error(transparent)]
    HealthBind(#[from] HealthResponderError),
    /// Metrics registration failed.
    #[error("failed to register metrics: {0}")]
    Metrics(#[from] prometheus::Error),
    /// The metrics port could not be bound.
    #[error("failed to bind metrics endpoint on {addr}: {source}")]
    MetricsBind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Installing the signal handler failed.
    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),
    /// A forwarding task failed.
    #[error(transparent)]
    Task(#[from] TaskSetError),
    /// A task stopped without an error while no shutdown was requested.
    #[error("node stopped unexpectedly")]
    UnexpectedExit,
}

/// Addresses the running node is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeAddrs {
    /// GENEVE listener, gateway only.
    pub geneve: Option<SocketAddr>,
    /// Local end of the overlay channel.
    pub overlay: SocketAddr,
    /// Health check listener.
    pub health: SocketAddr,
    /// Metrics endpoint.
    pub metrics: Option<SocketAddr>,
}

/// A started node.
#[derive(Debug)]
pub struct RunningNode {
    tasks: CancelTaskSet,
    health: HealthState,
    drain_timeout: Duration,
    addrs: NodeAddrs,
    registry: Registry,
}

impl RunningNode {
    /// Bound addresses.
    pub fn addrs(&self) -> NodeAddrs {
        self.addrs
    }

    /// Health state shared with the responder.
    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Registry holding the node's metrics.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Stops the node.
    ///
    /// The node turns unhealthy first and keeps forwarding for the drain
    /// timeout, so the load balancer can move flows elsewhere.
    pub async fn shutdown(mut self) -> Result<(), RuntimeError> {
        self.health.begin_draining();
        if !self.drain_timeout.is_zero() {
            tracing::info!(timeout = ?self.drain_timeout, "Draining");
            let token = self.tasks.cancellation_token();
            let _ = token
                .run_until_cancelled(tokio::time::sleep(self.drain_timeout))
                .await;
        }
        self.tasks.cancel();
        self.tasks.join_all().await?;
        tracing::info!("Node stopped");
        Ok(())
    }

    /// Runs until `shutdown` resolves or a task exits.
    ///
    /// A requested shutdown returns `Ok`. A task exiting on its own is an error
    /// even if the task itself reported none.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<(), RuntimeError>
    where
        F: Future<Output = ()>,
    {
        let token = self.tasks.cancellation_token();
        tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown requested");
                self.shutdown().await
            }
            _ = token.cancelled() => {
                self.health.begin_draining();
                self.tasks.join_all().await?;
                tracing::error!("A forwarding task stopped, node is going down");
                Err(RuntimeError::UnexpectedExit)
            }
        }
    }
}

/// Starts a gateway on `bridge`.
pub async fn start_gateway<B>(
    config: &GatewayConfig,
    bridge: Arc<B>,
) -> Result<RunningNode, RuntimeError>
where
    B: PacketSource + PacketSink + LinkStatus + 'static,
{
    let ingress = Arc::new(IngressListener::bind(config.geneve_listen)?);
    let geneve_addr = ingress
        .local_addr()
        .map_err(|source| IngressBindError::Other {
            addr: config.geneve_listen,
            source,
        })?;

    let mut node = NodeStartup::open(&config.node, bridge.clone()).await?;
    let dataplane = GatewayDataplane::new(
        ingress,
        bridge,
        node.overlay.clone(),
        DsrClassifier::new(config.backend),
        Arc::new(
            ReturnPathCache::new(config.flow_idle_timeout)
                .with_capacity(config.flow_table_capacity),
        ),
        node.metrics.clone(),
    );
    dataplane.start(&mut node.tasks);
    tracing::info!(
        geneve = %geneve_addr,
        backend = %config.backend,
        flow_table_capacity = config.flow_table_capacity,
        "Gateway started"
    );
    Ok(node.finish(Some(geneve_addr)))
}

/// Starts a relay on `bridge`.
pub async fn start_relay<B>(
    config: &RelayConfig,
    bridge: Arc<B>,
) -> Result<RunningNode, RuntimeError>
where
    B: PacketSource + PacketSink + LinkStatus + 'static,
{
    let mut node = NodeStartup::open(&config.node, bridge.clone()).await?;
    let dataplane = RelayDataplane::new(bridge, node.overlay.clone(), node.metrics.clone());
    dataplane.start(&mut node.tasks);
    tracing::info!("Relay started");
    Ok(node.finish(None))
}

/// Opens the TUN device and runs a gateway until SIGINT or SIGTERM.
pub async fn run_gateway(config: GatewayConfig) -> Result<(), RuntimeError> {
    let mut signals = ShutdownSignal::install()?;
    let bridge = Arc::new(TunBridge::open(&config.node.tun)?);
    let node = start_gateway(&config, bridge).await?;
    node.run_until(signals.recv()).await
}

/// Opens the TUN device and runs a relay until SIGINT or SIGTERM.
pub async fn run_relay(config: RelayConfig) -> Result<(), RuntimeError> {
    let mut signals = ShutdownSignal::install()?;
    let bridge = Arc::new(TunBridge::open(&config.node.tun)?);
    let node = start_relay(&config, bridge).await?;
    node.run_until(signals.recv()).await
}

/// Resources shared by both roles, acquired before any task is spawned.
struct NodeStartup {
    overlay: Arc<UdpOverlayChannel>,
    metrics: DataplaneMetrics,
    registry: Registry,
    health: HealthState,
    tasks: CancelTaskSet,
    drain_timeout: Duration,
    overlay_addr: SocketAddr,
    health_addr: SocketAddr,
    metrics_addr: Option<SocketAddr>,
}

impl NodeStartup {
    async fn open<B>(config: &NodeConfig, bridge: Arc<B>) -> Result<Self, RuntimeError>
    where
        B: LinkStatus + 'static,
    {
        let registry = Registry::new();
        let metrics = DataplaneMetrics::new(&registry)?;

        let overlay = Arc::new(UdpOverlayChannel::open(&config.endpoint).await?);
        let overlay_addr = overlay.local_addr().map_err(OverlayBindError::Other)?;

        let health = HealthState::new();
        let responder =
            HealthResponder::bind(config.health_listen, config.health_protocol, health.clone())
                .await?;
        let health_addr = responder.local_addr();

        let metrics_listener = match config.metrics_listen {
            Some(addr) => Some(
                TcpListener::bind(addr)
                    .await
                    .map_err(|source| RuntimeError::MetricsBind { addr, source })?,
            ),
            None => None,
        };
        let metrics_addr = metrics_listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok());

        let mut monitor = ReadinessMonitor::new(health.clone())
            .with_link(config.endpoint.virtual_interface.clone(), bridge);
        if let Some(interface) = &config.endpoint.overlay_interface {
            monitor = monitor.with_link(
                interface.clone(),
                Arc::new(NamedInterface(interface.clone())),
            );
        }

        let mut tasks = CancelTaskSet::new();
        let token = tasks.cancellation_token();
        tasks.spawn_cancellable_task(async move {
            monitor.run(token).await;
            Ok(())
        });

        let token = tasks.cancellation_token();
        let gauge = metrics.healthy.clone();
        tasks.spawn_cancellable_task(async move {
            responder.run(token, gauge).await;
            Ok(())
        });

        if let Some(listener) = metrics_listener {
            let token = tasks.cancellation_token();
            let registry = registry.clone();
            tasks.spawn_cancellable_task(async move {
                metrics::serve(listener, registry, token).await?;
                Ok(())
            });
        }

        tracing::info!(
            overlay = %overlay_addr,
            peer = %overlay.peer(),
            health = %health_addr,
            "Node resources acquired"
        );

        Ok(Self {
            overlay,
            metrics,
            registry,
            health,
            tasks,
            drain_timeout: config.drain_timeout,
            overlay_addr,
            health_addr,
            metrics_addr,
        })
    }

    fn finish(self, geneve: Option<SocketAddr>) -> RunningNode {
        RunningNode {
            tasks: self.tasks,
            health: self.health,
            drain_timeout: self.drain_timeout,
            addrs: NodeAddrs {
                geneve,
                overlay: self.overlay_addr,
                health: self.health_addr,
                metrics: self.metrics_addr,
            },
            registry: self.registry,
        }
    }
}

/// SIGINT and SIGTERM.
struct ShutdownSignal {
    terminate: Signal,
    interrupt: Signal,
}

impl ShutdownSignal {
    fn install() -> Result<Self, RuntimeError> {
        Ok(Self {
            terminate: signal(SignalKind::terminate()).map_err(RuntimeError::Signal)?,
            interrupt: signal(SignalKind::interrupt()).map_err(RuntimeError::Signal)?,
        })
    }

    async fn recv(&mut self) {
        tokio::select! {
            _ = self.terminate.recv() => tracing::info!("Received SIGTERM"),
            _ = self.interrupt.recv() => tracing::info!("Received SIGINT"),
        }
    }
}
