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

//! Health state and the health-check responder.
//!
//! The load balancer probes every registered appliance with a TCP (or HTTP)
//! health check. A probe succeeds as soon as the TCP handshake completes, so an
//! unhealthy node must not merely close accepted connections: it stops listening
//! altogether and probes are refused by the kernel. The listener is bound again
//! once the node is healthy.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dsr_tun::LinkStatus;
use prometheus::IntGauge;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::watch,
};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Interval between readiness samples.
pub const READINESS_INTERVAL: Duration = Duration::from_secs(1);

const HTTP_HEAD_LIMIT: usize = 1024;
const HTTP_READ_TIMEOUT: Duration = Duration::from_secs(2);
const HTTP_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK";
const REBIND_DELAY: Duration = Duration::from_secs(1);

/// Health reported to the load balancer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HealthStatus {
    /// Probes succeed.
    Healthy,
    /// Probes are refused.
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Shared, process-wide health state.
///
/// Starts [`HealthStatus::Unhealthy`]. Once draining, the state stays unhealthy
/// regardless of readiness.
#[derive(Debug, Clone)]
pub struct HealthState {
    inner: Arc<HealthInner>,
}

#[derive(Debug)]
struct HealthInner {
    status: watch::Sender<HealthStatus>,
    draining: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Creates an unhealthy state.
    pub fn new() -> Self {
        let (status, _) = watch::channel(HealthStatus::Unhealthy);
        Self {
            inner: Arc::new(HealthInner {
                status,
                draining: AtomicBool::new(false),
            }),
        }
    }

    /// Current status.
    pub fn status(&self) -> HealthStatus {
        *self.inner.status.borrow()
    }

    /// Returns true if the status is healthy.
    pub fn is_healthy(&self) -> bool {
        self.status() == HealthStatus::Healthy
    }

    /// Returns true once draining started.
    pub fn is_draining(&self) -> bool {
        self.inner.draining.load(Ordering::Acquire)
    }

    /// Reports readiness. Ignored while draining.
    ///
    /// Returns true if the status changed.
    pub fn set_ready(&self, ready: bool) -> bool {
        let target = if ready {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        self.inner.status.send_if_modified(|status| {
            if self.inner.draining.load(Ordering::Acquire) || *status == target {
                return false;
            }
            *status = target;
            true
        })
    }

    /// Turns the state unhealthy for good.
    pub fn begin_draining(&self) {
        self.inner.draining.store(true, Ordering::Release);
        self.inner.status.send_replace(HealthStatus::Unhealthy);
    }

    /// Subscribes to status changes.
    pub fn subscribe(&self) -> watch::Receiver<HealthStatus> {
        self.inner.status.subscribe()
    }
}

/// Protocol spoken by the health responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HealthProtocol {
    /// Accept and close.
    #[default]
    Tcp,
    /// Answer any request with `200 OK`.
    Http,
}

/// Error of the health responder.
#[derive(Debug, thiserror::Error)]
pub enum HealthResponderError {
    /// The health port could not be bound at startup.
    #[error("failed to bind health listener on {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },
}

/// Answers load balancer health checks while the node is healthy.
#[derive(Debug)]
pub struct HealthResponder {
    addr: SocketAddr,
    protocol: HealthProtocol,
    state: HealthState,
    listener: Option<TcpListener>,
}

impl HealthResponder {
    /// Binds the health listener.
    ///
    /// Binding happens eagerly so that an unusable port fails startup. The
    /// listener is released as soon as the responder runs while unhealthy.
    pub async fn bind(
        addr: SocketAddr,
        protocol: HealthProtocol,
        state: HealthState,
    ) -> Result<Self, HealthResponderError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HealthResponderError::Bind { addr, source })?;
        // Port 0 resolves to a concrete port that must be reused when re-binding.
        let addr = listener.local_addr().unwrap_or(addr);
        Ok(Self {
            addr,
            protocol,
            state,
            listener: Some(listener),
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serves probes until cancelled.
    #[instrument(name = "health", skip_all, fields(addr = %self.addr, protocol = ?self.protocol))]
    pub async fn run(mut self, cancellation_token: CancellationToken, healthy_gauge: IntGauge) {
        let mut status = self.state.subscribe();
        loop {
            let current = *status.borrow_and_update();
            healthy_gauge.set(i64::from(current == HealthStatus::Healthy));

            match current {
                HealthStatus::Healthy => {
                    if self.listener.is_none() {
                        match TcpListener::bind(self.addr).await {
                            Ok(listener) => {
                                tracing::info!("Health listener bound");
                                self.listener = Some(listener);
                            }
                            Err(e) => {
                                tracing::warn!(error=%e, "Failed to re-bind health listener");
                                let retry = tokio::time::sleep(REBIND_DELAY);
                                if cancellation_token.run_until_cancelled(retry).await.is_none() {
                                    return;
                                }
                                continue;
                            }
                        }
                    }
                }
                HealthStatus::Unhealthy => {
                    if self.listener.take().is_some() {
                        tracing::info!("Health listener closed, probes are refused");
                    }
                }
            }

            let Some(listener) = &self.listener else {
                match cancellation_token.run_until_cancelled(status.changed()).await {
                    Some(Ok(())) => continue,
                    _ => return,
                }
            };

            tokio::select! {
                _ = cancellation_token.cancelled() => return,
                changed = status.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => self.answer(stream, peer),
                    Err(e) => tracing::debug!(error=%e, "Failed to accept health probe"),
                },
            }
        }
    }

    fn answer(&self, stream: TcpStream, peer: SocketAddr) {
        tracing::trace!(%peer, "Health probe");
        match self.protocol {
            HealthProtocol::Tcp => drop(stream),
            HealthProtocol::Http => {
                tokio::spawn(async move {
                    if let Err(e) = answer_http(stream).await {
                        tracing::debug!(error=%e, %peer, "Failed to answer HTTP health probe");
                    }
                });
            }
        }
    }
}

async fn answer_http(mut stream: TcpStream) -> std::io::Result<()> {
    let mut head = [0u8; HTTP_HEAD_LIMIT];
    let mut filled = 0;
    let read_head = async {
        while filled < head.len() {
            let n = stream.read(&mut head[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
            if head[..filled].windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        std::io::Result::Ok(())
    };
    match tokio::time::timeout(HTTP_READ_TIMEOUT, read_head).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "incomplete request head",
            ));
        }
    }
    stream.write_all(HTTP_RESPONSE).await?;
    stream.shutdown().await
}

/// Samples link state and feeds it into the [`HealthState`].
pub struct ReadinessMonitor {
    links: Vec<(String, Arc<dyn LinkStatus>)>,
    state: HealthState,
    interval: Duration,
}

impl ReadinessMonitor {
    /// Creates a monitor sampling every [`READINESS_INTERVAL`].
    pub fn new(state: HealthState) -> Self {
        Self {
            links: Vec::new(),
            state,
            interval: READINESS_INTERVAL,
        }
    }

    /// Adds a link that must be up for the node to be ready.
    pub fn with_link(mut self, name: impl Into<String>, link: Arc<dyn LinkStatus>) -> Self {
        self.links.push((name.into(), link));
        self
    }

    /// Overrides the sampling interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Samples once and updates the health state.
    pub fn sample(&self) -> bool {
        let mut ready = true;
        for (name, link) in &self.links {
            if !link.is_up() {
                tracing::debug!(link = %name, "Link is down");
                ready = false;
            }
        }
        if self.state.set_ready(ready) {
            tracing::info!(status = %self.state.status(), "Health status changed");
        }
        ready
    }

    /// Samples until cancelled.
    #[instrument(name = "readiness", skip_all)]
    pub async fn run(self, cancellation_token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while cancellation_token
            .run_until_cancelled(ticker.tick())
            .await
            .is_some()
        {
            self.sample();
        }
    }
}
