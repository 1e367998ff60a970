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

//! Return-path cache.
//!
//! For every client flow seen in a GENEVE frame, the gateway remembers which
//! load balancer endpoint delivered it and with which GENEVE header. Return
//! traffic of that flow that the kernel routes into the bridge can then be
//! wrapped in the same header and handed back to the load balancer.
//!
//! Entries are keyed by the flow tuple as the client sent it, and looked up with
//! the reply's tuple reversed. Two flows of the same client can therefore carry
//! different GENEVE options. Non-first fragments of a reply carry no ports and
//! do not match a ported flow.
//!
//! The cache only serves the return leg. Classification of GENEVE ingress never
//! consults it. A missing entry costs one dropped packet. The number of entries
//! is bounded. Once full, new flows are not recorded until idle ones are swept.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use dsr_tun::FlowTuple;
use geneve_proto::GeneveHeader;
use prometheus::IntGauge;
use tokio_util::sync::CancellationToken;

/// Interval between two sweeps for idle entries.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default upper bound on the number of cached flows.
pub const DEFAULT_CAPACITY: usize = 65_536;

/// How to reach a client through the load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReturnPath {
    /// Load balancer endpoint the client's traffic came from.
    pub load_balancer: SocketAddr,
    /// GENEVE header the load balancer used, options included.
    pub header: GeneveHeader,
}

/// What [`ReturnPathCache::record`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// The flow was known with the same path. Only its timestamp moved.
    Refreshed,
    /// A new flow was added.
    Inserted,
    /// A known flow changed its load balancer or header.
    Replaced,
    /// The cache is full and the flow is new, nothing was stored.
    Rejected,
}

#[derive(Debug)]
struct Entry {
    path: ReturnPath,
    last_seen_ms: AtomicU64,
}

/// Return paths keyed by client flow, evicted after an idle period.
#[derive(Debug)]
pub struct ReturnPathCache {
    entries: RwLock<HashMap<FlowTuple, Entry>>,
    idle_timeout: Duration,
    capacity: usize,
    epoch: Instant,
}

impl ReturnPathCache {
    /// Creates an empty cache holding at most [`DEFAULT_CAPACITY`] flows.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            idle_timeout,
            capacity: DEFAULT_CAPACITY,
            epoch: Instant::now(),
        }
    }

    /// Sets the maximum number of cached flows.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Records that the client flow `flow` was delivered by `load_balancer`
    /// with `header`. `flow` is oriented from the client.
    pub fn record(
        &self,
        flow: FlowTuple,
        load_balancer: SocketAddr,
        header: &GeneveHeader,
    ) -> RecordOutcome {
        let now = self.now_ms();
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.get(&flow) {
                Some(entry)
                    if entry.path.load_balancer == load_balancer
                        && entry.path.header == *header =>
                {
                    entry.last_seen_ms.store(now, Ordering::Relaxed);
                    return RecordOutcome::Refreshed;
                }
                None if entries.len() >= self.capacity => return RecordOutcome::Rejected,
                _ => {}
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Re-checked, another writer may have filled the table in between.
        if !entries.contains_key(&flow) && entries.len() >= self.capacity {
            return RecordOutcome::Rejected;
        }
        let previous = entries.insert(
            flow,
            Entry {
                path: ReturnPath {
                    load_balancer,
                    header: header.clone(),
                },
                last_seen_ms: AtomicU64::new(now),
            },
        );
        match previous {
            Some(_) => RecordOutcome::Replaced,
            None => RecordOutcome::Inserted,
        }
    }

    /// Returns the return path for a reply travelling on `reply`, if its flow
    /// is known.
    pub fn lookup(&self, reply: &FlowTuple) -> Option<ReturnPath> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&reply.reversed())
            .map(|entry| entry.path.clone())
    }

    /// Idle period after which an entry is evicted.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Maximum number of cached flows.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of cached flows.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if no flow is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes entries idle for longer than the timeout. Returns the number removed.
    pub fn evict_idle(&self) -> usize {
        self.evict_idle_at(self.now_ms())
    }

    fn evict_idle_at(&self, now_ms: u64) -> usize {
        let timeout_ms = self.idle_timeout.as_millis() as u64;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| {
            now_ms.saturating_sub(entry.last_seen_ms.load(Ordering::Relaxed)) <= timeout_ms
        });
        before - entries.len()
    }

    /// Periodically evicts idle entries until cancelled.
    pub async fn run_sweeper(
        &self,
        interval: Duration,
        size_gauge: IntGauge,
        cancellation_token: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        while cancellation_token
            .run_until_cancelled(ticker.tick())
            .await
            .is_some()
        {
            let evicted = self.evict_idle();
            let remaining = self.len();
            size_gauge.set(remaining as i64);
            if evicted > 0 {
                tracing::debug!(evicted, remaining, "Evicted idle return paths");
            }
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }
}
