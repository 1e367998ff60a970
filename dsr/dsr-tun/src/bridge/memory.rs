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

//! In-memory bridge for running nodes without a TUN device.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};

use crate::{InnerPacket, LinkStatus, PacketIoError, PacketSink, PacketSource};

/// A bridge backed by channels.
///
/// The [`MemoryBridgeHandle`] plays the role of the kernel: packets it injects are
/// returned by [`PacketSource::read_packet`], packets written to the bridge show up
/// at [`MemoryBridgeHandle::next_written`].
#[derive(Debug)]
pub struct MemoryBridge {
    inbound: Mutex<mpsc::Receiver<InnerPacket>>,
    outbound: mpsc::Sender<InnerPacket>,
    up: Arc<AtomicBool>,
}

/// The kernel side of a [`MemoryBridge`].
#[derive(Debug)]
pub struct MemoryBridgeHandle {
    inbound: mpsc::Sender<InnerPacket>,
    outbound: mpsc::Receiver<InnerPacket>,
    up: Arc<AtomicBool>,
}

impl MemoryBridge {
    /// Creates a bridge whose queues hold up to `capacity` packets each.
    ///
    /// The bridge starts up.
    pub fn new(capacity: usize) -> (Self, MemoryBridgeHandle) {
        let (inbound_tx, inbound_rx) = mpsc::channel(capacity);
        let (outbound_tx, outbound_rx) = mpsc::channel(capacity);
        let up = Arc::new(AtomicBool::new(true));
        (
            MemoryBridge {
                inbound: Mutex::new(inbound_rx),
                outbound: outbound_tx,
                up: up.clone(),
            },
            MemoryBridgeHandle {
                inbound: inbound_tx,
                outbound: outbound_rx,
                up,
            },
        )
    }
}

#[async_trait]
impl PacketSource for MemoryBridge {
    async fn read_packet(&self) -> Result<InnerPacket, PacketIoError> {
        self.inbound.lock().await.recv().await.ok_or_else(|| {
            PacketIoError::Fatal(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "memory bridge closed",
            ))
        })
    }
}

#[async_trait]
impl PacketSink for MemoryBridge {
    async fn write_packet(&self, packet: &InnerPacket) -> Result<(), PacketIoError> {
        if !self.up.load(Ordering::Relaxed) {
            return Err(PacketIoError::Transient(io::Error::from_raw_os_error(
                libc::EIO,
            )));
        }
        self.outbound
            .try_send(packet.clone())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    PacketIoError::Transient(io::Error::from_raw_os_error(libc::ENOBUFS))
                }
                mpsc::error::TrySendError::Closed(_) => PacketIoError::Fatal(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "memory bridge closed",
                )),
            })
    }
}

impl LinkStatus for MemoryBridge {
    fn is_up(&self) -> bool {
        self.up.load(Ordering::Relaxed)
    }
}

impl MemoryBridgeHandle {
    /// Hands a packet to the bridge as if the kernel routed it into the device.
    pub async fn inject(&self, packet: InnerPacket) -> Result<(), PacketIoError> {
        self.inbound.send(packet).await.map_err(|_| {
            PacketIoError::Fatal(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "memory bridge closed",
            ))
        })
    }

    /// Waits for the next packet written to the bridge.
    ///
    /// Returns `None` once the bridge is dropped.
    pub async fn next_written(&mut self) -> Option<InnerPacket> {
        self.outbound.recv().await
    }

    /// Returns a written packet if one is queued.
    pub fn try_next_written(&mut self) -> Option<InnerPacket> {
        self.outbound.try_recv().ok()
    }

    /// Sets the link state. Writes fail while the link is down.
    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use bytes::Bytes;
    use test_log::test;

    use super::*;

    fn packet(dst: u8) -> InnerPacket {
        let mut p = vec![0x45, 0, 0, 20, 0, 0, 0, 0, 64, 17, 0, 0, 10, 0, 0, 1, 10, 0, 0];
        p.push(dst);
        InnerPacket::parse(Bytes::from(p)).unwrap()
    }

    #[test(tokio::test)]
    #[ntest::timeout(10_000)]
    async fn passes_packets_both_ways() {
        let (bridge, mut handle) = MemoryBridge::new(4);

        handle.inject(packet(1)).await.unwrap();
        assert_eq!(bridge.read_packet().await.unwrap(), packet(1));

        bridge.write_packet(&packet(2)).await.unwrap();
        assert_eq!(handle.next_written().await.unwrap(), packet(2));
    }

    #[test(tokio::test)]
    #[ntest::timeout(10_000)]
    async fn full_queue_and_down_link_are_transient() {
        let (bridge, handle) = MemoryBridge::new(1);
        bridge.write_packet(&packet(1)).await.unwrap();
        assert_matches!(
            bridge.write_packet(&packet(2)).await,
            Err(PacketIoError::Transient(_))
        );

        handle.set_up(false);
        assert!(!bridge.is_up());
        assert_matches!(
            bridge.write_packet(&packet(3)).await,
            Err(PacketIoError::Transient(_))
        );
    }

    #[test(tokio::test)]
    #[ntest::timeout(10_000)]
    async fn dropped_handle_is_fatal_for_reader() {
        let (bridge, handle) = MemoryBridge::new(1);
        drop(handle);
        assert_matches!(bridge.read_packet().await, Err(PacketIoError::Fatal(_)));
    }
}
