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

//! Virtual interface bridge.
//!
//! The bridge owns a TUN device (`IFF_TUN | IFF_NO_PI`): every read returns one
//! IP packet the kernel routed into the device, every write injects one IP packet
//! into the kernel's receive path.
//!
//! The device is not persistent. It disappears when the [`TunBridge`] is dropped,
//! which covers every way the process can exit.

use std::{
    fs::File,
    io::{self, Read, Write},
    os::{fd::AsRawFd, unix::fs::OpenOptionsExt},
    process::Command,
    sync::{Mutex, PoisonError},
};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use ipnet::IpNet;
use tokio::io::{Interest, unix::AsyncFd};

use crate::{
    InnerPacket, LinkStatus, PacketSink, PacketSource,
    error::{DeviceError, PacketIoError},
};

mod memory;

pub use memory::{MemoryBridge, MemoryBridgeHandle};

const TUN_CLONE_DEVICE: &str = "/dev/net/tun";
const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;
const IFF_UP: u32 = 0x1;

/// Read buffer size used when no MTU is configured.
pub const DEFAULT_READ_BUFFER: usize = 65_535;

/// `struct ifreq` restricted to the flags member of its union.
#[repr(C)]
struct IfReqFlags {
    name: [libc::c_char; libc::IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

/// Settings for acquiring the bridge device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunConfig {
    /// Interface name.
    pub name: String,
    /// MTU to set on the device.
    pub mtu: Option<u32>,
    /// Address (with prefix length) to assign to the device.
    pub address: Option<IpNet>,
    /// Whether to set the link up after creation.
    pub bring_up: bool,
}

impl TunConfig {
    /// Creates a config that only brings the named device up.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mtu: None,
            address: None,
            bring_up: true,
        }
    }
}

/// A TUN device.
#[derive(Debug)]
pub struct TunBridge {
    fd: AsyncFd<File>,
    name: String,
    read_buffer: usize,
    read_buf: Mutex<BytesMut>,
}

impl TunBridge {
    /// Creates the device and applies `config`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: &TunConfig) -> Result<Self, DeviceError> {
        let file = create_tun(&config.name)?;
        let fd = AsyncFd::with_interest(file, Interest::READABLE | Interest::WRITABLE)
            .map_err(DeviceError::Register)?;

        let bridge = TunBridge {
            fd,
            name: config.name.clone(),
            read_buffer: config
                .mtu
                .map(|mtu| mtu as usize)
                .unwrap_or(DEFAULT_READ_BUFFER),
            read_buf: Mutex::new(BytesMut::new()),
        };
        bridge.configure(config)?;

        tracing::info!(
            name = %bridge.name,
            mtu = ?config.mtu,
            address = ?config.address,
            "Created TUN device"
        );
        Ok(bridge)
    }

    /// Interface name.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn configure(&self, config: &TunConfig) -> Result<(), DeviceError> {
        if let Some(mtu) = config.mtu {
            run_ip(&["link", "set", "dev", &self.name, "mtu", &mtu.to_string()])?;
        }
        if let Some(address) = config.address {
            run_ip(&["addr", "add", &address.to_string(), "dev", &self.name])?;
        }
        if config.bring_up {
            run_ip(&["link", "set", "dev", &self.name, "up"])?;
        }
        Ok(())
    }
}

impl Drop for TunBridge {
    fn drop(&mut self) {
        tracing::debug!(name = %self.name, "Closing TUN device");
    }
}

#[async_trait]
impl PacketSource for TunBridge {
    async fn read_packet(&self) -> Result<InnerPacket, PacketIoError> {
        loop {
            let mut guard = self.fd.readable().await.map_err(PacketIoError::Fatal)?;
            let read = {
                let mut buf = self.read_buf.lock().unwrap_or_else(PoisonError::into_inner);
                guard.try_io(|inner| {
                    read_reusing(&mut buf, self.read_buffer, |chunk| {
                        inner.get_ref().read(chunk)
                    })
                })
            };
            match read {
                Ok(Ok(packet)) if packet.is_empty() => {
                    return Err(PacketIoError::Fatal(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "TUN device closed",
                    )));
                }
                Ok(Ok(packet)) => return Ok(InnerPacket::parse(packet)?),
                Ok(Err(e)) => return Err(PacketIoError::from_io(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

/// Reads at most `size` bytes through `read` into `buf` and splits them off.
///
/// Bytes left over from the previous read are overwritten, so only the part
/// handed out last time is zeroed again. The allocation is reused once the
/// packets split off it are dropped.
fn read_reusing(
    buf: &mut BytesMut,
    size: usize,
    read: impl FnOnce(&mut [u8]) -> io::Result<usize>,
) -> io::Result<Bytes> {
    buf.resize(size, 0);
    let n = read(&mut buf[..])?;
    Ok(buf.split_to(n).freeze())
}

#[async_trait]
impl PacketSink for TunBridge {
    async fn write_packet(&self, packet: &InnerPacket) -> Result<(), PacketIoError> {
        loop {
            let mut guard = self.fd.writable().await.map_err(PacketIoError::Fatal)?;
            match guard.try_io(|inner| inner.get_ref().write(packet.as_bytes())) {
                Ok(Ok(n)) if n == packet.len() => return Ok(()),
                Ok(Ok(n)) => {
                    return Err(PacketIoError::Transient(io::Error::new(
                        io::ErrorKind::WriteZero,
                        format!("short write: {n} of {} bytes", packet.len()),
                    )));
                }
                Ok(Err(e)) => return Err(PacketIoError::from_io(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl LinkStatus for TunBridge {
    fn is_up(&self) -> bool {
        link_is_up(&self.name)
    }
}

/// An interface that is owned by someone else, observed by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedInterface(pub String);

impl LinkStatus for NamedInterface {
    fn is_up(&self) -> bool {
        link_is_up(&self.0)
    }
}

/// Returns true if the interface exists and has `IFF_UP` set.
pub fn link_is_up(name: &str) -> bool {
    let path = format!("/sys/class/net/{name}/flags");
    match std::fs::read_to_string(&path) {
        Ok(flags) => parse_sysfs_flags(&flags).is_some_and(|flags| flags & IFF_UP != 0),
        Err(e) => {
            tracing::trace!(error=%e, %path, "Interface flags not readable");
            false
        }
    }
}

fn parse_sysfs_flags(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    let hex = raw.strip_prefix("0x").unwrap_or(raw);
    u32::from_str_radix(hex, 16).ok()
}

fn create_tun(name: &str) -> Result<File, DeviceError> {
    let name_bytes = name.as_bytes();
    if name_bytes.is_empty() || name_bytes.len() >= libc::IFNAMSIZ || name_bytes.contains(&0) {
        return Err(DeviceError::InvalidName(name.to_string()));
    }

    let file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
        .open(TUN_CLONE_DEVICE)
        .map_err(DeviceError::Open)?;

    let mut req = IfReqFlags {
        name: [0; libc::IFNAMSIZ],
        flags: IFF_TUN | IFF_NO_PI,
        _pad: [0; 22],
    };
    for (dst, src) in req.name.iter_mut().zip(name_bytes) {
        *dst = *src as libc::c_char;
    }

    // SAFETY: the descriptor is open and `req` is a properly sized ifreq that
    // outlives the call.
    let rc = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &mut req) };
    if rc < 0 {
        return Err(DeviceError::Create {
            name: name.to_string(),
            source: io::Error::last_os_error(),
        });
    }
    Ok(file)
}

fn run_ip(args: &[&str]) -> Result<(), DeviceError> {
    let command = format!("ip {}", args.join(" "));
    tracing::debug!(%command, "Configuring TUN device");
    let output = Command::new("ip")
        .args(args)
        .output()
        .map_err(|source| DeviceError::Command {
            command: command.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(DeviceError::CommandFailed {
            command,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn ifreq_matches_kernel_size() {
        assert_eq!(std::mem::size_of::<IfReqFlags>(), 40);
    }

    #[test]
    fn parses_sysfs_flags() {
        assert_eq!(parse_sysfs_flags("0x1003\n"), Some(0x1003));
        assert_eq!(parse_sysfs_flags("0x1002"), Some(0x1002));
        assert_eq!(parse_sysfs_flags("garbage"), None);
    }

    fn filled(bytes: &'static [u8]) -> impl FnOnce(&mut [u8]) -> io::Result<usize> {
        move |chunk| {
            chunk[..bytes.len()].copy_from_slice(bytes);
            Ok(bytes.len())
        }
    }

    #[test]
    fn reads_reuse_the_buffer_without_aliasing() {
        let mut buf = BytesMut::new();

        let first = read_reusing(&mut buf, 16, filled(&[0x45, 1, 2, 3])).unwrap();
        let second = read_reusing(&mut buf, 16, filled(&[0x60, 9])).unwrap();
        assert_eq!(&first[..], &[0x45, 1, 2, 3]);
        assert_eq!(&second[..], &[0x60, 9]);

        // Each read sees the full size again.
        let seen = read_reusing(&mut buf, 16, |chunk| Ok(chunk.len())).unwrap();
        assert_eq!(seen.len(), 16);

        let eof = read_reusing(&mut buf, 16, |_| Ok(0)).unwrap();
        assert!(eof.is_empty());
        assert_matches!(
            read_reusing(&mut buf, 16, |_| Err(io::ErrorKind::WouldBlock.into())),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock
        );
    }

    #[test]
    fn missing_interface_is_down() {
        assert!(!link_is_up("dsr-no-such-if"));
    }

    #[test]
    fn rejects_bad_names() {
        assert_matches!(create_tun(""), Err(DeviceError::InvalidName(_)));
        assert_matches!(
            create_tun("a-name-that-is-too-long"),
            Err(DeviceError::InvalidName(_))
        );
    }
}
