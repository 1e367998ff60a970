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

//! Packet I/O errors.

use std::io;

use crate::packet::MalformedPacket;

/// Error reading or writing a single packet.
///
/// Only [`PacketIoError::Fatal`] concerns the pipe itself. The other variants
/// concern one packet, which is dropped.
#[derive(Debug, thiserror::Error)]
pub enum PacketIoError {
    /// The packet could not be transferred, the pipe is still usable.
    #[error("transient I/O error: {0}")]
    Transient(io::Error),
    /// The pipe is closed or gone.
    #[error("fatal I/O error: {0}")]
    Fatal(io::Error),
    /// The received bytes are not an IP packet.
    #[error("malformed packet: {0}")]
    Malformed(#[from] MalformedPacket),
}

impl PacketIoError {
    /// Classifies an I/O error from a socket or device operation.
    ///
    /// Errors that mean the descriptor is unusable are fatal. Everything else,
    /// e.g. a full queue, a link that is momentarily down or an ICMP error
    /// reported on a connected socket, only affects the current packet.
    pub fn from_io(error: io::Error) -> Self {
        if Self::is_fatal_io(&error) {
            PacketIoError::Fatal(error)
        } else {
            PacketIoError::Transient(error)
        }
    }

    /// Returns true if the pipe can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(self, PacketIoError::Fatal(_))
    }

    fn is_fatal_io(error: &io::Error) -> bool {
        if let Some(code) = error.raw_os_error() {
            return matches!(
                code,
                libc::EBADF | libc::EBADFD | libc::ENODEV | libc::ENXIO | libc::EPIPE
            );
        }
        matches!(
            error.kind(),
            io::ErrorKind::UnexpectedEof
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::NotConnected
                | io::ErrorKind::ConnectionAborted
        )
    }
}

/// Error acquiring or configuring the bridge device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The interface name is empty or does not fit `IFNAMSIZ`.
    #[error("invalid interface name {0:?}")]
    InvalidName(String),
    /// Opening the clone device failed, typically missing privileges.
    #[error("failed to open /dev/net/tun: {0}")]
    Open(#[source] io::Error),
    /// `TUNSETIFF` was rejected, e.g. the name is taken by a non-TUN device.
    #[error("failed to create TUN device {name}: {source}")]
    Create {
        /// Requested interface name.
        name: String,
        /// Underlying error.
        source: io::Error,
    },
    /// Registering the descriptor with the runtime failed.
    #[error("failed to register TUN device with the runtime: {0}")]
    Register(#[source] io::Error),
    /// A configuration command could not be run.
    #[error("failed to run `{command}`: {source}")]
    Command {
        /// The command line.
        command: String,
        /// Underlying error.
        source: io::Error,
    },
    /// A configuration command exited unsuccessfully.
    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        /// The command line.
        command: String,
        /// Exit status.
        status: String,
        /// Captured standard error.
        stderr: String,
    },
}
