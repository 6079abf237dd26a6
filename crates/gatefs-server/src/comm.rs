// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Transport interface consumed by the server core.
//!
//! The transport provides message framing, a reusable payload buffer and
//! out-of-band FD donation. The shared-memory fast channel and the socket
//! control channel both implement this; so does the in-process loopback
//! used by tests.

use std::io;
use std::os::fd::OwnedFd;

use crate::error::FsResult;

/// A message-framed duplex carrying `{tag, payload_len}` headers plus a
/// payload buffer shared between requests and responses.
pub trait Transport: Send {
    /// Blocks until the next request header arrives. `Ok(None)` signals a
    /// clean shutdown of the channel.
    fn recv(&mut self) -> io::Result<Option<(u32, u32)>>;

    /// The reusable per-message payload buffer, grown to at least `len`
    /// bytes. Repeated calls within one message return the same storage.
    fn payload_buf(&mut self, len: u32) -> &mut [u8];

    /// Hands a file descriptor to the peer out-of-band. Donated FDs must
    /// reach the client before the response that references them.
    fn donate_fd(&mut self, fd: OwnedFd) -> io::Result<()>;

    /// Sends the response header for the payload currently in the buffer.
    fn send(&mut self, tag: u32, payload_len: u32) -> io::Result<()>;
}

/// Everything the Channel RPC needs from a freshly materialized channel.
pub struct ChannelHandles {
    /// Transport for the new channel; a servicer thread takes it over.
    pub transport: Box<dyn Transport>,
    /// Location of the shared data region within the donated memory FD.
    pub data_offset: u64,
    pub data_length: u64,
    /// Donated to the client: the data region FD and the FD-donation socket.
    pub data_fd: OwnedFd,
    pub fd_sock: OwnedFd,
}

/// Materializes auxiliary channels for a connection.
pub trait ChannelFactory: Send + Sync {
    fn create_channel(&self, max_message_size: u32) -> FsResult<ChannelHandles>;
}
