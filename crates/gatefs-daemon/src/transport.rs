// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Unix-socket implementation of the server transport.
//!
//! Messages are framed as a `{tag: u32, payload_len: u32}` little-endian
//! header followed by the payload. File descriptors are donated out-of-band
//! with SCM_RIGHTS.

use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;

use gatefs_server::{ChannelFactory, ChannelHandles, FsResult, Transport};

const HEADER_SIZE: usize = 8;

/// Sends `fd` over `sock` as SCM_RIGHTS ancillary data with a one-byte
/// marker payload.
pub fn send_fd(sock: &UnixStream, fd: OwnedFd) -> io::Result<()> {
    let raw = fd.as_raw_fd();
    let mut marker = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: marker.as_mut_ptr().cast(),
        iov_len: marker.len(),
    };
    // Space for one cmsghdr carrying a single fd, kept u64-aligned.
    let mut cmsg_space = [0u64; 8];

    // SAFETY: msghdr points at the iovec and control buffer above, both of
    // which outlive the sendmsg call; the cmsg macros only write within
    // CMSG_SPACE(4) bytes of the control buffer.
    unsafe {
        let mut msg: libc::msghdr = mem::zeroed();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_space.as_mut_ptr().cast();
        msg.msg_controllen = libc::CMSG_SPACE(mem::size_of::<libc::c_int>() as u32) as usize;

        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<libc::c_int>() as u32) as usize;
        std::ptr::copy_nonoverlapping(
            (&raw as *const libc::c_int).cast::<u8>(),
            libc::CMSG_DATA(cmsg),
            mem::size_of::<libc::c_int>(),
        );

        if libc::sendmsg(sock.as_raw_fd(), &msg, 0) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    // The descriptor now lives on in the peer; our copy closes here.
    drop(fd);
    Ok(())
}

/// Framed transport over a connected Unix stream socket.
pub struct UnixStreamTransport {
    stream: UnixStream,
    payload: Vec<u8>,
}

impl UnixStreamTransport {
    pub fn new(stream: UnixStream) -> Self {
        Self {
            stream,
            payload: Vec::new(),
        }
    }
}

impl Transport for UnixStreamTransport {
    fn recv(&mut self) -> io::Result<Option<(u32, u32)>> {
        let mut header = [0u8; HEADER_SIZE];
        match self.stream.read_exact(&mut header) {
            Ok(()) => {}
            // Peer hung up between messages: clean shutdown.
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(err),
        }
        let tag = u32::from_le_bytes(header[..4].try_into().expect("header size"));
        let payload_len = u32::from_le_bytes(header[4..].try_into().expect("header size"));
        if self.payload.len() < payload_len as usize {
            self.payload.resize(payload_len as usize, 0);
        }
        self.stream.read_exact(&mut self.payload[..payload_len as usize])?;
        Ok(Some((tag, payload_len)))
    }

    fn payload_buf(&mut self, len: u32) -> &mut [u8] {
        if self.payload.len() < len as usize {
            self.payload.resize(len as usize, 0);
        }
        &mut self.payload[..]
    }

    fn donate_fd(&mut self, fd: OwnedFd) -> io::Result<()> {
        send_fd(&self.stream, fd)
    }

    fn send(&mut self, tag: u32, payload_len: u32) -> io::Result<()> {
        let mut header = [0u8; HEADER_SIZE];
        header[..4].copy_from_slice(&tag.to_le_bytes());
        header[4..].copy_from_slice(&payload_len.to_le_bytes());
        self.stream.write_all(&header)?;
        self.stream.write_all(&self.payload[..payload_len as usize])?;
        self.stream.flush()
    }
}

/// Channel transport: payloads travel over the channel's own socket, FDs
/// over the dedicated donation socket.
struct SocketChannel {
    inner: UnixStreamTransport,
    fd_sock: UnixStream,
}

impl Transport for SocketChannel {
    fn recv(&mut self) -> io::Result<Option<(u32, u32)>> {
        self.inner.recv()
    }

    fn payload_buf(&mut self, len: u32) -> &mut [u8] {
        self.inner.payload_buf(len)
    }

    fn donate_fd(&mut self, fd: OwnedFd) -> io::Result<()> {
        send_fd(&self.fd_sock, fd)
    }

    fn send(&mut self, tag: u32, payload_len: u32) -> io::Result<()> {
        self.inner.send(tag, payload_len)
    }
}

/// Materializes channels as socketpairs. Payloads are carried in-band, so
/// the advertised data region is empty.
pub struct SocketChannelFactory;

impl ChannelFactory for SocketChannelFactory {
    fn create_channel(&self, _max_message_size: u32) -> FsResult<ChannelHandles> {
        let (data_local, data_peer) = UnixStream::pair()?;
        let (fd_sock_local, fd_sock_peer) = UnixStream::pair()?;
        Ok(ChannelHandles {
            transport: Box::new(SocketChannel {
                inner: UnixStreamTransport::new(data_local),
                fd_sock: fd_sock_local,
            }),
            data_offset: 0,
            data_length: 0,
            data_fd: data_peer.into(),
            fd_sock: fd_sock_peer.into(),
        })
    }
}
