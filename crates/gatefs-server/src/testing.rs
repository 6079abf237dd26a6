// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Test support: an in-process loopback transport and RPC drivers.

use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::os::fd::OwnedFd;
use std::sync::Arc;

use gatefs_proto::{Decode, Encode, ErrorResp, MsgTag};

use crate::comm::{ChannelFactory, ChannelHandles, Transport};
use crate::connection::Connection;
use crate::error::FsResult;

/// In-process transport: requests are pushed by the test, responses and
/// donated FDs are collected for inspection.
pub struct LoopbackTransport {
    payload: Vec<u8>,
    inbox: VecDeque<(u32, u32)>,
    sent: Vec<(u32, u32)>,
    donated: Vec<OwnedFd>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            payload: Vec::new(),
            inbox: VecDeque::new(),
            sent: Vec::new(),
            donated: Vec::new(),
        }
    }

    /// Encodes `msg` into the payload buffer and queues its header.
    pub fn push_request<T: Encode>(&mut self, tag: MsgTag, msg: &T) {
        let len = msg.encoded_size() as u32;
        let buf = self.payload_buf(len);
        let written = msg.encode_into(buf).expect("request must encode");
        self.inbox.push_back((tag as u32, written));
    }

    /// Tag and payload of the most recent reply.
    pub fn last_reply(&self) -> (MsgTag, &[u8]) {
        let (tag, len) = *self.sent.last().expect("no reply sent");
        (
            MsgTag::from_u32(tag).expect("reply tag"),
            &self.payload[..len as usize],
        )
    }

    /// FDs donated since the last take.
    pub fn take_donated(&mut self) -> Vec<OwnedFd> {
        std::mem::take(&mut self.donated)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LoopbackTransport {
    fn recv(&mut self) -> io::Result<Option<(u32, u32)>> {
        Ok(self.inbox.pop_front())
    }

    fn payload_buf(&mut self, len: u32) -> &mut [u8] {
        if self.payload.len() < len as usize {
            self.payload.resize(len as usize, 0);
        }
        &mut self.payload[..]
    }

    fn donate_fd(&mut self, fd: OwnedFd) -> io::Result<()> {
        self.donated.push(fd);
        Ok(())
    }

    fn send(&mut self, tag: u32, payload_len: u32) -> io::Result<()> {
        self.sent.push((tag, payload_len));
        Ok(())
    }
}

/// Channel factory whose channels are loopbacks that shut down immediately;
/// the donated FDs are handles to /dev/null.
pub struct LoopbackChannelFactory {
    pub data_length: u64,
}

impl ChannelFactory for LoopbackChannelFactory {
    fn create_channel(&self, _max_message_size: u32) -> FsResult<ChannelHandles> {
        let data_fd: OwnedFd = File::open("/dev/null")?.into();
        let fd_sock: OwnedFd = File::open("/dev/null")?.into();
        Ok(ChannelHandles {
            transport: Box::new(LoopbackTransport::new()),
            data_offset: 0,
            data_length: self.data_length,
            data_fd,
            fd_sock,
        })
    }
}

/// Runs one RPC through the dispatcher and returns the reply tag plus a
/// copy of the reply payload.
pub fn rpc<T: Encode>(
    conn: &Arc<Connection>,
    transport: &mut LoopbackTransport,
    tag: MsgTag,
    msg: &T,
) -> (MsgTag, Vec<u8>) {
    transport.push_request(tag, msg);
    let (raw_tag, payload_len) = transport.recv().expect("loopback recv").expect("queued request");
    conn.dispatch(transport, raw_tag, payload_len).expect("loopback dispatch");
    let (tag, payload) = transport.last_reply();
    (tag, payload.to_vec())
}

/// Like [`rpc`] but for requests with an empty payload (Channel).
pub fn rpc_empty(
    conn: &Arc<Connection>,
    transport: &mut LoopbackTransport,
    tag: MsgTag,
) -> (MsgTag, Vec<u8>) {
    conn.dispatch(transport, tag as u32, 0).expect("loopback dispatch");
    let (tag, payload) = transport.last_reply();
    (tag, payload.to_vec())
}

/// Decodes a reply payload, panicking on the error envelope.
pub fn decode_ok<'a, T: Decode<'a>>(tag: MsgTag, payload: &'a [u8]) -> T {
    assert_ne!(tag, MsgTag::Error, "unexpected error envelope");
    T::decode(payload).expect("reply must decode")
}

/// Asserts the reply is an error envelope and returns its errno.
pub fn expect_errno(tag: MsgTag, payload: &[u8]) -> i32 {
    assert_eq!(tag, MsgTag::Error, "expected error envelope");
    ErrorResp::decode(payload).expect("error envelope must decode").errno as i32
}
