// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Per-client connection state and the channel service loop.
//!
//! A connection starts unmounted. Mount must succeed before auxiliary
//! channels can be created; each channel is serviced by its own thread,
//! processing one request at a time. Teardown joins every servicer before
//! releasing the descriptor table.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use gatefs_proto::{Encode, ErrorResp, MsgTag};

use crate::comm::{ChannelFactory, Transport};
use crate::error::FsError;
use crate::fd::FdTable;
use crate::handlers;
use crate::server::Server;

/// Per-client session state.
pub struct Connection {
    server: Arc<Server>,
    table: FdTable,
    mounted: AtomicBool,
    read_only: bool,
    channel_factory: Option<Box<dyn ChannelFactory>>,
    servicers: Mutex<Vec<JoinHandle<()>>>,
}

impl Connection {
    /// Creates a connection against `server`. The read-only flag is taken
    /// from the server configuration.
    pub fn new(
        server: Arc<Server>,
        channel_factory: Option<Box<dyn ChannelFactory>>,
    ) -> Arc<Connection> {
        let read_only = server.config().read_only;
        Arc::new(Connection {
            server,
            table: FdTable::new(),
            mounted: AtomicBool::new(false),
            read_only,
            channel_factory,
            servicers: Mutex::new(Vec::new()),
        })
    }

    pub fn server(&self) -> &Arc<Server> {
        &self.server
    }

    pub fn table(&self) -> &FdTable {
        &self.table
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::Acquire)
    }

    /// Marks the mount gate passed. Transitions false→true exactly once;
    /// the Mount handler checks the flag first and fails with EBUSY.
    pub(crate) fn set_mounted(&self) {
        self.mounted.store(true, Ordering::Release);
    }

    pub(crate) fn channel_factory(&self) -> Option<&dyn ChannelFactory> {
        self.channel_factory.as_deref()
    }

    /// Services `transport` until it shuts down cleanly or fails.
    pub fn service(self: &Arc<Self>, transport: &mut dyn Transport) -> io::Result<()> {
        loop {
            let Some((tag, payload_len)) = transport.recv()? else {
                return Ok(());
            };
            self.dispatch(transport, tag, payload_len)?;
        }
    }

    /// Runs one request through the handler table and writes the reply.
    /// Handler failures become error envelopes; only transport failures
    /// propagate.
    pub fn dispatch(
        self: &Arc<Self>,
        transport: &mut dyn Transport,
        raw_tag: u32,
        payload_len: u32,
    ) -> io::Result<()> {
        let result = if payload_len > self.server.config().max_message_size {
            Err(FsError::Protocol(gatefs_proto::WireError::Truncated))
        } else {
            MsgTag::from_u32(raw_tag)
                .map_err(FsError::from)
                .and_then(|tag| handlers::handle(self, transport, tag, payload_len))
        };
        match result {
            Ok(resp_len) => transport.send(raw_tag, resp_len),
            Err(err) => {
                let resp = ErrorResp {
                    errno: err.errno() as u32,
                };
                let buf = transport.payload_buf(resp.encoded_size() as u32);
                let resp_len = resp.encode_into(buf).unwrap_or(0);
                transport.send(MsgTag::Error as u32, resp_len)
            }
        }
    }

    /// Starts a servicer thread for a freshly created channel and registers
    /// it for join at teardown. Clean shutdowns exit silently; anything
    /// else is logged.
    pub(crate) fn spawn_servicer(self: &Arc<Self>, transport: Box<dyn Transport>) -> io::Result<()> {
        let conn = Arc::clone(self);
        let handle = thread::Builder::new().name("gatefs-channel".to_owned()).spawn(move || {
            let mut transport = transport;
            if let Err(err) = conn.service(transport.as_mut()) {
                tracing::warn!(error = %err, "channel servicer exited with error");
            }
        })?;
        self.servicers.lock().unwrap().push(handle);
        Ok(())
    }

    /// Number of live channel servicers. Exposed for tests.
    pub fn channel_count(&self) -> usize {
        self.servicers.lock().unwrap().len()
    }

    /// Joins every channel servicer, then releases all descriptors.
    /// Callers must have shut the channel transports down first, or the
    /// join will block.
    pub fn shutdown(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut servicers = self.servicers.lock().unwrap();
            servicers.drain(..).collect()
        };
        for handle in handles {
            if handle.join().is_err() {
                tracing::error!("channel servicer panicked");
            }
        }
        self.table.clear();
    }
}
