// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! GateFS server core.
//!
//! The server side of a filesystem proxy protocol: a sandboxed client
//! delegates filesystem operations over a message-framed transport,
//! addressing server-side handles through opaque descriptor IDs. The core
//! owns the per-connection state machine, the descriptor table, the
//! control-FD tree with its rename coordinator and the RPC handler table;
//! the actual filesystem is reached through backend capability traits.

pub mod backend;
pub mod comm;
pub mod config;
pub mod connection;
pub mod error;
pub mod fd;
mod handlers;
pub mod memfs;
pub mod server;
pub mod testing;

pub use backend::{
    FileBackend, FileKind, NewNode, NodeBackend, OpenedFile, RenameCleanupFn, RenameUpdateFn,
    ServerBackend,
};
pub use comm::{ChannelFactory, ChannelHandles, Transport};
pub use config::{ServerConfig, DEFAULT_MAX_MESSAGE_SIZE};
pub use connection::Connection;
pub use error::{FsError, FsResult};
pub use fd::{AnyRef, ControlFd, ControlRef, FdId, FdTable, OpenFd, OpenRef};
pub use memfs::MemFs;
pub use server::Server;
