// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! GateFS daemon executable - thin wrapper around the server library.

use std::os::unix::net::UnixListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gatefs_daemon::{SocketChannelFactory, UnixStreamTransport};
use gatefs_server::{Connection, MemFs, Server, ServerConfig, DEFAULT_MAX_MESSAGE_SIZE};

#[derive(Parser, Debug)]
#[command(name = "gatefs-daemon", about = "Serve an in-memory GateFS tree over a Unix socket")]
struct Args {
    /// Path of the listening socket.
    #[arg(long, default_value = "/tmp/gatefs-daemon.sock")]
    socket: PathBuf,

    /// Reject every mutating RPC with EROFS.
    #[arg(long)]
    read_only: bool,

    /// Largest request/response payload in bytes.
    #[arg(long, default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: u32,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = ServerConfig {
        max_message_size: args.max_message_size,
        read_only: args.read_only,
    };
    let server = Server::new(Box::new(MemFs::new()), config);

    // Stale socket from a previous run.
    let _ = std::fs::remove_file(&args.socket);
    let listener = UnixListener::bind(&args.socket)
        .with_context(|| format!("binding {}", args.socket.display()))?;
    info!(socket = %args.socket.display(), "gatefs daemon listening");

    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        let conn = Connection::new(Arc::clone(&server), Some(Box::new(SocketChannelFactory)));
        thread::spawn(move || {
            let mut transport = UnixStreamTransport::new(stream);
            if let Err(err) = conn.service(&mut transport) {
                warn!(error = %err, "connection exited with error");
            }
            conn.shutdown();
        });
    }
    Ok(())
}
