// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! GateFS daemon library: the Unix-socket control transport and the
//! socketpair-backed channel factory used by the executable.

pub mod transport;

pub use transport::{SocketChannelFactory, UnixStreamTransport};
