// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Server configuration.

use serde::{Deserialize, Serialize};

/// Default payload capacity of a message, shared with clients at mount time.
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 1 << 20;

/// Configuration applied to a [`crate::Server`] and inherited by every
/// connection it accepts.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Largest request/response payload the server accepts, in bytes.
    pub max_message_size: u32,
    /// When set, connections reject every mutating RPC with EROFS before
    /// touching any state.
    pub read_only: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_only: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_writable() {
        let config = ServerConfig::default();
        assert!(!config.read_only);
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
    }
}
