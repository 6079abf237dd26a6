// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Process-wide server registry.

use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::backend::ServerBackend;
use crate::config::ServerConfig;
use crate::fd::ControlFd;

/// Shared across every connection: the mount-point set, the backend factory
/// and the rename lock serializing all path-topology changes.
pub struct Server {
    config: ServerConfig,
    backend: Box<dyn ServerBackend>,
    rename_mu: RwLock<()>,
    mount_points: Mutex<Vec<Arc<ControlFd>>>,
}

impl Server {
    pub fn new(backend: Box<dyn ServerBackend>, config: ServerConfig) -> Arc<Server> {
        Arc::new(Server {
            config,
            backend,
            rename_mu: RwLock::new(()),
            mount_points: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub(crate) fn backend(&self) -> &dyn ServerBackend {
        self.backend.as_ref()
    }

    /// Rename lock, shared mode. Required for reading any control handle's
    /// name/parent/children, including path reconstruction.
    pub(crate) fn rename_read(&self) -> RwLockReadGuard<'_, ()> {
        self.rename_mu.read().unwrap()
    }

    /// Rename lock, exclusive mode. Held for the full duration of a rename
    /// tree-rewrite and when a handle unlinks itself at destruction.
    pub(crate) fn rename_write(&self) -> RwLockWriteGuard<'_, ()> {
        self.rename_mu.write().unwrap()
    }

    /// Registers a mount-point root. The server keeps a reference for its
    /// own lifetime; the set is append-only during normal operation.
    pub(crate) fn add_mount_point(&self, root: &Arc<ControlFd>) {
        root.inc_ref();
        self.mount_points.lock().unwrap().push(Arc::clone(root));
    }

    pub(crate) fn for_each_mount_point(&self, mut f: impl FnMut(&Arc<ControlFd>)) {
        let roots: Vec<Arc<ControlFd>> = self.mount_points.lock().unwrap().clone();
        for root in &roots {
            f(root);
        }
    }

    /// Number of registered mount points. Exposed for tests.
    pub fn mount_point_count(&self) -> usize {
        self.mount_points.lock().unwrap().len()
    }
}
