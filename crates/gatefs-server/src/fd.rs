// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Descriptor table and handle types.
//!
//! Control handles form a forest rooted at mount points: each child holds a
//! strong reference to its parent, parents only hold weak references to
//! their children. Handle lifetime is governed by an explicit refcount —
//! the table holds one reference, every lookup takes another through a
//! guard that releases on drop. At zero the handle unlinks itself from the
//! tree (under the rename write lock) and closes its backend capability.
//!
//! Lock protocol: `name`, `parent` and `children` may only change while the
//! server rename lock is held — for writing when topology moves (rename,
//! destroy), for reading when a new child is attached. Path reconstruction
//! requires at least the read lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

pub use gatefs_proto::FdId;

use crate::backend::{FileBackend, FileKind, NodeBackend, RenameUpdateFn};
use crate::error::{FsError, FsResult};
use crate::server::Server;

/// Server-side state for an existing filesystem node.
pub struct ControlFd {
    kind: FileKind,
    refs: AtomicI64,
    server: Weak<Server>,
    name: Mutex<String>,
    parent: Mutex<Option<Arc<ControlFd>>>,
    children: Mutex<Vec<Weak<ControlFd>>>,
    backend: Box<dyn NodeBackend>,
}

impl ControlFd {
    /// Creates a mount-point root. Its name is the full mount path.
    pub(crate) fn new_root(
        server: &Arc<Server>,
        kind: FileKind,
        mount_path: String,
        backend: Box<dyn NodeBackend>,
    ) -> Arc<ControlFd> {
        Arc::new(ControlFd {
            kind,
            refs: AtomicI64::new(1),
            server: Arc::downgrade(server),
            name: Mutex::new(mount_path),
            parent: Mutex::new(None),
            children: Mutex::new(Vec::new()),
            backend,
        })
    }

    /// Creates a node below `parent` and links it into the tree. Takes a
    /// reference on the parent for the child's lifetime.
    pub(crate) fn new_child(
        server: &Arc<Server>,
        parent: &Arc<ControlFd>,
        kind: FileKind,
        name: String,
        backend: Box<dyn NodeBackend>,
    ) -> Arc<ControlFd> {
        parent.inc_ref();
        let child = Arc::new(ControlFd {
            kind,
            refs: AtomicI64::new(1),
            server: Arc::downgrade(server),
            name: Mutex::new(name),
            parent: Mutex::new(Some(Arc::clone(parent))),
            children: Mutex::new(Vec::new()),
            backend,
        });
        let _guard = server.rename_read();
        parent.children.lock().unwrap().push(Arc::downgrade(&child));
        child
    }

    pub fn kind(&self) -> FileKind {
        self.kind
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileKind::Directory
    }

    pub fn name(&self) -> String {
        self.name.lock().unwrap().clone()
    }

    pub fn backend(&self) -> &dyn NodeBackend {
        self.backend.as_ref()
    }

    /// Current refcount. Exposed for tests and diagnostics.
    pub fn ref_count(&self) -> i64 {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn inc_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn parent_arc(&self) -> Option<Arc<ControlFd>> {
        self.parent.lock().unwrap().clone()
    }

    /// Absolute path of this node. Precondition: rename lock held (read or
    /// write) — the result is a stable snapshot only under that lock.
    pub(crate) fn path_locked(&self) -> String {
        let mut path = self.name.lock().unwrap().clone();
        let mut parent = self.parent.lock().unwrap().clone();
        while let Some(dir) = parent {
            {
                let base = dir.name.lock().unwrap();
                if base.ends_with('/') {
                    path = format!("{}{}", base, path);
                } else {
                    path = format!("{}/{}", base, path);
                }
            }
            parent = dir.parent.lock().unwrap().clone();
        }
        path
    }

    /// Absolute path, taking the rename read lock. Returns the bare name if
    /// the server is already gone (connection teardown).
    pub fn path(&self) -> String {
        match self.server.upgrade() {
            Some(server) => {
                let _guard = server.rename_read();
                self.path_locked()
            }
            None => self.name(),
        }
    }

    /// Live children, pruning dropped entries. Precondition: rename lock
    /// held for writing.
    pub(crate) fn children_locked(&self) -> Vec<Arc<ControlFd>> {
        let mut slots = self.children.lock().unwrap();
        slots.retain(|w| w.strong_count() > 0);
        slots.iter().filter_map(Weak::upgrade).collect()
    }

    /// Detaches this node from its parent and returns the parent so the
    /// caller can release the reference held on it. Precondition: rename
    /// lock held for writing.
    fn take_parent_locked(self: &Arc<Self>) -> Option<Arc<ControlFd>> {
        let parent = self.parent.lock().unwrap().take()?;
        let me = Arc::downgrade(self);
        parent
            .children
            .lock()
            .unwrap()
            .retain(|w| !w.ptr_eq(&me) && w.strong_count() > 0);
        Some(parent)
    }

    /// Drops one reference. At zero the node is unlinked from the tree and
    /// its backend closed; references held on ancestors unwind iteratively.
    pub(crate) fn dec_ref(this: &Arc<ControlFd>) {
        let mut cur = Some(Arc::clone(this));
        while let Some(fd) = cur.take() {
            let prev = fd.refs.fetch_sub(1, Ordering::AcqRel);
            debug_assert!(prev > 0, "control fd refcount underflow");
            if prev != 1 {
                break;
            }
            let parent = match fd.server.upgrade() {
                Some(server) => {
                    let _guard = server.rename_write();
                    fd.take_parent_locked()
                }
                None => fd.parent.lock().unwrap().take(),
            };
            fd.backend.close();
            cur = parent;
        }
    }

    /// Re-links every node reached by following `path` below `self` under
    /// `new_dir` as `new_name`, applying `update` to each backend.
    /// References released on old parents are collected into `released` and
    /// must be dropped by the caller after the rename lock is let go.
    /// Precondition: rename lock held for writing.
    pub(crate) fn rename_recursive_locked(
        self: &Arc<Self>,
        new_dir: &Arc<ControlFd>,
        new_name: &str,
        path: &[&str],
        update: &mut Option<RenameUpdateFn>,
        released: &mut Vec<Arc<ControlFd>>,
    ) {
        let Some((first, rest)) = path.split_first() else {
            // This node is the rename target: move it below new_dir.
            if let Some(old_parent) = self.take_parent_locked() {
                released.push(old_parent);
            }
            new_dir.inc_ref();
            *self.parent.lock().unwrap() = Some(Arc::clone(new_dir));
            new_dir.children.lock().unwrap().push(Arc::downgrade(self));
            *self.name.lock().unwrap() = new_name.to_owned();
            if let Some(update) = update {
                update(self.backend.as_ref());
            }
            return;
        };
        for child in self.children_locked() {
            if *child.name.lock().unwrap() == *first {
                child.rename_recursive_locked(new_dir, new_name, rest, update, released);
            }
        }
    }
}

impl std::fmt::Debug for ControlFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlFd")
            .field("kind", &self.kind)
            .field("name", &self.name())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Server-side state for an open file.
pub struct OpenFd {
    refs: AtomicI64,
    control: Arc<ControlFd>,
    readable: bool,
    writable: bool,
    backend: Box<dyn FileBackend>,
}

impl OpenFd {
    /// Wraps an opened backend file. Takes a reference on the control
    /// handle for the open handle's lifetime.
    pub(crate) fn new(
        control: &Arc<ControlFd>,
        flags: u32,
        backend: Box<dyn FileBackend>,
    ) -> Arc<OpenFd> {
        control.inc_ref();
        let access = flags & (libc::O_ACCMODE as u32);
        Arc::new(OpenFd {
            refs: AtomicI64::new(1),
            control: Arc::clone(control),
            readable: access == libc::O_RDONLY as u32 || access == libc::O_RDWR as u32,
            writable: access == libc::O_WRONLY as u32 || access == libc::O_RDWR as u32,
            backend,
        })
    }

    pub fn control(&self) -> &Arc<ControlFd> {
        &self.control
    }

    pub fn readable(&self) -> bool {
        self.readable
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    pub fn backend(&self) -> &dyn FileBackend {
        self.backend.as_ref()
    }

    pub fn ref_count(&self) -> i64 {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn inc_ref(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn dec_ref(this: &Arc<OpenFd>) {
        let prev = this.refs.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "open fd refcount underflow");
        if prev == 1 {
            this.backend.close();
            ControlFd::dec_ref(&this.control);
        }
    }
}

impl std::fmt::Debug for OpenFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenFd")
            .field("readable", &self.readable)
            .field("writable", &self.writable)
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Lookup guard for a control handle; releases the reference on drop.
pub struct ControlRef(Arc<ControlFd>);

impl ControlRef {
    pub fn arc(&self) -> &Arc<ControlFd> {
        &self.0
    }
}

impl std::ops::Deref for ControlRef {
    type Target = ControlFd;

    fn deref(&self) -> &ControlFd {
        &self.0
    }
}

impl Drop for ControlRef {
    fn drop(&mut self) {
        ControlFd::dec_ref(&self.0);
    }
}

/// Lookup guard for an open handle; releases the reference on drop.
pub struct OpenRef(Arc<OpenFd>);

impl OpenRef {
    pub fn arc(&self) -> &Arc<OpenFd> {
        &self.0
    }
}

impl std::ops::Deref for OpenRef {
    type Target = OpenFd;

    fn deref(&self) -> &OpenFd {
        &self.0
    }
}

impl Drop for OpenRef {
    fn drop(&mut self) {
        OpenFd::dec_ref(&self.0);
    }
}

/// Either guard, for polymorphic lookups (FStat).
pub enum AnyRef {
    Control(ControlRef),
    Open(OpenRef),
}

enum FdEntry {
    Control(Arc<ControlFd>),
    Open(Arc<OpenFd>),
}

/// Per-connection mapping from descriptor IDs to handles.
///
/// IDs are allocated monotonically and never reused; zero is reserved.
pub struct FdTable {
    entries: Mutex<HashMap<u64, FdEntry>>,
    next_id: AtomicU64,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a control handle, consuming the creator's reference.
    pub fn insert_control(&self, fd: Arc<ControlFd>) -> FdId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().insert(id, FdEntry::Control(fd));
        FdId(id)
    }

    /// Registers an open handle, consuming the creator's reference.
    pub fn insert_open(&self, fd: Arc<OpenFd>) -> FdId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().unwrap().insert(id, FdEntry::Open(fd));
        FdId(id)
    }

    /// Resolves `id` to a control handle, taking a reference. Fails with
    /// EBADF when absent or when the ID names an open handle.
    pub fn lookup_control(&self, id: FdId) -> FsResult<ControlRef> {
        let entries = self.entries.lock().unwrap();
        match entries.get(&id.0) {
            Some(FdEntry::Control(fd)) => {
                fd.inc_ref();
                Ok(ControlRef(Arc::clone(fd)))
            }
            _ => Err(FsError::BadFileDescriptor),
        }
    }

    /// Resolves `id` to an open handle, taking a reference.
    pub fn lookup_open(&self, id: FdId) -> FsResult<OpenRef> {
        let entries = self.entries.lock().unwrap();
        match entries.get(&id.0) {
            Some(FdEntry::Open(fd)) => {
                fd.inc_ref();
                Ok(OpenRef(Arc::clone(fd)))
            }
            _ => Err(FsError::BadFileDescriptor),
        }
    }

    /// Resolves `id` to whichever handle kind it names.
    pub fn lookup_any(&self, id: FdId) -> FsResult<AnyRef> {
        let entries = self.entries.lock().unwrap();
        match entries.get(&id.0) {
            Some(FdEntry::Control(fd)) => {
                fd.inc_ref();
                Ok(AnyRef::Control(ControlRef(Arc::clone(fd))))
            }
            Some(FdEntry::Open(fd)) => {
                fd.inc_ref();
                Ok(AnyRef::Open(OpenRef(Arc::clone(fd))))
            }
            None => Err(FsError::BadFileDescriptor),
        }
    }

    /// Drops the table's reference on `id`. Unknown IDs are ignored.
    pub fn remove(&self, id: FdId) {
        let entry = self.entries.lock().unwrap().remove(&id.0);
        // Release outside the table lock: the last reference takes the
        // rename lock to unlink from the tree.
        match entry {
            Some(FdEntry::Control(fd)) => ControlFd::dec_ref(&fd),
            Some(FdEntry::Open(fd)) => OpenFd::dec_ref(&fd),
            None => {}
        }
    }

    /// Releases every descriptor. Used at connection teardown.
    pub fn clear(&self) {
        let drained: Vec<FdEntry> = {
            let mut entries = self.entries.lock().unwrap();
            entries.drain().map(|(_, entry)| entry).collect()
        };
        for entry in drained {
            match entry {
                FdEntry::Control(fd) => ControlFd::dec_ref(&fd),
                FdEntry::Open(fd) => OpenFd::dec_ref(&fd),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}
