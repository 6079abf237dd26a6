// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Backend capability traits.
//!
//! The server core never touches a filesystem directly: every control and
//! open handle carries a capability object through which the corresponding
//! RPCs are performed. The host-passthrough implementation lives outside
//! this crate; [`crate::memfs`] provides an in-memory one.

use std::any::Any;
use std::os::fd::OwnedFd;

use gatefs_proto::{Dirent64, MsgTag, SetStatReq, StatFs, Statx, WalkStatus};

use crate::error::{FsError, FsResult};

/// What kind of filesystem node a control handle refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    Directory,
    Regular,
    Symlink,
    Socket,
    /// Block/char devices, fifos — anything without dedicated RPCs.
    Special,
}

impl FileKind {
    /// Derives the kind from the file-type bits of a statx mode.
    pub fn from_mode(mode: u16) -> FileKind {
        match (mode as u32) & libc::S_IFMT {
            libc::S_IFDIR => FileKind::Directory,
            libc::S_IFREG => FileKind::Regular,
            libc::S_IFLNK => FileKind::Symlink,
            libc::S_IFSOCK => FileKind::Socket,
            _ => FileKind::Special,
        }
    }
}

/// A node produced by the backend: walk components, create operations and
/// mount roots all come back in this shape. The core wraps it into a
/// control handle and assigns the descriptor ID.
pub struct NewNode {
    pub backend: Box<dyn NodeBackend>,
    pub kind: FileKind,
    pub stat: Statx,
}

/// An opened file produced by the backend. `donate` carries a host FD the
/// client can use for direct I/O, when the backend has one to give.
pub struct OpenedFile {
    pub backend: Box<dyn FileBackend>,
    pub donate: Option<OwnedFd>,
}

/// Applied to the backend of every control handle re-linked by a rename.
pub type RenameUpdateFn = Box<dyn FnMut(&dyn NodeBackend)>;
/// Invoked once after the rename tree-rewrite completes.
pub type RenameCleanupFn = Box<dyn FnOnce()>;

/// Process-wide backend: produces a root node per mount path.
#[cfg_attr(test, mockall::automock)]
pub trait ServerBackend: Send + Sync {
    /// Materializes the root node of the tree exposed at `mount_path`.
    fn mount(&self, mount_path: &str) -> FsResult<NewNode>;

    /// The message tags this backend supports. Mount reports them to the
    /// client so it can gate feature use.
    fn supported_tags(&self) -> Vec<MsgTag> {
        MsgTag::ALL.to_vec()
    }
}

/// Capability set of a control handle. Operations correspond 1:1 to the
/// control-FD RPCs; each returns a result or a Linux errno via [`FsError`].
pub trait NodeBackend: Send + Sync {
    fn stat(&self) -> FsResult<Statx>;

    /// Applies the masked fields in order (mode, uid/gid, size, atime/mtime)
    /// and keeps going past failures. Returns the mask of fields that could
    /// not be applied plus the error of the first failing field.
    fn set_stat(&self, req: &SetStatReq) -> (u32, Option<FsError>);

    /// Walks `names` one component at a time, emitting a node per component
    /// walked. Stops early at a missing component or an intermediate
    /// symlink; the returned status says which.
    fn walk(&self, names: &[String], sink: &mut dyn FnMut(NewNode)) -> FsResult<WalkStatus>;

    /// Like `walk` but only emits statx records. An empty first component
    /// means "stat self first" and is legal on non-directories.
    fn walk_stat(&self, names: &[String], sink: &mut dyn FnMut(Statx)) -> FsResult<()>;

    fn open(&self, flags: u32) -> FsResult<OpenedFile>;

    fn open_create(
        &self,
        mode: u32,
        uid: u32,
        gid: u32,
        name: &str,
        flags: u32,
    ) -> FsResult<(NewNode, OpenedFile)>;

    fn mkdir(&self, mode: u32, uid: u32, gid: u32, name: &str) -> FsResult<NewNode>;

    fn mknod(
        &self,
        mode: u32,
        uid: u32,
        gid: u32,
        name: &str,
        minor: u32,
        major: u32,
    ) -> FsResult<NewNode>;

    fn symlink(&self, name: &str, target: &str, uid: u32, gid: u32) -> FsResult<NewNode>;

    /// Hard-links `self` under `dir` as `name`. `dir` is the backend of the
    /// destination directory; implementations downcast it via `as_any`.
    fn link(&self, dir: &dyn NodeBackend, name: &str) -> FsResult<NewNode>;

    fn statfs(&self) -> FsResult<StatFs>;

    fn readlink(&self) -> FsResult<String>;

    /// Connects to the socket node and returns the connected FD for
    /// donation to the client.
    fn connect(&self, sock_type: u32) -> FsResult<OwnedFd>;

    fn unlink(&self, name: &str, flags: u32) -> FsResult<()>;

    /// Performs the backend half of a rename. Called with the server rename
    /// lock held for writing. The update callback is applied to every
    /// control handle the tree-rewrite re-links; the cleanup callback runs
    /// once the rewrite is done.
    fn rename_locked(
        &self,
        new_dir: &dyn NodeBackend,
        new_name: &str,
    ) -> FsResult<(Option<RenameUpdateFn>, Option<RenameCleanupFn>)>;

    /// Writes the attribute value into `buf` and returns its length.
    fn get_xattr(&self, name: &str, buf: &mut [u8]) -> FsResult<u32>;

    fn set_xattr(&self, name: &str, value: &[u8], flags: u32) -> FsResult<()>;

    fn list_xattr(&self, size: u64) -> FsResult<Vec<String>>;

    fn remove_xattr(&self, name: &str) -> FsResult<()>;

    /// Releases backend resources. Called exactly once, when the handle's
    /// refcount drops to zero.
    fn close(&self);

    fn as_any(&self) -> &dyn Any;
}

/// Capability set of an open handle.
pub trait FileBackend: Send + Sync {
    fn stat(&self) -> FsResult<Statx>;

    fn sync(&self) -> FsResult<()>;

    /// Reads at `offset` directly into `buf`, returning the byte count.
    fn read(&self, offset: u64, buf: &mut [u8]) -> FsResult<u32>;

    /// Writes `buf` at `offset`. `buf` aliases the request payload.
    fn write(&self, buf: &[u8], offset: u64) -> FsResult<u64>;

    fn allocate(&self, mode: u64, offset: u64, length: u64) -> FsResult<()>;

    fn flush(&self) -> FsResult<()>;

    /// Emits dirents until `count` payload bytes are produced. `seek0`
    /// rewinds the directory position first.
    fn getdents(&self, count: u32, seek0: bool, sink: &mut dyn FnMut(Dirent64)) -> FsResult<()>;

    /// Releases backend resources at refcount zero.
    fn close(&self);
}

/// Helper for `set_stat` implementations: records the first failure in mask
/// order.
pub struct SetStatFailure {
    mask: u32,
    first: Option<FsError>,
}

impl SetStatFailure {
    pub fn new() -> Self {
        Self {
            mask: 0,
            first: None,
        }
    }

    pub fn record(&mut self, field: u32, err: FsError) {
        self.mask |= field;
        if self.first.is_none() {
            self.first = Some(err);
        }
    }

    pub fn finish(self) -> (u32, Option<FsError>) {
        (self.mask, self.first)
    }
}

impl Default for SetStatFailure {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_mode() {
        assert_eq!(
            FileKind::from_mode((libc::S_IFDIR | 0o755) as u16),
            FileKind::Directory
        );
        assert_eq!(
            FileKind::from_mode((libc::S_IFREG | 0o644) as u16),
            FileKind::Regular
        );
        assert_eq!(FileKind::from_mode(libc::S_IFLNK as u16), FileKind::Symlink);
        assert_eq!(FileKind::from_mode(libc::S_IFSOCK as u16), FileKind::Socket);
        assert_eq!(FileKind::from_mode(libc::S_IFIFO as u16), FileKind::Special);
    }

    #[test]
    fn set_stat_failure_keeps_first_error() {
        let mut failure = SetStatFailure::new();
        failure.record(libc::STATX_MODE, FsError::NotPermitted);
        failure.record(libc::STATX_SIZE, FsError::Busy);
        let (mask, first) = failure.finish();
        assert_eq!(mask, libc::STATX_MODE | libc::STATX_SIZE);
        assert_eq!(first.unwrap().errno(), libc::EPERM);
    }
}
