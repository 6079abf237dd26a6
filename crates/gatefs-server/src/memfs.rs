// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! In-memory filesystem backend.
//!
//! Implements the full capability set over a single absolute tree shared by
//! every mount point, so aliased mounts observe the same nodes. The daemon
//! serves it by default; the integration tests drive every RPC through it.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use gatefs_proto::{
    Dirent64, SetStatReq, StatFs, Statx, StatxTimestamp, WalkStatus,
};

use crate::backend::{
    FileBackend, FileKind, NewNode, NodeBackend, OpenedFile, RenameCleanupFn, RenameUpdateFn,
    ServerBackend, SetStatFailure,
};
use crate::error::{FsError, FsResult};

const BLOCK_SIZE: u64 = 4096;
const ROOT_INO: u64 = 1;

#[derive(Clone, Debug)]
enum NodeContent {
    Directory { children: BTreeMap<String, u64> },
    File { data: Vec<u8> },
    Symlink { target: String },
    Socket,
    Special { major: u32, minor: u32 },
}

#[derive(Clone, Debug)]
struct MemNode {
    ino: u64,
    mode: u32, // permission bits only
    uid: u32,
    gid: u32,
    nlink: u32,
    atime: StatxTimestamp,
    mtime: StatxTimestamp,
    ctime: StatxTimestamp,
    xattrs: BTreeMap<String, Vec<u8>>,
    content: NodeContent,
}

impl MemNode {
    fn kind(&self) -> FileKind {
        match self.content {
            NodeContent::Directory { .. } => FileKind::Directory,
            NodeContent::File { .. } => FileKind::Regular,
            NodeContent::Symlink { .. } => FileKind::Symlink,
            NodeContent::Socket => FileKind::Socket,
            NodeContent::Special { .. } => FileKind::Special,
        }
    }

    fn type_bits(&self) -> u32 {
        match self.content {
            NodeContent::Directory { .. } => libc::S_IFDIR,
            NodeContent::File { .. } => libc::S_IFREG,
            NodeContent::Symlink { .. } => libc::S_IFLNK,
            NodeContent::Socket => libc::S_IFSOCK,
            NodeContent::Special { .. } => libc::S_IFCHR,
        }
    }

    fn size(&self) -> u64 {
        match &self.content {
            NodeContent::Directory { .. } => BLOCK_SIZE,
            NodeContent::File { data } => data.len() as u64,
            NodeContent::Symlink { target } => target.len() as u64,
            _ => 0,
        }
    }

    fn statx(&self) -> Statx {
        let (rdev_major, rdev_minor) = match self.content {
            NodeContent::Special { major, minor } => (major, minor),
            _ => (0, 0),
        };
        Statx {
            mask: libc::STATX_BASIC_STATS,
            blksize: BLOCK_SIZE as u32,
            nlink: self.nlink,
            uid: self.uid,
            gid: self.gid,
            mode: (self.type_bits() | (self.mode & 0o7777)) as u16,
            ino: self.ino,
            size: self.size(),
            blocks: self.size().div_ceil(512),
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            ..Default::default()
        }
    }
}

struct FsState {
    nodes: Mutex<HashMap<u64, MemNode>>,
    next_ino: AtomicU64,
    mutations: AtomicUsize,
    sync_errors: Mutex<HashMap<u64, i32>>,
    sync_log: Mutex<Vec<u64>>,
}

impl FsState {
    fn now() -> StatxTimestamp {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        StatxTimestamp {
            sec: now.as_secs() as i64,
            nsec: now.subsec_nanos(),
        }
    }

    fn alloc_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    fn new_node(&self, mode: u32, uid: u32, gid: u32, content: NodeContent) -> u64 {
        let now = Self::now();
        let ino = self.alloc_ino();
        let nlink = match content {
            NodeContent::Directory { .. } => 2,
            _ => 1,
        };
        let node = MemNode {
            ino,
            mode: mode & 0o7777,
            uid,
            gid,
            nlink,
            atime: now,
            mtime: now,
            ctime: now,
            xattrs: BTreeMap::new(),
            content,
        };
        self.nodes.lock().unwrap().insert(ino, node);
        ino
    }

    /// Inserts `child_ino` under `dir_ino` as `name`. Fails with EEXIST if
    /// the name is taken.
    fn attach(&self, dir_ino: u64, name: &str, child_ino: u64) -> FsResult<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let dir = nodes.get_mut(&dir_ino).ok_or(FsError::NotFound)?;
        match &mut dir.content {
            NodeContent::Directory { children } => {
                if children.contains_key(name) {
                    return Err(FsError::AlreadyExists);
                }
                children.insert(name.to_owned(), child_ino);
                dir.mtime = Self::now();
                Ok(())
            }
            _ => Err(FsError::NotADirectory),
        }
    }

    fn child_of(&self, dir_ino: u64, name: &str) -> FsResult<Option<u64>> {
        let nodes = self.nodes.lock().unwrap();
        let dir = nodes.get(&dir_ino).ok_or(FsError::NotFound)?;
        match &dir.content {
            NodeContent::Directory { children } => Ok(children.get(name).copied()),
            _ => Err(FsError::NotADirectory),
        }
    }

    fn statx_of(&self, ino: u64) -> FsResult<Statx> {
        let nodes = self.nodes.lock().unwrap();
        let node = nodes.get(&ino).ok_or(FsError::NotFound)?;
        Ok(node.statx())
    }

    fn kind_of(&self, ino: u64) -> FsResult<FileKind> {
        let nodes = self.nodes.lock().unwrap();
        let node = nodes.get(&ino).ok_or(FsError::NotFound)?;
        Ok(node.kind())
    }
}

/// The in-memory backend handed to [`crate::Server`]. Cloning shares the
/// underlying tree, which lets tests keep a handle for inspection.
#[derive(Clone)]
pub struct MemFs {
    state: Arc<FsState>,
}

impl MemFs {
    pub fn new() -> MemFs {
        let state = Arc::new(FsState {
            nodes: Mutex::new(HashMap::new()),
            next_ino: AtomicU64::new(ROOT_INO),
            mutations: AtomicUsize::new(0),
            sync_errors: Mutex::new(HashMap::new()),
            sync_log: Mutex::new(Vec::new()),
        });
        let root = state.new_node(
            0o755,
            0,
            0,
            NodeContent::Directory {
                children: BTreeMap::new(),
            },
        );
        debug_assert_eq!(root, ROOT_INO);
        MemFs { state }
    }

    /// Number of mutating backend operations performed so far.
    pub fn mutation_count(&self) -> usize {
        self.state.mutations.load(Ordering::Relaxed)
    }

    /// Makes Sync on the node at `ino` fail with `errno`.
    pub fn inject_sync_error(&self, ino: u64, errno: i32) {
        self.state.sync_errors.lock().unwrap().insert(ino, errno);
    }

    /// The inodes Sync was invoked on, in order.
    pub fn sync_log(&self) -> Vec<u64> {
        self.state.sync_log.lock().unwrap().clone()
    }

    /// Resolves an absolute path in the shared tree. Test helper.
    pub fn ino_at(&self, path: &str) -> Option<u64> {
        let mut ino = ROOT_INO;
        for component in path.split('/').filter(|c| !c.is_empty()) {
            ino = self.state.child_of(ino, component).ok()??;
        }
        Some(ino)
    }

    /// Names present in the directory at `ino`. Test helper.
    pub fn child_names(&self, ino: u64) -> Vec<String> {
        let nodes = self.state.nodes.lock().unwrap();
        match nodes.get(&ino).map(|n| &n.content) {
            Some(NodeContent::Directory { children }) => children.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    fn node_backend(&self, ino: u64, parent: u64, name: String) -> Box<dyn NodeBackend> {
        Box::new(MemNodeBackend {
            fs: Arc::clone(&self.state),
            ino,
            parent: Mutex::new(parent),
            name: Mutex::new(name),
        })
    }

    fn new_node_for(&self, ino: u64, parent: u64, name: &str) -> FsResult<NewNode> {
        let stat = self.state.statx_of(ino)?;
        Ok(NewNode {
            backend: self.node_backend(ino, parent, name.to_owned()),
            kind: self.state.kind_of(ino)?,
            stat,
        })
    }
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBackend for MemFs {
    /// Resolves `mount_path` in the shared tree, materializing missing
    /// directories along the way.
    fn mount(&self, mount_path: &str) -> FsResult<NewNode> {
        let mut ino = ROOT_INO;
        let mut parent = ROOT_INO;
        let mut last_name = String::new();
        for component in mount_path.split('/').filter(|c| !c.is_empty()) {
            parent = ino;
            ino = match self.state.child_of(ino, component)? {
                Some(child) => child,
                None => {
                    let child = self.state.new_node(
                        0o755,
                        0,
                        0,
                        NodeContent::Directory {
                            children: BTreeMap::new(),
                        },
                    );
                    self.state.attach(parent, component, child)?;
                    child
                }
            };
            last_name = component.to_owned();
        }
        if self.state.kind_of(ino)? != FileKind::Directory {
            return Err(FsError::NotADirectory);
        }
        self.new_node_for(ino, parent, &last_name)
    }
}

struct MemNodeBackend {
    fs: Arc<FsState>,
    ino: u64,
    // Where this handle reached the node; renames re-point these.
    parent: Mutex<u64>,
    name: Mutex<String>,
}

impl MemNodeBackend {
    fn fs_handle(&self) -> MemFs {
        MemFs {
            state: Arc::clone(&self.fs),
        }
    }

    fn require_dir(&self) -> FsResult<()> {
        match self.fs.kind_of(self.ino)? {
            FileKind::Directory => Ok(()),
            _ => Err(FsError::NotADirectory),
        }
    }

    fn create_child(
        &self,
        name: &str,
        mode: u32,
        uid: u32,
        gid: u32,
        content: NodeContent,
    ) -> FsResult<NewNode> {
        self.require_dir()?;
        self.fs.mutations.fetch_add(1, Ordering::Relaxed);
        if self.fs.child_of(self.ino, name)?.is_some() {
            return Err(FsError::AlreadyExists);
        }
        let child = self.fs.new_node(mode, uid, gid, content);
        self.fs.attach(self.ino, name, child)?;
        {
            let mut nodes = self.fs.nodes.lock().unwrap();
            let child_is_dir = matches!(nodes.get(&child).map(|n| n.kind()), Some(FileKind::Directory));
            if child_is_dir {
                if let Some(dir) = nodes.get_mut(&self.ino) {
                    dir.nlink += 1;
                }
            }
        }
        self.fs_handle().new_node_for(child, self.ino, name)
    }
}

impl NodeBackend for MemNodeBackend {
    fn stat(&self) -> FsResult<Statx> {
        self.fs.statx_of(self.ino)
    }

    fn set_stat(&self, req: &SetStatReq) -> (u32, Option<FsError>) {
        let mut failure = SetStatFailure::new();
        let mut nodes = self.fs.nodes.lock().unwrap();
        let Some(node) = nodes.get_mut(&self.ino) else {
            let mask = req.mask;
            return (mask, Some(FsError::NotFound));
        };
        self.fs.mutations.fetch_add(1, Ordering::Relaxed);
        let now = FsState::now();
        if req.mask & libc::STATX_MODE != 0 {
            node.mode = req.mode & 0o7777;
            node.ctime = now;
        }
        if req.mask & libc::STATX_UID != 0 {
            node.uid = req.uid;
            node.ctime = now;
        }
        if req.mask & libc::STATX_GID != 0 {
            node.gid = req.gid;
            node.ctime = now;
        }
        if req.mask & libc::STATX_SIZE != 0 {
            match &mut node.content {
                NodeContent::File { data } => {
                    data.resize(req.size as usize, 0);
                    node.mtime = now;
                }
                NodeContent::Directory { .. } => {
                    failure.record(libc::STATX_SIZE, FsError::IsADirectory)
                }
                _ => failure.record(libc::STATX_SIZE, FsError::InvalidArgument),
            }
        }
        if req.mask & libc::STATX_ATIME != 0 {
            node.atime = StatxTimestamp {
                sec: req.atime.sec,
                nsec: req.atime.nsec as u32,
            };
        }
        if req.mask & libc::STATX_MTIME != 0 {
            node.mtime = StatxTimestamp {
                sec: req.mtime.sec,
                nsec: req.mtime.nsec as u32,
            };
        }
        failure.finish()
    }

    fn walk(&self, names: &[String], sink: &mut dyn FnMut(NewNode)) -> FsResult<WalkStatus> {
        self.require_dir()?;
        let mut cur = self.ino;
        for (i, name) in names.iter().enumerate() {
            let Some(child) = self.fs.child_of(cur, name)? else {
                return Ok(WalkStatus::ComponentDoesNotExist);
            };
            let node = self.fs_handle().new_node_for(child, cur, name)?;
            let kind = node.kind;
            sink(node);
            if kind == FileKind::Symlink && i + 1 < names.len() {
                // The walk must not follow symlinks; the client resolves
                // them and restarts.
                return Ok(WalkStatus::ComponentSymlink);
            }
            if kind != FileKind::Directory && i + 1 < names.len() {
                return Ok(WalkStatus::ComponentDoesNotExist);
            }
            cur = child;
        }
        Ok(WalkStatus::Success)
    }

    fn walk_stat(&self, names: &[String], sink: &mut dyn FnMut(Statx)) -> FsResult<()> {
        let mut cur = self.ino;
        for (i, name) in names.iter().enumerate() {
            if i == 0 && name.is_empty() {
                sink(self.fs.statx_of(cur)?);
                continue;
            }
            let Some(child) = self.fs.child_of(cur, name)? else {
                return Ok(());
            };
            sink(self.fs.statx_of(child)?);
            if self.fs.kind_of(child)? != FileKind::Directory {
                return Ok(());
            }
            cur = child;
        }
        Ok(())
    }

    fn open(&self, flags: u32) -> FsResult<OpenedFile> {
        if flags & libc::O_TRUNC as u32 != 0 {
            let mut nodes = self.fs.nodes.lock().unwrap();
            if let Some(node) = nodes.get_mut(&self.ino) {
                if let NodeContent::File { data } = &mut node.content {
                    data.clear();
                    node.mtime = FsState::now();
                }
            }
        }
        Ok(OpenedFile {
            backend: Box::new(MemFileBackend {
                fs: Arc::clone(&self.fs),
                ino: self.ino,
                parent: *self.parent.lock().unwrap(),
                dir_pos: Mutex::new(0),
            }),
            donate: None,
        })
    }

    fn open_create(
        &self,
        mode: u32,
        uid: u32,
        gid: u32,
        name: &str,
        flags: u32,
    ) -> FsResult<(NewNode, OpenedFile)> {
        let node = self.create_child(name, mode, uid, gid, NodeContent::File { data: Vec::new() })?;
        let ino = node.stat.ino;
        let _ = flags;
        let opened = OpenedFile {
            backend: Box::new(MemFileBackend {
                fs: Arc::clone(&self.fs),
                ino,
                parent: self.ino,
                dir_pos: Mutex::new(0),
            }),
            donate: None,
        };
        Ok((node, opened))
    }

    fn mkdir(&self, mode: u32, uid: u32, gid: u32, name: &str) -> FsResult<NewNode> {
        self.create_child(
            name,
            mode,
            uid,
            gid,
            NodeContent::Directory {
                children: BTreeMap::new(),
            },
        )
    }

    fn mknod(
        &self,
        mode: u32,
        uid: u32,
        gid: u32,
        name: &str,
        minor: u32,
        major: u32,
    ) -> FsResult<NewNode> {
        let content = match mode & libc::S_IFMT {
            libc::S_IFSOCK => NodeContent::Socket,
            libc::S_IFREG | 0 => NodeContent::File { data: Vec::new() },
            _ => NodeContent::Special { major, minor },
        };
        self.create_child(name, mode, uid, gid, content)
    }

    fn symlink(&self, name: &str, target: &str, uid: u32, gid: u32) -> FsResult<NewNode> {
        self.create_child(
            name,
            0o777,
            uid,
            gid,
            NodeContent::Symlink {
                target: target.to_owned(),
            },
        )
    }

    fn link(&self, dir: &dyn NodeBackend, name: &str) -> FsResult<NewNode> {
        let dir = dir
            .as_any()
            .downcast_ref::<MemNodeBackend>()
            .ok_or(FsError::Unsupported)?;
        if !Arc::ptr_eq(&self.fs, &dir.fs) {
            return Err(FsError::Unsupported);
        }
        self.fs.mutations.fetch_add(1, Ordering::Relaxed);
        if self.fs.kind_of(self.ino)? == FileKind::Directory {
            return Err(FsError::NotPermitted);
        }
        dir.require_dir()?;
        self.fs.attach(dir.ino, name, self.ino)?;
        {
            let mut nodes = self.fs.nodes.lock().unwrap();
            if let Some(node) = nodes.get_mut(&self.ino) {
                node.nlink += 1;
                node.ctime = FsState::now();
            }
        }
        self.fs_handle().new_node_for(self.ino, dir.ino, name)
    }

    fn statfs(&self) -> FsResult<StatFs> {
        let nodes = self.fs.nodes.lock().unwrap();
        Ok(StatFs {
            fs_type: 0x01021994, // TMPFS_MAGIC
            block_size: BLOCK_SIZE,
            blocks: 1 << 20,
            blocks_free: 1 << 19,
            blocks_available: 1 << 19,
            files: nodes.len() as u64,
            files_free: u64::MAX - nodes.len() as u64,
            name_length: 255,
        })
    }

    fn readlink(&self) -> FsResult<String> {
        let nodes = self.fs.nodes.lock().unwrap();
        let node = nodes.get(&self.ino).ok_or(FsError::NotFound)?;
        match &node.content {
            NodeContent::Symlink { target } => Ok(target.clone()),
            _ => Err(FsError::NotASymlink),
        }
    }

    fn connect(&self, _sock_type: u32) -> FsResult<OwnedFd> {
        let (ours, _theirs) = UnixStream::pair()?;
        Ok(ours.into())
    }

    fn unlink(&self, name: &str, flags: u32) -> FsResult<()> {
        self.require_dir()?;
        self.fs.mutations.fetch_add(1, Ordering::Relaxed);
        let mut nodes = self.fs.nodes.lock().unwrap();
        let child_ino = {
            let dir = nodes.get(&self.ino).ok_or(FsError::NotFound)?;
            match &dir.content {
                NodeContent::Directory { children } => {
                    children.get(name).copied().ok_or(FsError::NotFound)?
                }
                _ => return Err(FsError::NotADirectory),
            }
        };
        let (child_is_dir, child_empty) = {
            let child = nodes.get(&child_ino).ok_or(FsError::NotFound)?;
            match &child.content {
                NodeContent::Directory { children } => (true, children.is_empty()),
                _ => (false, true),
            }
        };
        let remove_dir = flags & libc::AT_REMOVEDIR as u32 != 0;
        if remove_dir && !child_is_dir {
            return Err(FsError::NotADirectory);
        }
        if !remove_dir && child_is_dir {
            return Err(FsError::IsADirectory);
        }
        if child_is_dir && !child_empty {
            return Err(FsError::Os(libc::ENOTEMPTY));
        }
        if let Some(dir) = nodes.get_mut(&self.ino) {
            if let NodeContent::Directory { children } = &mut dir.content {
                children.remove(name);
            }
            dir.mtime = FsState::now();
            if child_is_dir {
                dir.nlink = dir.nlink.saturating_sub(1);
            }
        }
        if let Some(child) = nodes.get_mut(&child_ino) {
            child.nlink = child.nlink.saturating_sub(if child_is_dir { 2 } else { 1 });
        }
        Ok(())
    }

    fn rename_locked(
        &self,
        new_dir: &dyn NodeBackend,
        new_name: &str,
    ) -> FsResult<(Option<RenameUpdateFn>, Option<RenameCleanupFn>)> {
        let new_dir = new_dir
            .as_any()
            .downcast_ref::<MemNodeBackend>()
            .ok_or(FsError::Unsupported)?;
        new_dir.require_dir()?;
        self.fs.mutations.fetch_add(1, Ordering::Relaxed);

        let old_parent = *self.parent.lock().unwrap();
        let old_name = self.name.lock().unwrap().clone();
        let new_parent = new_dir.ino;
        {
            let mut nodes = self.fs.nodes.lock().unwrap();
            // Detach from the old parent first; rename overwrites any
            // existing entry at the destination.
            if let Some(dir) = nodes.get_mut(&old_parent) {
                if let NodeContent::Directory { children } = &mut dir.content {
                    children.remove(&old_name);
                }
            }
            let dir = nodes.get_mut(&new_parent).ok_or(FsError::NotFound)?;
            match &mut dir.content {
                NodeContent::Directory { children } => {
                    children.insert(new_name.to_owned(), self.ino);
                    dir.mtime = FsState::now();
                }
                _ => return Err(FsError::NotADirectory),
            }
        }

        let name = new_name.to_owned();
        let update: RenameUpdateFn = Box::new(move |backend| {
            if let Some(mem) = backend.as_any().downcast_ref::<MemNodeBackend>() {
                *mem.parent.lock().unwrap() = new_parent;
                *mem.name.lock().unwrap() = name.clone();
            }
        });
        Ok((Some(update), None))
    }

    fn get_xattr(&self, name: &str, buf: &mut [u8]) -> FsResult<u32> {
        let nodes = self.fs.nodes.lock().unwrap();
        let node = nodes.get(&self.ino).ok_or(FsError::NotFound)?;
        let value = node.xattrs.get(name).ok_or(FsError::Os(libc::ENODATA))?;
        if value.len() > buf.len() {
            return Err(FsError::OutOfRange);
        }
        buf[..value.len()].copy_from_slice(value);
        Ok(value.len() as u32)
    }

    fn set_xattr(&self, name: &str, value: &[u8], flags: u32) -> FsResult<()> {
        self.fs.mutations.fetch_add(1, Ordering::Relaxed);
        let mut nodes = self.fs.nodes.lock().unwrap();
        let node = nodes.get_mut(&self.ino).ok_or(FsError::NotFound)?;
        let exists = node.xattrs.contains_key(name);
        if flags & libc::XATTR_CREATE as u32 != 0 && exists {
            return Err(FsError::AlreadyExists);
        }
        if flags & libc::XATTR_REPLACE as u32 != 0 && !exists {
            return Err(FsError::Os(libc::ENODATA));
        }
        node.xattrs.insert(name.to_owned(), value.to_vec());
        node.ctime = FsState::now();
        Ok(())
    }

    fn list_xattr(&self, size: u64) -> FsResult<Vec<String>> {
        let nodes = self.fs.nodes.lock().unwrap();
        let node = nodes.get(&self.ino).ok_or(FsError::NotFound)?;
        let names: Vec<String> = node.xattrs.keys().cloned().collect();
        if size > 0 {
            let total: u64 = names.iter().map(|n| n.len() as u64 + 1).sum();
            if total > size {
                return Err(FsError::OutOfRange);
            }
        }
        Ok(names)
    }

    fn remove_xattr(&self, name: &str) -> FsResult<()> {
        self.fs.mutations.fetch_add(1, Ordering::Relaxed);
        let mut nodes = self.fs.nodes.lock().unwrap();
        let node = nodes.get_mut(&self.ino).ok_or(FsError::NotFound)?;
        node.xattrs.remove(name).ok_or(FsError::Os(libc::ENODATA))?;
        node.ctime = FsState::now();
        Ok(())
    }

    fn close(&self) {
        // Nodes outlive handles; unlink decides when a node is gone.
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct MemFileBackend {
    fs: Arc<FsState>,
    ino: u64,
    parent: u64,
    // Directory read position, in entries (".", "..", then children).
    dir_pos: Mutex<usize>,
}

impl FileBackend for MemFileBackend {
    fn stat(&self) -> FsResult<Statx> {
        self.fs.statx_of(self.ino)
    }

    fn sync(&self) -> FsResult<()> {
        self.fs.sync_log.lock().unwrap().push(self.ino);
        if let Some(errno) = self.fs.sync_errors.lock().unwrap().get(&self.ino) {
            return Err(FsError::from_errno(*errno));
        }
        Ok(())
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> FsResult<u32> {
        let nodes = self.fs.nodes.lock().unwrap();
        let node = nodes.get(&self.ino).ok_or(FsError::NotFound)?;
        match &node.content {
            NodeContent::File { data } => {
                let offset = offset as usize;
                if offset >= data.len() {
                    return Ok(0);
                }
                let n = buf.len().min(data.len() - offset);
                buf[..n].copy_from_slice(&data[offset..offset + n]);
                Ok(n as u32)
            }
            NodeContent::Directory { .. } => Err(FsError::IsADirectory),
            _ => Err(FsError::InvalidArgument),
        }
    }

    fn write(&self, buf: &[u8], offset: u64) -> FsResult<u64> {
        self.fs.mutations.fetch_add(1, Ordering::Relaxed);
        let mut nodes = self.fs.nodes.lock().unwrap();
        let node = nodes.get_mut(&self.ino).ok_or(FsError::NotFound)?;
        match &mut node.content {
            NodeContent::File { data } => {
                let offset = offset as usize;
                let end = offset + buf.len();
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[offset..end].copy_from_slice(buf);
                node.mtime = FsState::now();
                Ok(buf.len() as u64)
            }
            NodeContent::Directory { .. } => Err(FsError::IsADirectory),
            _ => Err(FsError::InvalidArgument),
        }
    }

    fn allocate(&self, mode: u64, offset: u64, length: u64) -> FsResult<()> {
        if mode != 0 {
            return Err(FsError::Unsupported);
        }
        self.fs.mutations.fetch_add(1, Ordering::Relaxed);
        let mut nodes = self.fs.nodes.lock().unwrap();
        let node = nodes.get_mut(&self.ino).ok_or(FsError::NotFound)?;
        match &mut node.content {
            NodeContent::File { data } => {
                let end = (offset + length) as usize;
                if data.len() < end {
                    data.resize(end, 0);
                }
                Ok(())
            }
            _ => Err(FsError::InvalidArgument),
        }
    }

    fn flush(&self) -> FsResult<()> {
        Ok(())
    }

    fn getdents(&self, count: u32, seek0: bool, sink: &mut dyn FnMut(Dirent64)) -> FsResult<()> {
        let entries: Vec<Dirent64> = {
            let nodes = self.fs.nodes.lock().unwrap();
            let node = nodes.get(&self.ino).ok_or(FsError::NotFound)?;
            let children = match &node.content {
                NodeContent::Directory { children } => children,
                _ => return Err(FsError::NotADirectory),
            };
            let mut entries = vec![
                Dirent64 {
                    ino: self.ino,
                    off: 1,
                    dtype: libc::DT_DIR,
                    name: ".".to_owned(),
                },
                Dirent64 {
                    ino: self.parent,
                    off: 2,
                    dtype: libc::DT_DIR,
                    name: "..".to_owned(),
                },
            ];
            for (i, (name, ino)) in children.iter().enumerate() {
                let dtype = match nodes.get(ino).map(|n| n.kind()) {
                    Some(FileKind::Directory) => libc::DT_DIR,
                    Some(FileKind::Symlink) => libc::DT_LNK,
                    Some(FileKind::Socket) => libc::DT_SOCK,
                    Some(FileKind::Special) => libc::DT_CHR,
                    _ => libc::DT_REG,
                };
                entries.push(Dirent64 {
                    ino: *ino,
                    off: i as i64 + 3,
                    dtype,
                    name: name.clone(),
                });
            }
            entries
        };

        let mut pos = self.dir_pos.lock().unwrap();
        if seek0 {
            *pos = 0;
        }
        let mut budget = count as usize;
        while *pos < entries.len() {
            let entry = &entries[*pos];
            if entry.wire_size() > budget {
                break;
            }
            budget -= entry.wire_size();
            sink(entry.clone());
            *pos += 1;
        }
        Ok(())
    }

    fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk_one(fs: &MemFs, dir_ino: u64, name: &str) -> Option<NewNode> {
        let backend = fs.node_backend(dir_ino, ROOT_INO, String::new());
        let mut out = None;
        backend
            .walk(&[name.to_owned()], &mut |node| out = Some(node))
            .ok()?;
        out
    }

    #[test]
    fn mount_materializes_directories() {
        let fs = MemFs::new();
        let root = fs.mount("/srv/data").expect("mount");
        assert_eq!(root.kind, FileKind::Directory);
        assert!(fs.ino_at("/srv/data").is_some());
    }

    #[test]
    fn create_then_walk_then_unlink() {
        let fs = MemFs::new();
        let root = fs.mount("/srv").expect("mount");
        root.backend.mkdir(0o755, 0, 0, "a").expect("mkdir");

        let a = walk_one(&fs, fs.ino_at("/srv").unwrap(), "a").expect("walk");
        assert_eq!(a.kind, FileKind::Directory);

        root.backend.unlink("a", libc::AT_REMOVEDIR as u32).expect("unlink");
        assert!(walk_one(&fs, fs.ino_at("/srv").unwrap(), "a").is_none());
    }

    #[test]
    fn walk_stops_at_missing_component() {
        let fs = MemFs::new();
        let root = fs.mount("/").expect("mount");
        let mut emitted = 0;
        let status = root
            .backend
            .walk(&["nope".to_owned(), "deeper".to_owned()], &mut |_| emitted += 1)
            .expect("walk");
        assert_eq!(status, WalkStatus::ComponentDoesNotExist);
        assert_eq!(emitted, 0);
    }

    #[test]
    fn walk_stops_at_intermediate_symlink() {
        let fs = MemFs::new();
        let root = fs.mount("/").expect("mount");
        root.backend.symlink("link", "/elsewhere", 0, 0).expect("symlink");
        let mut emitted = 0;
        let status = root
            .backend
            .walk(&["link".to_owned(), "x".to_owned()], &mut |_| emitted += 1)
            .expect("walk");
        assert_eq!(status, WalkStatus::ComponentSymlink);
        assert_eq!(emitted, 1);
    }

    #[test]
    fn hard_link_shares_the_inode() {
        let fs = MemFs::new();
        let root = fs.mount("/").expect("mount");
        let (file, _open) = root.backend.open_create(0o644, 0, 0, "orig", 0).expect("create");
        let orig = walk_one(&fs, ROOT_INO, "orig").expect("walk");
        assert_eq!(orig.stat.ino, file.stat.ino);

        let link = orig.backend.link(root.backend.as_ref(), "copy").expect("link");
        assert_eq!(link.stat.ino, file.stat.ino);
        assert_eq!(link.stat.nlink, 2);
    }

    #[test]
    fn getdents_respects_byte_budget() {
        let fs = MemFs::new();
        let root = fs.mount("/").expect("mount");
        for i in 0..8 {
            root.backend.mkdir(0o755, 0, 0, &format!("dir{i}")).expect("mkdir");
        }
        let opened = root.backend.open(libc::O_RDONLY as u32).expect("open");

        let mut names = Vec::new();
        // Two passes with a tight budget must make progress without
        // repeating entries.
        for _ in 0..2 {
            opened
                .backend
                .getdents(128, false, &mut |d| names.push(d.name))
                .expect("getdents");
        }
        assert!(!names.is_empty());
        let mut deduped = names.clone();
        deduped.dedup();
        assert_eq!(names, deduped);
    }

    #[test]
    fn sync_errors_are_injectable() {
        let fs = MemFs::new();
        let root = fs.mount("/").expect("mount");
        let (node, opened) = root.backend.open_create(0o644, 0, 0, "f", 0).expect("create");
        fs.inject_sync_error(node.stat.ino, libc::EIO);
        let err = opened.backend.sync().expect_err("sync should fail");
        assert_eq!(err.errno(), libc::EIO);
        assert_eq!(fs.sync_log(), vec![node.stat.ino]);
    }

    #[test]
    fn xattr_round_trip() {
        let fs = MemFs::new();
        let root = fs.mount("/").expect("mount");
        root.backend.set_xattr("user.tag", b"blue", 0).expect("set");

        let mut buf = [0u8; 16];
        let n = root.backend.get_xattr("user.tag", &mut buf).expect("get");
        assert_eq!(&buf[..n as usize], b"blue");

        assert_eq!(root.backend.list_xattr(0).expect("list"), vec!["user.tag"]);
        let mut tiny = [0u8; 2];
        let err = root.backend.get_xattr("user.tag", &mut tiny).expect_err("too small");
        assert_eq!(err.errno(), libc::ERANGE);

        root.backend.remove_xattr("user.tag").expect("remove");
        assert!(root.backend.list_xattr(0).expect("list").is_empty());
    }
}
