// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! RPC handlers.
//!
//! Each handler decodes its request in place from the transport payload,
//! resolves descriptor IDs against the connection table, invokes the
//! backend capability and encodes the response into the same payload
//! slice, returning the payload length. Errors are returned as errno values
//! through [`FsError`]; handlers never log routine failures.

use std::sync::Arc;

use gatefs_proto::msg::{
    ChannelResp, ChildInodeResp, ConnectReq, FAllocateReq, FdBatchReq, FGetXattrReq, FlushReq,
    FListXattrReq, FListXattrResp, FRemoveXattrReq, FSetXattrReq, FStatFsReq, Getdents64Req,
    LinkAtReq, MkdirAtReq, MknodAtReq, MountReq, MountResp, OpenAtReq, OpenAtResp,
    OpenCreateAtReq, OpenCreateAtResp, PReadReq, PWriteReq, PWriteResp, ReadLinkAtReq,
    ReadLinkAtResp, RenameAtReq, SetStatReq, SetStatResp, StatReq, SymlinkAtReq, UnlinkAtReq,
    WalkReq, WalkStatus,
};
use gatefs_proto::{
    check_safe_name, clean_mount_path, Decode, Dirent64, Encode, Inode, MsgTag, Statx, WireError,
    Writer,
};

use crate::backend::NewNode;
use crate::comm::Transport;
use crate::connection::Connection;
use crate::error::{FsError, FsResult};
use crate::fd::{AnyRef, ControlFd, OpenFd};

/// Open flags a client may set; everything else is silently discarded.
const ALLOWED_OPEN_FLAGS: u32 = (libc::O_ACCMODE | libc::O_TRUNC) as u32;

/// Statx fields SetStat may touch. Anything else in the mask is EPERM.
const SET_STAT_SUPPORTED_MASK: u32 = libc::STATX_MODE
    | libc::STATX_UID
    | libc::STATX_GID
    | libc::STATX_SIZE
    | libc::STATX_ATIME
    | libc::STATX_MTIME;

type Handler = fn(&Arc<Connection>, &mut dyn Transport, u32) -> FsResult<u32>;

/// Static handler table, indexed by message tag.
static HANDLERS: [Handler; MsgTag::COUNT] = [
    error_handler,
    mount,
    channel,
    fstat,
    set_stat,
    walk,
    walk_stat,
    open_at,
    open_create_at,
    close,
    fsync,
    pwrite,
    pread,
    mkdir_at,
    mknod_at,
    symlink_at,
    link_at,
    fstatfs,
    fallocate,
    read_link_at,
    flush,
    connect,
    unlink_at,
    rename_at,
    getdents64,
    fget_xattr,
    fset_xattr,
    flist_xattr,
    fremove_xattr,
];

pub(crate) fn handle(
    conn: &Arc<Connection>,
    comm: &mut dyn Transport,
    tag: MsgTag,
    payload_len: u32,
) -> FsResult<u32> {
    HANDLERS[tag as usize](conn, comm, payload_len)
}

/// The request bytes of the current message.
fn req_bytes<'a>(comm: &'a mut dyn Transport, len: u32) -> &'a [u8] {
    &comm.payload_buf(len)[..len as usize]
}

/// Encodes a complete response into the payload buffer.
fn reply<T: Encode>(comm: &mut dyn Transport, resp: &T) -> FsResult<u32> {
    let buf = comm.payload_buf(resp.encoded_size() as u32);
    Ok(resp.encode_into(buf)?)
}

fn join_path(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Clients must never send Error.
fn error_handler(_conn: &Arc<Connection>, _comm: &mut dyn Transport, _len: u32) -> FsResult<u32> {
    Err(FsError::InvalidArgument)
}

/// Mount is the first message on a connection; it passes the mount gate and
/// returns the root inode plus the server's capabilities.
fn mount(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let mount_path = {
        let req = MountReq::decode(req_bytes(comm, len))?;
        clean_mount_path(req.mount_path)?
    };
    if conn.is_mounted() {
        return Err(FsError::Busy);
    }

    let root = conn.server().backend().mount(&mount_path)?;
    let root_fd = ControlFd::new_root(conn.server(), root.kind, mount_path, root.backend);
    conn.server().add_mount_point(&root_fd);
    let root_id = conn.table().insert_control(root_fd);
    conn.set_mounted();

    let resp = MountResp {
        root: Inode {
            control_fd: root_id.0,
            stat: root.stat,
        },
        max_message_size: conn.server().config().max_message_size,
        supported: conn.server().backend().supported_tags(),
    };
    reply(comm, &resp)
}

/// Materializes an auxiliary channel, spawns its servicer and donates the
/// data-region FD plus the FD-donation socket.
fn channel(conn: &Arc<Connection>, comm: &mut dyn Transport, _len: u32) -> FsResult<u32> {
    if !conn.is_mounted() {
        return Err(FsError::InvalidArgument);
    }
    let factory = conn.channel_factory().ok_or(FsError::Unsupported)?;
    let handles = factory.create_channel(conn.server().config().max_message_size)?;

    conn.spawn_servicer(handles.transport)?;

    comm.donate_fd(handles.data_fd)?;
    comm.donate_fd(handles.fd_sock)?;
    let resp = ChannelResp {
        data_offset: handles.data_offset,
        data_length: handles.data_length,
    };
    reply(comm, &resp)
}

/// FStat is polymorphic over control and open handles.
fn fstat(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let req = StatReq::decode(req_bytes(comm, len))?;
    let stat = match conn.table().lookup_any(req.fd)? {
        AnyRef::Control(fd) => fd.backend().stat()?,
        AnyRef::Open(fd) => fd.backend().stat()?,
    };
    reply(comm, &stat)
}

fn set_stat(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    if conn.read_only() {
        return Err(FsError::ReadOnly);
    }
    let req = SetStatReq::decode(req_bytes(comm, len))?;
    let fd = conn.table().lookup_control(req.fd)?;
    if req.mask & !SET_STAT_SUPPORTED_MASK != 0 {
        return Err(FsError::NotPermitted);
    }

    let (failure_mask, failure_err) = fd.backend().set_stat(&req);
    let resp = SetStatResp {
        failure_mask,
        failure_errno: failure_err.map(|err| err.errno() as u32).unwrap_or(0),
    };
    reply(comm, &resp)
}

/// Walk emits one inode per component walked, marshalled into the payload
/// as the backend produces them.
fn walk(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let (dir_id, names) = {
        let req = WalkReq::decode(req_bytes(comm, len))?;
        let names: Vec<String> = req.path.iter().map(|c| (*c).to_owned()).collect();
        (req.dir_fd, names)
    };
    let dir = conn.table().lookup_control(dir_id)?;
    if !dir.is_dir() {
        return Err(FsError::NotADirectory);
    }
    for name in &names {
        check_safe_name(name)?;
    }

    let max_payload = 1 + 4 + names.len() * Inode::SIZE;
    if max_payload > conn.server().config().max_message_size as usize {
        // Too much to walk, can't do.
        return Err(FsError::Protocol(WireError::OutOfRange));
    }
    let mut w = Writer::new(comm.payload_buf(max_payload as u32));
    w.put_u8(WalkStatus::Success as u8)?;
    w.put_u32(0)?;

    let mut emitted: u32 = 0;
    let mut next_component = 0usize;
    let mut parent = Arc::clone(dir.arc());
    let mut encode_err: Option<WireError> = None;
    let status = {
        let mut sink = |node: NewNode| {
            if next_component >= names.len() {
                return;
            }
            let name = names[next_component].clone();
            next_component += 1;
            let child =
                ControlFd::new_child(conn.server(), &parent, node.kind, name, node.backend);
            parent = Arc::clone(&child);
            let id = conn.table().insert_control(child);
            if encode_err.is_none() {
                let inode = Inode {
                    control_fd: id.0,
                    stat: node.stat,
                };
                match inode.write_to(&mut w) {
                    Ok(()) => emitted += 1,
                    Err(err) => encode_err = Some(err),
                }
            }
        };
        dir.backend().walk(&names, &mut sink)?
    };
    if let Some(err) = encode_err {
        return Err(err.into());
    }

    // The status and inode count head the payload; fill them in last.
    w.patch_u8_at(0, status as u8)?;
    w.patch_u32_at(1, emitted)?;
    Ok(w.position() as u32)
}

/// WalkStat emits statx records only; an empty first component stats the
/// starting node itself and is legal on non-directories.
fn walk_stat(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let (dir_id, names) = {
        let req = WalkReq::decode(req_bytes(comm, len))?;
        let names: Vec<String> = req.path.iter().map(|c| (*c).to_owned()).collect();
        (req.dir_fd, names)
    };
    let fd = conn.table().lookup_control(dir_id)?;
    if !fd.is_dir() && (names.len() > 1 || (names.len() == 1 && !names[0].is_empty())) {
        return Err(FsError::NotADirectory);
    }
    for (i, name) in names.iter().enumerate() {
        if i == 0 && name.is_empty() {
            continue;
        }
        check_safe_name(name)?;
    }

    let max_payload = 4 + names.len() * Statx::SIZE;
    if max_payload > conn.server().config().max_message_size as usize {
        return Err(FsError::Protocol(WireError::OutOfRange));
    }
    let mut w = Writer::new(comm.payload_buf(max_payload as u32));
    w.put_u32(0)?;

    let mut emitted: u32 = 0;
    let mut encode_err: Option<WireError> = None;
    {
        let mut sink = |stat: Statx| {
            if encode_err.is_none() {
                match stat.write_to(&mut w) {
                    Ok(()) => emitted += 1,
                    Err(err) => encode_err = Some(err),
                }
            }
        };
        fd.backend().walk_stat(&names, &mut sink)?;
    }
    if let Some(err) = encode_err {
        return Err(err.into());
    }

    w.patch_u32_at(0, emitted)?;
    Ok(w.position() as u32)
}

fn open_at(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let req = OpenAtReq::decode(req_bytes(comm, len))?;

    // Only keep allowed open flags.
    let flags = req.flags & ALLOWED_OPEN_FLAGS;
    if flags != req.flags {
        tracing::debug!(
            requested = req.flags,
            kept = flags,
            "discarding open flags that are not allowed"
        );
    }

    let access = flags & libc::O_ACCMODE as u32;
    let trunc = flags & libc::O_TRUNC as u32 != 0;
    if conn.read_only() && (access != libc::O_RDONLY as u32 || trunc) {
        return Err(FsError::ReadOnly);
    }

    let fd = conn.table().lookup_control(req.fd)?;
    if fd.is_dir() && (access != libc::O_RDONLY as u32 || trunc) {
        // Directories are not truncatable and open read-only.
        return Err(FsError::IsADirectory);
    }

    let opened = fd.backend().open(flags)?;
    let open_fd = OpenFd::new(fd.arc(), flags, opened.backend);
    let open_id = conn.table().insert_open(open_fd);
    if let Some(host_fd) = opened.donate {
        comm.donate_fd(host_fd)?;
    }
    reply(comm, &OpenAtResp { open_fd: open_id })
}

fn open_create_at(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    if conn.read_only() {
        return Err(FsError::ReadOnly);
    }
    let (dir_id, mode, uid, gid, flags, name) = {
        let req = OpenCreateAtReq::decode(req_bytes(comm, len))?;
        let flags = req.flags & ALLOWED_OPEN_FLAGS;
        if flags != req.flags {
            tracing::debug!(
                requested = req.flags,
                kept = flags,
                "discarding open flags that are not allowed"
            );
        }
        (req.dir_fd, req.mode, req.uid, req.gid, flags, req.name.to_owned())
    };
    check_safe_name(&name)?;

    let dir = conn.table().lookup_control(dir_id)?;
    if !dir.is_dir() {
        return Err(FsError::NotADirectory);
    }

    let (node, opened) = dir.backend().open_create(mode, uid, gid, &name, flags)?;
    let child = ControlFd::new_child(conn.server(), dir.arc(), node.kind, name, node.backend);
    let child_arc = Arc::clone(&child);
    let child_id = conn.table().insert_control(child);
    let open_fd = OpenFd::new(&child_arc, flags, opened.backend);
    let open_id = conn.table().insert_open(open_fd);
    if let Some(host_fd) = opened.donate {
        comm.donate_fd(host_fd)?;
    }

    let resp = OpenCreateAtResp {
        child: Inode {
            control_fd: child_id.0,
            stat: node.stat,
        },
        open_fd: open_id,
    };
    reply(comm, &resp)
}

/// Close drops the table's reference on each descriptor. It never fails and
/// has no response payload.
fn close(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let req = FdBatchReq::decode(req_bytes(comm, len))?;
    for id in req.fds {
        conn.table().remove(id);
    }
    Ok(0)
}

/// FSync syncs every descriptor regardless of failures and reports the
/// first error.
fn fsync(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let req = FdBatchReq::decode(req_bytes(comm, len))?;
    let mut first_err = None;
    for id in req.fds {
        let result = conn.table().lookup_open(id).and_then(|fd| fd.backend().sync());
        if let Err(err) = result {
            if first_err.is_none() {
                first_err = Some(err);
            }
        }
    }
    match first_err {
        Some(err) => Err(err),
        None => Ok(0),
    }
}

fn pwrite(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    if conn.read_only() {
        return Err(FsError::ReadOnly);
    }
    // req.buf aliases the payload; the backend consumes it before the
    // response overwrites the buffer.
    let count = {
        let req = PWriteReq::decode(req_bytes(comm, len))?;
        let fd = conn.table().lookup_open(req.fd)?;
        if !fd.writable() {
            return Err(FsError::BadFileDescriptor);
        }
        fd.backend().write(req.buf, req.offset)?
    };
    reply(comm, &PWriteResp { count })
}

/// PRead reads straight into the payload after a reserved length prefix.
fn pread(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let req = PReadReq::decode(req_bytes(comm, len))?;
    let fd = conn.table().lookup_open(req.fd)?;
    if !fd.readable() {
        return Err(FsError::BadFileDescriptor);
    }

    let count = req.count as usize;
    if count + 4 > conn.server().config().max_message_size as usize {
        return Err(FsError::InvalidArgument);
    }
    let payload = comm.payload_buf(4 + req.count);
    let n = fd.backend().read(req.offset, &mut payload[4..4 + count])?;
    payload[..4].copy_from_slice(&n.to_le_bytes());
    Ok(4 + n)
}

fn mkdir_at(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    if conn.read_only() {
        return Err(FsError::ReadOnly);
    }
    let (dir_id, mode, uid, gid, name) = {
        let req = MkdirAtReq::decode(req_bytes(comm, len))?;
        (req.dir_fd, req.mode, req.uid, req.gid, req.name.to_owned())
    };
    check_safe_name(&name)?;

    let dir = conn.table().lookup_control(dir_id)?;
    if !dir.is_dir() {
        return Err(FsError::NotADirectory);
    }

    let node = dir.backend().mkdir(mode, uid, gid, &name)?;
    let stat = node.stat;
    let child = ControlFd::new_child(conn.server(), dir.arc(), node.kind, name, node.backend);
    let child_id = conn.table().insert_control(child);
    let resp = ChildInodeResp {
        child: Inode {
            control_fd: child_id.0,
            stat,
        },
    };
    reply(comm, &resp)
}

fn mknod_at(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    if conn.read_only() {
        return Err(FsError::ReadOnly);
    }
    let (dir_id, mode, uid, gid, minor, major, name) = {
        let req = MknodAtReq::decode(req_bytes(comm, len))?;
        (
            req.dir_fd,
            req.mode,
            req.uid,
            req.gid,
            req.minor,
            req.major,
            req.name.to_owned(),
        )
    };
    check_safe_name(&name)?;

    let dir = conn.table().lookup_control(dir_id)?;
    if !dir.is_dir() {
        return Err(FsError::NotADirectory);
    }

    let node = dir.backend().mknod(mode, uid, gid, &name, minor, major)?;
    let stat = node.stat;
    let child = ControlFd::new_child(conn.server(), dir.arc(), node.kind, name, node.backend);
    let child_id = conn.table().insert_control(child);
    let resp = ChildInodeResp {
        child: Inode {
            control_fd: child_id.0,
            stat,
        },
    };
    reply(comm, &resp)
}

fn symlink_at(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    if conn.read_only() {
        return Err(FsError::ReadOnly);
    }
    let (dir_id, uid, gid, name, target) = {
        let req = SymlinkAtReq::decode(req_bytes(comm, len))?;
        (
            req.dir_fd,
            req.uid,
            req.gid,
            req.name.to_owned(),
            req.target.to_owned(),
        )
    };
    check_safe_name(&name)?;

    let dir = conn.table().lookup_control(dir_id)?;
    if !dir.is_dir() {
        return Err(FsError::NotADirectory);
    }

    let node = dir.backend().symlink(&name, &target, uid, gid)?;
    let stat = node.stat;
    let child = ControlFd::new_child(conn.server(), dir.arc(), node.kind, name, node.backend);
    let child_id = conn.table().insert_control(child);
    let resp = ChildInodeResp {
        child: Inode {
            control_fd: child_id.0,
            stat,
        },
    };
    reply(comm, &resp)
}

fn link_at(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    if conn.read_only() {
        return Err(FsError::ReadOnly);
    }
    let (dir_id, target_id, name) = {
        let req = LinkAtReq::decode(req_bytes(comm, len))?;
        (req.dir_fd, req.target, req.name.to_owned())
    };
    check_safe_name(&name)?;

    let dir = conn.table().lookup_control(dir_id)?;
    if !dir.is_dir() {
        return Err(FsError::NotADirectory);
    }
    let target = conn.table().lookup_control(target_id)?;

    let node = target.backend().link(dir.backend(), &name)?;
    let stat = node.stat;
    let child = ControlFd::new_child(conn.server(), dir.arc(), node.kind, name, node.backend);
    let child_id = conn.table().insert_control(child);
    let resp = ChildInodeResp {
        child: Inode {
            control_fd: child_id.0,
            stat,
        },
    };
    reply(comm, &resp)
}

fn fstatfs(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let req = FStatFsReq::decode(req_bytes(comm, len))?;
    let fd = conn.table().lookup_control(req.fd)?;
    let statfs = fd.backend().statfs()?;
    reply(comm, &statfs)
}

fn fallocate(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    if conn.read_only() {
        return Err(FsError::ReadOnly);
    }
    let req = FAllocateReq::decode(req_bytes(comm, len))?;
    let fd = conn.table().lookup_open(req.fd)?;
    if !fd.writable() {
        return Err(FsError::BadFileDescriptor);
    }
    fd.backend().allocate(req.mode, req.offset, req.length)?;
    Ok(0)
}

fn read_link_at(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let req = ReadLinkAtReq::decode(req_bytes(comm, len))?;
    let fd = conn.table().lookup_control(req.fd)?;
    if fd.kind() != crate::backend::FileKind::Symlink {
        return Err(FsError::NotASymlink);
    }
    let target = fd.backend().readlink()?;
    reply(comm, &ReadLinkAtResp { target: &target })
}

/// Flush is backend-defined; some backends treat it as a no-op.
fn flush(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let req = FlushReq::decode(req_bytes(comm, len))?;
    let fd = conn.table().lookup_open(req.fd)?;
    fd.backend().flush()?;
    Ok(0)
}

/// Connect donates a connected socket FD; there is no response payload.
fn connect(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let req = ConnectReq::decode(req_bytes(comm, len))?;
    let fd = conn.table().lookup_control(req.fd)?;
    if fd.kind() != crate::backend::FileKind::Socket {
        return Err(FsError::NotASocket);
    }
    let sock = fd.backend().connect(req.sock_type)?;
    comm.donate_fd(sock)?;
    Ok(0)
}

fn unlink_at(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    if conn.read_only() {
        return Err(FsError::ReadOnly);
    }
    let (dir_id, flags, name) = {
        let req = UnlinkAtReq::decode(req_bytes(comm, len))?;
        (req.dir_fd, req.flags, req.name.to_owned())
    };
    check_safe_name(&name)?;

    let dir = conn.table().lookup_control(dir_id)?;
    if !dir.is_dir() {
        return Err(FsError::NotADirectory);
    }
    dir.backend().unlink(&name, flags)?;
    Ok(0)
}

/// RenameAt holds the server rename lock for writing across the backend
/// rename and the control-FD tree rewrite, so concurrent path readers only
/// ever observe the old or the new topology.
fn rename_at(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    if conn.read_only() {
        return Err(FsError::ReadOnly);
    }
    let (renamed_id, new_dir_id, new_name) = {
        let req = RenameAtReq::decode(req_bytes(comm, len))?;
        (req.renamed, req.new_dir, req.new_name.to_owned())
    };
    check_safe_name(&new_name)?;

    let renamed = conn.table().lookup_control(renamed_id)?;
    let new_dir = conn.table().lookup_control(new_dir_id)?;
    if !new_dir.is_dir() {
        return Err(FsError::NotADirectory);
    }

    // References on old parents are dropped only after the lock goes.
    let mut released: Vec<Arc<ControlFd>> = Vec::new();
    {
        let _guard = conn.server().rename_write();

        let Some(old_parent) = renamed.parent_arc() else {
            // renamed is a mount root.
            return Err(FsError::Busy);
        };
        let old_parent_path = old_parent.path_locked();
        let old_path = join_path(&old_parent_path, &renamed.name());
        if new_name == renamed.name() && old_parent_path == new_dir.path_locked() {
            // Nothing to do.
            return Ok(0);
        }

        let (mut update, cleanup) =
            renamed.backend().rename_locked(new_dir.backend(), &new_name)?;

        // Every mount point that can reach the old path must observe the
        // rename; aliased mounts see the same underlying node through
        // distinct paths.
        conn.server().for_each_mount_point(|root| {
            let root_name = root.name();
            if !old_path.starts_with(&root_name) {
                return;
            }
            let remaining: Vec<&str> = old_path[root_name.len()..]
                .split('/')
                .filter(|c| !c.is_empty())
                .collect();
            root.rename_recursive_locked(
                new_dir.arc(),
                &new_name,
                &remaining,
                &mut update,
                &mut released,
            );
        });

        if let Some(cleanup) = cleanup {
            cleanup();
        }
    }
    for fd in released {
        ControlFd::dec_ref(&fd);
    }
    Ok(0)
}

/// Getdents64 streams dirents into the payload. A negative count seeks the
/// directory to offset zero first.
fn getdents64(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let req = Getdents64Req::decode(req_bytes(comm, len))?;
    let fd = conn.table().lookup_open(req.dir_fd)?;
    if !fd.control().is_dir() {
        return Err(FsError::NotADirectory);
    }

    let seek0 = req.count < 0;
    let byte_budget = req.count.unsigned_abs();
    if byte_budget as usize + 4 > conn.server().config().max_message_size as usize {
        return Err(FsError::InvalidArgument);
    }

    let mut w = Writer::new(comm.payload_buf(4 + byte_budget));
    w.put_u32(0)?;
    let mut emitted: u32 = 0;
    let mut encode_err: Option<WireError> = None;
    {
        let mut sink = |dirent: Dirent64| {
            if encode_err.is_none() {
                match dirent.write_to(&mut w) {
                    Ok(()) => emitted += 1,
                    Err(err) => encode_err = Some(err),
                }
            }
        };
        fd.backend().getdents(byte_budget, seek0, &mut sink)?;
    }
    if let Some(err) = encode_err {
        return Err(err.into());
    }

    w.patch_u32_at(0, emitted)?;
    Ok(w.position() as u32)
}

/// FGetXattr writes the attribute value straight into the payload after a
/// reserved length prefix.
fn fget_xattr(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let (fd_id, buf_size, name) = {
        let req = FGetXattrReq::decode(req_bytes(comm, len))?;
        (req.fd, req.buf_size, req.name.to_owned())
    };
    let fd = conn.table().lookup_control(fd_id)?;

    let size = buf_size as usize;
    if size + 4 > conn.server().config().max_message_size as usize {
        return Err(FsError::InvalidArgument);
    }
    let payload = comm.payload_buf(4 + buf_size);
    let n = fd.backend().get_xattr(&name, &mut payload[4..4 + size])?;
    payload[..4].copy_from_slice(&n.to_le_bytes());
    Ok(4 + n)
}

fn fset_xattr(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    if conn.read_only() {
        return Err(FsError::ReadOnly);
    }
    let req = FSetXattrReq::decode(req_bytes(comm, len))?;
    let fd = conn.table().lookup_control(req.fd)?;
    fd.backend().set_xattr(req.name, req.value, req.flags)?;
    Ok(0)
}

fn flist_xattr(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    let req = FListXattrReq::decode(req_bytes(comm, len))?;
    let fd = conn.table().lookup_control(req.fd)?;
    let names = fd.backend().list_xattr(req.size)?;
    reply(comm, &FListXattrResp { names })
}

fn fremove_xattr(conn: &Arc<Connection>, comm: &mut dyn Transport, len: u32) -> FsResult<u32> {
    if conn.read_only() {
        return Err(FsError::ReadOnly);
    }
    let req = FRemoveXattrReq::decode(req_bytes(comm, len))?;
    let fd = conn.table().lookup_control(req.fd)?;
    fd.backend().remove_xattr(req.name)?;
    Ok(0)
}
