// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Rename coordinator tests: tree rewrite, aliased mount points, root gate.

use std::sync::Arc;

use gatefs_proto::msg::{
    ChildInodeResp, MkdirAtReq, MountReq, MountResp, RenameAtReq, WalkReq, WalkResp, WalkStatus,
};
use gatefs_proto::{FdId, MsgTag};
use gatefs_server::testing::{decode_ok, expect_errno, rpc, LoopbackTransport};
use gatefs_server::{Connection, MemFs, Server, ServerConfig};

fn mount(conn: &Arc<Connection>, t: &mut LoopbackTransport, path: &str) -> FdId {
    let (tag, payload) = rpc(conn, t, MsgTag::Mount, &MountReq { mount_path: path });
    let resp: MountResp = decode_ok(tag, &payload);
    FdId(resp.root.control_fd)
}

fn mkdir(conn: &Arc<Connection>, t: &mut LoopbackTransport, dir: FdId, name: &str) -> FdId {
    let req = MkdirAtReq {
        dir_fd: dir,
        mode: 0o755,
        uid: 0,
        gid: 0,
        name,
    };
    let (tag, payload) = rpc(conn, t, MsgTag::MkdirAt, &req);
    let resp: ChildInodeResp = decode_ok(tag, &payload);
    FdId(resp.child.control_fd)
}

fn walk(conn: &Arc<Connection>, t: &mut LoopbackTransport, dir: FdId, path: Vec<&str>) -> WalkResp {
    let (tag, payload) = rpc(conn, t, MsgTag::Walk, &WalkReq { dir_fd: dir, path });
    decode_ok(tag, &payload)
}

#[test]
fn rename_moves_the_node_and_the_descriptors() {
    let fs = MemFs::new();
    let server = Server::new(Box::new(fs.clone()), ServerConfig::default());
    let conn = Connection::new(server, None);
    let mut t = LoopbackTransport::new();

    let root = mount(&conn, &mut t, "/a");
    let sub = mkdir(&conn, &mut t, root, "sub");
    let x = mkdir(&conn, &mut t, sub, "x");

    let req = RenameAtReq {
        renamed: x,
        new_dir: sub,
        new_name: "y",
    };
    let (tag, payload) = rpc(&conn, &mut t, MsgTag::RenameAt, &req);
    assert_ne!(tag, MsgTag::Error, "{payload:?}");

    // The descriptor follows the rename.
    let moved = conn.table().lookup_control(x).expect("fd still registered");
    assert_eq!(moved.path(), "/a/sub/y");
    drop(moved);

    // The backend tree moved too.
    assert!(fs.ino_at("/a/sub/x").is_none());
    assert!(fs.ino_at("/a/sub/y").is_some());

    let walked = walk(&conn, &mut t, root, vec!["sub", "x"]);
    assert_eq!(walked.status, WalkStatus::ComponentDoesNotExist);
    let walked = walk(&conn, &mut t, root, vec!["sub", "y"]);
    assert_eq!(walked.status, WalkStatus::Success);
}

#[test]
fn rename_rewrites_descriptors_of_aliased_mounts() {
    let fs = MemFs::new();
    let server = Server::new(Box::new(fs.clone()), ServerConfig::default());

    // First client exposes /a; its tree contains sub/x.
    let conn1 = Connection::new(Arc::clone(&server), None);
    let mut t1 = LoopbackTransport::new();
    let root1 = mount(&conn1, &mut t1, "/a");
    let sub1 = mkdir(&conn1, &mut t1, root1, "sub");
    let x1 = mkdir(&conn1, &mut t1, sub1, "x");

    // Second client mounts /a/sub, aliasing the same underlying tree, and
    // reaches the same node as "x".
    let conn2 = Connection::new(Arc::clone(&server), None);
    let mut t2 = LoopbackTransport::new();
    let root2 = mount(&conn2, &mut t2, "/a/sub");
    let walked = walk(&conn2, &mut t2, root2, vec!["x"]);
    assert_eq!(walked.status, WalkStatus::Success);
    let x2 = FdId(walked.inodes[0].control_fd);

    // Rename through the first client: /a/sub/x -> /a/sub/y.
    let req = RenameAtReq {
        renamed: x1,
        new_dir: sub1,
        new_name: "y",
    };
    let (tag, payload) = rpc(&conn1, &mut t1, MsgTag::RenameAt, &req);
    assert_ne!(tag, MsgTag::Error, "{payload:?}");

    // Every descriptor that reached the node via the old path moved,
    // including the one walked from the aliased mount.
    let moved = conn2.table().lookup_control(x2).expect("fd still registered");
    assert_eq!(moved.path(), "/a/sub/y");
    drop(moved);

    let walked = walk(&conn2, &mut t2, root2, vec!["x"]);
    assert_eq!(walked.status, WalkStatus::ComponentDoesNotExist);
    let walked = walk(&conn2, &mut t2, root2, vec!["y"]);
    assert_eq!(walked.status, WalkStatus::Success);
}

#[test]
fn rename_of_a_mount_root_is_busy() {
    let fs = MemFs::new();
    let server = Server::new(Box::new(fs), ServerConfig::default());
    let conn = Connection::new(server, None);
    let mut t = LoopbackTransport::new();

    let root = mount(&conn, &mut t, "/a");
    let req = RenameAtReq {
        renamed: root,
        new_dir: root,
        new_name: "z",
    };
    let (tag, payload) = rpc(&conn, &mut t, MsgTag::RenameAt, &req);
    assert_eq!(expect_errno(tag, &payload), libc::EBUSY);
}

#[test]
fn same_name_same_directory_is_a_no_op() {
    let fs = MemFs::new();
    let server = Server::new(Box::new(fs.clone()), ServerConfig::default());
    let conn = Connection::new(server, None);
    let mut t = LoopbackTransport::new();

    let root = mount(&conn, &mut t, "/a");
    let x = mkdir(&conn, &mut t, root, "x");

    let req = RenameAtReq {
        renamed: x,
        new_dir: root,
        new_name: "x",
    };
    let (tag, _payload) = rpc(&conn, &mut t, MsgTag::RenameAt, &req);
    assert_ne!(tag, MsgTag::Error);

    let fd = conn.table().lookup_control(x).expect("fd registered");
    assert_eq!(fd.path(), "/a/x");
    drop(fd);
    assert!(fs.ino_at("/a/x").is_some());
}

#[test]
fn rename_into_a_non_directory_is_rejected() {
    let fs = MemFs::new();
    let server = Server::new(Box::new(fs), ServerConfig::default());
    let conn = Connection::new(server, None);
    let mut t = LoopbackTransport::new();

    let root = mount(&conn, &mut t, "/a");
    let x = mkdir(&conn, &mut t, root, "x");
    let y = mkdir(&conn, &mut t, root, "y");

    // Unsafe new names are rejected before any lookup.
    let req = RenameAtReq {
        renamed: x,
        new_dir: y,
        new_name: "../out",
    };
    let (tag, payload) = rpc(&conn, &mut t, MsgTag::RenameAt, &req);
    assert_eq!(expect_errno(tag, &payload), libc::EINVAL);

    let req = RenameAtReq {
        renamed: x,
        new_dir: FdId(9999),
        new_name: "ok",
    };
    let (tag, payload) = rpc(&conn, &mut t, MsgTag::RenameAt, &req);
    assert_eq!(expect_errno(tag, &payload), libc::EBADF);
}
