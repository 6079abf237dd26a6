// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Integration tests for the Unix-socket transport.

use std::fs::File;
use std::io::{self, Read, Write};
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::Arc;
use std::thread;

use gatefs_daemon::transport::send_fd;
use gatefs_daemon::{SocketChannelFactory, UnixStreamTransport};
use gatefs_proto::msg::{MountReq, MountResp, StatReq};
use gatefs_proto::{Decode, Encode, FdId, MsgTag, Statx};
use gatefs_server::{Connection, MemFs, Server, ServerConfig, Transport};

fn send_frame<T: Encode>(stream: &mut UnixStream, tag: MsgTag, msg: &T) {
    let mut payload = vec![0u8; msg.encoded_size()];
    let len = msg.encode_into(&mut payload).expect("encode");
    let mut header = [0u8; 8];
    header[..4].copy_from_slice(&(tag as u32).to_le_bytes());
    header[4..].copy_from_slice(&len.to_le_bytes());
    stream.write_all(&header).expect("write header");
    stream.write_all(&payload[..len as usize]).expect("write payload");
}

fn recv_frame(stream: &mut UnixStream) -> (u32, Vec<u8>) {
    let mut header = [0u8; 8];
    stream.read_exact(&mut header).expect("read header");
    let tag = u32::from_le_bytes(header[..4].try_into().unwrap());
    let len = u32::from_le_bytes(header[4..].try_into().unwrap()) as usize;
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).expect("read payload");
    (tag, payload)
}

#[test]
fn mount_and_stat_over_a_socket() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket_path = dir.path().join("gatefs.sock");

    let listener = UnixListener::bind(&socket_path).expect("bind");
    let server = Server::new(Box::new(MemFs::new()), ServerConfig::default());
    let server_thread = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let conn = Connection::new(server, Some(Box::new(SocketChannelFactory)));
        let mut transport = UnixStreamTransport::new(stream);
        conn.service(&mut transport).expect("service");
        conn.shutdown();
        assert!(conn.table().is_empty(), "teardown must release descriptors");
    });

    let mut client = UnixStream::connect(&socket_path).expect("connect");
    send_frame(&mut client, MsgTag::Mount, &MountReq { mount_path: "/srv" });
    let (tag, payload) = recv_frame(&mut client);
    assert_eq!(tag, MsgTag::Mount as u32);
    let mounted = MountResp::decode(&payload).expect("mount resp");
    assert_ne!(mounted.root.control_fd, 0);

    send_frame(
        &mut client,
        MsgTag::FStat,
        &StatReq {
            fd: FdId(mounted.root.control_fd),
        },
    );
    let (tag, payload) = recv_frame(&mut client);
    assert_eq!(tag, MsgTag::FStat as u32);
    let stat = Statx::decode(&payload).expect("statx");
    assert_eq!(stat.mode & libc::S_IFMT as u16, libc::S_IFDIR as u16);

    drop(client);
    server_thread.join().expect("server thread");
}

#[test]
fn unknown_tags_get_an_error_envelope() {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket_path = dir.path().join("gatefs.sock");

    let listener = UnixListener::bind(&socket_path).expect("bind");
    let server = Server::new(Box::new(MemFs::new()), ServerConfig::default());
    let server_thread = thread::spawn(move || {
        let (stream, _) = listener.accept().expect("accept");
        let conn = Connection::new(server, None);
        let mut transport = UnixStreamTransport::new(stream);
        conn.service(&mut transport).expect("service");
    });

    let mut client = UnixStream::connect(&socket_path).expect("connect");
    let mut header = [0u8; 8];
    header[..4].copy_from_slice(&999u32.to_le_bytes());
    client.write_all(&header).expect("write header");
    let (tag, payload) = recv_frame(&mut client);
    assert_eq!(tag, MsgTag::Error as u32);
    assert_eq!(payload.len(), 4);
    assert_eq!(u32::from_le_bytes(payload.try_into().unwrap()), libc::EIO as u32);

    drop(client);
    server_thread.join().expect("server thread");
}

fn recv_fd(sock: &UnixStream) -> io::Result<OwnedFd> {
    let mut marker = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: marker.as_mut_ptr().cast(),
        iov_len: marker.len(),
    };
    let mut cmsg_space = [0u64; 8];

    // SAFETY: the msghdr references buffers that outlive the recvmsg call;
    // the fd is read from within the kernel-filled control region.
    unsafe {
        let mut msg: libc::msghdr = mem::zeroed();
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = cmsg_space.as_mut_ptr().cast();
        msg.msg_controllen = mem::size_of_val(&cmsg_space);

        if libc::recvmsg(sock.as_raw_fd(), &mut msg, 0) < 0 {
            return Err(io::Error::last_os_error());
        }
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        assert!(!cmsg.is_null(), "expected ancillary data");
        assert_eq!((*cmsg).cmsg_level, libc::SOL_SOCKET);
        assert_eq!((*cmsg).cmsg_type, libc::SCM_RIGHTS);
        let mut fd: libc::c_int = -1;
        std::ptr::copy_nonoverlapping(
            libc::CMSG_DATA(cmsg),
            (&mut fd as *mut libc::c_int).cast::<u8>(),
            mem::size_of::<libc::c_int>(),
        );
        assert!(fd >= 0);
        Ok(OwnedFd::from_raw_fd(fd))
    }
}

#[test]
fn send_fd_transfers_a_descriptor() {
    let (ours, theirs) = UnixStream::pair().expect("socketpair");
    let devnull: OwnedFd = File::open("/dev/null").expect("open").into();
    send_fd(&ours, devnull).expect("send fd");

    let received = recv_fd(&theirs).expect("recv fd");
    assert!(received.as_raw_fd() >= 0);
}

#[test]
fn channel_factory_produces_paired_endpoints() {
    use gatefs_server::ChannelFactory;

    let factory = SocketChannelFactory;
    let handles = factory.create_channel(1 << 20).expect("channel");
    assert_eq!(handles.data_offset, 0);

    // Writing through the servicer-side transport must surface on the
    // donated peer endpoint.
    let mut transport = handles.transport;
    let buf = transport.payload_buf(4);
    buf[..4].copy_from_slice(b"ping");
    transport.send(MsgTag::Flush as u32, 4).expect("send");

    let mut peer = UnixStream::from(handles.data_fd);
    let mut frame = [0u8; 12];
    peer.read_exact(&mut frame).expect("read frame");
    assert_eq!(&frame[8..], b"ping");
}
