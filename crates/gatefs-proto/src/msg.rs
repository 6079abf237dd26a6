// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! RPC message structures.
//!
//! Every message is a fixed-layout structure with no self-describing tags;
//! the message tag travels in the transport header and each handler knows
//! the static layout of its request and response. Request structures borrow
//! string and buffer fields from the payload slice.

use crate::attrs::{Dirent64, FdId, Inode, StatFs, Statx};
use crate::wire::{sized_len, Reader, WireError, WireResult, Writer};

/// Message tags, used as indexes into the server's handler table.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MsgTag {
    Error = 0,
    Mount = 1,
    Channel = 2,
    FStat = 3,
    SetStat = 4,
    Walk = 5,
    WalkStat = 6,
    OpenAt = 7,
    OpenCreateAt = 8,
    Close = 9,
    FSync = 10,
    PWrite = 11,
    PRead = 12,
    MkdirAt = 13,
    MknodAt = 14,
    SymlinkAt = 15,
    LinkAt = 16,
    FStatFS = 17,
    FAllocate = 18,
    ReadLinkAt = 19,
    Flush = 20,
    Connect = 21,
    UnlinkAt = 22,
    RenameAt = 23,
    Getdents64 = 24,
    FGetXattr = 25,
    FSetXattr = 26,
    FListXattr = 27,
    FRemoveXattr = 28,
}

impl MsgTag {
    pub const COUNT: usize = 29;

    /// Every tag, in handler-table order.
    pub const ALL: [MsgTag; MsgTag::COUNT] = [
        MsgTag::Error,
        MsgTag::Mount,
        MsgTag::Channel,
        MsgTag::FStat,
        MsgTag::SetStat,
        MsgTag::Walk,
        MsgTag::WalkStat,
        MsgTag::OpenAt,
        MsgTag::OpenCreateAt,
        MsgTag::Close,
        MsgTag::FSync,
        MsgTag::PWrite,
        MsgTag::PRead,
        MsgTag::MkdirAt,
        MsgTag::MknodAt,
        MsgTag::SymlinkAt,
        MsgTag::LinkAt,
        MsgTag::FStatFS,
        MsgTag::FAllocate,
        MsgTag::ReadLinkAt,
        MsgTag::Flush,
        MsgTag::Connect,
        MsgTag::UnlinkAt,
        MsgTag::RenameAt,
        MsgTag::Getdents64,
        MsgTag::FGetXattr,
        MsgTag::FSetXattr,
        MsgTag::FListXattr,
        MsgTag::FRemoveXattr,
    ];

    pub fn from_u32(raw: u32) -> WireResult<MsgTag> {
        if (raw as usize) < MsgTag::COUNT {
            Ok(MsgTag::ALL[raw as usize])
        } else {
            Err(WireError::UnknownTag(raw))
        }
    }
}

/// Response-side encoding: size accounting plus in-place marshalling.
pub trait Encode {
    fn encoded_size(&self) -> usize;
    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()>;

    /// Encode into `buf` and return the number of payload bytes written.
    fn encode_into(&self, buf: &mut [u8]) -> WireResult<u32> {
        let mut w = Writer::new(buf);
        self.encode(&mut w)?;
        Ok(w.position() as u32)
    }
}

/// Request-side checked unmarshal: the payload must match the declared
/// layout exactly, trailing or missing bytes fail the decode.
pub trait Decode<'a>: Sized {
    fn decode(buf: &'a [u8]) -> WireResult<Self>;
}

/// Timestamp argument for SetStat.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimeSpec {
    pub sec: i64,
    pub nsec: i64,
}

impl TimeSpec {
    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_i64(self.sec)?;
        w.put_i64(self.nsec)
    }

    fn decode(r: &mut Reader<'_>) -> WireResult<Self> {
        Ok(Self {
            sec: r.read_i64()?,
            nsec: r.read_i64()?,
        })
    }
}

/// Error envelope payload: the errno of a failed request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ErrorResp {
    pub errno: u32,
}

impl Encode for ErrorResp {
    fn encoded_size(&self) -> usize {
        4
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u32(self.errno)
    }
}

impl<'a> Decode<'a> for ErrorResp {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let errno = r.read_u32()?;
        r.finish()?;
        Ok(Self { errno })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MountReq<'a> {
    pub mount_path: &'a str,
}

impl<'a> Decode<'a> for MountReq<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let mount_path = r.read_str()?;
        r.finish()?;
        Ok(Self { mount_path })
    }
}

impl Encode for MountReq<'_> {
    fn encoded_size(&self) -> usize {
        sized_len(self.mount_path.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_str(self.mount_path)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MountResp {
    pub root: Inode,
    pub max_message_size: u32,
    pub supported: Vec<MsgTag>,
}

impl Encode for MountResp {
    fn encoded_size(&self) -> usize {
        Inode::SIZE + 4 + 2 + 2 * self.supported.len()
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        self.root.write_to(w)?;
        w.put_u32(self.max_message_size)?;
        let count: u16 = self
            .supported
            .len()
            .try_into()
            .map_err(|_| WireError::OutOfRange)?;
        w.put_u16(count)?;
        for tag in &self.supported {
            w.put_u16(*tag as u32 as u16)?;
        }
        Ok(())
    }
}

impl<'a> Decode<'a> for MountResp {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let root = Inode::read_from(&mut r)?;
        let max_message_size = r.read_u32()?;
        let count = r.read_u16()? as usize;
        let mut supported = Vec::with_capacity(count);
        for _ in 0..count {
            supported.push(MsgTag::from_u32(r.read_u16()? as u32)?);
        }
        r.finish()?;
        Ok(Self {
            root,
            max_message_size,
            supported,
        })
    }
}

/// Channel response: location of the new shared data region. Two FDs (data
/// region, FD-donation socket) ride along out-of-band.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChannelResp {
    pub data_offset: u64,
    pub data_length: u64,
}

impl Encode for ChannelResp {
    fn encoded_size(&self) -> usize {
        16
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.data_offset)?;
        w.put_u64(self.data_length)
    }
}

impl<'a> Decode<'a> for ChannelResp {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let data_offset = r.read_u64()?;
        let data_length = r.read_u64()?;
        r.finish()?;
        Ok(Self {
            data_offset,
            data_length,
        })
    }
}

/// FStat request. The descriptor may name a control or an open handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatReq {
    pub fd: FdId,
}

impl<'a> Decode<'a> for StatReq {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let fd = FdId(r.read_u64()?);
        r.finish()?;
        Ok(Self { fd })
    }
}

impl Encode for StatReq {
    fn encoded_size(&self) -> usize {
        8
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)
    }
}

impl Encode for Inode {
    fn encoded_size(&self) -> usize {
        Inode::SIZE
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        self.write_to(w)
    }
}

impl<'a> Decode<'a> for Inode {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let inode = Inode::read_from(&mut r)?;
        r.finish()?;
        Ok(inode)
    }
}

impl Encode for Dirent64 {
    fn encoded_size(&self) -> usize {
        self.wire_size()
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        self.write_to(w)
    }
}

impl Encode for Statx {
    fn encoded_size(&self) -> usize {
        Statx::SIZE
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        self.write_to(w)
    }
}

impl<'a> Decode<'a> for Statx {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let stat = Statx::read_from(&mut r)?;
        r.finish()?;
        Ok(stat)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetStatReq {
    pub fd: FdId,
    pub mask: u32,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: TimeSpec,
    pub mtime: TimeSpec,
}

impl<'a> Decode<'a> for SetStatReq {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            fd: FdId(r.read_u64()?),
            mask: r.read_u32()?,
            mode: r.read_u32()?,
            uid: r.read_u32()?,
            gid: r.read_u32()?,
            size: r.read_u64()?,
            atime: TimeSpec::decode(&mut r)?,
            mtime: TimeSpec::decode(&mut r)?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for SetStatReq {
    fn encoded_size(&self) -> usize {
        8 + 4 * 4 + 8 + 16 * 2
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)?;
        w.put_u32(self.mask)?;
        w.put_u32(self.mode)?;
        w.put_u32(self.uid)?;
        w.put_u32(self.gid)?;
        w.put_u64(self.size)?;
        self.atime.encode(w)?;
        self.mtime.encode(w)
    }
}

/// SetStat outcome: mask of the fields that could not be applied plus the
/// errno of the first failing field in mask order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SetStatResp {
    pub failure_mask: u32,
    pub failure_errno: u32,
}

impl Encode for SetStatResp {
    fn encoded_size(&self) -> usize {
        8
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u32(self.failure_mask)?;
        w.put_u32(self.failure_errno)
    }
}

impl<'a> Decode<'a> for SetStatResp {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let resp = Self {
            failure_mask: r.read_u32()?,
            failure_errno: r.read_u32()?,
        };
        r.finish()?;
        Ok(resp)
    }
}

/// Walk / WalkStat request: a directory descriptor plus path components.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkReq<'a> {
    pub dir_fd: FdId,
    pub path: Vec<&'a str>,
}

impl<'a> Decode<'a> for WalkReq<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let dir_fd = FdId(r.read_u64()?);
        let count = r.read_u32()? as usize;
        let mut path = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            path.push(r.read_str()?);
        }
        r.finish()?;
        Ok(Self { dir_fd, path })
    }
}

impl Encode for WalkReq<'_> {
    fn encoded_size(&self) -> usize {
        8 + 4 + self.path.iter().map(|c| sized_len(c.len())).sum::<usize>()
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.dir_fd.0)?;
        let count: u32 = self.path.len().try_into().map_err(|_| WireError::OutOfRange)?;
        w.put_u32(count)?;
        for component in &self.path {
            w.put_str(component)?;
        }
        Ok(())
    }
}

/// How far a Walk got before stopping.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WalkStatus {
    /// Every component was walked.
    Success = 0,
    /// A component did not exist; the walk stopped before it.
    ComponentDoesNotExist = 1,
    /// A non-terminal component was a symlink; the walk stopped at it.
    ComponentSymlink = 2,
}

impl WalkStatus {
    pub fn from_u8(raw: u8) -> WireResult<Self> {
        match raw {
            0 => Ok(WalkStatus::Success),
            1 => Ok(WalkStatus::ComponentDoesNotExist),
            2 => Ok(WalkStatus::ComponentSymlink),
            _ => Err(WireError::OutOfRange),
        }
    }
}

/// Walk response as seen by a client. The server encodes this shape
/// incrementally, inode by inode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkResp {
    pub status: WalkStatus,
    pub inodes: Vec<Inode>,
}

impl Encode for WalkResp {
    fn encoded_size(&self) -> usize {
        1 + 4 + self.inodes.len() * Inode::SIZE
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u8(self.status as u8)?;
        let count: u32 = self.inodes.len().try_into().map_err(|_| WireError::OutOfRange)?;
        w.put_u32(count)?;
        for inode in &self.inodes {
            inode.write_to(w)?;
        }
        Ok(())
    }
}

impl<'a> Decode<'a> for WalkResp {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let status = WalkStatus::from_u8(r.read_u8()?)?;
        let count = r.read_u32()? as usize;
        let mut inodes = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            inodes.push(Inode::read_from(&mut r)?);
        }
        r.finish()?;
        Ok(Self { status, inodes })
    }
}

/// WalkStat response shape; also encoded incrementally by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalkStatResp {
    pub stats: Vec<Statx>,
}

impl Encode for WalkStatResp {
    fn encoded_size(&self) -> usize {
        4 + self.stats.len() * Statx::SIZE
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        let count: u32 = self.stats.len().try_into().map_err(|_| WireError::OutOfRange)?;
        w.put_u32(count)?;
        for stat in &self.stats {
            stat.write_to(w)?;
        }
        Ok(())
    }
}

impl<'a> Decode<'a> for WalkStatResp {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let count = r.read_u32()? as usize;
        let mut stats = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            stats.push(Statx::read_from(&mut r)?);
        }
        r.finish()?;
        Ok(Self { stats })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenAtReq {
    pub fd: FdId,
    pub flags: u32,
}

impl<'a> Decode<'a> for OpenAtReq {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let fd = FdId(r.read_u64()?);
        let flags = r.read_u32()?;
        r.finish()?;
        Ok(Self { fd, flags })
    }
}

impl Encode for OpenAtReq {
    fn encoded_size(&self) -> usize {
        12
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)?;
        w.put_u32(self.flags)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenAtResp {
    pub open_fd: FdId,
}

impl Encode for OpenAtResp {
    fn encoded_size(&self) -> usize {
        8
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.open_fd.0)
    }
}

impl<'a> Decode<'a> for OpenAtResp {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let open_fd = FdId(r.read_u64()?);
        r.finish()?;
        Ok(Self { open_fd })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenCreateAtReq<'a> {
    pub dir_fd: FdId,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub flags: u32,
    pub name: &'a str,
}

impl<'a> Decode<'a> for OpenCreateAtReq<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            dir_fd: FdId(r.read_u64()?),
            mode: r.read_u32()?,
            uid: r.read_u32()?,
            gid: r.read_u32()?,
            flags: r.read_u32()?,
            name: r.read_str()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for OpenCreateAtReq<'_> {
    fn encoded_size(&self) -> usize {
        8 + 16 + sized_len(self.name.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.dir_fd.0)?;
        w.put_u32(self.mode)?;
        w.put_u32(self.uid)?;
        w.put_u32(self.gid)?;
        w.put_u32(self.flags)?;
        w.put_str(self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpenCreateAtResp {
    pub child: Inode,
    pub open_fd: FdId,
}

impl Encode for OpenCreateAtResp {
    fn encoded_size(&self) -> usize {
        Inode::SIZE + 8
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        self.child.write_to(w)?;
        w.put_u64(self.open_fd.0)
    }
}

impl<'a> Decode<'a> for OpenCreateAtResp {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let child = Inode::read_from(&mut r)?;
        let open_fd = FdId(r.read_u64()?);
        r.finish()?;
        Ok(Self { child, open_fd })
    }
}

/// Close / FSync request: a batch of descriptors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FdBatchReq {
    pub fds: Vec<FdId>,
}

impl<'a> Decode<'a> for FdBatchReq {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let count = r.read_u32()? as usize;
        let mut fds = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            fds.push(FdId(r.read_u64()?));
        }
        r.finish()?;
        Ok(Self { fds })
    }
}

impl Encode for FdBatchReq {
    fn encoded_size(&self) -> usize {
        4 + 8 * self.fds.len()
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        let count: u32 = self.fds.len().try_into().map_err(|_| WireError::OutOfRange)?;
        w.put_u32(count)?;
        for fd in &self.fds {
            w.put_u64(fd.0)?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PWriteReq<'a> {
    pub fd: FdId,
    pub offset: u64,
    /// Aliases the transport payload; valid only inside the handler.
    pub buf: &'a [u8],
}

impl<'a> Decode<'a> for PWriteReq<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            fd: FdId(r.read_u64()?),
            offset: r.read_u64()?,
            buf: r.read_bytes()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for PWriteReq<'_> {
    fn encoded_size(&self) -> usize {
        16 + sized_len(self.buf.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)?;
        w.put_u64(self.offset)?;
        w.put_bytes(self.buf)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PWriteResp {
    pub count: u64,
}

impl Encode for PWriteResp {
    fn encoded_size(&self) -> usize {
        8
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.count)
    }
}

impl<'a> Decode<'a> for PWriteResp {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let count = r.read_u64()?;
        r.finish()?;
        Ok(Self { count })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PReadReq {
    pub fd: FdId,
    pub offset: u64,
    pub count: u32,
}

impl<'a> Decode<'a> for PReadReq {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            fd: FdId(r.read_u64()?),
            offset: r.read_u64()?,
            count: r.read_u32()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for PReadReq {
    fn encoded_size(&self) -> usize {
        20
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)?;
        w.put_u64(self.offset)?;
        w.put_u32(self.count)
    }
}

/// PRead response as seen by a client; the server writes the data in place
/// and fills the length prefix last.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PReadResp<'a> {
    pub buf: &'a [u8],
}

impl<'a> Decode<'a> for PReadResp<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let data = r.read_bytes()?;
        r.finish()?;
        Ok(Self { buf: data })
    }
}

impl Encode for PReadResp<'_> {
    fn encoded_size(&self) -> usize {
        sized_len(self.buf.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_bytes(self.buf)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MkdirAtReq<'a> {
    pub dir_fd: FdId,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub name: &'a str,
}

impl<'a> Decode<'a> for MkdirAtReq<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            dir_fd: FdId(r.read_u64()?),
            mode: r.read_u32()?,
            uid: r.read_u32()?,
            gid: r.read_u32()?,
            name: r.read_str()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for MkdirAtReq<'_> {
    fn encoded_size(&self) -> usize {
        8 + 12 + sized_len(self.name.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.dir_fd.0)?;
        w.put_u32(self.mode)?;
        w.put_u32(self.uid)?;
        w.put_u32(self.gid)?;
        w.put_str(self.name)
    }
}

/// Response carrying a single child inode (MkdirAt, MknodAt, SymlinkAt,
/// LinkAt).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChildInodeResp {
    pub child: Inode,
}

impl Encode for ChildInodeResp {
    fn encoded_size(&self) -> usize {
        Inode::SIZE
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        self.child.write_to(w)
    }
}

impl<'a> Decode<'a> for ChildInodeResp {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let child = Inode::read_from(&mut r)?;
        r.finish()?;
        Ok(Self { child })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MknodAtReq<'a> {
    pub dir_fd: FdId,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub minor: u32,
    pub major: u32,
    pub name: &'a str,
}

impl<'a> Decode<'a> for MknodAtReq<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            dir_fd: FdId(r.read_u64()?),
            mode: r.read_u32()?,
            uid: r.read_u32()?,
            gid: r.read_u32()?,
            minor: r.read_u32()?,
            major: r.read_u32()?,
            name: r.read_str()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for MknodAtReq<'_> {
    fn encoded_size(&self) -> usize {
        8 + 20 + sized_len(self.name.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.dir_fd.0)?;
        w.put_u32(self.mode)?;
        w.put_u32(self.uid)?;
        w.put_u32(self.gid)?;
        w.put_u32(self.minor)?;
        w.put_u32(self.major)?;
        w.put_str(self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SymlinkAtReq<'a> {
    pub dir_fd: FdId,
    pub uid: u32,
    pub gid: u32,
    pub name: &'a str,
    pub target: &'a str,
}

impl<'a> Decode<'a> for SymlinkAtReq<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            dir_fd: FdId(r.read_u64()?),
            uid: r.read_u32()?,
            gid: r.read_u32()?,
            name: r.read_str()?,
            target: r.read_str()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for SymlinkAtReq<'_> {
    fn encoded_size(&self) -> usize {
        8 + 8 + sized_len(self.name.len()) + sized_len(self.target.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.dir_fd.0)?;
        w.put_u32(self.uid)?;
        w.put_u32(self.gid)?;
        w.put_str(self.name)?;
        w.put_str(self.target)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinkAtReq<'a> {
    pub dir_fd: FdId,
    pub target: FdId,
    pub name: &'a str,
}

impl<'a> Decode<'a> for LinkAtReq<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            dir_fd: FdId(r.read_u64()?),
            target: FdId(r.read_u64()?),
            name: r.read_str()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for LinkAtReq<'_> {
    fn encoded_size(&self) -> usize {
        16 + sized_len(self.name.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.dir_fd.0)?;
        w.put_u64(self.target.0)?;
        w.put_str(self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FStatFsReq {
    pub fd: FdId,
}

impl<'a> Decode<'a> for FStatFsReq {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let fd = FdId(r.read_u64()?);
        r.finish()?;
        Ok(Self { fd })
    }
}

impl Encode for FStatFsReq {
    fn encoded_size(&self) -> usize {
        8
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)
    }
}

impl Encode for StatFs {
    fn encoded_size(&self) -> usize {
        StatFs::SIZE
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        self.write_to(w)
    }
}

impl<'a> Decode<'a> for StatFs {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let statfs = StatFs::read_from(&mut r)?;
        r.finish()?;
        Ok(statfs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FAllocateReq {
    pub fd: FdId,
    pub mode: u64,
    pub offset: u64,
    pub length: u64,
}

impl<'a> Decode<'a> for FAllocateReq {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            fd: FdId(r.read_u64()?),
            mode: r.read_u64()?,
            offset: r.read_u64()?,
            length: r.read_u64()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for FAllocateReq {
    fn encoded_size(&self) -> usize {
        32
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)?;
        w.put_u64(self.mode)?;
        w.put_u64(self.offset)?;
        w.put_u64(self.length)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadLinkAtReq {
    pub fd: FdId,
}

impl<'a> Decode<'a> for ReadLinkAtReq {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let fd = FdId(r.read_u64()?);
        r.finish()?;
        Ok(Self { fd })
    }
}

impl Encode for ReadLinkAtReq {
    fn encoded_size(&self) -> usize {
        8
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadLinkAtResp<'a> {
    pub target: &'a str,
}

impl Encode for ReadLinkAtResp<'_> {
    fn encoded_size(&self) -> usize {
        sized_len(self.target.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_str(self.target)
    }
}

impl<'a> Decode<'a> for ReadLinkAtResp<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let target = r.read_str()?;
        r.finish()?;
        Ok(Self { target })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlushReq {
    pub fd: FdId,
}

impl<'a> Decode<'a> for FlushReq {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let fd = FdId(r.read_u64()?);
        r.finish()?;
        Ok(Self { fd })
    }
}

impl Encode for FlushReq {
    fn encoded_size(&self) -> usize {
        8
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConnectReq {
    pub fd: FdId,
    pub sock_type: u32,
}

impl<'a> Decode<'a> for ConnectReq {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            fd: FdId(r.read_u64()?),
            sock_type: r.read_u32()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for ConnectReq {
    fn encoded_size(&self) -> usize {
        12
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)?;
        w.put_u32(self.sock_type)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UnlinkAtReq<'a> {
    pub dir_fd: FdId,
    pub flags: u32,
    pub name: &'a str,
}

impl<'a> Decode<'a> for UnlinkAtReq<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            dir_fd: FdId(r.read_u64()?),
            flags: r.read_u32()?,
            name: r.read_str()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for UnlinkAtReq<'_> {
    fn encoded_size(&self) -> usize {
        12 + sized_len(self.name.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.dir_fd.0)?;
        w.put_u32(self.flags)?;
        w.put_str(self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenameAtReq<'a> {
    pub renamed: FdId,
    pub new_dir: FdId,
    pub new_name: &'a str,
}

impl<'a> Decode<'a> for RenameAtReq<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            renamed: FdId(r.read_u64()?),
            new_dir: FdId(r.read_u64()?),
            new_name: r.read_str()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for RenameAtReq<'_> {
    fn encoded_size(&self) -> usize {
        16 + sized_len(self.new_name.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.renamed.0)?;
        w.put_u64(self.new_dir.0)?;
        w.put_str(self.new_name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Getdents64Req {
    pub dir_fd: FdId,
    /// Negative means seek to offset zero before reading `-count` bytes.
    pub count: i32,
}

impl<'a> Decode<'a> for Getdents64Req {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            dir_fd: FdId(r.read_u64()?),
            count: r.read_i32()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for Getdents64Req {
    fn encoded_size(&self) -> usize {
        12
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.dir_fd.0)?;
        w.put_i32(self.count)
    }
}

/// Getdents64 response shape; the server streams dirents into the payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Getdents64Resp {
    pub dirents: Vec<Dirent64>,
}

impl Encode for Getdents64Resp {
    fn encoded_size(&self) -> usize {
        4 + self.dirents.iter().map(Dirent64::wire_size).sum::<usize>()
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        let count: u32 = self.dirents.len().try_into().map_err(|_| WireError::OutOfRange)?;
        w.put_u32(count)?;
        for dirent in &self.dirents {
            dirent.write_to(w)?;
        }
        Ok(())
    }
}

impl<'a> Decode<'a> for Getdents64Resp {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let count = r.read_u32()? as usize;
        let mut dirents = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            dirents.push(Dirent64::read_from(&mut r)?);
        }
        r.finish()?;
        Ok(Self { dirents })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FGetXattrReq<'a> {
    pub fd: FdId,
    pub buf_size: u32,
    pub name: &'a str,
}

impl<'a> Decode<'a> for FGetXattrReq<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            fd: FdId(r.read_u64()?),
            buf_size: r.read_u32()?,
            name: r.read_str()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for FGetXattrReq<'_> {
    fn encoded_size(&self) -> usize {
        12 + sized_len(self.name.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)?;
        w.put_u32(self.buf_size)?;
        w.put_str(self.name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FGetXattrResp<'a> {
    pub value: &'a [u8],
}

impl Encode for FGetXattrResp<'_> {
    fn encoded_size(&self) -> usize {
        sized_len(self.value.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_bytes(self.value)
    }
}

impl<'a> Decode<'a> for FGetXattrResp<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let value = r.read_bytes()?;
        r.finish()?;
        Ok(Self { value })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FSetXattrReq<'a> {
    pub fd: FdId,
    pub flags: u32,
    pub name: &'a str,
    /// Aliases the transport payload.
    pub value: &'a [u8],
}

impl<'a> Decode<'a> for FSetXattrReq<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            fd: FdId(r.read_u64()?),
            flags: r.read_u32()?,
            name: r.read_str()?,
            value: r.read_bytes()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for FSetXattrReq<'_> {
    fn encoded_size(&self) -> usize {
        12 + sized_len(self.name.len()) + sized_len(self.value.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)?;
        w.put_u32(self.flags)?;
        w.put_str(self.name)?;
        w.put_bytes(self.value)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FListXattrReq {
    pub fd: FdId,
    pub size: u64,
}

impl<'a> Decode<'a> for FListXattrReq {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            fd: FdId(r.read_u64()?),
            size: r.read_u64()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for FListXattrReq {
    fn encoded_size(&self) -> usize {
        16
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)?;
        w.put_u64(self.size)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FListXattrResp {
    pub names: Vec<String>,
}

impl Encode for FListXattrResp {
    fn encoded_size(&self) -> usize {
        4 + self.names.iter().map(|n| sized_len(n.len())).sum::<usize>()
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        let count: u32 = self.names.len().try_into().map_err(|_| WireError::OutOfRange)?;
        w.put_u32(count)?;
        for name in &self.names {
            w.put_str(name)?;
        }
        Ok(())
    }
}

impl<'a> Decode<'a> for FListXattrResp {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let count = r.read_u32()? as usize;
        let mut names = Vec::with_capacity(count.min(64));
        for _ in 0..count {
            names.push(r.read_str()?.to_owned());
        }
        r.finish()?;
        Ok(Self { names })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FRemoveXattrReq<'a> {
    pub fd: FdId,
    pub name: &'a str,
}

impl<'a> Decode<'a> for FRemoveXattrReq<'a> {
    fn decode(buf: &'a [u8]) -> WireResult<Self> {
        let mut r = Reader::new(buf);
        let req = Self {
            fd: FdId(r.read_u64()?),
            name: r.read_str()?,
        };
        r.finish()?;
        Ok(req)
    }
}

impl Encode for FRemoveXattrReq<'_> {
    fn encoded_size(&self) -> usize {
        8 + sized_len(self.name.len())
    }

    fn encode(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fd.0)?;
        w.put_str(self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs::StatxTimestamp;

    fn round_trip<'a, T>(msg: &T, buf: &'a mut Vec<u8>) -> T
    where
        T: Encode + Decode<'a> + PartialEq + std::fmt::Debug,
    {
        buf.resize(msg.encoded_size(), 0);
        let written = msg.encode_into(buf).expect("encode");
        assert_eq!(written as usize, msg.encoded_size());
        T::decode(&buf[..written as usize]).expect("decode")
    }

    #[test]
    fn tag_from_u32_covers_table() {
        for tag in MsgTag::ALL {
            assert_eq!(MsgTag::from_u32(tag as u32).unwrap(), tag);
        }
        assert_eq!(
            MsgTag::from_u32(MsgTag::COUNT as u32),
            Err(WireError::UnknownTag(MsgTag::COUNT as u32))
        );
    }

    #[test]
    fn mount_req_round_trip() {
        let mut buf = Vec::new();
        let req = MountReq { mount_path: "/srv" };
        assert_eq!(round_trip(&req, &mut buf), req);
    }

    #[test]
    fn mount_resp_round_trip() {
        let mut buf = Vec::new();
        let resp = MountResp {
            root: Inode {
                control_fd: 1,
                stat: Statx {
                    mode: (libc::S_IFDIR as u16) | 0o755,
                    ino: 1,
                    ..Default::default()
                },
            },
            max_message_size: 1 << 20,
            supported: MsgTag::ALL.to_vec(),
        };
        assert_eq!(round_trip(&resp, &mut buf), resp);
    }

    #[test]
    fn setstat_req_round_trip() {
        let mut buf = Vec::new();
        let req = SetStatReq {
            fd: FdId(3),
            mask: libc::STATX_MODE | libc::STATX_SIZE,
            mode: 0o600,
            size: 512,
            atime: TimeSpec { sec: 10, nsec: 20 },
            ..Default::default()
        };
        assert_eq!(round_trip(&req, &mut buf), req);
    }

    #[test]
    fn walk_req_components_alias_payload() {
        let req = WalkReq {
            dir_fd: FdId(1),
            path: vec!["etc", "hosts"],
        };
        let mut buf = vec![0u8; req.encoded_size()];
        req.encode_into(&mut buf).unwrap();

        let decoded = WalkReq::decode(&buf).unwrap();
        assert_eq!(decoded.path, vec!["etc", "hosts"]);
        let base = buf.as_ptr() as usize;
        for component in &decoded.path {
            let p = component.as_ptr() as usize;
            assert!(p >= base && p < base + buf.len());
        }
    }

    #[test]
    fn walk_resp_round_trip() {
        let mut buf = Vec::new();
        let resp = WalkResp {
            status: WalkStatus::ComponentSymlink,
            inodes: vec![
                Inode {
                    control_fd: 2,
                    stat: Statx {
                        ino: 11,
                        atime: StatxTimestamp { sec: 5, nsec: 6 },
                        ..Default::default()
                    },
                },
                Inode {
                    control_fd: 3,
                    stat: Statx::default(),
                },
            ],
        };
        assert_eq!(round_trip(&resp, &mut buf), resp);
    }

    #[test]
    fn pwrite_buf_aliases_payload() {
        let data = b"zero copy write".as_slice();
        let req = PWriteReq {
            fd: FdId(9),
            offset: 4096,
            buf: data,
        };
        let mut buf = vec![0u8; req.encoded_size()];
        req.encode_into(&mut buf).unwrap();

        let decoded = PWriteReq::decode(&buf).unwrap();
        assert_eq!(decoded.buf, data);
        assert_eq!(decoded.buf.as_ptr(), buf[20..].as_ptr());
    }

    #[test]
    fn fd_batch_round_trip() {
        let mut buf = Vec::new();
        let req = FdBatchReq {
            fds: vec![FdId(1), FdId(2), FdId(3)],
        };
        assert_eq!(round_trip(&req, &mut buf), req);
    }

    #[test]
    fn getdents_resp_round_trip() {
        let mut buf = Vec::new();
        let resp = Getdents64Resp {
            dirents: vec![
                Dirent64 {
                    ino: 1,
                    off: 1,
                    dtype: libc::DT_DIR,
                    name: ".".to_owned(),
                },
                Dirent64 {
                    ino: 8,
                    off: 2,
                    dtype: libc::DT_REG,
                    name: "hosts".to_owned(),
                },
            ],
        };
        assert_eq!(round_trip(&resp, &mut buf), resp);
    }

    #[test]
    fn short_payload_fails_decode() {
        let req = OpenAtReq {
            fd: FdId(1),
            flags: libc::O_RDONLY as u32,
        };
        let mut buf = vec![0u8; req.encoded_size()];
        req.encode_into(&mut buf).unwrap();
        assert_eq!(
            OpenAtReq::decode(&buf[..buf.len() - 1]),
            Err(WireError::Truncated)
        );
    }

    #[test]
    fn long_payload_fails_decode() {
        let req = FlushReq { fd: FdId(1) };
        let mut buf = vec![0u8; req.encoded_size() + 1];
        req.encode_into(&mut buf).unwrap();
        assert_eq!(FlushReq::decode(&buf), Err(WireError::TrailingBytes));
    }
}
