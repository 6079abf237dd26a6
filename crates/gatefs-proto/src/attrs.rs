// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Attribute structures carried on the wire: statx, statfs and dirents.

use crate::wire::{Reader, WireResult, Writer};

/// Opaque descriptor identifier naming a server-side handle.
///
/// Allocated monotonically per connection; zero is reserved as "none".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FdId(pub u64);

impl FdId {
    pub const NONE: FdId = FdId(0);

    pub fn is_none(&self) -> bool {
        self.0 == 0
    }
}

impl std::fmt::Display for FdId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp as carried inside [`Statx`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatxTimestamp {
    pub sec: i64,
    pub nsec: u32,
}

impl StatxTimestamp {
    pub fn write_to(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_i64(self.sec)?;
        w.put_u32(self.nsec)?;
        w.put_u32(0) // reserved
    }

    pub fn read_from(r: &mut Reader<'_>) -> WireResult<Self> {
        let sec = r.read_i64()?;
        let nsec = r.read_u32()?;
        let _ = r.read_u32()?;
        Ok(Self { sec, nsec })
    }
}

/// Linux extended stat structure, used verbatim on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Statx {
    pub mask: u32,
    pub blksize: u32,
    pub attributes: u64,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub mode: u16,
    pub ino: u64,
    pub size: u64,
    pub blocks: u64,
    pub attributes_mask: u64,
    pub atime: StatxTimestamp,
    pub btime: StatxTimestamp,
    pub ctime: StatxTimestamp,
    pub mtime: StatxTimestamp,
    pub rdev_major: u32,
    pub rdev_minor: u32,
    pub dev_major: u32,
    pub dev_minor: u32,
}

impl Statx {
    /// Fixed wire size.
    pub const SIZE: usize = 144;

    /// File type bits of `mode`.
    pub fn file_type(&self) -> u16 {
        self.mode & (libc::S_IFMT as u16)
    }

    pub fn write_to(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u32(self.mask)?;
        w.put_u32(self.blksize)?;
        w.put_u64(self.attributes)?;
        w.put_u32(self.nlink)?;
        w.put_u32(self.uid)?;
        w.put_u32(self.gid)?;
        w.put_u16(self.mode)?;
        w.put_u16(0)?; // padding
        w.put_u64(self.ino)?;
        w.put_u64(self.size)?;
        w.put_u64(self.blocks)?;
        w.put_u64(self.attributes_mask)?;
        self.atime.write_to(w)?;
        self.btime.write_to(w)?;
        self.ctime.write_to(w)?;
        self.mtime.write_to(w)?;
        w.put_u32(self.rdev_major)?;
        w.put_u32(self.rdev_minor)?;
        w.put_u32(self.dev_major)?;
        w.put_u32(self.dev_minor)
    }

    pub fn read_from(r: &mut Reader<'_>) -> WireResult<Self> {
        let mask = r.read_u32()?;
        let blksize = r.read_u32()?;
        let attributes = r.read_u64()?;
        let nlink = r.read_u32()?;
        let uid = r.read_u32()?;
        let gid = r.read_u32()?;
        let mode = r.read_u16()?;
        let _ = r.read_u16()?;
        let ino = r.read_u64()?;
        let size = r.read_u64()?;
        let blocks = r.read_u64()?;
        let attributes_mask = r.read_u64()?;
        let atime = StatxTimestamp::read_from(r)?;
        let btime = StatxTimestamp::read_from(r)?;
        let ctime = StatxTimestamp::read_from(r)?;
        let mtime = StatxTimestamp::read_from(r)?;
        let rdev_major = r.read_u32()?;
        let rdev_minor = r.read_u32()?;
        let dev_major = r.read_u32()?;
        let dev_minor = r.read_u32()?;
        Ok(Self {
            mask,
            blksize,
            attributes,
            nlink,
            uid,
            gid,
            mode,
            ino,
            size,
            blocks,
            attributes_mask,
            atime,
            btime,
            ctime,
            mtime,
            rdev_major,
            rdev_minor,
            dev_major,
            dev_minor,
        })
    }
}

/// Inode returned by walk and create operations: a control descriptor plus
/// its statx metadata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Inode {
    pub control_fd: u64,
    pub stat: Statx,
}

impl Inode {
    pub const SIZE: usize = 8 + Statx::SIZE;

    pub fn write_to(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.control_fd)?;
        self.stat.write_to(w)
    }

    pub fn read_from(r: &mut Reader<'_>) -> WireResult<Self> {
        let control_fd = r.read_u64()?;
        let stat = Statx::read_from(r)?;
        Ok(Self { control_fd, stat })
    }
}

/// Filesystem statistics, as returned by FStatFS.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatFs {
    pub fs_type: u64,
    pub block_size: u64,
    pub blocks: u64,
    pub blocks_free: u64,
    pub blocks_available: u64,
    pub files: u64,
    pub files_free: u64,
    pub name_length: u64,
}

impl StatFs {
    pub const SIZE: usize = 64;

    pub fn write_to(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.fs_type)?;
        w.put_u64(self.block_size)?;
        w.put_u64(self.blocks)?;
        w.put_u64(self.blocks_free)?;
        w.put_u64(self.blocks_available)?;
        w.put_u64(self.files)?;
        w.put_u64(self.files_free)?;
        w.put_u64(self.name_length)
    }

    pub fn read_from(r: &mut Reader<'_>) -> WireResult<Self> {
        Ok(Self {
            fs_type: r.read_u64()?,
            block_size: r.read_u64()?,
            blocks: r.read_u64()?,
            blocks_free: r.read_u64()?,
            blocks_available: r.read_u64()?,
            files: r.read_u64()?,
            files_free: r.read_u64()?,
            name_length: r.read_u64()?,
        })
    }
}

/// Directory entry as streamed by Getdents64.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dirent64 {
    pub ino: u64,
    pub off: i64,
    pub dtype: u8,
    pub name: String,
}

impl Dirent64 {
    /// Wire size of this entry.
    pub fn wire_size(&self) -> usize {
        8 + 8 + 1 + crate::wire::sized_len(self.name.len())
    }

    pub fn write_to(&self, w: &mut Writer<'_>) -> WireResult<()> {
        w.put_u64(self.ino)?;
        w.put_i64(self.off)?;
        w.put_u8(self.dtype)?;
        w.put_str(&self.name)
    }

    pub fn read_from(r: &mut Reader<'_>) -> WireResult<Self> {
        let ino = r.read_u64()?;
        let off = r.read_i64()?;
        let dtype = r.read_u8()?;
        let name = r.read_str()?.to_owned();
        Ok(Self {
            ino,
            off,
            dtype,
            name,
        })
    }
}
