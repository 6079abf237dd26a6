// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! GateFS wire protocol.
//!
//! Fixed-layout, little-endian message structures exchanged between a
//! sandboxed client and the GateFS server, plus the in-place codec they are
//! marshalled with. Request structures borrow string and buffer fields
//! directly from the transport payload; response bodies are written back
//! into the same payload slice.

pub mod attrs;
pub mod msg;
pub mod validation;
pub mod wire;

pub use attrs::{Dirent64, FdId, Inode, StatFs, Statx, StatxTimestamp};
pub use msg::{
    ChannelResp,
    ChildInodeResp,
    ConnectReq,
    Decode,
    Encode,
    ErrorResp,
    FAllocateReq,
    FdBatchReq,
    FGetXattrReq,
    FGetXattrResp,
    FListXattrReq,
    FListXattrResp,
    FlushReq,
    FRemoveXattrReq,
    FSetXattrReq,
    FStatFsReq,
    Getdents64Req,
    Getdents64Resp,
    LinkAtReq,
    MkdirAtReq,
    MknodAtReq,
    MountReq,
    MountResp,
    MsgTag,
    OpenAtReq,
    OpenAtResp,
    OpenCreateAtReq,
    OpenCreateAtResp,
    PReadReq,
    PReadResp,
    PWriteReq,
    PWriteResp,
    ReadLinkAtReq,
    ReadLinkAtResp,
    RenameAtReq,
    SetStatReq,
    SetStatResp,
    StatReq,
    TimeSpec,
    UnlinkAtReq,
    WalkReq,
    WalkResp,
    WalkStatResp,
    WalkStatus,
};
pub use validation::{check_safe_name, clean_mount_path, ValidationError};
pub use wire::{Reader, WireError, WireResult, Writer};
