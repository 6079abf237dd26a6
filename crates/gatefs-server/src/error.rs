// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Error types for the GateFS server core.

use std::io;

use gatefs_proto::{ValidationError, WireError};

/// Core filesystem error type. Every variant corresponds to a Linux errno,
/// which is what travels back to the client in the error envelope.
#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("not found")]
    NotFound,
    #[error("already exists")]
    AlreadyExists,
    #[error("access denied")]
    AccessDenied,
    #[error("operation not permitted")]
    NotPermitted,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("name not allowed")]
    InvalidName,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("not a symlink")]
    NotASymlink,
    #[error("not a socket")]
    NotASocket,
    #[error("busy")]
    Busy,
    #[error("read-only filesystem")]
    ReadOnly,
    #[error("bad file descriptor")]
    BadFileDescriptor,
    #[error("result does not fit")]
    OutOfRange,
    #[error("unsupported")]
    Unsupported,
    #[error("malformed message: {0}")]
    Protocol(#[from] WireError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// Backend errno passed through verbatim.
    #[error("errno {0}")]
    Os(i32),
}

impl FsError {
    /// The Linux errno reported to the client.
    pub fn errno(&self) -> i32 {
        match self {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::AccessDenied => libc::EACCES,
            FsError::NotPermitted => libc::EPERM,
            FsError::InvalidArgument => libc::EINVAL,
            FsError::InvalidName => libc::EINVAL,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::NotASymlink => libc::EINVAL,
            FsError::NotASocket => libc::ENOTSOCK,
            FsError::Busy => libc::EBUSY,
            FsError::ReadOnly => libc::EROFS,
            FsError::BadFileDescriptor => libc::EBADF,
            FsError::OutOfRange => libc::ERANGE,
            FsError::Unsupported => libc::EOPNOTSUPP,
            FsError::Protocol(_) => libc::EIO,
            FsError::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            FsError::Os(errno) => *errno,
        }
    }

    /// Reconstructs an error from a wire errno.
    pub fn from_errno(errno: i32) -> FsError {
        match errno {
            libc::ENOENT => FsError::NotFound,
            libc::EEXIST => FsError::AlreadyExists,
            libc::EACCES => FsError::AccessDenied,
            libc::EPERM => FsError::NotPermitted,
            libc::EINVAL => FsError::InvalidArgument,
            libc::ENOTDIR => FsError::NotADirectory,
            libc::EISDIR => FsError::IsADirectory,
            libc::ENOTSOCK => FsError::NotASocket,
            libc::EBUSY => FsError::Busy,
            libc::EROFS => FsError::ReadOnly,
            libc::EBADF => FsError::BadFileDescriptor,
            libc::ERANGE => FsError::OutOfRange,
            libc::EOPNOTSUPP => FsError::Unsupported,
            other => FsError::Os(other),
        }
    }
}

impl From<ValidationError> for FsError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::UnsafeName => FsError::InvalidName,
            ValidationError::RelativeMountPath => FsError::InvalidArgument,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_round_trip() {
        for err in [
            FsError::NotFound,
            FsError::Busy,
            FsError::ReadOnly,
            FsError::BadFileDescriptor,
            FsError::NotASocket,
            FsError::OutOfRange,
        ] {
            let errno = err.errno();
            assert_eq!(FsError::from_errno(errno).errno(), errno);
        }
    }

    #[test]
    fn protocol_errors_surface_as_eio() {
        let err = FsError::from(WireError::Truncated);
        assert_eq!(err.errno(), libc::EIO);
    }

    #[test]
    fn unsafe_names_surface_as_einval() {
        let err = FsError::from(ValidationError::UnsafeName);
        assert_eq!(err.errno(), libc::EINVAL);
    }
}
