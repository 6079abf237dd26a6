// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Validation of names and mount paths arriving on the wire.

use thiserror::Error;

/// Validation error. Maps to EINVAL at the handler boundary.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("unsafe path component")]
    UnsafeName,
    #[error("mount path must be absolute")]
    RelativeMountPath,
}

/// Checks that `name` is a safe single path component: non-empty, free of
/// `/`, and neither `.` nor `..`. Anything else — `"..."`, dotfiles,
/// unicode — is accepted.
pub fn check_safe_name(name: &str) -> Result<(), ValidationError> {
    if !name.is_empty() && !name.contains('/') && name != "." && name != ".." {
        Ok(())
    } else {
        Err(ValidationError::UnsafeName)
    }
}

/// Lexically cleans a mount path and verifies it is absolute.
///
/// Collapses duplicate slashes, drops `.` components and resolves `..`
/// against the components seen so far (never above the root).
pub fn clean_mount_path(path: &str) -> Result<String, ValidationError> {
    if !path.starts_with('/') {
        return Err(ValidationError::RelativeMountPath);
    }
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return Ok("/".to_owned());
    }
    let mut cleaned = String::with_capacity(path.len());
    for part in parts {
        cleaned.push('/');
        cleaned.push_str(part);
    }
    Ok(cleaned)
}
