// Copyright 2020 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! gralloc_utils: Error type, result alias and size constants shared by the rest of the crate.

use std::io::Error as IoError;
use std::num::TryFromIntError;

#[cfg(unix)]
use nix::Error as NixError;
use remain::sorted;
use thiserror::Error;

pub const SIZE_4K: u32 = 4096;
/// Tiled chroma planes are padded to this boundary, which has always been 4K in practice.
pub const SIZE_8K: u32 = 4096;
pub const SZ_1M: u32 = 0x0010_0000;
pub const SZ_2M: u32 = 0x0020_0000;
pub const SECURE_ALIGN: u32 = SZ_1M;

/// An error generated while using this crate.
#[sorted]
#[derive(Error, Debug)]
pub enum GrallocError {
    /// The descriptor id is not in the descriptor table.
    #[error("unknown buffer descriptor {0}")]
    BadDescriptor(u64),
    /// The handle is unknown to this process or structurally invalid.
    #[error("unknown or invalid buffer handle")]
    BadHandle,
    /// An argument was outside the accepted range.
    #[error("bad value: {0}")]
    BadValue(&'static str),
    /// Checked Arithmetic error
    #[error("arithmetic failed: {}({}) {op} {}({})", .field1.0, .field1.1, .field2.0, .field2.1)]
    CheckedArithmetic {
        field1: (&'static str, usize),
        field2: (&'static str, usize),
        op: &'static str,
    },
    /// An input/output error occured.
    #[error("an input/output error occur: {0}")]
    IoError(IoError),
    /// Nix crate error.
    #[cfg(unix)]
    #[error("The errno is {0}")]
    NixError(NixError),
    /// The platform allocator could not satisfy the request.
    #[error("out of graphics memory")]
    NoResources,
    /// The metadata field was never set.
    #[error("metadata field not set")]
    NotFound,
    /// A fence did not signal within the allowed time.
    #[error("fence wait timed out")]
    Timeout,
    /// An attempted integer conversion failed.
    #[error("int conversion failed: {0}")]
    TryFromIntError(TryFromIntError),
    /// The request is valid but this combination is not implemented.
    #[error("the requested function is not implemented")]
    Unsupported,
}

#[cfg(unix)]
impl From<NixError> for GrallocError {
    fn from(e: NixError) -> GrallocError {
        GrallocError::NixError(e)
    }
}

impl From<IoError> for GrallocError {
    fn from(e: IoError) -> GrallocError {
        GrallocError::IoError(e)
    }
}

impl From<TryFromIntError> for GrallocError {
    fn from(e: TryFromIntError) -> GrallocError {
        GrallocError::TryFromIntError(e)
    }
}

/// The result of an operation in this crate.
pub type GrallocResult<T> = std::result::Result<T, GrallocError>;
