// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! composer_utils: Error types shared by the composition pipeline.

use gralloc::GrallocError;
use remain::sorted;
use thiserror::Error;

/// Failure reported by a display device or composition strategy.
#[sorted]
#[derive(Error, Debug, Copy, Clone, PartialEq, Eq)]
pub enum DisplayError {
    #[error("operation not supported by the display")]
    NotSupported,
    #[error("layer stack must be validated again")]
    NotValidated,
    #[error("invalid parameters")]
    Parameters,
    /// A higher priority transition, such as a secure session switch, is in progress.
    #[error("permission denied")]
    Permission,
    #[error("out of display resources")]
    Resources,
    #[error("display is shutting down")]
    ShutDown,
    #[error("display operation timed out")]
    Timeout,
    #[error("undefined display error")]
    Undefined,
}

/// An error generated by the composition pipeline.
#[sorted]
#[derive(Error, Debug)]
pub enum ComposerError {
    /// The display configuration index is not valid.
    #[error("bad display config")]
    BadConfig,
    /// The display rejected the request.
    #[error("bad display")]
    BadDisplay,
    /// The layer id is not known to this display.
    #[error("bad layer")]
    BadLayer,
    /// An argument was missing or out of range.
    #[error("bad parameter: {0}")]
    BadParameter(&'static str),
    /// A buffer operation failed.
    #[error("buffer error: {0}")]
    Gralloc(GrallocError),
    /// Intermediate buffers or hardware resources could not be obtained.
    #[error("no resources")]
    NoResources,
    /// Present was called without a valid preceding validate.
    #[error("display not validated")]
    NotValidated,
    /// The request is valid but not supported.
    #[error("unsupported")]
    Unsupported,
}

impl From<GrallocError> for ComposerError {
    fn from(e: GrallocError) -> ComposerError {
        match e {
            GrallocError::NoResources => ComposerError::NoResources,
            e => ComposerError::Gralloc(e),
        }
    }
}

/// The result of an operation in this crate.
pub type ComposerResult<T> = std::result::Result<T, ComposerError>;
