// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::os::unix::io::FromRawFd;
use std::os::unix::io::IntoRawFd;
use std::os::unix::io::OwnedFd;
use std::os::unix::io::RawFd;

use log::warn;
use nix::unistd::dup;
use nix::unistd::lseek;
use nix::unistd::Whence;

use crate::gralloc_os::descriptor::AsRawDescriptor;
use crate::gralloc_os::descriptor::FromRawDescriptor;
use crate::gralloc_os::descriptor::IntoRawDescriptor;
use crate::gralloc_os::descriptor::SafeDescriptor;
use crate::gralloc_utils::GrallocResult;

pub type RawDescriptor = RawFd;

impl Drop for SafeDescriptor {
    fn drop(&mut self) {
        // Safe because we own the descriptor and nobody else will use it after this point.
        let ret = unsafe { libc::close(self.descriptor) };
        if ret < 0 {
            warn!(
                "failed to close descriptor {}: {}",
                self.descriptor,
                std::io::Error::last_os_error()
            );
        }
    }
}

impl SafeDescriptor {
    /// Duplicates the descriptor. Both copies refer to the same open file description.
    pub fn try_clone(&self) -> GrallocResult<SafeDescriptor> {
        let descriptor = dup(self.descriptor)?;
        // Safe because dup returned a fresh descriptor that nobody else owns.
        Ok(unsafe { SafeDescriptor::from_raw_descriptor(descriptor) })
    }

    /// Returns the current size of the underlying file by seeking to its end.
    pub fn size(&self) -> GrallocResult<u64> {
        let end = lseek(self.descriptor, 0, Whence::SeekEnd)?;
        Ok(u64::try_from(end)?)
    }
}

impl AsRawDescriptor for File {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.as_raw_fd()
    }
}

impl IntoRawDescriptor for File {
    fn into_raw_descriptor(self) -> RawDescriptor {
        self.into_raw_fd()
    }
}

impl AsRawDescriptor for OwnedFd {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.as_raw_fd()
    }
}

impl IntoRawDescriptor for OwnedFd {
    fn into_raw_descriptor(self) -> RawDescriptor {
        self.into_raw_fd()
    }
}

impl From<OwnedFd> for SafeDescriptor {
    fn from(fd: OwnedFd) -> SafeDescriptor {
        // Safe because we take ownership of the OwnedFd.
        unsafe { SafeDescriptor::from_raw_descriptor(fd.into_raw_fd()) }
    }
}

impl From<SafeDescriptor> for OwnedFd {
    fn from(descriptor: SafeDescriptor) -> OwnedFd {
        // Safe because we give up ownership of the SafeDescriptor.
        unsafe { OwnedFd::from_raw_fd(descriptor.into_raw_descriptor()) }
    }
}
