// Copyright 2017 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::convert::TryInto;
use std::ffi::CStr;

use libc::off_t;
use nix::sys::memfd::memfd_create;
use nix::sys::memfd::MemFdCreateFlag;
use nix::unistd::ftruncate;
use nix::unistd::sysconf;
use nix::unistd::SysconfVar;
use vmm_sys_util::align_upwards;

use crate::gralloc_os::descriptor::AsRawDescriptor;
use crate::gralloc_os::descriptor::FromRawDescriptor;
use crate::gralloc_os::descriptor::IntoRawDescriptor;
use crate::gralloc_os::descriptor::SafeDescriptor;
use crate::gralloc_os::RawDescriptor;
use crate::gralloc_utils::GrallocError;
use crate::gralloc_utils::GrallocResult;

/// A sealable, anonymous shared memory file.
pub struct SharedMemory {
    descriptor: SafeDescriptor,
    size: u64,
}

impl SharedMemory {
    /// Creates a new shared memory file descriptor of `size` bytes, zero filled.
    ///
    /// The name appears in `/proc/self/fd/<shm fd>` for debugging and does not need to be unique.
    pub fn new(debug_name: &CStr, size: u64) -> GrallocResult<SharedMemory> {
        let fd = memfd_create(
            debug_name,
            MemFdCreateFlag::MFD_CLOEXEC | MemFdCreateFlag::MFD_ALLOW_SEALING,
        )?;
        // Safe because memfd_create returned a fresh descriptor.
        let descriptor = unsafe { SafeDescriptor::from_raw_descriptor(fd) };

        let size_off_t: off_t = size.try_into()?;
        ftruncate(descriptor.as_raw_descriptor(), size_off_t)?;

        Ok(SharedMemory { descriptor, size })
    }

    /// Gets the size in bytes requested at creation.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl AsRawDescriptor for SharedMemory {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.descriptor.as_raw_descriptor()
    }
}

impl IntoRawDescriptor for SharedMemory {
    fn into_raw_descriptor(self) -> RawDescriptor {
        self.descriptor.into_raw_descriptor()
    }
}

impl From<SharedMemory> for SafeDescriptor {
    fn from(shm: SharedMemory) -> SafeDescriptor {
        shm.descriptor
    }
}

/// Returns the system page size in bytes.
pub fn page_size() -> GrallocResult<u64> {
    match sysconf(SysconfVar::PAGE_SIZE)? {
        Some(page_size) => Ok(page_size as u64),
        None => Err(GrallocError::Unsupported),
    }
}

/// Uses the system's page size in bytes to round the given value up to the nearest page boundary.
pub fn round_up_to_page_size(v: u64) -> GrallocResult<u64> {
    let page_size = page_size()?;
    Ok(align_upwards!(v, page_size))
}
