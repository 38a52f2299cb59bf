// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::num::NonZeroUsize;

use libc::c_void;
use log::error;
use nix::sys::mman::mmap;
use nix::sys::mman::msync;
use nix::sys::mman::munmap;
use nix::sys::mman::MapFlags;
use nix::sys::mman::MsFlags;
use nix::sys::mman::ProtFlags;

use crate::gralloc_os::descriptor::AsRawDescriptor;
use crate::gralloc_os::MappedRegion;
use crate::gralloc_utils::GrallocError;
use crate::gralloc_utils::GrallocResult;

/// Wraps a shared mapping of a descriptor in the current process. Provides RAII semantics
/// including munmap when no longer needed.
#[derive(Debug)]
pub struct MemoryMapping {
    addr: *mut c_void,
    size: usize,
}

// Safe because the mapping is owned by this struct and is only unmapped on drop.
unsafe impl Send for MemoryMapping {}
unsafe impl Sync for MemoryMapping {}

impl Drop for MemoryMapping {
    fn drop(&mut self) {
        // This is safe because we mmap the area at addr ourselves, and nobody
        // else is holding a reference to it.
        if let Err(e) = unsafe { munmap(self.addr, self.size) } {
            error!("munmap of {} bytes failed: {}", self.size, e);
        }
    }
}

impl MemoryMapping {
    /// Maps `size` bytes of `descriptor` starting at `offset`, readable and optionally writable.
    pub fn from_descriptor(
        descriptor: &dyn AsRawDescriptor,
        size: usize,
        offset: u64,
        writable: bool,
    ) -> GrallocResult<MemoryMapping> {
        let non_zero_size = NonZeroUsize::new(size).ok_or(GrallocError::BadValue("zero size"))?;
        let prot = if writable {
            ProtFlags::PROT_READ | ProtFlags::PROT_WRITE
        } else {
            ProtFlags::PROT_READ
        };

        let addr = unsafe {
            mmap(
                None,
                non_zero_size,
                prot,
                MapFlags::MAP_SHARED,
                descriptor.as_raw_descriptor(),
                offset.try_into()?,
            )?
        };
        Ok(MemoryMapping { addr, size })
    }

    /// Writes dirty pages back to the backing object and drops stale cached copies.
    pub fn sync(&self, invalidate: bool) -> GrallocResult<()> {
        let mut flags = MsFlags::MS_SYNC;
        if invalidate {
            flags |= MsFlags::MS_INVALIDATE;
        }
        // Safe because the range is exactly the mapping we own.
        unsafe { msync(self.addr, self.size, flags)? };
        Ok(())
    }
}

// Safe because the pointer and size describe a live mapping owned by self.
unsafe impl MappedRegion for MemoryMapping {
    fn as_ptr(&self) -> *mut u8 {
        self.addr as *mut u8
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sync(&self, invalidate: bool) -> GrallocResult<()> {
        MemoryMapping::sync(self, invalidate)
    }
}
