// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Utility file for allocating exportable system memory. On Linux systems,
//! this is done with memfd.

use std::ffi::CStr;

use log::debug;

use crate::allocator::AllocData;
use crate::allocator::CacheOp;
use crate::allocator::PlatformAllocator;
use crate::gralloc_os::AsRawDescriptor;
use crate::gralloc_os::MappedRegion;
use crate::gralloc_os::MemoryMapping;
use crate::gralloc_os::SafeDescriptor;
use crate::gralloc_os::SharedMemory;
use crate::gralloc_utils::GrallocError;
use crate::gralloc_utils::GrallocResult;

const BUFFER_NAME: &[u8] = b"gralloc_buffer\0";

/// A platform allocator capable of allocation from system memory.
pub struct SystemAllocator(());

impl SystemAllocator {
    fn new() -> Self {
        SystemAllocator(())
    }

    /// Returns a new `SystemAllocator` instance.
    pub fn init() -> GrallocResult<Box<dyn PlatformAllocator>> {
        Ok(Box::new(SystemAllocator::new()))
    }
}

impl PlatformAllocator for SystemAllocator {
    fn allocate(&self, data: &AllocData) -> GrallocResult<SafeDescriptor> {
        if data.size == 0 {
            return Err(GrallocError::BadValue("zero sized allocation"));
        }

        let name = CStr::from_bytes_with_nul(BUFFER_NAME)
            .map_err(|_| GrallocError::BadValue("buffer name"))?;
        let shm = SharedMemory::new(name, data.size)?;
        debug!(
            "allocated {} bytes heap {:?} flags {:?} fd {}",
            data.size,
            data.heap.heap_id,
            data.heap.flags,
            shm.as_raw_descriptor()
        );
        Ok(shm.into())
    }

    fn import(&self, descriptor: &SafeDescriptor) -> GrallocResult<SafeDescriptor> {
        descriptor.try_clone()
    }

    fn map(
        &self,
        descriptor: &SafeDescriptor,
        size: u64,
        offset: u64,
    ) -> GrallocResult<Box<dyn MappedRegion>> {
        let mapping =
            MemoryMapping::from_descriptor(descriptor, usize::try_from(size)?, offset, true)?;
        Ok(Box::new(mapping))
    }

    fn free(&self, local: SafeDescriptor) -> GrallocResult<()> {
        debug!("freeing fd {}", local.as_raw_descriptor());
        drop(local);
        Ok(())
    }

    fn cache_op(
        &self,
        _local: &SafeDescriptor,
        region: &dyn MappedRegion,
        op: CacheOp,
    ) -> GrallocResult<()> {
        region.sync(op != CacheOp::Clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::HeapInfo;

    #[test]
    fn allocate_map_write() {
        let allocator = SystemAllocator::init().unwrap();
        let data = AllocData {
            size: 8192,
            align: 4096,
            heap: HeapInfo::default(),
            uncached: false,
        };
        let fd = allocator.allocate(&data).unwrap();
        assert_eq!(fd.size().unwrap(), 8192);

        let local = allocator.import(&fd).unwrap();
        let region = allocator.map(&local, 8192, 0).unwrap();
        // Safe because the mapping is 8192 bytes long and writable.
        unsafe { region.as_ptr().write(0xab) };
        allocator.cache_op(&local, region.as_ref(), CacheOp::Clean).unwrap();
        allocator
            .cache_op(&local, region.as_ref(), CacheOp::Invalidate)
            .unwrap();

        let other = allocator.map(&fd, 8192, 0).unwrap();
        assert_eq!(unsafe { other.as_ptr().read() }, 0xab);

        drop(region);
        allocator.free(local).unwrap();
    }

    #[test]
    fn zero_size_fails() {
        let allocator = SystemAllocator::init().unwrap();
        assert!(allocator.allocate(&AllocData::default()).is_err());
    }
}
