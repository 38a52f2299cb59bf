// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

mod descriptor;
mod fence;
pub mod sys;

pub use descriptor::AsRawDescriptor;
pub use descriptor::FromRawDescriptor;
pub use descriptor::IntoRawDescriptor;
pub use descriptor::SafeDescriptor;
pub use fence::Fence;
pub use fence::FenceSignaler;

pub use sys::platform::descriptor::RawDescriptor;
pub use sys::platform::page_size;
pub use sys::platform::round_up_to_page_size;
pub use sys::platform::MemoryMapping;
pub use sys::platform::SharedMemory;

use crate::gralloc_utils::GrallocResult;

/// A region of memory mapped into this process.
///
/// # Safety
/// Implementors must return a pointer valid for reads and writes of `size()` bytes for as long as
/// the object is alive.
pub unsafe trait MappedRegion: Send + Sync {
    /// Returns a pointer to the beginning of the memory region.
    fn as_ptr(&self) -> *mut u8;

    /// Returns the size of the memory region in bytes.
    fn size(&self) -> usize;

    /// Writes CPU caches back to the backing memory, optionally dropping them afterwards.
    fn sync(&self, _invalidate: bool) -> GrallocResult<()> {
        Ok(())
    }
}
