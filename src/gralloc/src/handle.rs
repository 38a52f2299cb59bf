// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! handle: The native buffer handle passed between processes.

use std::fmt;
use std::process;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use bitflags::bitflags;

use crate::formats::BufferType;
use crate::formats::PixelFormat;
use crate::gralloc_os::AsRawDescriptor;
use crate::gralloc_os::SafeDescriptor;
use crate::gralloc_utils::GrallocError;
use crate::gralloc_utils::GrallocResult;
use crate::usage::Usage;

/// Every valid handle starts with these bytes.
pub const HANDLE_MAGIC: u32 = u32::from_be_bytes(*b"gmsm");

bitflags! {
    /// Allocation properties recorded in a handle.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct PrivateFlags: u32 {
        const USES_ION = 0x0000_0008;
        const NEEDS_FLUSH = 0x0000_0020;
        const INTERNAL_ONLY = 0x0000_0040;
        const NON_CPU_WRITER = 0x0000_0080;
        const CACHED = 0x0000_0200;
        const SECURE_BUFFER = 0x0000_0400;
        const EXTERNAL_ONLY = 0x0000_2000;
        const VIDEO_ENCODER = 0x0001_0000;
        const CAMERA_WRITE = 0x0002_0000;
        const CAMERA_READ = 0x0004_0000;
        const HW_COMPOSER = 0x0008_0000;
        const HW_TEXTURE = 0x0010_0000;
        const CPU_RENDERED = 0x0020_0000;
        const SECURE_DISPLAY = 0x0100_0000;
        const TILE_RENDERED = 0x0200_0000;
        const CPU_RENDERED_DISPLAY = 0x0400_0000;
        const UBWC_ALIGNED = 0x0800_0000;
        const DISP_CONSUMER = 0x1000_0000;
        const CLIENT_ALLOCATED = 0x2000_0000;
    }
}

/// Identity of a buffer. Handles derived by sharing get their own id; imports keep the id of the
/// allocation they describe.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub u64);

static NEXT_BUFFER_ID: AtomicU64 = AtomicU64::new(1);

impl BufferId {
    /// Returns an id unique across processes: the pid fills the upper half.
    pub fn next() -> BufferId {
        let counter = NEXT_BUFFER_ID.fetch_add(1, Ordering::Relaxed);
        BufferId((u64::from(process::id()) << 32) | (counter & 0xffff_ffff))
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0 & 0xffff_ffff)
    }
}

/// Everything needed to describe a buffer apart from its descriptors.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HandleInfo {
    pub flags: PrivateFlags,
    pub width: u32,
    pub height: u32,
    pub unaligned_width: u32,
    pub unaligned_height: u32,
    pub format: PixelFormat,
    pub buffer_type: BufferType,
    pub size: u32,
    pub offset: u32,
    pub usage: Usage,
    pub layer_count: u32,
    /// Size of the metadata allocation, including any reserved tail.
    pub metadata_size: u64,
}

/// A native buffer handle: the pixel memory, its metadata region, and how both are laid out.
///
/// A handle only carries data that stays meaningful in another process. Mappings and reference
/// counts are tracked per process by the `BufferManager`, keyed by `id`.
pub struct BufferHandle {
    magic: u32,
    pub fd: SafeDescriptor,
    pub fd_metadata: Option<SafeDescriptor>,
    pub id: BufferId,
    pub info: HandleInfo,
}

impl BufferHandle {
    pub fn new(
        fd: SafeDescriptor,
        fd_metadata: Option<SafeDescriptor>,
        id: BufferId,
        info: HandleInfo,
    ) -> BufferHandle {
        BufferHandle {
            magic: HANDLE_MAGIC,
            fd,
            fd_metadata,
            id,
            info,
        }
    }

    /// Checks the structural validity of the handle.
    pub fn validate(&self) -> GrallocResult<()> {
        if self.magic != HANDLE_MAGIC {
            return Err(GrallocError::BadHandle);
        }
        if self.fd.as_raw_descriptor() < 0 {
            return Err(GrallocError::BadHandle);
        }
        if let Some(meta) = &self.fd_metadata {
            if meta.as_raw_descriptor() < 0 {
                return Err(GrallocError::BadHandle);
            }
        }
        Ok(())
    }

    /// Duplicates the descriptors, yielding the handle a receiving process would see.
    pub fn try_clone(&self) -> GrallocResult<BufferHandle> {
        let fd_metadata = match &self.fd_metadata {
            Some(meta) => Some(meta.try_clone()?),
            None => None,
        };
        Ok(BufferHandle {
            magic: self.magic,
            fd: self.fd.try_clone()?,
            fd_metadata,
            id: self.id,
            info: self.info,
        })
    }

    pub fn flags(&self) -> PrivateFlags {
        self.info.flags
    }

    pub fn format(&self) -> PixelFormat {
        self.info.format
    }

    pub fn is_ubwc_aligned(&self) -> bool {
        self.info.flags.contains(PrivateFlags::UBWC_ALIGNED)
    }

    pub fn is_secure(&self) -> bool {
        self.info.flags.contains(PrivateFlags::SECURE_BUFFER)
    }

    #[cfg(test)]
    pub(crate) fn corrupt_magic(&mut self) {
        self.magic = 0;
    }
}

/// Handles are equal when they describe the same buffer, whatever descriptors they hold.
impl PartialEq for BufferHandle {
    fn eq(&self, other: &BufferHandle) -> bool {
        self.id == other.id && self.info == other.info
    }
}

impl fmt::Debug for BufferHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BufferHandle")
            .field("id", &self.id)
            .field("fd", &self.fd.as_raw_descriptor())
            .field(
                "fd_metadata",
                &self.fd_metadata.as_ref().map(|m| m.as_raw_descriptor()),
            )
            .field("info", &self.info)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gralloc_os::SharedMemory;
    use std::ffi::CString;

    fn handle() -> BufferHandle {
        let name = CString::new("handle_test").unwrap();
        let shm = SharedMemory::new(&name, 4096).unwrap();
        BufferHandle::new(
            shm.into(),
            None,
            BufferId::next(),
            HandleInfo {
                flags: PrivateFlags::USES_ION | PrivateFlags::CACHED,
                width: 32,
                height: 32,
                unaligned_width: 30,
                unaligned_height: 30,
                format: PixelFormat::RGBA_8888,
                buffer_type: BufferType::Ui,
                size: 4096,
                offset: 0,
                usage: Usage::default(),
                layer_count: 1,
                metadata_size: 0,
            },
        )
    }

    #[test]
    fn magic_is_checked() {
        let mut h = handle();
        h.validate().unwrap();
        h.corrupt_magic();
        assert!(matches!(h.validate(), Err(GrallocError::BadHandle)));
    }

    #[test]
    fn clone_keeps_identity() {
        let h = handle();
        let c = h.try_clone().unwrap();
        assert_eq!(h.id, c.id);
        assert_ne!(h.fd.as_raw_descriptor(), c.fd.as_raw_descriptor());
        assert_eq!(h.info, c.info);
    }

    #[test]
    fn ids_are_unique() {
        let a = BufferId::next();
        let b = BufferId::next();
        assert_ne!(a, b);
        assert_eq!(a.0 >> 32, u64::from(std::process::id()));
    }
}
