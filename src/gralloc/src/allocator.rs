// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! allocator: The platform allocator seam and the policy that drives it.
//!
//! `PlatformAllocator` is the kernel-facing primitive (allocate, import, map, free, cache
//! maintenance). `AllocationPolicy` decides heaps, flags and cache policy from usage, resolves
//! implementation-defined formats and detects when several descriptors can share memory.

use bitflags::bitflags;
use log::error;
use log::warn;

use crate::descriptor::BufferDescriptor;
use crate::formats::PixelFormat;
use crate::gralloc_os::MappedRegion;
use crate::gralloc_os::SafeDescriptor;
use crate::gralloc_utils::GrallocError;
use crate::gralloc_utils::GrallocResult;
use crate::handle::PrivateFlags;
use crate::layout::buffer_size_and_dimensions;
use crate::layout::BufferInfo;
use crate::layout::GrallocConfig;
use crate::usage::ConsumerUsage;
use crate::usage::ProducerUsage;
use crate::usage::Usage;

const fn heap(id: u32) -> u32 {
    1 << id
}

bitflags! {
    /// Heaps an allocation may be satisfied from.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HeapMask: u32 {
        const SECURE = heap(9);
        const SECURE_DISPLAY = heap(10);
        const CAMERA = heap(20);
        const ADSP = heap(22);
        const SYSTEM = heap(25);
    }
}

bitflags! {
    /// Allocation flags understood by the heaps.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct HeapFlags: u32 {
        const CACHED = 1;
        const CP_PIXEL = 1 << 19;
        const CP_CAMERA = 1 << 21;
        const CP_SEC_DISPLAY = 1 << 25;
        const CP_CAMERA_PREVIEW = 1 << 27;
        const SECURE = 1 << 31;

        const CP = Self::SECURE.bits() | Self::CP_PIXEL.bits();
        const SD = Self::SECURE.bits() | Self::CP_SEC_DISPLAY.bits();
        const SC = Self::SECURE.bits() | Self::CP_CAMERA.bits();
        const SC_PREVIEW = Self::SECURE.bits() | Self::CP_CAMERA_PREVIEW.bits();
    }
}

/// Cache maintenance requested around CPU access.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CacheOp {
    Clean,
    Invalidate,
    CleanInvalidate,
}

/// Where and how an allocation is placed.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct HeapInfo {
    pub heap_id: HeapMask,
    pub flags: HeapFlags,
    /// Private handle flags implied by the heap choice.
    pub alloc_type: PrivateFlags,
}

/// A request handed to the platform allocator.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct AllocData {
    pub size: u64,
    pub align: u32,
    pub heap: HeapInfo,
    pub uncached: bool,
}

/// The kernel memory allocator.
pub trait PlatformAllocator: Send + Sync {
    /// Allocates `data.size` bytes and returns the exportable descriptor.
    fn allocate(&self, data: &AllocData) -> GrallocResult<SafeDescriptor>;

    /// Returns a process-local handle for a descriptor received from elsewhere.
    fn import(&self, descriptor: &SafeDescriptor) -> GrallocResult<SafeDescriptor>;

    /// Maps `size` bytes of `descriptor` at `offset`. The mapping is removed when dropped.
    fn map(
        &self,
        descriptor: &SafeDescriptor,
        size: u64,
        offset: u64,
    ) -> GrallocResult<Box<dyn MappedRegion>>;

    /// Releases an allocation or an imported handle.
    fn free(&self, local: SafeDescriptor) -> GrallocResult<()>;

    /// Performs cache maintenance on a mapped buffer.
    fn cache_op(
        &self,
        local: &SafeDescriptor,
        region: &dyn MappedRegion,
        op: CacheOp,
    ) -> GrallocResult<()>;
}

/// Per-descriptor decisions made before allocating.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Placement {
    pub heap: HeapInfo,
    pub uncached: bool,
    pub size: u32,
}

/// Result of examining a batch of descriptors for sharing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SharingPlan {
    /// Index of the descriptor whose allocation is shared, if sharing is possible.
    pub leader: Option<usize>,
}

/// Usage driven allocation decisions.
#[derive(Copy, Clone, Debug, Default)]
pub struct AllocationPolicy {
    config: GrallocConfig,
}

impl AllocationPolicy {
    pub fn new(config: GrallocConfig) -> AllocationPolicy {
        AllocationPolicy { config }
    }

    pub fn config(&self) -> &GrallocConfig {
        &self.config
    }

    /// Picks a concrete format for `IMPLEMENTATION_DEFINED` and `YCbCr_420_888`.
    pub fn resolve_format(&self, usage: &Usage, format: PixelFormat) -> PixelFormat {
        if format != PixelFormat::IMPLEMENTATION_DEFINED && format != PixelFormat::YCBCR_420_888 {
            return format;
        }

        let producer = usage.producer;
        let consumer = usage.consumer;
        if producer.contains(ProducerUsage::PRIVATE_ALLOC_UBWC) {
            PixelFormat::YCBCR_420_SP_VENUS_UBWC
        } else if consumer.contains(ConsumerUsage::VIDEO_ENCODER) {
            PixelFormat::NV12_ENCODEABLE
        } else if consumer.contains(ConsumerUsage::CAMERA) {
            if producer.contains(ProducerUsage::CAMERA) {
                PixelFormat::NV21_ZSL
            } else {
                PixelFormat::YCRCB_420_SP
            }
        } else if producer.contains(ProducerUsage::CAMERA) {
            if format == PixelFormat::YCBCR_420_888 {
                PixelFormat::NV21_ZSL
            } else {
                PixelFormat::YCBCR_420_SP_VENUS
            }
        } else if consumer.contains(ConsumerUsage::HWCOMPOSER) {
            PixelFormat::RGBA_8888
        } else if format == PixelFormat::YCBCR_420_888 {
            PixelFormat::NV21_ZSL
        } else {
            format
        }
    }

    pub fn use_uncached(&self, usage: &Usage) -> bool {
        let producer = usage.producer;
        if producer.intersects(ProducerUsage::PRIVATE_UNCACHED | ProducerUsage::PROTECTED) {
            return true;
        }

        // Rare CPU access does not pay for cache maintenance.
        if producer.contains(ProducerUsage::CPU_READ)
            && !producer.contains(ProducerUsage::CPU_READ_OFTEN)
        {
            return true;
        }
        if producer.contains(ProducerUsage::CPU_WRITE)
            && !producer.contains(ProducerUsage::CPU_WRITE_OFTEN)
        {
            return true;
        }

        producer.contains(ProducerUsage::SENSOR_DIRECT_DATA)
            || usage.consumer.contains(ConsumerUsage::GPU_DATA_BUFFER)
    }

    pub fn heap_info(&self, usage: &Usage) -> HeapInfo {
        let producer = usage.producer;
        let consumer = usage.consumer;
        let mut heap_id = HeapMask::empty();
        let mut flags = HeapFlags::empty();

        if producer.contains(ProducerUsage::PROTECTED) {
            if consumer.contains(ConsumerUsage::PRIVATE_SECURE_DISPLAY) {
                heap_id = HeapMask::SECURE_DISPLAY;
                flags |= HeapFlags::SD;
            } else if producer.contains(ProducerUsage::CAMERA) {
                heap_id = HeapMask::SECURE_DISPLAY;
                if consumer.contains(ConsumerUsage::HWCOMPOSER) {
                    flags |= HeapFlags::SC_PREVIEW;
                } else {
                    flags |= HeapFlags::SC;
                }
            } else {
                heap_id = HeapMask::SECURE;
                flags |= HeapFlags::CP;
            }
        } else if producer.contains(ProducerUsage::PRIVATE_MM_HEAP) {
            warn!("MM heap cannot back an insecure buffer, using the system heap");
            heap_id |= HeapMask::SYSTEM;
        }

        if producer.contains(ProducerUsage::PRIVATE_CAMERA_HEAP) {
            heap_id |= HeapMask::CAMERA;
        }

        if producer.intersects(ProducerUsage::PRIVATE_ADSP_HEAP | ProducerUsage::SENSOR_DIRECT_DATA)
        {
            heap_id |= HeapMask::ADSP;
        }

        let mut alloc_type = PrivateFlags::empty();
        if flags.contains(HeapFlags::SECURE) {
            alloc_type |= PrivateFlags::SECURE_BUFFER;
        }

        if heap_id.is_empty() {
            heap_id = HeapMask::SYSTEM;
        }

        HeapInfo {
            heap_id,
            flags,
            alloc_type,
        }
    }

    /// Heap, cache policy and size of one descriptor. The descriptor's format must already be
    /// resolved.
    pub fn placement(&self, descriptor: &BufferDescriptor) -> GrallocResult<Placement> {
        let info = descriptor.buffer_info();
        let dims = buffer_size_and_dimensions(&self.config, &info)?;
        Ok(Placement {
            heap: self.heap_info(&info.usage),
            uncached: self.use_uncached(&info.usage),
            size: dims.size,
        })
    }

    /// Decides whether every descriptor can be backed by one allocation. All of them must agree
    /// on heap, heap flags, handle flags and cache policy; the largest one is then allocated.
    pub fn check_for_buffer_sharing(
        &self,
        descriptors: &[&BufferDescriptor],
    ) -> GrallocResult<SharingPlan> {
        let mut first: Option<Placement> = None;
        let mut leader = None;
        let mut max_size = 0;

        for (i, descriptor) in descriptors.iter().enumerate() {
            let placement = self.placement(descriptor)?;
            if let Some(first) = &first {
                if first.heap != placement.heap || first.uncached != placement.uncached {
                    return Ok(SharingPlan { leader: None });
                }
            }

            if placement.size > max_size {
                max_size = placement.size;
                leader = Some(i);
            }
            if first.is_none() {
                first = Some(placement);
            }
        }

        Ok(SharingPlan { leader })
    }

    /// Allocation request for the pixel memory of `info`.
    pub fn alloc_data(&self, info: &BufferInfo, size: u32, align: u32) -> AllocData {
        AllocData {
            size: u64::from(size),
            align,
            heap: self.heap_info(&info.usage),
            uncached: self.use_uncached(&info.usage),
        }
    }

    /// Rejects usage combinations the hardware cannot honour.
    pub fn check_usage(&self, usage: &Usage) -> GrallocResult<()> {
        if usage.protected() && usage.cpu_can_access() {
            error!("protected buffers cannot be accessed by the CPU");
            return Err(GrallocError::Unsupported);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(producer: ProducerUsage, consumer: ConsumerUsage) -> Usage {
        Usage::new(producer, consumer)
    }

    #[test]
    fn implementation_defined_formats() {
        let policy = AllocationPolicy::default();
        let impl_defined = PixelFormat::IMPLEMENTATION_DEFINED;
        let cases = [
            (
                usage(ProducerUsage::PRIVATE_ALLOC_UBWC, ConsumerUsage::empty()),
                impl_defined,
                PixelFormat::YCBCR_420_SP_VENUS_UBWC,
            ),
            (
                usage(ProducerUsage::empty(), ConsumerUsage::VIDEO_ENCODER),
                impl_defined,
                PixelFormat::NV12_ENCODEABLE,
            ),
            (
                usage(ProducerUsage::CAMERA, ConsumerUsage::CAMERA),
                impl_defined,
                PixelFormat::NV21_ZSL,
            ),
            (
                usage(ProducerUsage::empty(), ConsumerUsage::CAMERA),
                impl_defined,
                PixelFormat::YCRCB_420_SP,
            ),
            (
                usage(ProducerUsage::CAMERA, ConsumerUsage::empty()),
                impl_defined,
                PixelFormat::YCBCR_420_SP_VENUS,
            ),
            (
                usage(ProducerUsage::CAMERA, ConsumerUsage::empty()),
                PixelFormat::YCBCR_420_888,
                PixelFormat::NV21_ZSL,
            ),
            (
                usage(ProducerUsage::empty(), ConsumerUsage::HWCOMPOSER),
                impl_defined,
                PixelFormat::RGBA_8888,
            ),
            (
                Usage::default(),
                PixelFormat::YCBCR_420_888,
                PixelFormat::NV21_ZSL,
            ),
            (Usage::default(), impl_defined, impl_defined),
            (
                usage(ProducerUsage::CAMERA, ConsumerUsage::empty()),
                PixelFormat::RGBA_8888,
                PixelFormat::RGBA_8888,
            ),
        ];
        for (usage, input, expected) in cases {
            assert_eq!(policy.resolve_format(&usage, input), expected);
        }
    }

    #[test]
    fn cache_policy() {
        let policy = AllocationPolicy::default();
        assert!(!policy.use_uncached(&Usage::default()));
        assert!(policy.use_uncached(&usage(ProducerUsage::CPU_READ, ConsumerUsage::empty())));
        assert!(!policy.use_uncached(&usage(
            ProducerUsage::CPU_READ_OFTEN | ProducerUsage::CPU_WRITE_OFTEN,
            ConsumerUsage::empty()
        )));
        assert!(policy.use_uncached(&usage(ProducerUsage::PROTECTED, ConsumerUsage::empty())));
        assert!(policy.use_uncached(&usage(
            ProducerUsage::empty(),
            ConsumerUsage::GPU_DATA_BUFFER
        )));
    }

    #[test]
    fn heap_selection() {
        let policy = AllocationPolicy::default();
        let default = policy.heap_info(&Usage::default());
        assert_eq!(default.heap_id, HeapMask::SYSTEM);
        assert!(default.alloc_type.is_empty());

        let cp = policy.heap_info(&usage(ProducerUsage::PROTECTED, ConsumerUsage::empty()));
        assert_eq!(cp.heap_id, HeapMask::SECURE);
        assert_eq!(cp.flags, HeapFlags::CP);
        assert!(cp.alloc_type.contains(PrivateFlags::SECURE_BUFFER));

        let sd = policy.heap_info(&usage(
            ProducerUsage::PROTECTED,
            ConsumerUsage::PRIVATE_SECURE_DISPLAY,
        ));
        assert_eq!(sd.heap_id, HeapMask::SECURE_DISPLAY);
        assert_eq!(sd.flags, HeapFlags::SD);

        let preview = policy.heap_info(&usage(
            ProducerUsage::PROTECTED | ProducerUsage::CAMERA,
            ConsumerUsage::HWCOMPOSER,
        ));
        assert_eq!(preview.flags, HeapFlags::SC_PREVIEW);

        let mm = policy.heap_info(&usage(ProducerUsage::PRIVATE_MM_HEAP, ConsumerUsage::empty()));
        assert_eq!(mm.heap_id, HeapMask::SYSTEM);

        let adsp = policy.heap_info(&usage(
            ProducerUsage::SENSOR_DIRECT_DATA | ProducerUsage::PRIVATE_CAMERA_HEAP,
            ConsumerUsage::empty(),
        ));
        assert_eq!(adsp.heap_id, HeapMask::ADSP | HeapMask::CAMERA);
    }

    #[test]
    fn sharing_needs_agreement() {
        let policy = AllocationPolicy::default();
        let small = BufferDescriptor::with_params(64, 64, PixelFormat::RGBA_8888, Usage::default());
        let big = BufferDescriptor::with_params(128, 128, PixelFormat::RGBA_8888, Usage::default());
        let plan = policy.check_for_buffer_sharing(&[&small, &big]).unwrap();
        assert_eq!(plan.leader, Some(1));

        let uncached = BufferDescriptor::with_params(
            64,
            64,
            PixelFormat::RGBA_8888,
            usage(ProducerUsage::CPU_WRITE, ConsumerUsage::empty()),
        );
        let plan = policy.check_for_buffer_sharing(&[&small, &uncached]).unwrap();
        assert_eq!(plan.leader, None);

        let secure = BufferDescriptor::with_params(
            64,
            64,
            PixelFormat::RGBA_8888,
            usage(ProducerUsage::PROTECTED, ConsumerUsage::empty()),
        );
        let plan = policy.check_for_buffer_sharing(&[&secure, &big]).unwrap();
        assert_eq!(plan.leader, None);
    }

    #[test]
    fn protected_cpu_access_is_rejected() {
        let policy = AllocationPolicy::default();
        assert!(policy
            .check_usage(&usage(
                ProducerUsage::PROTECTED | ProducerUsage::CPU_WRITE,
                ConsumerUsage::empty()
            ))
            .is_err());
        assert!(policy.check_usage(&Usage::default()).is_ok());
    }
}
