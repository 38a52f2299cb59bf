// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! buffer_manager: The authoritative table of buffers known to this process.
//!
//! Descriptors and buffers live in two tables, each behind its own lock. Every buffer entry owns
//! the process-local allocator handles, the CPU mapping and the metadata mapping of one
//! `BufferHandle`; handles themselves only carry data that is meaningful across processes.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use log::debug;
use log::error;
use log::info;

use crate::allocator::AllocData;
use crate::allocator::AllocationPolicy;
use crate::allocator::CacheOp;
use crate::allocator::HeapInfo;
use crate::allocator::HeapMask;
use crate::allocator::PlatformAllocator;
use crate::color::ColorSpace;
use crate::descriptor::BufferDescriptor;
use crate::formats::BufferType;
use crate::formats::PixelFormat;
use crate::gralloc_os::page_size;
use crate::gralloc_os::AsRawDescriptor;
use crate::gralloc_os::Fence;
use crate::gralloc_os::MappedRegion;
use crate::gralloc_os::SafeDescriptor;
use crate::gralloc_utils::GrallocError;
use crate::gralloc_utils::GrallocResult;
use crate::handle::BufferHandle;
use crate::handle::BufferId;
use crate::handle::HandleInfo;
use crate::handle::PrivateFlags;
use crate::layout::aligned_dimensions;
use crate::layout::buffer_size_and_dimensions;
use crate::layout::check_gpu_usage;
use crate::layout::data_alignment;
use crate::layout::flex_layout;
use crate::layout::is_ubwc_enabled;
use crate::layout::num_flex_planes;
use crate::layout::yuv_plane_info;
use crate::layout::BufferInfo;
use crate::layout::FlexPlane;
use crate::layout::GrallocConfig;
use crate::layout::YuvPlaneInfo;
use crate::metadata::get_metadata_and_unmap;
use crate::metadata::metadata_size;
use crate::metadata::set_metadata_and_unmap;
use crate::metadata::MetadataBlock;
use crate::metadata::MetadataField;
use crate::metadata::MetadataMapping;
use crate::metadata::MetadataValue;
use crate::usage::ConsumerUsage;
use crate::usage::ProducerUsage;
use crate::usage::Usage;

/// Bound on the acquire fence wait performed by `lock`.
pub const LOCK_FENCE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Whether a batch passed to `allocate_buffers` is backed by a single allocation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocationOutcome {
    Shared,
    NotShared,
}

/// CPU address range of a locked buffer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferMapping {
    pub ptr: u64,
    pub size: u64,
}

struct BufferEntry {
    handle: Arc<BufferHandle>,
    ref_count: u32,
    local: SafeDescriptor,
    local_metadata: Option<SafeDescriptor>,
    mapping: Option<Box<dyn MappedRegion>>,
    metadata: Option<MetadataMapping>,
    needs_flush: bool,
}

/// Allocates, imports, locks and frees graphics buffers for one process.
pub struct BufferManager {
    pub(crate) allocator: Box<dyn PlatformAllocator>,
    pub(crate) policy: AllocationPolicy,
    descriptors: Mutex<BTreeMap<u64, BufferDescriptor>>,
    buffers: Mutex<BTreeMap<BufferId, BufferEntry>>,
}

impl BufferManager {
    pub fn new(allocator: Box<dyn PlatformAllocator>, config: GrallocConfig) -> BufferManager {
        info!("buffer manager created: {:?}", config);
        BufferManager {
            allocator,
            policy: AllocationPolicy::new(config),
            descriptors: Mutex::new(BTreeMap::new()),
            buffers: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn config(&self) -> &GrallocConfig {
        self.policy.config()
    }

    pub fn allocator(&self) -> &dyn PlatformAllocator {
        self.allocator.as_ref()
    }

    pub fn create_descriptor(&self) -> u64 {
        let descriptor = BufferDescriptor::new();
        let id = descriptor.id();
        self.descriptors.lock().unwrap().insert(id, descriptor);
        id
    }

    pub fn destroy_descriptor(&self, id: u64) -> GrallocResult<()> {
        self.descriptors
            .lock()
            .unwrap()
            .remove(&id)
            .map(|_| ())
            .ok_or(GrallocError::BadDescriptor(id))
    }

    fn update_descriptor<F>(&self, id: u64, f: F) -> GrallocResult<()>
    where
        F: FnOnce(&mut BufferDescriptor),
    {
        let mut descriptors = self.descriptors.lock().unwrap();
        let descriptor = descriptors
            .get_mut(&id)
            .ok_or(GrallocError::BadDescriptor(id))?;
        f(descriptor);
        Ok(())
    }

    pub fn set_dimensions(&self, id: u64, width: u32, height: u32) -> GrallocResult<()> {
        self.update_descriptor(id, |d| d.set_dimensions(width, height))
    }

    pub fn set_format(&self, id: u64, format: PixelFormat) -> GrallocResult<()> {
        self.update_descriptor(id, |d| d.set_format(format))
    }

    pub fn set_layer_count(&self, id: u64, layer_count: u32) -> GrallocResult<()> {
        if layer_count == 0 {
            return Err(GrallocError::BadValue("layer count"));
        }
        self.update_descriptor(id, |d| d.set_layer_count(layer_count))
    }

    pub fn set_producer_usage(&self, id: u64, usage: ProducerUsage) -> GrallocResult<()> {
        self.update_descriptor(id, |d| d.set_producer_usage(usage))
    }

    pub fn set_consumer_usage(&self, id: u64, usage: ConsumerUsage) -> GrallocResult<()> {
        self.update_descriptor(id, |d| d.set_consumer_usage(usage))
    }

    pub fn set_reserved_size(&self, id: u64, reserved_size: u64) -> GrallocResult<()> {
        self.update_descriptor(id, |d| d.set_reserved_size(reserved_size))
    }

    pub fn descriptor(&self, id: u64) -> GrallocResult<BufferDescriptor> {
        self.descriptors
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(GrallocError::BadDescriptor(id))
    }

    /// Allocates one buffer per descriptor, backing the whole batch with a single allocation when
    /// every descriptor agrees on heap, heap flags and cache policy.
    ///
    /// With `out` set to `None` nothing is allocated and only the sharing outcome is reported.
    /// Buffers produced before a failure stay registered and in `out`; the caller releases them.
    pub fn allocate_buffers(
        &self,
        descriptor_ids: &[u64],
        out: Option<&mut Vec<Arc<BufferHandle>>>,
    ) -> GrallocResult<AllocationOutcome> {
        let descriptors = {
            let mut table = self.descriptors.lock().unwrap();
            let mut descriptors = Vec::with_capacity(descriptor_ids.len());
            for id in descriptor_ids {
                let descriptor = table.get_mut(id).ok_or(GrallocError::BadDescriptor(*id))?;
                let format = self
                    .policy
                    .resolve_format(&descriptor.usage(), descriptor.format());
                descriptor.set_format(format);
                descriptors.push(descriptor.clone());
            }
            descriptors
        };

        let refs: Vec<&BufferDescriptor> = descriptors.iter().collect();
        let plan = self.policy.check_for_buffer_sharing(&refs)?;
        let outcome = match plan.leader {
            Some(_) => AllocationOutcome::Shared,
            None => AllocationOutcome::NotShared,
        };

        let out = match out {
            Some(out) => out,
            None => return Ok(outcome),
        };

        match plan.leader {
            Some(leader) => {
                let shared = self.allocate_buffer(&descriptors[leader], 0)?;
                let start = out.len();
                out.push(shared.clone());
                for (i, descriptor) in descriptors.iter().enumerate() {
                    if i != leader {
                        out.push(self.create_shared_handle(&shared, descriptor)?);
                    }
                }
                // Keep the handles in descriptor order.
                out[start..=start + leader].rotate_left(1);
            }
            None => {
                for descriptor in &descriptors {
                    out.push(self.allocate_buffer(descriptor, 0)?);
                }
            }
        }

        Ok(outcome)
    }

    /// Private flags describing a buffer of `format` with `usage`.
    pub fn get_handle_flags(&self, format: PixelFormat, usage: &Usage) -> PrivateFlags {
        let producer = usage.producer;
        let consumer = usage.consumer;
        let mut flags = PrivateFlags::empty();

        if consumer.contains(ConsumerUsage::PRIVATE_EXTERNAL_ONLY) {
            flags |= PrivateFlags::EXTERNAL_ONLY;
        }
        if consumer.contains(ConsumerUsage::PRIVATE_INTERNAL_ONLY) {
            flags |= PrivateFlags::INTERNAL_ONLY;
        }
        if consumer.contains(ConsumerUsage::VIDEO_ENCODER) {
            flags |= PrivateFlags::VIDEO_ENCODER;
        }
        if producer.contains(ProducerUsage::CAMERA) {
            flags |= PrivateFlags::CAMERA_WRITE;
        }
        if consumer.contains(ConsumerUsage::CAMERA) {
            flags |= PrivateFlags::CAMERA_READ;
        }
        if consumer.contains(ConsumerUsage::HWCOMPOSER) {
            flags |= PrivateFlags::HW_COMPOSER | PrivateFlags::DISP_CONSUMER;
        }
        if consumer.contains(ConsumerUsage::GPU_TEXTURE) {
            flags |= PrivateFlags::HW_TEXTURE;
        }
        if consumer.contains(ConsumerUsage::PRIVATE_SECURE_DISPLAY) {
            flags |= PrivateFlags::SECURE_DISPLAY;
        }
        if is_ubwc_enabled(self.config(), format, usage) {
            flags |= PrivateFlags::UBWC_ALIGNED;
        }
        if producer.intersects(ProducerUsage::CPU_READ | ProducerUsage::CPU_WRITE) {
            flags |= PrivateFlags::CPU_RENDERED;
        }
        if consumer.intersects(ConsumerUsage::VIDEO_ENCODER | ConsumerUsage::CLIENT_TARGET)
            || producer.intersects(ProducerUsage::CAMERA | ProducerUsage::GPU_RENDER_TARGET)
        {
            flags |= PrivateFlags::NON_CPU_WRITER;
        }
        if !self.policy.use_uncached(usage) {
            flags |= PrivateFlags::CACHED;
        }
        flags
    }

    /// Allocates one buffer and registers it with a reference count of 1. The pixel allocation is
    /// at least `min_size` bytes.
    pub fn allocate_buffer(
        &self,
        descriptor: &BufferDescriptor,
        min_size: u32,
    ) -> GrallocResult<Arc<BufferHandle>> {
        let usage = descriptor.usage();
        let format = self.policy.resolve_format(&usage, descriptor.format());
        let info = BufferInfo {
            format,
            ..descriptor.buffer_info()
        };

        self.policy.check_usage(&usage)?;
        if !usage
            .consumer
            .contains(ConsumerUsage::PRIVATE_SECURE_DISPLAY)
        {
            check_gpu_usage(&usage)?;
        }

        let dims = buffer_size_and_dimensions(self.config(), &info)?;
        let size = dims.size.max(min_size);
        let align = data_alignment(format, &usage)?;
        let data = self.policy.alloc_data(&info, size, align);
        let fd = self.allocator.allocate(&data).map_err(|e| {
            error!("failed to allocate {} bytes: {}", size, e);
            GrallocError::NoResources
        })?;

        let reserved_size = descriptor.reserved_size();
        let meta_size = metadata_size(reserved_size)?;
        let meta_data = AllocData {
            size: meta_size,
            align: u32::try_from(page_size()?)?,
            heap: HeapInfo {
                heap_id: HeapMask::SYSTEM,
                ..Default::default()
            },
            uncached: false,
        };
        let fd_metadata = match self.allocator.allocate(&meta_data) {
            Ok(fd) => fd,
            Err(e) => {
                error!("failed to allocate metadata: {}", e);
                self.allocator.free(fd)?;
                return Err(GrallocError::NoResources);
            }
        };

        let mut metadata =
            MetadataMapping::new(self.allocator.map(&fd_metadata, meta_size, 0)?)?;
        let buffer_type = format.buffer_type();
        let color_space = match buffer_type {
            BufferType::Video => ColorSpace::Itu601,
            BufferType::Ui => ColorSpace::Itu709,
        };
        metadata.block_mut()?.init(reserved_size, color_space);

        let flags = self.get_handle_flags(format, &usage)
            | data.heap.alloc_type
            | PrivateFlags::USES_ION;
        let handle_info = HandleInfo {
            flags,
            width: dims.aligned_width,
            height: dims.aligned_height,
            unaligned_width: descriptor.width(),
            unaligned_height: descriptor.height(),
            format,
            buffer_type,
            size,
            offset: 0,
            usage,
            layer_count: info.layer_count,
            metadata_size: meta_size,
        };

        let local = self.allocator.import(&fd)?;
        let local_metadata = self.allocator.import(&fd_metadata)?;
        let handle = Arc::new(BufferHandle::new(
            fd,
            Some(fd_metadata),
            BufferId::next(),
            handle_info,
        ));
        debug!("allocated {:?}", handle);

        // Another thread may have imported the same buffer since the caller looked it up.
        let duplicate = {
            let mut buffers = self.buffers.lock().unwrap();
            match buffers.entry(handle.id) {
                Entry::Vacant(slot) => {
                    slot.insert(BufferEntry {
                        handle,
                        ref_count: 1,
                        local,
                        local_metadata,
                        mapping: None,
                        metadata: None,
                        needs_flush: false,
                    });
                    None
                }
                Entry::Occupied(mut slot) => {
                    slot.get_mut().ref_count += 1;
                    Some((handle, local, local_metadata))
                }
            }
        };

        match duplicate {
            Some((handle, local, local_metadata)) => {
                debug!("buffer {} imported concurrently", handle.id);
                self.free_locals(&handle, local, local_metadata)
            }
            None => Ok(()),
        }
    }

    /// Takes a reference on `handle`, importing it if this process has not seen it before.
    pub fn retain(&self, handle: &Arc<BufferHandle>) -> GrallocResult<()> {
        {
            let mut buffers = self.buffers.lock().unwrap();
            if let Some(entry) = buffers.get_mut(&handle.id) {
                entry.ref_count += 1;
                return Ok(());
            }
        }

        debug!("importing buffer {}", handle.id);
        self.register(handle.clone())
    }

    /// Drops a reference. The last reference unmaps and frees the buffer.
    pub fn release(&self, handle: &BufferHandle) -> GrallocResult<()> {
        let entry = {
            let mut buffers = self.buffers.lock().unwrap();
            let entry = buffers.get_mut(&handle.id).ok_or_else(|| {
                error!("could not find buffer {}", handle.id);
                GrallocError::BadHandle
            })?;
            entry.ref_count -= 1;
            if entry.ref_count > 0 {
                return Ok(());
            }
            buffers.remove(&handle.id)
        };

        match entry {
            Some(entry) => self.free_buffer(entry),
            None => Ok(()),
        }
    }

    fn free_buffer(&self, entry: BufferEntry) -> GrallocResult<()> {
        let BufferEntry {
            handle,
            local,
            local_metadata,
            mapping,
            metadata,
            ..
        } = entry;
        debug!("freeing buffer {}", handle.id);

        drop(mapping);
        drop(metadata);
        self.free_locals(&handle, local, local_metadata)
    }

    /// Frees the process-local allocator handles of a buffer. Both are freed even if the first
    /// fails; the first error is returned.
    fn free_locals(
        &self,
        handle: &BufferHandle,
        local: SafeDescriptor,
        local_metadata: Option<SafeDescriptor>,
    ) -> GrallocResult<()> {
        let result = if handle.flags().contains(PrivateFlags::CLIENT_ALLOCATED) {
            drop(local);
            Ok(())
        } else {
            self.allocator.free(local)
        };
        let metadata_result = match local_metadata {
            Some(local_metadata) => self.allocator.free(local_metadata),
            None => Ok(()),
        };
        if let Err(e) = &result {
            error!("failed to free buffer {}: {}", handle.id, e);
        }
        result.and(metadata_result)
    }

    /// Maps the buffer for CPU access after `acquire_fence` signals.
    ///
    /// Cached buffers written by non-CPU producers are invalidated before a CPU read; a CPU write
    /// schedules a cache clean in `unlock`.
    pub fn lock(
        &self,
        handle: &BufferHandle,
        usage: Usage,
        acquire_fence: Option<Fence>,
    ) -> GrallocResult<BufferMapping> {
        handle.validate()?;
        if !usage.cpu_can_access() {
            return Err(GrallocError::BadValue("lock without CPU access"));
        }

        if let Some(fence) = acquire_fence {
            fence.wait(LOCK_FENCE_TIMEOUT).map_err(|e| {
                error!("acquire fence wait for buffer {} failed: {}", handle.id, e);
                e
            })?;
        }

        let mut buffers = self.buffers.lock().unwrap();
        let entry = buffers
            .get_mut(&handle.id)
            .ok_or(GrallocError::BadHandle)?;

        if entry.mapping.is_none() {
            let info = &entry.handle.info;
            let region = self.allocator.map(
                &entry.local,
                u64::from(info.size),
                u64::from(info.offset),
            )?;
            entry.mapping = Some(region);
        }

        let flags = entry.handle.flags();
        let region = entry.mapping.as_deref().ok_or(GrallocError::BadHandle)?;
        if flags.contains(PrivateFlags::USES_ION | PrivateFlags::CACHED)
            && usage.consumer_cpu_read()
            && flags.contains(PrivateFlags::NON_CPU_WRITER)
        {
            self.allocator
                .cache_op(&entry.local, region, CacheOp::Invalidate)
                .map_err(|_| GrallocError::BadHandle)?;
        }

        let mapping = BufferMapping {
            ptr: region.as_ptr() as u64,
            size: region.size() as u64,
        };
        if usage.cpu_can_write() {
            entry.needs_flush = true;
        }
        Ok(mapping)
    }

    /// Ends CPU access, cleaning caches after a CPU write. No release fence is produced since the
    /// CPU is done once this returns.
    pub fn unlock(&self, handle: &BufferHandle) -> GrallocResult<Option<Fence>> {
        let mut buffers = self.buffers.lock().unwrap();
        let entry = buffers
            .get_mut(&handle.id)
            .ok_or(GrallocError::BadHandle)?;

        if entry.needs_flush {
            entry.needs_flush = false;
            if let Some(region) = entry.mapping.as_deref() {
                self.allocator
                    .cache_op(&entry.local, region, CacheOp::Clean)
                    .map_err(|_| GrallocError::BadHandle)?;
            }
        }
        Ok(None)
    }

    /// Runs `f` over the CPU mapping of a locked buffer.
    pub fn access<F, R>(&self, handle: &BufferHandle, f: F) -> GrallocResult<R>
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let buffers = self.buffers.lock().unwrap();
        let entry = buffers.get(&handle.id).ok_or(GrallocError::BadHandle)?;
        let region = entry
            .mapping
            .as_deref()
            .ok_or(GrallocError::BadValue("buffer is not locked"))?;
        // Safe because the region stays mapped while the table lock is held.
        let bytes = unsafe { std::slice::from_raw_parts_mut(region.as_ptr(), region.size()) };
        Ok(f(bytes))
    }

    pub fn is_buffer_imported(&self, handle: &BufferHandle) -> GrallocResult<()> {
        if self.buffers.lock().unwrap().contains_key(&handle.id) {
            Ok(())
        } else {
            Err(GrallocError::BadValue("buffer not imported"))
        }
    }

    /// Fails with `BadValue` when the allocation behind `handle` is smaller than a buffer
    /// described by `info` requires.
    pub fn validate_buffer_size(
        &self,
        handle: &BufferHandle,
        info: &BufferInfo,
    ) -> GrallocResult<()> {
        handle.validate()?;
        let info = BufferInfo {
            format: self.policy.resolve_format(&info.usage, info.format),
            ..*info
        };
        let required = buffer_size_and_dimensions(self.config(), &info)?.size;
        let actual = handle.fd.size()?;
        if u64::from(required) > actual {
            error!(
                "buffer {} holds {} bytes, {} required",
                handle.id, actual, required
            );
            return Err(GrallocError::BadValue("buffer too small"));
        }
        Ok(())
    }

    /// Runs `f` over the metadata block of `handle`, mapping it on first use for registered
    /// buffers.
    pub(crate) fn with_metadata<F, R>(&self, handle: &BufferHandle, f: F) -> GrallocResult<R>
    where
        F: FnOnce(&mut MetadataBlock) -> GrallocResult<R>,
    {
        handle.validate()?;
        let mut buffers = self.buffers.lock().unwrap();
        if !buffers.contains_key(&handle.id) {
            drop(buffers);
            let descriptor = handle
                .fd_metadata
                .as_ref()
                .ok_or(GrallocError::BadValue("buffer has no metadata"))?;
            let mut mapping = MetadataMapping::map(self.allocator.as_ref(), descriptor)?;
            return f(mapping.block_mut()?);
        }

        let entry = buffers
            .get_mut(&handle.id)
            .ok_or(GrallocError::BadHandle)?;

        if entry.metadata.is_none() {
            let local = entry
                .local_metadata
                .as_ref()
                .ok_or(GrallocError::BadValue("buffer has no metadata"))?;
            entry.metadata = Some(MetadataMapping::map(self.allocator.as_ref(), local)?);
        }
        match entry.metadata.as_mut() {
            Some(mapping) => f(mapping.block_mut()?),
            None => Err(GrallocError::BadValue("buffer has no metadata")),
        }
    }

    pub fn set_metadata(
        &self,
        handle: &BufferHandle,
        field: MetadataField,
        value: Option<&MetadataValue>,
    ) -> GrallocResult<()> {
        self.with_metadata(handle, |block| block.set(field, value))
    }

    pub fn get_metadata(
        &self,
        handle: &BufferHandle,
        field: MetadataField,
    ) -> GrallocResult<MetadataValue> {
        self.with_metadata(handle, |block| block.get(field))
    }

    pub fn clear_metadata(&self, handle: &BufferHandle, field: MetadataField) -> GrallocResult<()> {
        self.with_metadata(handle, |block| {
            block.clear(field);
            Ok(())
        })
    }

    pub fn copy_metadata(&self, src: &BufferHandle, dst: &BufferHandle) -> GrallocResult<()> {
        let snapshot = self.with_metadata(src, |block| Ok(*block))?;
        self.with_metadata(dst, |block| {
            block.copy_from(&snapshot);
            Ok(())
        })
    }

    /// Same as `set_metadata`, without keeping the region mapped.
    pub fn set_metadata_and_unmap(
        &self,
        handle: &BufferHandle,
        field: MetadataField,
        value: Option<&MetadataValue>,
    ) -> GrallocResult<()> {
        set_metadata_and_unmap(self.allocator.as_ref(), handle, field, value)
    }

    pub fn get_metadata_and_unmap(
        &self,
        handle: &BufferHandle,
        field: MetadataField,
    ) -> GrallocResult<MetadataValue> {
        get_metadata_and_unmap(self.allocator.as_ref(), handle, field)
    }

    /// Plane placement of a YUV buffer, honouring linear format and buffer geometry overrides
    /// recorded in its metadata.
    pub fn yuv_plane_info(&self, handle: &BufferHandle) -> GrallocResult<YuvPlaneInfo> {
        let mut format = handle.format();
        let mut width = handle.info.width;
        let mut height = handle.info.height;

        if let Ok(MetadataValue::LinearFormat(linear)) =
            self.get_metadata(handle, MetadataField::LinearFormat)
        {
            if linear != 0 {
                format = PixelFormat(linear);
            }
        }

        if let Ok(MetadataValue::BufferGeometry(geometry)) =
            self.get_metadata(handle, MetadataField::BufferGeometry)
        {
            let mut usage = Usage::default();
            if handle.is_ubwc_aligned() {
                usage.producer |= ProducerUsage::PRIVATE_ALLOC_UBWC;
            }
            let info = BufferInfo::new(
                u32::try_from(geometry.slice_width)?,
                u32::try_from(geometry.slice_height)?,
                format,
                usage,
            );
            let (aligned_width, aligned_height) = aligned_dimensions(self.config(), &info);
            width = aligned_width;
            height = aligned_height;
        }

        yuv_plane_info(format, width, height)
    }

    pub fn get_num_flex_planes(&self, handle: &BufferHandle) -> GrallocResult<u32> {
        handle.validate()?;
        num_flex_planes(handle.format())
    }

    pub fn get_flex_layout(&self, handle: &BufferHandle) -> GrallocResult<Vec<FlexPlane>> {
        handle.validate()?;
        let yuv = self.yuv_plane_info(handle)?;
        flex_layout(handle.format(), &yuv)
    }

    /// Registers a handle wrapping memory the client allocated itself. The memory is never freed
    /// through the platform allocator.
    pub(crate) fn create_handle_from_buffer(
        &self,
        fd: SafeDescriptor,
        size: u32,
        offset: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> GrallocResult<Arc<BufferHandle>> {
        let info = BufferInfo::new(width, height, format, Usage::default());
        let (aligned_width, aligned_height) = aligned_dimensions(self.config(), &info);
        let handle = Arc::new(BufferHandle::new(
            fd,
            None,
            BufferId::next(),
            HandleInfo {
                flags: PrivateFlags::USES_ION | PrivateFlags::CLIENT_ALLOCATED,
                width: aligned_width,
                height: aligned_height,
                unaligned_width: width,
                unaligned_height: height,
                format,
                buffer_type: format.buffer_type(),
                size,
                offset,
                usage: Usage::default(),
                layer_count: 1,
                metadata_size: 0,
            },
        ));
        self.register(handle.clone())?;
        Ok(handle)
    }

    /// Number of buffers currently registered.
    pub fn buffer_count(&self) -> usize {
        self.buffers.lock().unwrap().len()
    }

    pub fn ref_count(&self, handle: &BufferHandle) -> Option<u32> {
        self.buffers
            .lock()
            .unwrap()
            .get(&handle.id)
            .map(|entry| entry.ref_count)
    }

    /// One line per registered buffer.
    pub fn dump(&self) -> String {
        let buffers = self.buffers.lock().unwrap();
        let mut out = String::new();
        let _ = writeln!(out, "-------------------------------");
        let _ = writeln!(out, "buffers: {}", buffers.len());
        for entry in buffers.values() {
            let handle = &entry.handle;
            let info = &handle.info;
            let _ = writeln!(
                out,
                "handle id: {:4} fd: {:3} fd_meta: {:3} wxh: {:4} x {:4} uwxuh: {:4} x {:4} \
                 size: {:9} priv_flags: 0x{:08x} prod_usage: 0x{:08x} cons_usage: 0x{:08x} \
                 format: 0x{:08x}",
                handle.id,
                handle.fd.as_raw_descriptor(),
                handle
                    .fd_metadata
                    .as_ref()
                    .map(|m| m.as_raw_descriptor())
                    .unwrap_or(-1),
                info.width,
                info.height,
                info.unaligned_width,
                info.unaligned_height,
                info.size,
                info.flags.bits(),
                info.usage.producer.bits(),
                info.usage.consumer.bits(),
                info.format.0,
            );
        }
        out
    }
}
