// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! metadata: The per-buffer metadata side channel.
//!
//! Every buffer owns a second small shared-memory allocation holding a `MetadataBlock`. The block
//! is a versioned struct of optional fields, each guarded by a bit in `present`. Producers and
//! consumers map the same descriptor and read or write fields through `MetadataBlock::set`,
//! `MetadataBlock::get` and `MetadataBlock::clear`.
//!
//! The block is raw shared memory and is not locked. Two parties must not mutate the same field
//! concurrently; they are expected to serialize through the buffer's fences.

use std::mem::size_of;

use log::error;
use zerocopy::AsBytes;
use zerocopy::FromBytes;
use zerocopy::LayoutVerified;

use crate::allocator::PlatformAllocator;
use crate::color::ColorMetaData;
use crate::color::ColorSpace;
use crate::color::MAX_DYNAMIC_METADATA;
use crate::gralloc_os::round_up_to_page_size;
use crate::gralloc_os::MappedRegion;
use crate::gralloc_os::SafeDescriptor;
use crate::gralloc_utils::GrallocError;
use crate::gralloc_utils::GrallocResult;
use crate::handle::BufferHandle;

pub const METADATA_VERSION: u32 = 1;
/// Capacity of the graphics metadata blob, in 32-bit words.
pub const GRAPHICS_METADATA_SIZE: usize = 4096;
pub const CVP_METADATA_SIZE: usize = 1024;
/// Capacity of the histogram statistics, in bytes.
pub const VIDEO_HISTOGRAM_STATS_SIZE: usize = 4096;
pub const UBWC_STATS_ARRAY_SIZE: usize = 2;
pub const MAX_UBWC_STATS_LENGTH: usize = 32;
pub const METADATA_NAME_LENGTH: usize = 256;

/// Identifies one optional field of the metadata block.
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum MetadataField {
    VtTimestamp = 0x1,
    ColorMetadata = 0x2,
    Interlaced = 0x4,
    VideoPerfMode = 0x8,
    GraphicsMetadata = 0x10,
    UbwcCrStats = 0x40,
    BufferGeometry = 0x80,
    RefreshRate = 0x100,
    /// Stored as color metadata; shares its presence bit.
    ColorSpace = 0x200,
    MapSecureBuffer = 0x400,
    S3dFormat = 0x800,
    LinearFormat = 0x1000,
    SingleBufferMode = 0x4000,
    CvpMetadata = 0x10000,
    VideoHistogramStats = 0x20000,
    VideoTsInfo = 0x40000,
}

impl MetadataField {
    pub const ALL: [MetadataField; 16] = [
        MetadataField::VtTimestamp,
        MetadataField::ColorMetadata,
        MetadataField::Interlaced,
        MetadataField::VideoPerfMode,
        MetadataField::GraphicsMetadata,
        MetadataField::UbwcCrStats,
        MetadataField::BufferGeometry,
        MetadataField::RefreshRate,
        MetadataField::ColorSpace,
        MetadataField::MapSecureBuffer,
        MetadataField::S3dFormat,
        MetadataField::LinearFormat,
        MetadataField::SingleBufferMode,
        MetadataField::CvpMetadata,
        MetadataField::VideoHistogramStats,
        MetadataField::VideoTsInfo,
    ];

    fn presence_bit(self) -> u32 {
        match self {
            MetadataField::ColorSpace => MetadataField::ColorMetadata as u32,
            field => field as u32,
        }
    }
}

impl TryFrom<u32> for MetadataField {
    type Error = GrallocError;

    fn try_from(id: u32) -> GrallocResult<MetadataField> {
        MetadataField::ALL
            .iter()
            .copied()
            .find(|field| *field as u32 == id)
            .ok_or(GrallocError::BadValue("unknown metadata field"))
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, AsBytes, FromBytes)]
pub struct VideoTimestampInfo {
    pub enable: u32,
    pub frame_number: u32,
    pub timestamp_us: i64,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, AsBytes, FromBytes)]
pub struct UbwcStats {
    pub version: u32,
    pub data_valid: u32,
    pub stats: [u32; MAX_UBWC_STATS_LENGTH],
}

#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes)]
struct GraphicsBlob {
    size: u32,
    data: [u32; GRAPHICS_METADATA_SIZE],
}

#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes)]
struct HistogramBlob {
    stats_info: [u32; VIDEO_HISTOGRAM_STATS_SIZE / 4],
    stat_len: u32,
    frame_type: u32,
    display_width: u32,
    display_height: u32,
    decode_width: u32,
    decode_height: u32,
    reserved: [u32; 12],
}

#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes)]
struct CvpBlob {
    size: u32,
    payload: [u8; CVP_METADATA_SIZE],
    capture_frame_rate: u32,
    cvp_frame_rate: u32,
    flags: u32,
    reserved: [u32; 8],
}

/// The shared layout of a metadata region. An optional reserved tail for client use follows it.
#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes)]
pub struct MetadataBlock {
    version: u32,
    present: u32,
    reserved_size: u64,
    vt_timestamp: u64,
    video_ts_info: VideoTimestampInfo,
    interlaced: i32,
    refresh_rate: f32,
    map_secure_buffer: i32,
    s3d_format: u32,
    linear_format: u32,
    single_buffer_mode: u32,
    video_perf_mode: u32,
    padding0: u32,
    buffer_dim: [i32; 2],
    crop: [i32; 4],
    color: ColorMetaData,
    ubwc_cr_stats: [UbwcStats; UBWC_STATS_ARRAY_SIZE],
    graphics: GraphicsBlob,
    histogram: HistogramBlob,
    cvp: CvpBlob,
    name: [u8; METADATA_NAME_LENGTH],
}

/// Width and height of the buffer contents, which may be smaller than the allocation.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferGeometry {
    pub slice_width: i32,
    pub slice_height: i32,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphicsMetadata {
    pub data: Vec<u32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CvpMetadata {
    pub payload: Vec<u8>,
    pub capture_frame_rate: u32,
    pub cvp_frame_rate: u32,
    pub flags: u32,
    pub reserved: [u32; 8],
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VideoHistogram {
    pub stats: Vec<u32>,
    pub frame_type: u32,
    pub display_width: u32,
    pub display_height: u32,
    pub decode_width: u32,
    pub decode_height: u32,
}

/// A typed field value.
#[derive(Clone, Debug, PartialEq)]
pub enum MetadataValue {
    VtTimestamp(u64),
    ColorMetadata(Box<ColorMetaData>),
    Interlaced(i32),
    VideoPerfMode(u32),
    GraphicsMetadata(GraphicsMetadata),
    UbwcCrStats([UbwcStats; UBWC_STATS_ARRAY_SIZE]),
    BufferGeometry(BufferGeometry),
    RefreshRate(f32),
    ColorSpace(ColorSpace),
    MapSecureBuffer(i32),
    S3dFormat(u32),
    LinearFormat(u32),
    SingleBufferMode(u32),
    CvpMetadata(CvpMetadata),
    VideoHistogramStats(VideoHistogram),
    VideoTsInfo(VideoTimestampInfo),
}

impl MetadataValue {
    pub fn field(&self) -> MetadataField {
        match self {
            MetadataValue::VtTimestamp(_) => MetadataField::VtTimestamp,
            MetadataValue::ColorMetadata(_) => MetadataField::ColorMetadata,
            MetadataValue::Interlaced(_) => MetadataField::Interlaced,
            MetadataValue::VideoPerfMode(_) => MetadataField::VideoPerfMode,
            MetadataValue::GraphicsMetadata(_) => MetadataField::GraphicsMetadata,
            MetadataValue::UbwcCrStats(_) => MetadataField::UbwcCrStats,
            MetadataValue::BufferGeometry(_) => MetadataField::BufferGeometry,
            MetadataValue::RefreshRate(_) => MetadataField::RefreshRate,
            MetadataValue::ColorSpace(_) => MetadataField::ColorSpace,
            MetadataValue::MapSecureBuffer(_) => MetadataField::MapSecureBuffer,
            MetadataValue::S3dFormat(_) => MetadataField::S3dFormat,
            MetadataValue::LinearFormat(_) => MetadataField::LinearFormat,
            MetadataValue::SingleBufferMode(_) => MetadataField::SingleBufferMode,
            MetadataValue::CvpMetadata(_) => MetadataField::CvpMetadata,
            MetadataValue::VideoHistogramStats(_) => MetadataField::VideoHistogramStats,
            MetadataValue::VideoTsInfo(_) => MetadataField::VideoTsInfo,
        }
    }
}

/// Size of a metadata allocation with `reserved_size` bytes of client tail.
pub fn metadata_size(reserved_size: u64) -> GrallocResult<u64> {
    let base = size_of::<MetadataBlock>() as u64;
    let total = base
        .checked_add(reserved_size)
        .ok_or(GrallocError::BadValue("reserved size"))?;
    round_up_to_page_size(total)
}

impl MetadataBlock {
    /// Resets the block to an empty version-stamped state with the given default color space.
    pub fn init(&mut self, reserved_size: u64, color_space: ColorSpace) {
        *self = MetadataBlock::new_zeroed();
        self.version = METADATA_VERSION;
        self.reserved_size = reserved_size;
        self.color = ColorMetaData::from_color_space(color_space);
        self.present = MetadataField::ColorSpace.presence_bit();
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn reserved_size(&self) -> u64 {
        self.reserved_size
    }

    pub fn is_set(&self, field: MetadataField) -> bool {
        self.present & field.presence_bit() != 0
    }

    pub fn name(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(METADATA_NAME_LENGTH);
        &self.name[..len]
    }

    /// Stores a debug name, truncated so that the stored name stays nul terminated.
    pub fn set_name(&mut self, name: &[u8]) {
        let len = name.len().min(METADATA_NAME_LENGTH - 1);
        self.name = [0; METADATA_NAME_LENGTH];
        self.name[..len].copy_from_slice(&name[..len]);
    }

    fn mark(&mut self, field: MetadataField, set: bool) {
        if set {
            self.present |= field.presence_bit();
        } else {
            self.present &= !field.presence_bit();
        }
    }

    /// Writes `value` into `field`. `None` is equivalent to `clear(field)`.
    ///
    /// Fixed capacity fields reject oversized payloads with `BadValue` and are left unset.
    pub fn set(&mut self, field: MetadataField, value: Option<&MetadataValue>) -> GrallocResult<()> {
        let value = match value {
            Some(value) => value,
            None => {
                self.clear(field);
                return Ok(());
            }
        };
        if value.field() != field {
            return Err(GrallocError::BadValue("value does not match metadata field"));
        }

        match value {
            MetadataValue::VtTimestamp(v) => self.vt_timestamp = *v,
            MetadataValue::ColorMetadata(v) => {
                if v.dynamic_metadata_len as usize > MAX_DYNAMIC_METADATA {
                    self.mark(field, false);
                    error!(
                        "dynamic metadata length {} exceeds {}",
                        v.dynamic_metadata_len, MAX_DYNAMIC_METADATA
                    );
                    return Err(GrallocError::BadValue("dynamic metadata too large"));
                }
                self.color = **v;
            }
            MetadataValue::Interlaced(v) => self.interlaced = *v,
            MetadataValue::VideoPerfMode(v) => self.video_perf_mode = *v,
            MetadataValue::GraphicsMetadata(v) => {
                if v.data.len() > GRAPHICS_METADATA_SIZE {
                    self.mark(field, false);
                    error!(
                        "graphics metadata length {} exceeds {}",
                        v.data.len(),
                        GRAPHICS_METADATA_SIZE
                    );
                    return Err(GrallocError::BadValue("graphics metadata too large"));
                }
                self.graphics.data = [0; GRAPHICS_METADATA_SIZE];
                self.graphics.data[..v.data.len()].copy_from_slice(&v.data);
                self.graphics.size = (v.data.len() * size_of::<u32>()) as u32;
            }
            MetadataValue::UbwcCrStats(v) => self.ubwc_cr_stats = *v,
            MetadataValue::BufferGeometry(v) => {
                self.buffer_dim = [v.slice_width, v.slice_height];
                self.crop = [0, 0, v.slice_width, v.slice_height];
            }
            MetadataValue::RefreshRate(v) => self.refresh_rate = *v,
            MetadataValue::ColorSpace(v) => self.color = ColorMetaData::from_color_space(*v),
            MetadataValue::MapSecureBuffer(v) => self.map_secure_buffer = *v,
            MetadataValue::S3dFormat(v) => self.s3d_format = *v,
            MetadataValue::LinearFormat(v) => self.linear_format = *v,
            MetadataValue::SingleBufferMode(v) => self.single_buffer_mode = *v,
            MetadataValue::CvpMetadata(v) => {
                if v.payload.len() > CVP_METADATA_SIZE {
                    self.mark(field, false);
                    error!(
                        "cvp metadata length {} is more than max size {}",
                        v.payload.len(),
                        CVP_METADATA_SIZE
                    );
                    return Err(GrallocError::BadValue("cvp metadata too large"));
                }
                self.cvp.size = v.payload.len() as u32;
                self.cvp.payload = [0; CVP_METADATA_SIZE];
                self.cvp.payload[..v.payload.len()].copy_from_slice(&v.payload);
                self.cvp.capture_frame_rate = v.capture_frame_rate;
                self.cvp.cvp_frame_rate = v.cvp_frame_rate;
                self.cvp.flags = v.flags;
                self.cvp.reserved = v.reserved;
            }
            MetadataValue::VideoHistogramStats(v) => {
                let stat_len = v.stats.len() * size_of::<u32>();
                if stat_len > VIDEO_HISTOGRAM_STATS_SIZE {
                    self.mark(field, false);
                    error!(
                        "video stats length {} is more than max size {}",
                        stat_len, VIDEO_HISTOGRAM_STATS_SIZE
                    );
                    return Err(GrallocError::BadValue("video histogram too large"));
                }
                let histogram = &mut self.histogram;
                histogram.stats_info = [0; VIDEO_HISTOGRAM_STATS_SIZE / 4];
                histogram.stats_info[..v.stats.len()].copy_from_slice(&v.stats);
                histogram.stat_len = stat_len as u32;
                histogram.frame_type = v.frame_type;
                histogram.display_width = v.display_width;
                histogram.display_height = v.display_height;
                histogram.decode_width = v.decode_width;
                histogram.decode_height = v.decode_height;
            }
            MetadataValue::VideoTsInfo(v) => self.video_ts_info = *v,
        }
        self.mark(field, true);
        Ok(())
    }

    /// Reads `field`, failing with `NotFound` when it was never set.
    pub fn get(&self, field: MetadataField) -> GrallocResult<MetadataValue> {
        if !self.is_set(field) {
            return Err(GrallocError::NotFound);
        }

        let value = match field {
            MetadataField::VtTimestamp => MetadataValue::VtTimestamp(self.vt_timestamp),
            MetadataField::ColorMetadata => MetadataValue::ColorMetadata(Box::new(self.color)),
            MetadataField::Interlaced => MetadataValue::Interlaced(self.interlaced),
            MetadataField::VideoPerfMode => MetadataValue::VideoPerfMode(self.video_perf_mode),
            MetadataField::GraphicsMetadata => {
                let words = (self.graphics.size as usize / size_of::<u32>())
                    .min(GRAPHICS_METADATA_SIZE);
                MetadataValue::GraphicsMetadata(GraphicsMetadata {
                    data: self.graphics.data[..words].to_vec(),
                })
            }
            MetadataField::UbwcCrStats => MetadataValue::UbwcCrStats(self.ubwc_cr_stats),
            MetadataField::BufferGeometry => MetadataValue::BufferGeometry(BufferGeometry {
                slice_width: self.crop[2],
                slice_height: self.crop[3],
            }),
            MetadataField::RefreshRate => MetadataValue::RefreshRate(self.refresh_rate),
            MetadataField::ColorSpace => MetadataValue::ColorSpace(self.color.color_space()?),
            MetadataField::MapSecureBuffer => {
                MetadataValue::MapSecureBuffer(self.map_secure_buffer)
            }
            MetadataField::S3dFormat => MetadataValue::S3dFormat(self.s3d_format),
            MetadataField::LinearFormat => MetadataValue::LinearFormat(self.linear_format),
            MetadataField::SingleBufferMode => {
                MetadataValue::SingleBufferMode(self.single_buffer_mode)
            }
            MetadataField::CvpMetadata => {
                let size = (self.cvp.size as usize).min(CVP_METADATA_SIZE);
                MetadataValue::CvpMetadata(CvpMetadata {
                    payload: self.cvp.payload[..size].to_vec(),
                    capture_frame_rate: self.cvp.capture_frame_rate,
                    cvp_frame_rate: self.cvp.cvp_frame_rate,
                    flags: self.cvp.flags,
                    reserved: self.cvp.reserved,
                })
            }
            MetadataField::VideoHistogramStats => {
                let histogram = &self.histogram;
                let words = (histogram.stat_len as usize / size_of::<u32>())
                    .min(VIDEO_HISTOGRAM_STATS_SIZE / 4);
                MetadataValue::VideoHistogramStats(VideoHistogram {
                    stats: histogram.stats_info[..words].to_vec(),
                    frame_type: histogram.frame_type,
                    display_width: histogram.display_width,
                    display_height: histogram.display_height,
                    decode_width: histogram.decode_width,
                    decode_height: histogram.decode_height,
                })
            }
            MetadataField::VideoTsInfo => MetadataValue::VideoTsInfo(self.video_ts_info),
        };
        Ok(value)
    }

    /// Drops the presence bit of `field`, resetting the fields whose stale values are observable.
    pub fn clear(&mut self, field: MetadataField) {
        self.mark(field, false);
        match field {
            MetadataField::VideoPerfMode => self.video_perf_mode = 0,
            MetadataField::CvpMetadata => self.cvp.size = 0,
            MetadataField::VideoHistogramStats => self.histogram.stat_len = 0,
            _ => (),
        }
    }

    /// Clears a field named by its raw id. Unknown ids are reported and leave the block untouched.
    pub fn clear_raw(&mut self, id: u32) -> GrallocResult<()> {
        match MetadataField::try_from(id) {
            Ok(field) => {
                self.clear(field);
                Ok(())
            }
            Err(e) => {
                error!("unknown metadata field 0x{:x}", id);
                Err(e)
            }
        }
    }

    /// Bulk copy of every field, including presence bits.
    pub fn copy_from(&mut self, src: &MetadataBlock) {
        *self = *src;
    }

    /// Views the start of `bytes` as a block.
    pub fn from_bytes(bytes: &[u8]) -> GrallocResult<&MetadataBlock> {
        let (block, _) = LayoutVerified::<&[u8], MetadataBlock>::new_from_prefix(bytes)
            .ok_or(GrallocError::BadValue("metadata region too small or misaligned"))?;
        Ok(block.into_ref())
    }

    pub fn from_bytes_mut(bytes: &mut [u8]) -> GrallocResult<&mut MetadataBlock> {
        let (block, _) = LayoutVerified::<&mut [u8], MetadataBlock>::new_from_prefix(bytes)
            .ok_or(GrallocError::BadValue("metadata region too small or misaligned"))?;
        Ok(block.into_mut())
    }
}

/// A mapped metadata region.
pub struct MetadataMapping {
    region: Box<dyn MappedRegion>,
}

impl MetadataMapping {
    /// Wraps an existing mapping, checking that it can hold a block.
    pub fn new(region: Box<dyn MappedRegion>) -> GrallocResult<MetadataMapping> {
        let mapping = MetadataMapping { region };
        MetadataBlock::from_bytes(mapping.bytes())?;
        Ok(mapping)
    }

    /// Maps the metadata descriptor. The mapping grows to cover the reserved tail if the block
    /// records one.
    pub fn map(
        allocator: &dyn PlatformAllocator,
        descriptor: &SafeDescriptor,
    ) -> GrallocResult<MetadataMapping> {
        let mapping = MetadataMapping::new(allocator.map(descriptor, metadata_size(0)?, 0)?)?;
        let reserved = mapping.block()?.reserved_size();
        if reserved == 0 {
            return Ok(mapping);
        }

        let size = metadata_size(reserved)?;
        drop(mapping);
        MetadataMapping::new(allocator.map(descriptor, size, 0)?)
    }

    fn bytes(&self) -> &[u8] {
        // Safe because MappedRegion guarantees the range is valid while `region` is alive.
        unsafe { std::slice::from_raw_parts(self.region.as_ptr(), self.region.size()) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // Safe because MappedRegion guarantees the range is valid while `region` is alive.
        unsafe { std::slice::from_raw_parts_mut(self.region.as_ptr(), self.region.size()) }
    }

    pub fn block(&self) -> GrallocResult<&MetadataBlock> {
        MetadataBlock::from_bytes(self.bytes())
    }

    pub fn block_mut(&mut self) -> GrallocResult<&mut MetadataBlock> {
        MetadataBlock::from_bytes_mut(self.bytes_mut())
    }

    /// The client tail following the block.
    pub fn reserved_region(&mut self) -> GrallocResult<&mut [u8]> {
        let reserved = usize::try_from(self.block()?.reserved_size())?;
        let start = size_of::<MetadataBlock>();
        self.bytes_mut()
            .get_mut(start..start + reserved)
            .ok_or(GrallocError::BadValue("reserved region not mapped"))
    }

    pub fn size(&self) -> usize {
        self.region.size()
    }
}

fn map_handle(
    allocator: &dyn PlatformAllocator,
    handle: &BufferHandle,
) -> GrallocResult<MetadataMapping> {
    handle.validate()?;
    let descriptor = handle
        .fd_metadata
        .as_ref()
        .ok_or(GrallocError::BadValue("buffer has no metadata"))?;
    MetadataMapping::map(allocator, descriptor)
}

/// Sets a field on a handle this process does not hold mapped. The region is unmapped on return.
pub fn set_metadata_and_unmap(
    allocator: &dyn PlatformAllocator,
    handle: &BufferHandle,
    field: MetadataField,
    value: Option<&MetadataValue>,
) -> GrallocResult<()> {
    let mut mapping = map_handle(allocator, handle)?;
    mapping.block_mut()?.set(field, value)
}

/// Reads a field from a handle this process does not hold mapped.
pub fn get_metadata_and_unmap(
    allocator: &dyn PlatformAllocator,
    handle: &BufferHandle,
    field: MetadataField,
) -> GrallocResult<MetadataValue> {
    let mapping = map_handle(allocator, handle)?;
    mapping.block()?.get(field)
}

/// Copies the whole block of `src` into `dst`.
pub fn copy_metadata_and_unmap(
    allocator: &dyn PlatformAllocator,
    src: &BufferHandle,
    dst: &BufferHandle,
) -> GrallocResult<()> {
    let src_mapping = map_handle(allocator, src)?;
    let mut dst_mapping = map_handle(allocator, dst)?;
    dst_mapping.block_mut()?.copy_from(src_mapping.block()?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocData;
    use crate::system_allocator::SystemAllocator;

    fn block() -> Box<MetadataBlock> {
        let mut block = Box::new(MetadataBlock::new_zeroed());
        block.init(0, ColorSpace::Itu709);
        block
    }

    #[test]
    fn layout_is_stable() {
        assert_eq!(size_of::<MetadataBlock>(), 23360);
        assert_eq!(metadata_size(0).unwrap() % 4096, 0);
        assert!(metadata_size(4096).unwrap() > metadata_size(0).unwrap());
    }

    #[test]
    fn init_sets_default_color_space() {
        let block = block();
        assert_eq!(block.version(), METADATA_VERSION);
        assert!(block.is_set(MetadataField::ColorMetadata));
        assert_eq!(
            block.get(MetadataField::ColorSpace).unwrap(),
            MetadataValue::ColorSpace(ColorSpace::Itu709)
        );
        assert!(matches!(
            block.get(MetadataField::RefreshRate),
            Err(GrallocError::NotFound)
        ));
    }

    #[test]
    fn set_get_round_trip() {
        let mut block = block();
        let mut color = ColorMetaData::from_color_space(ColorSpace::Itu2020);
        color.mastering_display.enabled = 1;
        color.mastering_display.max_display_luminance = 1000;
        color.content_light_level.enabled = 1;
        color.content_light_level.max_content_light_level = 800;
        color.dynamic_metadata_valid = 1;
        color.dynamic_metadata_len = MAX_DYNAMIC_METADATA as u32;
        color.dynamic_metadata_payload = [0x5a; MAX_DYNAMIC_METADATA];
        let values = vec![
            MetadataValue::VtTimestamp(0x1234_5678_9abc),
            MetadataValue::ColorMetadata(Box::new(color)),
            MetadataValue::Interlaced(1),
            MetadataValue::VideoPerfMode(1),
            MetadataValue::GraphicsMetadata(GraphicsMetadata {
                data: vec![1, 2, 3, 4],
            }),
            MetadataValue::UbwcCrStats([
                UbwcStats {
                    version: 1,
                    data_valid: 1,
                    stats: [7; MAX_UBWC_STATS_LENGTH],
                },
                UbwcStats::default(),
            ]),
            MetadataValue::BufferGeometry(BufferGeometry {
                slice_width: 1920,
                slice_height: 1080,
            }),
            MetadataValue::RefreshRate(59.94),
            MetadataValue::ColorSpace(ColorSpace::Itu2020Full),
            MetadataValue::MapSecureBuffer(1),
            MetadataValue::S3dFormat(2),
            MetadataValue::LinearFormat(0x11),
            MetadataValue::SingleBufferMode(1),
            MetadataValue::CvpMetadata(CvpMetadata {
                payload: vec![9; 100],
                capture_frame_rate: 30,
                cvp_frame_rate: 15,
                flags: 3,
                reserved: [5; 8],
            }),
            MetadataValue::VideoHistogramStats(VideoHistogram {
                stats: vec![11; 256],
                frame_type: 1,
                display_width: 1280,
                display_height: 720,
                decode_width: 1920,
                decode_height: 1088,
            }),
            MetadataValue::VideoTsInfo(VideoTimestampInfo {
                enable: 1,
                frame_number: 42,
                timestamp_us: -7,
            }),
        ];

        for value in values {
            let field = value.field();
            block.set(field, Some(&value)).unwrap();
            assert_eq!(block.get(field).unwrap(), value, "{:?}", field);
        }
    }

    #[test]
    fn clear_and_null_set() {
        let mut block = block();
        block
            .set(
                MetadataField::VideoPerfMode,
                Some(&MetadataValue::VideoPerfMode(1)),
            )
            .unwrap();
        block.clear(MetadataField::VideoPerfMode);
        assert!(matches!(
            block.get(MetadataField::VideoPerfMode),
            Err(GrallocError::NotFound)
        ));

        block
            .set(MetadataField::RefreshRate, Some(&MetadataValue::RefreshRate(30.0)))
            .unwrap();
        block.set(MetadataField::RefreshRate, None).unwrap();
        assert!(!block.is_set(MetadataField::RefreshRate));
    }

    #[test]
    fn unknown_field_leaves_block_untouched() {
        let mut block = block();
        block
            .set(MetadataField::S3dFormat, Some(&MetadataValue::S3dFormat(4)))
            .unwrap();
        let before = block.as_bytes().to_vec();
        assert!(block.clear_raw(0x8000_0000).is_err());
        assert_eq!(block.as_bytes(), &before[..]);
    }

    #[test]
    fn oversized_payloads_are_rejected() {
        let mut block = block();
        let small = MetadataValue::CvpMetadata(CvpMetadata {
            payload: vec![1; 8],
            ..Default::default()
        });
        block.set(MetadataField::CvpMetadata, Some(&small)).unwrap();

        let big = MetadataValue::CvpMetadata(CvpMetadata {
            payload: vec![1; CVP_METADATA_SIZE + 1],
            ..Default::default()
        });
        assert!(matches!(
            block.set(MetadataField::CvpMetadata, Some(&big)),
            Err(GrallocError::BadValue(_))
        ));
        assert!(!block.is_set(MetadataField::CvpMetadata));

        let big = MetadataValue::VideoHistogramStats(VideoHistogram {
            stats: vec![0; VIDEO_HISTOGRAM_STATS_SIZE / 4 + 1],
            ..Default::default()
        });
        assert!(block
            .set(MetadataField::VideoHistogramStats, Some(&big))
            .is_err());
        assert!(!block.is_set(MetadataField::VideoHistogramStats));

        let mut color = ColorMetaData::from_color_space(ColorSpace::Itu2020);
        color.dynamic_metadata_len = MAX_DYNAMIC_METADATA as u32 + 1;
        let big = MetadataValue::ColorMetadata(Box::new(color));
        assert!(matches!(
            block.set(MetadataField::ColorMetadata, Some(&big)),
            Err(GrallocError::BadValue(_))
        ));
        assert!(!block.is_set(MetadataField::ColorMetadata));
        assert!(matches!(
            block.get(MetadataField::ColorSpace),
            Err(GrallocError::NotFound)
        ));
    }

    #[test]
    fn mismatched_value_is_rejected() {
        let mut block = block();
        assert!(block
            .set(MetadataField::Interlaced, Some(&MetadataValue::S3dFormat(1)))
            .is_err());
        assert!(!block.is_set(MetadataField::Interlaced));
    }

    #[test]
    fn copy_is_bulk() {
        let mut src = block();
        src.set(MetadataField::Interlaced, Some(&MetadataValue::Interlaced(1)))
            .unwrap();
        src.set_name(b"camera preview");
        let mut dst = Box::new(MetadataBlock::new_zeroed());
        dst.copy_from(&src);
        assert_eq!(dst.as_bytes(), src.as_bytes());
        assert_eq!(dst.name(), b"camera preview");
    }

    #[test]
    fn raw_field_ids() {
        assert_eq!(
            MetadataField::try_from(0x80).unwrap(),
            MetadataField::BufferGeometry
        );
        assert!(MetadataField::try_from(0x20).is_err());
    }

    #[test]
    fn shared_region_with_reserved_tail() {
        let allocator = SystemAllocator::init().unwrap();
        let size = metadata_size(100).unwrap();
        let fd = allocator
            .allocate(&AllocData {
                size,
                ..Default::default()
            })
            .unwrap();

        let mut writer = MetadataMapping::new(allocator.map(&fd, size, 0).unwrap()).unwrap();
        writer.block_mut().unwrap().init(100, ColorSpace::Itu601);
        writer.reserved_region().unwrap()[..4].copy_from_slice(b"tail");
        writer
            .block_mut()
            .unwrap()
            .set(
                MetadataField::RefreshRate,
                Some(&MetadataValue::RefreshRate(90.0)),
            )
            .unwrap();

        let mut reader = MetadataMapping::map(allocator.as_ref(), &fd).unwrap();
        assert_eq!(reader.size() as u64, size);
        assert_eq!(
            reader.block().unwrap().get(MetadataField::RefreshRate).unwrap(),
            MetadataValue::RefreshRate(90.0)
        );
        assert_eq!(&reader.reserved_region().unwrap()[..4], b"tail");
    }
}
