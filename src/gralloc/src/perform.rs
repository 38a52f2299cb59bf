// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! perform: Vendor specific queries and operations, dispatched through one entry point.

use std::sync::Arc;

use log::debug;

use crate::buffer_manager::BufferManager;
use crate::color::ColorSpace;
use crate::descriptor::BufferDescriptor;
use crate::formats::PixelFormat;
use crate::gralloc_os::SafeDescriptor;
use crate::gralloc_utils::GrallocError;
use crate::gralloc_utils::GrallocResult;
use crate::handle::BufferHandle;
use crate::layout::aligned_dimensions;
use crate::layout::buffer_size_and_dimensions;
use crate::layout::data_alignment;
use crate::layout::is_ubwc_enabled;
use crate::layout::rgb_ubwc_meta_size;
use crate::layout::BufferInfo;
use crate::layout::SizeAndDimensions;
use crate::layout::YuvPlaneInfo;
use crate::metadata::GraphicsMetadata;
use crate::metadata::MetadataField;
use crate::metadata::MetadataValue;
use crate::usage::Usage;

/// A perform request and its arguments.
pub enum PerformCommand<'a> {
    /// Wraps memory the client allocated. The handle is registered but never freed through the
    /// platform allocator.
    CreateHandleFromBuffer {
        fd: SafeDescriptor,
        size: u32,
        offset: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
    },
    GetStride {
        width: u32,
        format: PixelFormat,
    },
    GetCustomStrideFromHandle(&'a BufferHandle),
    GetCustomStrideAndHeightFromHandle(&'a BufferHandle),
    GetAttributes {
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: Usage,
    },
    GetColorSpaceFromHandle(&'a BufferHandle),
    GetYuvPlaneInfo(&'a BufferHandle),
    GetMapSecureBufferInfo(&'a BufferHandle),
    GetUbwcFlag(&'a BufferHandle),
    /// Offset of the first pixel of an RGB buffer, past any compression metadata.
    GetRgbDataAddress(&'a BufferHandle),
    GetBufferSizeAndDimensions {
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: Usage,
    },
    AllocateBuffer {
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: Usage,
    },
    GetInterlaceFlag(&'a BufferHandle),
    GetGraphicsMetadata(&'a BufferHandle),
}

/// The answer to a `PerformCommand`.
#[derive(Debug, PartialEq)]
pub enum PerformResult {
    Handle(Arc<BufferHandle>),
    Stride(u32),
    StrideAndHeight {
        stride: u32,
        height: u32,
    },
    Attributes {
        aligned_width: u32,
        aligned_height: u32,
        ubwc_enabled: bool,
    },
    ColorSpace(ColorSpace),
    YuvPlaneInfo(YuvPlaneInfo),
    MapSecureBuffer(i32),
    UbwcFlag(bool),
    RgbDataOffset(u64),
    SizeAndDimensions(SizeAndDimensions),
    Interlaced(bool),
    GraphicsMetadata(GraphicsMetadata),
}

impl BufferManager {
    fn info_for(&self, width: u32, height: u32, format: PixelFormat, usage: Usage) -> BufferInfo {
        BufferInfo::new(
            width,
            height,
            self.policy.resolve_format(&usage, format),
            usage,
        )
    }

    fn custom_dimensions(&self, handle: &BufferHandle) -> GrallocResult<(u32, u32)> {
        handle.validate()?;
        match self.get_metadata(handle, MetadataField::BufferGeometry) {
            Ok(MetadataValue::BufferGeometry(geometry)) => Ok((
                u32::try_from(geometry.slice_width)?,
                u32::try_from(geometry.slice_height)?,
            )),
            _ => Ok((handle.info.width, handle.info.height)),
        }
    }

    pub fn perform(&self, command: PerformCommand) -> GrallocResult<PerformResult> {
        match command {
            PerformCommand::CreateHandleFromBuffer {
                fd,
                size,
                offset,
                width,
                height,
                format,
            } => {
                debug!("creating handle from client buffer {}x{}", width, height);
                let handle =
                    self.create_handle_from_buffer(fd, size, offset, width, height, format)?;
                Ok(PerformResult::Handle(handle))
            }
            PerformCommand::GetStride { width, format } => {
                let info = BufferInfo::new(width, width, format, Usage::default());
                let (stride, _) = aligned_dimensions(self.config(), &info);
                Ok(PerformResult::Stride(stride))
            }
            PerformCommand::GetCustomStrideFromHandle(handle) => {
                let (stride, _) = self.custom_dimensions(handle)?;
                Ok(PerformResult::Stride(stride))
            }
            PerformCommand::GetCustomStrideAndHeightFromHandle(handle) => {
                let (stride, height) = self.custom_dimensions(handle)?;
                Ok(PerformResult::StrideAndHeight { stride, height })
            }
            PerformCommand::GetAttributes {
                width,
                height,
                format,
                usage,
            } => {
                let info = self.info_for(width, height, format, usage);
                let (aligned_width, aligned_height) = aligned_dimensions(self.config(), &info);
                Ok(PerformResult::Attributes {
                    aligned_width,
                    aligned_height,
                    ubwc_enabled: is_ubwc_enabled(self.config(), info.format, &usage),
                })
            }
            PerformCommand::GetColorSpaceFromHandle(handle) => {
                handle.validate()?;
                let color_space = match self.get_metadata(handle, MetadataField::ColorMetadata) {
                    Ok(MetadataValue::ColorMetadata(color)) => {
                        color.color_space().unwrap_or(ColorSpace::Itu601)
                    }
                    _ => ColorSpace::Itu601,
                };
                Ok(PerformResult::ColorSpace(color_space))
            }
            PerformCommand::GetYuvPlaneInfo(handle) => {
                handle.validate()?;
                Ok(PerformResult::YuvPlaneInfo(self.yuv_plane_info(handle)?))
            }
            PerformCommand::GetMapSecureBufferInfo(handle) => {
                handle.validate()?;
                let value = match self.get_metadata(handle, MetadataField::MapSecureBuffer) {
                    Ok(MetadataValue::MapSecureBuffer(value)) => value,
                    _ => 0,
                };
                Ok(PerformResult::MapSecureBuffer(value))
            }
            PerformCommand::GetUbwcFlag(handle) => {
                handle.validate()?;
                let mut ubwc = handle.is_ubwc_aligned();
                if let Ok(MetadataValue::LinearFormat(linear)) =
                    self.get_metadata(handle, MetadataField::LinearFormat)
                {
                    if linear != 0 {
                        ubwc = false;
                    }
                }
                Ok(PerformResult::UbwcFlag(ubwc))
            }
            PerformCommand::GetRgbDataAddress(handle) => {
                handle.validate()?;
                let format = handle.format();
                let bpp = format
                    .rgb_bytes_per_pixel()
                    .filter(|_| format.is_uncompressed_rgb())
                    .ok_or(GrallocError::Unsupported)?;
                let offset = if handle.is_ubwc_aligned() {
                    rgb_ubwc_meta_size(handle.info.width, handle.info.height, bpp)?
                } else {
                    0
                };
                Ok(PerformResult::RgbDataOffset(u64::from(offset)))
            }
            PerformCommand::GetBufferSizeAndDimensions {
                width,
                height,
                format,
                usage,
            } => {
                let info = self.info_for(width, height, format, usage);
                let mut dims = buffer_size_and_dimensions(self.config(), &info)?;
                let align = data_alignment(info.format, &usage)?;
                dims.size = crate::align_up!(dims.size, align);
                Ok(PerformResult::SizeAndDimensions(dims))
            }
            PerformCommand::AllocateBuffer {
                width,
                height,
                format,
                usage,
            } => {
                let mut descriptor = BufferDescriptor::with_params(width, height, format, usage);
                descriptor.set_format(self.policy.resolve_format(&usage, format));
                Ok(PerformResult::Handle(self.allocate_buffer(&descriptor, 0)?))
            }
            PerformCommand::GetInterlaceFlag(handle) => {
                handle.validate()?;
                let interlaced = match self.get_metadata(handle, MetadataField::Interlaced) {
                    Ok(MetadataValue::Interlaced(value)) => value != 0,
                    _ => false,
                };
                Ok(PerformResult::Interlaced(interlaced))
            }
            PerformCommand::GetGraphicsMetadata(handle) => {
                handle.validate()?;
                match self.get_metadata(handle, MetadataField::GraphicsMetadata) {
                    Ok(MetadataValue::GraphicsMetadata(metadata)) => {
                        Ok(PerformResult::GraphicsMetadata(metadata))
                    }
                    _ => Err(GrallocError::Unsupported),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::GrallocConfig;
    use crate::metadata::BufferGeometry;
    use crate::system_allocator::SystemAllocator;
    use crate::usage::ConsumerUsage;
    use crate::usage::ProducerUsage;

    fn manager() -> BufferManager {
        BufferManager::new(SystemAllocator::init().unwrap(), GrallocConfig::default())
    }

    fn allocate(manager: &BufferManager, format: PixelFormat, usage: Usage) -> Arc<BufferHandle> {
        match manager
            .perform(PerformCommand::AllocateBuffer {
                width: 100,
                height: 60,
                format,
                usage,
            })
            .unwrap()
        {
            PerformResult::Handle(handle) => handle,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn stride_queries() {
        let manager = manager();
        assert_eq!(
            manager
                .perform(PerformCommand::GetStride {
                    width: 100,
                    format: PixelFormat::RGBA_8888,
                })
                .unwrap(),
            PerformResult::Stride(128)
        );

        let handle = allocate(&manager, PixelFormat::RGBA_8888, Usage::default());
        assert_eq!(
            manager
                .perform(PerformCommand::GetCustomStrideAndHeightFromHandle(&handle))
                .unwrap(),
            PerformResult::StrideAndHeight {
                stride: 128,
                height: 64
            }
        );

        manager
            .set_metadata(
                &handle,
                MetadataField::BufferGeometry,
                Some(&MetadataValue::BufferGeometry(BufferGeometry {
                    slice_width: 96,
                    slice_height: 48,
                })),
            )
            .unwrap();
        assert_eq!(
            manager
                .perform(PerformCommand::GetCustomStrideFromHandle(&handle))
                .unwrap(),
            PerformResult::Stride(96)
        );
    }

    #[test]
    fn attributes_report_ubwc() {
        let manager = manager();
        let usage = Usage::new(ProducerUsage::PRIVATE_ALLOC_UBWC, ConsumerUsage::empty());
        match manager
            .perform(PerformCommand::GetAttributes {
                width: 1920,
                height: 1080,
                format: PixelFormat::RGBA_8888,
                usage,
            })
            .unwrap()
        {
            PerformResult::Attributes { ubwc_enabled, .. } => assert!(ubwc_enabled),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn color_space_and_flags() {
        let manager = manager();
        let handle = allocate(&manager, PixelFormat::RGBA_8888, Usage::default());
        assert_eq!(
            manager
                .perform(PerformCommand::GetColorSpaceFromHandle(&handle))
                .unwrap(),
            PerformResult::ColorSpace(ColorSpace::Itu709)
        );
        assert_eq!(
            manager
                .perform(PerformCommand::GetMapSecureBufferInfo(&handle))
                .unwrap(),
            PerformResult::MapSecureBuffer(0)
        );
        assert_eq!(
            manager
                .perform(PerformCommand::GetInterlaceFlag(&handle))
                .unwrap(),
            PerformResult::Interlaced(false)
        );
        assert!(matches!(
            manager.perform(PerformCommand::GetGraphicsMetadata(&handle)),
            Err(GrallocError::Unsupported)
        ));
        assert_eq!(
            manager
                .perform(PerformCommand::GetRgbDataAddress(&handle))
                .unwrap(),
            PerformResult::RgbDataOffset(0)
        );
    }

    #[test]
    fn linear_format_clears_ubwc() {
        let manager = manager();
        let usage = Usage::new(ProducerUsage::PRIVATE_ALLOC_UBWC, ConsumerUsage::empty());
        let handle = allocate(&manager, PixelFormat::RGBA_8888, usage);
        assert_eq!(
            manager.perform(PerformCommand::GetUbwcFlag(&handle)).unwrap(),
            PerformResult::UbwcFlag(true)
        );
        match manager
            .perform(PerformCommand::GetRgbDataAddress(&handle))
            .unwrap()
        {
            PerformResult::RgbDataOffset(offset) => assert!(offset > 0),
            other => panic!("unexpected {:?}", other),
        }

        manager
            .set_metadata(
                &handle,
                MetadataField::LinearFormat,
                Some(&MetadataValue::LinearFormat(PixelFormat::RGBA_8888.0)),
            )
            .unwrap();
        assert_eq!(
            manager.perform(PerformCommand::GetUbwcFlag(&handle)).unwrap(),
            PerformResult::UbwcFlag(false)
        );
    }

    #[test]
    fn yuv_queries() {
        let manager = manager();
        let handle = allocate(&manager, PixelFormat::YCBCR_420_SP, Usage::default());
        match manager
            .perform(PerformCommand::GetYuvPlaneInfo(&handle))
            .unwrap()
        {
            PerformResult::YuvPlaneInfo(info) => {
                assert_eq!(info.y, 0);
                assert_eq!(info.cr, info.cb + 1);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(
            manager.perform(PerformCommand::GetRgbDataAddress(&handle)),
            Err(GrallocError::Unsupported)
        ));
    }

    #[test]
    fn size_is_aligned() {
        let manager = manager();
        match manager
            .perform(PerformCommand::GetBufferSizeAndDimensions {
                width: 10,
                height: 10,
                format: PixelFormat::RGBA_8888,
                usage: Usage::default(),
            })
            .unwrap()
        {
            PerformResult::SizeAndDimensions(dims) => {
                assert_eq!(dims.aligned_width, 32);
                assert_eq!(dims.size % 4096, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
