// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! layout: The format/geometry oracle.
//!
//! Given the dimensions, format and usage of a buffer this module derives its aligned dimensions,
//! allocation size, required alignment, and the placement of its planes. Everything here is pure
//! and offsets are relative to the start of the buffer.

use log::error;

use crate::formats::PixelFormat;
use crate::gralloc_os::page_size;
use crate::gralloc_utils::GrallocError;
use crate::gralloc_utils::GrallocResult;
use crate::gralloc_utils::SECURE_ALIGN;
use crate::gralloc_utils::SIZE_4K;
use crate::gralloc_utils::SIZE_8K;
use crate::gralloc_utils::SZ_2M;
use crate::media_layout::VenusFormat;
use crate::properties::PropertyStore;
use crate::usage::ConsumerUsage;
use crate::usage::ProducerUsage;
use crate::usage::Usage;

const RGB_ALIGNMENT: u32 = 32;

fn align(v: u32, a: u32) -> u32 {
    crate::align_up!(v, a)
}

/// Tunables of the layout rules.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GrallocConfig {
    /// Row alignment required by the GPU for linear YUV surfaces.
    pub gpu_pixel_alignment: u32,
    /// Whether compressed (UBWC) layouts may be chosen at all.
    pub ubwc_enabled: bool,
}

impl Default for GrallocConfig {
    fn default() -> GrallocConfig {
        GrallocConfig {
            gpu_pixel_alignment: 64,
            ubwc_enabled: true,
        }
    }
}

impl GrallocConfig {
    pub fn from_store(store: &dyn PropertyStore) -> GrallocConfig {
        let mut config = GrallocConfig::default();
        if store.get_bool("vendor.gralloc.disable_ubwc") {
            config.ubwc_enabled = false;
        }
        if let Some(alignment) = store.get_u32("vendor.gralloc.gpu_pixel_alignment") {
            if alignment > 0 {
                config.gpu_pixel_alignment = alignment;
            }
        }
        config
    }
}

/// The subset of a descriptor that determines memory layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BufferInfo {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub usage: Usage,
    pub layer_count: u32,
}

impl BufferInfo {
    pub fn new(width: u32, height: u32, format: PixelFormat, usage: Usage) -> BufferInfo {
        BufferInfo {
            width,
            height,
            format,
            usage,
            layer_count: 1,
        }
    }
}

/// Size and aligned dimensions of a buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SizeAndDimensions {
    pub size: u32,
    pub aligned_width: u32,
    pub aligned_height: u32,
}

fn venus_linear(format: PixelFormat) -> Option<VenusFormat> {
    match format {
        PixelFormat::YCBCR_420_SP_VENUS | PixelFormat::NV12_ENCODEABLE => Some(VenusFormat::Nv12),
        PixelFormat::YCRCB_420_SP_VENUS => Some(VenusFormat::Nv21),
        _ => None,
    }
}

fn venus_ubwc(format: PixelFormat) -> Option<VenusFormat> {
    match format {
        PixelFormat::NV12_ENCODEABLE
        | PixelFormat::YCBCR_420_SP_VENUS
        | PixelFormat::YCBCR_420_SP_VENUS_UBWC => Some(VenusFormat::Nv12Ubwc),
        PixelFormat::YCBCR_420_TP10_UBWC => Some(VenusFormat::Nv12Bpp10Ubwc),
        PixelFormat::YCBCR_420_P010_UBWC => Some(VenusFormat::P010Ubwc),
        _ => None,
    }
}

/// Returns true when the buffer will be laid out compressed.
pub fn is_ubwc_enabled(config: &GrallocConfig, format: PixelFormat, usage: &Usage) -> bool {
    if format.is_ubwc() {
        return true;
    }

    if !config.ubwc_enabled {
        return false;
    }

    let requested = usage.producer.contains(ProducerUsage::PRIVATE_ALLOC_UBWC)
        || usage.consumer.contains(ConsumerUsage::CLIENT_TARGET);
    requested && format.supports_ubwc() && !usage.cpu_can_access()
}

/// Mipmapped and cube map surfaces cannot be described by these layouts.
pub fn check_gpu_usage(usage: &Usage) -> GrallocResult<()> {
    if usage.producer.contains(ProducerUsage::GPU_MIPMAP_COMPLETE) {
        error!("GPU_MIPMAP_COMPLETE not supported");
        return Err(GrallocError::Unsupported);
    }
    if usage.producer.contains(ProducerUsage::GPU_CUBE_MAP) {
        error!("GPU_CUBE_MAP not supported");
        return Err(GrallocError::Unsupported);
    }
    Ok(())
}

/// Aligned width and height of a compressed YUV buffer.
pub fn yuv_ubwc_dimensions(width: u32, height: u32, format: PixelFormat) -> (u32, u32) {
    match venus_ubwc(format) {
        Some(VenusFormat::Nv12Bpp10Ubwc) => (
            VenusFormat::Nv12Bpp10Ubwc.y_stride(width) * 3 / 4,
            VenusFormat::Nv12Bpp10Ubwc.y_scanlines(height),
        ),
        Some(VenusFormat::P010Ubwc) => (
            VenusFormat::P010Ubwc.y_stride(width) / 2,
            VenusFormat::P010Ubwc.y_scanlines(height),
        ),
        Some(venus) => (venus.y_stride(width), venus.y_scanlines(height)),
        None => {
            error!("no compressed layout for {:?}", format);
            (0, 0)
        }
    }
}

/// Aligned width and height (in pixels) of a buffer.
pub fn aligned_dimensions(config: &GrallocConfig, info: &BufferInfo) -> (u32, u32) {
    let width = info.width;
    let height = info.height;
    let format = info.format;

    if format.is_uncompressed_rgb() {
        return (align(width, RGB_ALIGNMENT), align(height, RGB_ALIGNMENT));
    }

    if is_ubwc_enabled(config, format, &info.usage) {
        return yuv_ubwc_dimensions(width, height, format);
    }

    if let Some(venus) = venus_linear(format) {
        return (venus.y_stride(width), venus.y_scanlines(height));
    }

    let aligned_width = match format {
        PixelFormat::YCRCB_420_SP | PixelFormat::YCBCR_420_SP => {
            align(width, config.gpu_pixel_alignment)
        }
        PixelFormat::YCRCB_420_SP_ADRENO => align(width, 32),
        PixelFormat::RAW16 | PixelFormat::Y16 | PixelFormat::Y8 => align(width, 16),
        PixelFormat::RAW12 => align(width * 12 / 8, 8),
        PixelFormat::RAW10 => align(width * 10 / 8, 8),
        PixelFormat::RAW8 => align(width, 8),
        PixelFormat::YCBCR_420_SP_TILED => align(width, 128),
        PixelFormat::YV12
        | PixelFormat::YCBCR_422_SP
        | PixelFormat::YCRCB_422_SP
        | PixelFormat::YCBCR_422_I
        | PixelFormat::YCRCB_422_I
        | PixelFormat::YCBCR_420_P010 => align(width, 16),
        PixelFormat::NV21_ZSL => return (align(width, 64), align(height, 64)),
        _ => width,
    };
    (aligned_width, height)
}

/// Alignment, in bytes, of the allocation backing a buffer.
pub fn data_alignment(format: PixelFormat, usage: &Usage) -> GrallocResult<u32> {
    let mut alignment = u32::try_from(page_size()?)?;
    if format == PixelFormat::YCBCR_420_SP_TILED {
        alignment = 8192;
    }

    if usage.protected() {
        alignment = if usage.producer.contains(ProducerUsage::CAMERA)
            || usage
                .consumer
                .contains(ConsumerUsage::PRIVATE_SECURE_DISPLAY)
        {
            SZ_2M
        } else {
            SECURE_ALIGN
        };
    }
    Ok(alignment)
}

/// Bytes of compression metadata preceding the pixels of a compressed RGB buffer.
pub fn rgb_ubwc_meta_size(width: u32, height: u32, bpp: u32) -> GrallocResult<u32> {
    let (block_width, block_height) = match bpp {
        2 | 4 => (16, 4),
        8 => (8, 4),
        16 => (4, 4),
        _ => {
            error!("no compressed block size for {} bytes per pixel", bpp);
            return Err(GrallocError::Unsupported);
        }
    };

    let meta_height = align((height + block_height - 1) / block_height, 16);
    let meta_width = align((width + block_width - 1) / block_width, 64);
    Ok(align(meta_width * meta_height, 4096))
}

fn ubwc_size(
    width: u32,
    height: u32,
    format: PixelFormat,
    aligned_width: u32,
    aligned_height: u32,
) -> GrallocResult<u32> {
    match format {
        PixelFormat::BGR_565
        | PixelFormat::RGBA_8888
        | PixelFormat::RGBX_8888
        | PixelFormat::RGBA_1010102
        | PixelFormat::RGBX_1010102 => {
            let bpp = format
                .rgb_bytes_per_pixel()
                .ok_or(GrallocError::Unsupported)?;
            Ok(aligned_width * aligned_height * bpp + rgb_ubwc_meta_size(width, height, bpp)?)
        }
        _ => match venus_ubwc(format) {
            Some(venus) => Ok(venus.buffer_size(width, height)),
            None => {
                error!("no compressed layout for {:?}", format);
                Err(GrallocError::Unsupported)
            }
        },
    }
}

/// Allocation size of a buffer with the given aligned dimensions, including every layer.
pub fn buffer_size(
    config: &GrallocConfig,
    info: &BufferInfo,
    aligned_width: u32,
    aligned_height: u32,
) -> GrallocResult<u32> {
    let format = info.format;
    let width = info.width;
    let height = info.height;
    let aw = aligned_width;
    let ah = aligned_height;

    check_gpu_usage(&info.usage)?;

    let size = if is_ubwc_enabled(config, format, &info.usage) {
        ubwc_size(width, height, format, aw, ah)?
    } else if let Some(bpp) = format.rgb_bytes_per_pixel() {
        aw * ah * bpp
    } else if let Some(venus) = venus_linear(format) {
        venus.buffer_size(width, height)
    } else {
        match format {
            PixelFormat::RAW16 | PixelFormat::Y16 => aw * ah * 2,
            PixelFormat::RAW10 | PixelFormat::RAW12 => align(aw * ah, SIZE_4K),
            PixelFormat::RAW8 | PixelFormat::Y8 => aw * ah,
            PixelFormat::YCRCB_420_SP_ADRENO => {
                align(aw * ah, SIZE_4K)
                    + align(2 * align(width / 2, 32) * align(height / 2, 32), SIZE_4K)
            }
            PixelFormat::YCBCR_420_SP_TILED => {
                align(aw * ah, SIZE_8K) + align(aw * align(height / 2, 32), SIZE_8K)
            }
            PixelFormat::YV12 => {
                if width & 1 != 0 || height & 1 != 0 {
                    error!("w or h is odd for the YV12 format");
                    return Err(GrallocError::BadValue("odd YV12 dimensions"));
                }
                align(aw * ah + align(aw / 2, 16) * (ah / 2) * 2, SIZE_4K)
            }
            PixelFormat::YCBCR_420_SP | PixelFormat::YCRCB_420_SP => {
                align(aw * ah + aw * ah / 2 + 1, SIZE_4K)
            }
            PixelFormat::YCBCR_420_P010 => align(aw * ah * 2 + aw * ah + 1, SIZE_4K),
            PixelFormat::YCBCR_422_SP
            | PixelFormat::YCRCB_422_SP
            | PixelFormat::YCBCR_422_I
            | PixelFormat::YCRCB_422_I => {
                if width & 1 != 0 {
                    error!("width is odd for the YUV422 format");
                    return Err(GrallocError::BadValue("odd YUV422 width"));
                }
                align(aw * ah * 2, SIZE_4K)
            }
            PixelFormat::BLOB | PixelFormat::RAW_OPAQUE => {
                if height != 1 {
                    error!("buffers with format {:?} must have height 1", format);
                    return Err(GrallocError::BadValue("blob height must be 1"));
                }
                width
            }
            PixelFormat::NV21_ZSL => align(aw * ah + aw * ah / 2, SIZE_4K),
            _ => {
                error!("unrecognized pixel format {:?}", format);
                return Err(GrallocError::Unsupported);
            }
        }
    };

    if size == 0 {
        return Err(GrallocError::BadValue("zero sized buffer"));
    }

    let alignment = data_alignment(format, &info.usage)?;
    let layer_count = info.layer_count.max(1);
    let aligned = align(size, alignment);
    checked_arithmetic!(aligned * layer_count)
}

/// Combined `aligned_dimensions` and `buffer_size`.
pub fn buffer_size_and_dimensions(
    config: &GrallocConfig,
    info: &BufferInfo,
) -> GrallocResult<SizeAndDimensions> {
    let (aligned_width, aligned_height) = aligned_dimensions(config, info);
    let size = buffer_size(config, info, aligned_width, aligned_height)?;
    Ok(SizeAndDimensions {
        size,
        aligned_width,
        aligned_height,
    })
}

/// Placement of the luma and chroma samples of a YUV buffer.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct YuvPlaneInfo {
    pub y: u64,
    pub cb: u64,
    pub cr: u64,
    pub y_stride: u32,
    pub c_stride: u32,
    pub chroma_step: u32,
}

fn ubwc_sp_plane_info(venus: VenusFormat, width: u32, height: u32) -> YuvPlaneInfo {
    let [y_meta_size, y_size, c_meta_size, _] = venus.ubwc_plane_sizes(width, height);
    let cb = u64::from(y_meta_size) + u64::from(y_size) + u64::from(c_meta_size);
    YuvPlaneInfo {
        y: u64::from(y_meta_size),
        cb,
        cr: cb + 1,
        y_stride: venus.y_stride(width),
        c_stride: venus.uv_stride(width),
        chroma_step: 2,
    }
}

fn sp_plane_info(width: u32, height: u32, bpp: u32) -> YuvPlaneInfo {
    let stride = width * bpp;
    let cb = u64::from(stride) * u64::from(height);
    YuvPlaneInfo {
        y: 0,
        cb,
        cr: cb + 1,
        y_stride: stride,
        c_stride: stride,
        chroma_step: 2 * bpp,
    }
}

/// Plane placement of a YUV buffer whose aligned dimensions are `width` x `height`.
pub fn yuv_plane_info(format: PixelFormat, width: u32, height: u32) -> GrallocResult<YuvPlaneInfo> {
    let info = match format {
        PixelFormat::YCBCR_420_SP
        | PixelFormat::YCBCR_422_SP
        | PixelFormat::YCBCR_420_SP_VENUS
        | PixelFormat::NV12_ENCODEABLE => sp_plane_info(width, height, 1),
        PixelFormat::YCBCR_420_P010 => sp_plane_info(width, height, 2),
        PixelFormat::YCBCR_420_SP_VENUS_UBWC => {
            ubwc_sp_plane_info(VenusFormat::Nv12Ubwc, width, height)
        }
        PixelFormat::YCBCR_420_TP10_UBWC => YuvPlaneInfo {
            chroma_step: 3,
            ..ubwc_sp_plane_info(VenusFormat::Nv12Bpp10Ubwc, width, height)
        },
        PixelFormat::YCBCR_420_P010_UBWC => YuvPlaneInfo {
            chroma_step: 4,
            ..ubwc_sp_plane_info(VenusFormat::P010Ubwc, width, height)
        },
        f if f.is_cr_first() => {
            let mut info = sp_plane_info(width, height, 1);
            std::mem::swap(&mut info.cb, &mut info.cr);
            info
        }
        PixelFormat::YV12 => {
            let y_stride = width;
            let c_stride = align(width / 2, 16);
            let cr = u64::from(y_stride) * u64::from(height);
            YuvPlaneInfo {
                y: 0,
                cr,
                cb: cr + u64::from(c_stride) * u64::from(height) / 2,
                y_stride,
                c_stride,
                chroma_step: 1,
            }
        }
        _ => {
            log::debug!("no plane info for {:?}", format);
            return Err(GrallocError::Unsupported);
        }
    };
    Ok(info)
}

/// Stride and offset of every plane, as reported to importers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BufferLayout {
    pub num_planes: u32,
    pub stride: [u32; 4],
    pub offset: [u32; 4],
}

/// Describes the planes of a buffer of `format` whose aligned dimensions are `width` x `height`.
pub fn buffer_layout(
    format: PixelFormat,
    width: u32,
    height: u32,
    ubwc_aligned: bool,
) -> GrallocResult<BufferLayout> {
    let mut layout = BufferLayout {
        num_planes: 1,
        ..Default::default()
    };

    let rgb_stride = match format {
        PixelFormat::RGB_565
        | PixelFormat::BGR_565
        | PixelFormat::RGBA_5551
        | PixelFormat::RGBA_4444 => Some(width * 2),
        PixelFormat::RGB_888 => Some(width * 3),
        PixelFormat::RGBA_FP16 => None,
        f => f.rgb_bytes_per_pixel().map(|_| width * 4),
    };
    if let Some(stride) = rgb_stride {
        layout.stride[0] = stride;
        return Ok(layout);
    }

    let yuv = yuv_plane_info(format, width, height)?;
    layout.num_planes = 2;
    layout.stride[0] = yuv.y_stride;
    layout.offset[0] = u32::try_from(yuv.y)?;
    layout.stride[1] = yuv.c_stride;
    match format {
        PixelFormat::YCBCR_420_SP
        | PixelFormat::YCBCR_422_SP
        | PixelFormat::YCBCR_420_SP_VENUS
        | PixelFormat::NV12_ENCODEABLE
        | PixelFormat::YCBCR_420_SP_VENUS_UBWC
        | PixelFormat::YCBCR_420_P010
        | PixelFormat::YCBCR_420_TP10_UBWC
        | PixelFormat::YCBCR_420_P010_UBWC => layout.offset[1] = u32::try_from(yuv.cb)?,
        PixelFormat::YCRCB_420_SP
        | PixelFormat::YCRCB_420_SP_VENUS
        | PixelFormat::YCRCB_422_SP => layout.offset[1] = u32::try_from(yuv.cr)?,
        PixelFormat::YV12 => {
            layout.offset[1] = u32::try_from(yuv.cr)?;
            layout.stride[2] = yuv.c_stride;
            layout.offset[2] = u32::try_from(yuv.cb)?;
            layout.num_planes = 3;
        }
        _ => {
            log::warn!("no plane layout for {:?}", format);
            return Err(GrallocError::Unsupported);
        }
    }

    if ubwc_aligned {
        layout.offset = [0; 4];
    }
    Ok(layout)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlexComponent {
    Y,
    Cb,
    Cr,
}

/// One plane of a flexible YCbCr description.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlexPlane {
    pub component: FlexComponent,
    pub offset: u64,
    pub bits_per_component: u32,
    pub bits_used: u32,
    pub h_increment: u32,
    pub v_increment: u32,
    pub h_subsampling: u32,
    pub v_subsampling: u32,
}

pub fn num_flex_planes(format: PixelFormat) -> GrallocResult<u32> {
    if format.is_yuv() {
        Ok(3)
    } else {
        Err(GrallocError::Unsupported)
    }
}

/// Flexible description of a YUV buffer, derived from its plane placement.
pub fn flex_layout(format: PixelFormat, yuv: &YuvPlaneInfo) -> GrallocResult<Vec<FlexPlane>> {
    num_flex_planes(format)?;
    let chroma = |component, offset| FlexPlane {
        component,
        offset,
        bits_per_component: 8,
        bits_used: 8,
        h_increment: yuv.chroma_step,
        v_increment: yuv.c_stride,
        h_subsampling: 2,
        v_subsampling: 2,
    };
    Ok(vec![
        FlexPlane {
            component: FlexComponent::Y,
            offset: yuv.y,
            bits_per_component: 8,
            bits_used: 8,
            h_increment: 1,
            v_increment: yuv.y_stride,
            h_subsampling: 1,
            v_subsampling: 1,
        },
        chroma(FlexComponent::Cb, yuv.cb),
        chroma(FlexComponent::Cr, yuv.cr),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::MapPropertyStore;

    fn info(width: u32, height: u32, format: PixelFormat) -> BufferInfo {
        BufferInfo::new(width, height, format, Usage::default())
    }

    #[test]
    fn rgb_sizes() {
        let config = GrallocConfig::default();
        let dims = buffer_size_and_dimensions(&config, &info(256, 256, PixelFormat::RGBA_8888))
            .unwrap();
        assert_eq!(dims.aligned_width, 256);
        assert_eq!(dims.aligned_height, 256);
        assert_eq!(dims.size, 256 * 256 * 4);

        let dims =
            buffer_size_and_dimensions(&config, &info(100, 10, PixelFormat::RGB_565)).unwrap();
        assert_eq!((dims.aligned_width, dims.aligned_height), (128, 32));
        assert_eq!(dims.size, 8192);
    }

    #[test]
    fn layer_count_multiplies() {
        let config = GrallocConfig::default();
        let mut i = info(64, 64, PixelFormat::RGBA_8888);
        i.layer_count = 3;
        let dims = buffer_size_and_dimensions(&config, &i).unwrap();
        assert_eq!(dims.size, 3 * 64 * 64 * 4);
    }

    #[test]
    fn invalid_geometry() {
        let config = GrallocConfig::default();
        assert!(buffer_size_and_dimensions(&config, &info(64, 2, PixelFormat::BLOB)).is_err());
        assert!(buffer_size_and_dimensions(&config, &info(63, 64, PixelFormat::YV12)).is_err());
        assert!(
            buffer_size_and_dimensions(&config, &info(63, 64, PixelFormat::YCBCR_422_SP)).is_err()
        );
        assert!(buffer_size_and_dimensions(&config, &info(64, 64, PixelFormat(0x9999))).is_err());

        let blob = buffer_size_and_dimensions(&config, &info(5000, 1, PixelFormat::BLOB)).unwrap();
        assert_eq!(blob.size, 8192);
    }

    #[test]
    fn unsupported_gpu_usage() {
        let config = GrallocConfig::default();
        let mut i = info(64, 64, PixelFormat::RGBA_8888);
        i.usage.producer = ProducerUsage::GPU_CUBE_MAP;
        assert!(matches!(
            buffer_size_and_dimensions(&config, &i),
            Err(GrallocError::Unsupported)
        ));
    }

    #[test]
    fn ubwc_selection() {
        let config = GrallocConfig::default();
        let ubwc = Usage::new(ProducerUsage::PRIVATE_ALLOC_UBWC, ConsumerUsage::empty());
        assert!(is_ubwc_enabled(&config, PixelFormat::RGBA_8888, &ubwc));
        assert!(!is_ubwc_enabled(&config, PixelFormat::BGRA_8888, &ubwc));

        let cpu = Usage::new(
            ProducerUsage::PRIVATE_ALLOC_UBWC | ProducerUsage::CPU_WRITE,
            ConsumerUsage::empty(),
        );
        assert!(!is_ubwc_enabled(&config, PixelFormat::RGBA_8888, &cpu));
        assert!(is_ubwc_enabled(
            &config,
            PixelFormat::YCBCR_420_TP10_UBWC,
            &Usage::default()
        ));

        let mut store = MapPropertyStore::new();
        store.set("vendor.gralloc.disable_ubwc", "1");
        let disabled = GrallocConfig::from_store(&store);
        assert!(!is_ubwc_enabled(&disabled, PixelFormat::RGBA_8888, &ubwc));
    }

    #[test]
    fn ubwc_rgb_size_includes_meta() {
        let config = GrallocConfig::default();
        let i = BufferInfo::new(
            256,
            256,
            PixelFormat::RGBA_8888,
            Usage::new(ProducerUsage::PRIVATE_ALLOC_UBWC, ConsumerUsage::empty()),
        );
        let dims = buffer_size_and_dimensions(&config, &i).unwrap();
        let meta = rgb_ubwc_meta_size(256, 256, 4).unwrap();
        assert_eq!(meta, 4096);
        assert_eq!(dims.size, 256 * 256 * 4 + meta);
    }

    #[test]
    fn protected_alignment() {
        let secure = Usage::new(ProducerUsage::PROTECTED, ConsumerUsage::empty());
        assert_eq!(
            data_alignment(PixelFormat::RGBA_8888, &secure).unwrap(),
            SECURE_ALIGN
        );
        let camera = Usage::new(
            ProducerUsage::PROTECTED | ProducerUsage::CAMERA,
            ConsumerUsage::empty(),
        );
        assert_eq!(data_alignment(PixelFormat::RGBA_8888, &camera).unwrap(), SZ_2M);
        assert_eq!(
            data_alignment(PixelFormat::YCBCR_420_SP_TILED, &Usage::default()).unwrap(),
            8192
        );
    }

    #[test]
    fn yuv_planes() {
        let nv12 = yuv_plane_info(PixelFormat::YCBCR_420_SP_VENUS, 128, 64).unwrap();
        assert_eq!(nv12.cb, 128 * 64);
        assert_eq!(nv12.cr, 128 * 64 + 1);
        assert_eq!(nv12.chroma_step, 2);

        let nv21 = yuv_plane_info(PixelFormat::YCRCB_420_SP, 128, 64).unwrap();
        assert_eq!(nv21.cr, 128 * 64);
        assert_eq!(nv21.cb, 128 * 64 + 1);

        let yv12 = yuv_plane_info(PixelFormat::YV12, 64, 32).unwrap();
        assert_eq!(yv12.c_stride, 32);
        assert_eq!(yv12.cr, 64 * 32);
        assert_eq!(yv12.cb, 64 * 32 + 32 * 16);

        let tp10 = yuv_plane_info(PixelFormat::YCBCR_420_TP10_UBWC, 1920, 1080).unwrap();
        assert_eq!(tp10.chroma_step, 3);
        assert!(tp10.y > 0);

        assert!(yuv_plane_info(PixelFormat::YCBCR_422_I, 64, 64).is_err());
    }

    #[test]
    fn layouts() {
        let rgb = buffer_layout(PixelFormat::RGB_888, 10, 10, false).unwrap();
        assert_eq!(rgb.num_planes, 1);
        assert_eq!(rgb.stride[0], 30);

        let yv12 = buffer_layout(PixelFormat::YV12, 64, 32, false).unwrap();
        assert_eq!(yv12.num_planes, 3);
        assert_eq!(yv12.offset[1], 64 * 32);

        let ubwc = buffer_layout(PixelFormat::YCBCR_420_SP_VENUS_UBWC, 1920, 1088, true).unwrap();
        assert_eq!(ubwc.num_planes, 2);
        assert_eq!(ubwc.offset, [0; 4]);
    }

    #[test]
    fn flex() {
        assert!(num_flex_planes(PixelFormat::RGBA_8888).is_err());
        let yuv = yuv_plane_info(PixelFormat::YCBCR_420_SP, 64, 64).unwrap();
        let planes = flex_layout(PixelFormat::YCBCR_420_SP, &yuv).unwrap();
        assert_eq!(planes.len(), 3);
        assert_eq!(planes[0].v_increment, 64);
        assert_eq!(planes[1].component, FlexComponent::Cb);
        assert_eq!(planes[2].h_increment, 2);
    }
}
