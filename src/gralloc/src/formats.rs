// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! formats: Pixel format identifiers and their classification.

use std::fmt;

/// A HAL pixel format identifier. Vendor formats live in the `0x100..` and `0x7FA3_0C00..`
/// ranges.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub struct PixelFormat(pub u32);

impl PixelFormat {
    pub const RGBA_8888: PixelFormat = PixelFormat(0x1);
    pub const RGBX_8888: PixelFormat = PixelFormat(0x2);
    pub const RGB_888: PixelFormat = PixelFormat(0x3);
    pub const RGB_565: PixelFormat = PixelFormat(0x4);
    pub const BGRA_8888: PixelFormat = PixelFormat(0x5);
    pub const RGBA_5551: PixelFormat = PixelFormat(0x6);
    pub const RGBA_4444: PixelFormat = PixelFormat(0x7);
    pub const YCBCR_422_SP: PixelFormat = PixelFormat(0x10);
    pub const YCRCB_420_SP: PixelFormat = PixelFormat(0x11);
    pub const YCBCR_422_I: PixelFormat = PixelFormat(0x14);
    pub const RGBA_FP16: PixelFormat = PixelFormat(0x16);
    pub const RAW16: PixelFormat = PixelFormat(0x20);
    pub const BLOB: PixelFormat = PixelFormat(0x21);
    pub const IMPLEMENTATION_DEFINED: PixelFormat = PixelFormat(0x22);
    pub const YCBCR_420_888: PixelFormat = PixelFormat(0x23);
    pub const RAW_OPAQUE: PixelFormat = PixelFormat(0x24);
    pub const RAW10: PixelFormat = PixelFormat(0x25);
    pub const RAW12: PixelFormat = PixelFormat(0x26);
    pub const RGBA_1010102: PixelFormat = PixelFormat(0x2B);
    pub const YCBCR_420_P010: PixelFormat = PixelFormat(0x36);
    pub const Y8: PixelFormat = PixelFormat(0x2020_3859);
    pub const Y16: PixelFormat = PixelFormat(0x2036_3159);
    pub const YV12: PixelFormat = PixelFormat(0x3231_5659);

    pub const NV12_ENCODEABLE: PixelFormat = PixelFormat(0x102);
    pub const YCBCR_420_SP: PixelFormat = PixelFormat(0x109);
    pub const YCRCB_422_SP: PixelFormat = PixelFormat(0x10B);
    pub const YCRCB_422_I: PixelFormat = PixelFormat(0x111);
    pub const BGRX_8888: PixelFormat = PixelFormat(0x112);
    pub const NV21_ZSL: PixelFormat = PixelFormat(0x113);
    pub const YCRCB_420_SP_VENUS: PixelFormat = PixelFormat(0x114);
    pub const BGR_565: PixelFormat = PixelFormat(0x115);
    pub const ARGB_2101010: PixelFormat = PixelFormat(0x117);
    pub const RGBX_1010102: PixelFormat = PixelFormat(0x118);
    pub const XRGB_2101010: PixelFormat = PixelFormat(0x119);
    pub const BGRA_1010102: PixelFormat = PixelFormat(0x11A);
    pub const ABGR_2101010: PixelFormat = PixelFormat(0x11B);
    pub const BGRX_1010102: PixelFormat = PixelFormat(0x11C);
    pub const XBGR_2101010: PixelFormat = PixelFormat(0x11D);
    pub const RAW8: PixelFormat = PixelFormat(0x123);
    pub const YCBCR_420_P010_UBWC: PixelFormat = PixelFormat(0x124);
    pub const YCRCB_420_SP_ADRENO: PixelFormat = PixelFormat(0x7FA3_0C01);
    pub const YCBCR_420_SP_TILED: PixelFormat = PixelFormat(0x7FA3_0C03);
    pub const YCBCR_420_SP_VENUS: PixelFormat = PixelFormat(0x7FA3_0C04);
    pub const YCBCR_420_SP_VENUS_UBWC: PixelFormat = PixelFormat(0x7FA3_0C06);
    pub const YCBCR_420_TP10_UBWC: PixelFormat = PixelFormat(0x7FA3_0C09);

    fn name(&self) -> Option<&'static str> {
        let name = match *self {
            PixelFormat::RGBA_8888 => "RGBA_8888",
            PixelFormat::RGBX_8888 => "RGBX_8888",
            PixelFormat::RGB_888 => "RGB_888",
            PixelFormat::RGB_565 => "RGB_565",
            PixelFormat::BGRA_8888 => "BGRA_8888",
            PixelFormat::RGBA_5551 => "RGBA_5551",
            PixelFormat::RGBA_4444 => "RGBA_4444",
            PixelFormat::YCBCR_422_SP => "YCbCr_422_SP",
            PixelFormat::YCRCB_420_SP => "YCrCb_420_SP",
            PixelFormat::YCBCR_422_I => "YCbCr_422_I",
            PixelFormat::RGBA_FP16 => "RGBA_FP16",
            PixelFormat::RAW16 => "RAW16",
            PixelFormat::BLOB => "BLOB",
            PixelFormat::IMPLEMENTATION_DEFINED => "IMPLEMENTATION_DEFINED",
            PixelFormat::YCBCR_420_888 => "YCbCr_420_888",
            PixelFormat::RAW_OPAQUE => "RAW_OPAQUE",
            PixelFormat::RAW10 => "RAW10",
            PixelFormat::RAW12 => "RAW12",
            PixelFormat::RGBA_1010102 => "RGBA_1010102",
            PixelFormat::YCBCR_420_P010 => "YCbCr_420_P010",
            PixelFormat::Y8 => "Y8",
            PixelFormat::Y16 => "Y16",
            PixelFormat::YV12 => "YV12",
            PixelFormat::NV12_ENCODEABLE => "NV12_ENCODEABLE",
            PixelFormat::YCBCR_420_SP => "YCbCr_420_SP",
            PixelFormat::YCRCB_422_SP => "YCrCb_422_SP",
            PixelFormat::YCRCB_422_I => "YCrCb_422_I",
            PixelFormat::BGRX_8888 => "BGRX_8888",
            PixelFormat::NV21_ZSL => "NV21_ZSL",
            PixelFormat::YCRCB_420_SP_VENUS => "YCrCb_420_SP_VENUS",
            PixelFormat::BGR_565 => "BGR_565",
            PixelFormat::ARGB_2101010 => "ARGB_2101010",
            PixelFormat::RGBX_1010102 => "RGBX_1010102",
            PixelFormat::XRGB_2101010 => "XRGB_2101010",
            PixelFormat::BGRA_1010102 => "BGRA_1010102",
            PixelFormat::ABGR_2101010 => "ABGR_2101010",
            PixelFormat::BGRX_1010102 => "BGRX_1010102",
            PixelFormat::XBGR_2101010 => "XBGR_2101010",
            PixelFormat::RAW8 => "RAW8",
            PixelFormat::YCBCR_420_P010_UBWC => "YCbCr_420_P010_UBWC",
            PixelFormat::YCRCB_420_SP_ADRENO => "YCrCb_420_SP_ADRENO",
            PixelFormat::YCBCR_420_SP_TILED => "YCbCr_420_SP_TILED",
            PixelFormat::YCBCR_420_SP_VENUS => "YCbCr_420_SP_VENUS",
            PixelFormat::YCBCR_420_SP_VENUS_UBWC => "YCbCr_420_SP_VENUS_UBWC",
            PixelFormat::YCBCR_420_TP10_UBWC => "YCbCr_420_TP10_UBWC",
            _ => return None,
        };
        Some(name)
    }

    pub fn is_yuv(&self) -> bool {
        matches!(
            *self,
            PixelFormat::YCBCR_420_SP
                | PixelFormat::YCBCR_422_SP
                | PixelFormat::YCBCR_420_SP_VENUS
                | PixelFormat::NV12_ENCODEABLE
                | PixelFormat::YCBCR_420_SP_VENUS_UBWC
                | PixelFormat::YCRCB_420_SP
                | PixelFormat::YCRCB_422_SP
                | PixelFormat::YCRCB_420_SP_ADRENO
                | PixelFormat::YCRCB_420_SP_VENUS
                | PixelFormat::NV21_ZSL
                | PixelFormat::RAW16
                | PixelFormat::Y16
                | PixelFormat::RAW12
                | PixelFormat::RAW10
                | PixelFormat::YV12
                | PixelFormat::Y8
                | PixelFormat::YCBCR_420_P010
                | PixelFormat::YCBCR_420_TP10_UBWC
                | PixelFormat::YCBCR_420_P010_UBWC
                | PixelFormat::BLOB
                | PixelFormat::RAW_OPAQUE
        )
    }

    pub fn is_uncompressed_rgb(&self) -> bool {
        self.rgb_bytes_per_pixel().is_some()
    }

    /// Bytes per pixel of an uncompressed RGB format, or `None` for every other format.
    pub fn rgb_bytes_per_pixel(&self) -> Option<u32> {
        match *self {
            PixelFormat::RGBA_FP16 => Some(8),
            PixelFormat::RGBA_8888
            | PixelFormat::RGBX_8888
            | PixelFormat::BGRA_8888
            | PixelFormat::BGRX_8888
            | PixelFormat::RGBA_1010102
            | PixelFormat::ARGB_2101010
            | PixelFormat::RGBX_1010102
            | PixelFormat::XRGB_2101010
            | PixelFormat::BGRA_1010102
            | PixelFormat::ABGR_2101010
            | PixelFormat::BGRX_1010102
            | PixelFormat::XBGR_2101010 => Some(4),
            PixelFormat::RGB_888 => Some(3),
            PixelFormat::RGB_565
            | PixelFormat::BGR_565
            | PixelFormat::RGBA_5551
            | PixelFormat::RGBA_4444 => Some(2),
            _ => None,
        }
    }

    /// Formats that are compressed by definition.
    pub fn is_ubwc(&self) -> bool {
        matches!(
            *self,
            PixelFormat::YCBCR_420_SP_VENUS_UBWC
                | PixelFormat::YCBCR_420_TP10_UBWC
                | PixelFormat::YCBCR_420_P010_UBWC
        )
    }

    /// Linear formats that have a compressed variant.
    pub fn supports_ubwc(&self) -> bool {
        matches!(
            *self,
            PixelFormat::BGR_565
                | PixelFormat::RGBA_8888
                | PixelFormat::RGBX_8888
                | PixelFormat::NV12_ENCODEABLE
                | PixelFormat::YCBCR_420_SP_VENUS
                | PixelFormat::RGBA_1010102
                | PixelFormat::RGBX_1010102
        )
    }

    /// Semi-planar formats with the Cr sample first in the chroma plane.
    pub fn is_cr_first(&self) -> bool {
        matches!(
            *self,
            PixelFormat::YCRCB_420_SP
                | PixelFormat::YCRCB_422_SP
                | PixelFormat::YCRCB_420_SP_ADRENO
                | PixelFormat::YCRCB_420_SP_VENUS
                | PixelFormat::NV21_ZSL
                | PixelFormat::RAW16
                | PixelFormat::Y16
                | PixelFormat::RAW10
                | PixelFormat::RAW8
                | PixelFormat::Y8
        )
    }

    pub fn buffer_type(&self) -> BufferType {
        if self.is_yuv() {
            BufferType::Video
        } else {
            BufferType::Ui
        }
    }
}

impl fmt::Debug for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "format(0x{:x})", self.0),
        }
    }
}

/// Broad class of a buffer, derived from its format.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BufferType {
    Ui,
    Video,
}
