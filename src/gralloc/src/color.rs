// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! color: Color description enums stored in buffer metadata, and the coarse color space derived
//! from them.

use zerocopy::AsBytes;
use zerocopy::FromBytes;

use crate::gralloc_utils::GrallocError;
use crate::gralloc_utils::GrallocResult;

macro_rules! u32_enum {
    ($(#[$attr:meta])* $name:ident { $($variant:ident = $value:literal),+ $(,)? }) => {
        $(#[$attr])*
        #[repr(u32)]
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant = $value),+
        }

        impl TryFrom<u32> for $name {
            type Error = GrallocError;

            fn try_from(value: u32) -> GrallocResult<$name> {
                match value {
                    $($value => Ok($name::$variant),)+
                    _ => Err(GrallocError::BadValue(stringify!($name))),
                }
            }
        }

        impl From<$name> for u32 {
            fn from(value: $name) -> u32 {
                value as u32
            }
        }
    };
}

u32_enum! {
    ColorRange {
        Limited = 0,
        Full = 1,
        Extended = 2,
    }
}

u32_enum! {
    ColorPrimaries {
        Bt709_5 = 1,
        Bt470_6M = 4,
        Bt601_6_625 = 5,
        Bt601_6_525 = 6,
        Smpte240M = 7,
        GenericFilm = 8,
        Bt2020 = 9,
        SmpteSt428 = 10,
        AdobeRgb = 11,
        DciP3 = 12,
        Ebu3213 = 22,
    }
}

u32_enum! {
    GammaTransfer {
        Srgb = 1,
        Gamma2_2 = 4,
        Gamma2_8 = 5,
        Smpte170M = 6,
        Smpte240M = 7,
        Linear = 8,
        Log = 9,
        LogSqrt = 10,
        XvYcc = 11,
        Bt1361 = 12,
        SYcc = 13,
        Bt2020_2_1 = 14,
        Bt2020_2_2 = 15,
        SmpteSt2084 = 16,
        St428 = 17,
        Hlg = 18,
    }
}

u32_enum! {
    MatrixCoefficients {
        Identity = 0,
        Bt709_5 = 1,
        Fcc = 4,
        Bt601_6_625 = 5,
        Bt601_6_525 = 6,
        Smpte240M = 7,
        YCgCo = 8,
        Bt2020 = 9,
        Bt2020Constant = 10,
        Bt601_6Unadjusted = 11,
        DciP3 = 12,
        ChromaNonConstant = 13,
    }
}

u32_enum! {
    /// The coarse color space of a YUV buffer.
    ColorSpace {
        Itu601 = 0,
        Itu601Full = 1,
        Itu709 = 2,
        Itu709Full = 3,
        Itu2020 = 4,
        Itu2020Full = 5,
    }
}

pub const MAX_DYNAMIC_METADATA: usize = 1024;

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, AsBytes, FromBytes)]
pub struct MasteringDisplay {
    pub enabled: u32,
    /// Chromaticity of the red, green and blue primaries in units of 0.00002.
    pub primaries_rgb: [[u32; 2]; 3],
    pub primaries_white: [u32; 2],
    /// In units of 1 cd/m2.
    pub max_display_luminance: u32,
    /// In units of 0.0001 cd/m2.
    pub min_display_luminance: u32,
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, AsBytes, FromBytes)]
pub struct ContentLightLevel {
    pub enabled: u32,
    pub max_content_light_level: u32,
    pub min_pic_average_light_level: u32,
    pub max_pic_average_light_level: u32,
}

/// Full color description of a buffer, including static and dynamic HDR metadata.
///
/// Enumerated fields are stored raw so that values written by other processes never make the
/// struct unreadable; use the typed accessors to interpret them.
#[repr(C)]
#[derive(Copy, Clone, AsBytes, FromBytes)]
pub struct ColorMetaData {
    pub color_primaries: u32,
    pub range: u32,
    pub transfer: u32,
    pub matrix_coefficients: u32,
    pub mastering_display: MasteringDisplay,
    pub content_light_level: ContentLightLevel,
    pub dynamic_metadata_valid: u32,
    pub dynamic_metadata_len: u32,
    pub dynamic_metadata_payload: [u8; MAX_DYNAMIC_METADATA],
}

impl Default for ColorMetaData {
    fn default() -> ColorMetaData {
        ColorMetaData::new_zeroed()
    }
}

impl PartialEq for ColorMetaData {
    fn eq(&self, other: &ColorMetaData) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for ColorMetaData {}

impl std::fmt::Debug for ColorMetaData {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("ColorMetaData")
            .field("color_primaries", &self.color_primaries)
            .field("range", &self.range)
            .field("transfer", &self.transfer)
            .field("matrix_coefficients", &self.matrix_coefficients)
            .field("mastering_display", &self.mastering_display)
            .field("content_light_level", &self.content_light_level)
            .field("dynamic_metadata_len", &self.dynamic_metadata_len)
            .finish()
    }
}

impl ColorMetaData {
    pub fn new(
        primaries: ColorPrimaries,
        range: ColorRange,
        transfer: GammaTransfer,
        matrix: MatrixCoefficients,
    ) -> ColorMetaData {
        ColorMetaData {
            color_primaries: primaries.into(),
            range: range.into(),
            transfer: transfer.into(),
            matrix_coefficients: matrix.into(),
            ..Default::default()
        }
    }

    /// The description written for a coarse color space: sRGB transfer with the matching
    /// primaries and range.
    pub fn from_color_space(color_space: ColorSpace) -> ColorMetaData {
        let (primaries, matrix, range) = match color_space {
            ColorSpace::Itu601 => (
                ColorPrimaries::Bt601_6_525,
                MatrixCoefficients::Bt601_6_525,
                ColorRange::Limited,
            ),
            ColorSpace::Itu601Full => (
                ColorPrimaries::Bt601_6_525,
                MatrixCoefficients::Bt601_6_525,
                ColorRange::Full,
            ),
            ColorSpace::Itu709 => (
                ColorPrimaries::Bt709_5,
                MatrixCoefficients::Bt709_5,
                ColorRange::Limited,
            ),
            ColorSpace::Itu709Full => (
                ColorPrimaries::Bt709_5,
                MatrixCoefficients::Bt709_5,
                ColorRange::Full,
            ),
            ColorSpace::Itu2020 => (
                ColorPrimaries::Bt2020,
                MatrixCoefficients::Bt2020,
                ColorRange::Limited,
            ),
            ColorSpace::Itu2020Full => (
                ColorPrimaries::Bt2020,
                MatrixCoefficients::Bt2020,
                ColorRange::Full,
            ),
        };
        ColorMetaData::new(primaries, range, GammaTransfer::Srgb, matrix)
    }

    pub fn primaries(&self) -> GrallocResult<ColorPrimaries> {
        ColorPrimaries::try_from(self.color_primaries)
    }

    pub fn color_range(&self) -> GrallocResult<ColorRange> {
        ColorRange::try_from(self.range)
    }

    pub fn gamma_transfer(&self) -> GrallocResult<GammaTransfer> {
        GammaTransfer::try_from(self.transfer)
    }

    pub fn matrix(&self) -> GrallocResult<MatrixCoefficients> {
        MatrixCoefficients::try_from(self.matrix_coefficients)
    }

    /// Derives the coarse color space. Primaries other than BT.601, BT.709 and BT.2020 have no
    /// coarse equivalent.
    pub fn color_space(&self) -> GrallocResult<ColorSpace> {
        let full = self.range == u32::from(ColorRange::Full);
        match self.primaries()? {
            ColorPrimaries::Bt601_6_525 | ColorPrimaries::Bt601_6_625 => Ok(if full {
                ColorSpace::Itu601Full
            } else {
                ColorSpace::Itu601
            }),
            ColorPrimaries::Bt709_5 => Ok(if full {
                ColorSpace::Itu709Full
            } else {
                ColorSpace::Itu709
            }),
            ColorPrimaries::Bt2020 => Ok(if full {
                ColorSpace::Itu2020Full
            } else {
                ColorSpace::Itu2020
            }),
            _ => Err(GrallocError::Unsupported),
        }
    }

    /// True for BT.2020 content with a PQ or HLG transfer.
    pub fn is_hdr(&self) -> bool {
        self.color_primaries == u32::from(ColorPrimaries::Bt2020)
            && (self.transfer == u32::from(GammaTransfer::SmpteSt2084)
                || self.transfer == u32::from(GammaTransfer::Hlg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_round_trip() {
        assert_eq!(ColorPrimaries::try_from(9).unwrap(), ColorPrimaries::Bt2020);
        assert_eq!(u32::from(GammaTransfer::Hlg), 18);
        assert!(ColorPrimaries::try_from(2).is_err());
        assert!(ColorSpace::try_from(6).is_err());
    }

    #[test]
    fn color_space_is_recoverable() {
        for cs in [
            ColorSpace::Itu601,
            ColorSpace::Itu601Full,
            ColorSpace::Itu709,
            ColorSpace::Itu709Full,
            ColorSpace::Itu2020,
            ColorSpace::Itu2020Full,
        ] {
            let meta = ColorMetaData::from_color_space(cs);
            assert_eq!(meta.gamma_transfer().unwrap(), GammaTransfer::Srgb);
            assert_eq!(meta.color_space().unwrap(), cs);
        }
    }

    #[test]
    fn bt601_625_maps_to_601() {
        let meta = ColorMetaData::new(
            ColorPrimaries::Bt601_6_625,
            ColorRange::Full,
            GammaTransfer::Smpte170M,
            MatrixCoefficients::Bt601_6_625,
        );
        assert_eq!(meta.color_space().unwrap(), ColorSpace::Itu601Full);

        let meta = ColorMetaData::new(
            ColorPrimaries::DciP3,
            ColorRange::Full,
            GammaTransfer::Srgb,
            MatrixCoefficients::DciP3,
        );
        assert!(matches!(meta.color_space(), Err(GrallocError::Unsupported)));
    }

    #[test]
    fn hdr_detection() {
        let mut meta = ColorMetaData::from_color_space(ColorSpace::Itu2020);
        assert!(!meta.is_hdr());
        meta.transfer = GammaTransfer::SmpteSt2084.into();
        assert!(meta.is_hdr());
        meta.transfer = GammaTransfer::Hlg.into();
        assert!(meta.is_hdr());
    }

    #[test]
    fn layout_size() {
        assert_eq!(std::mem::size_of::<ColorMetaData>(), 1108);
    }
}
