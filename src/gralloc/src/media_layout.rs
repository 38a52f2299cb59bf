// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Plane geometry of buffers shared with the video decoder and encoder.

/// Layout families understood by the video hardware.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VenusFormat {
    Nv12,
    Nv21,
    Nv12Ubwc,
    Nv12Bpp10Ubwc,
    P010Ubwc,
}

const UBWC_PLANE_ALIGN: u32 = 4096;

fn align(v: u32, a: u32) -> u32 {
    crate::align_up!(v, a)
}

fn div_ceil(v: u32, d: u32) -> u32 {
    (v + d - 1) / d
}

impl VenusFormat {
    pub fn is_ubwc(self) -> bool {
        matches!(
            self,
            VenusFormat::Nv12Ubwc | VenusFormat::Nv12Bpp10Ubwc | VenusFormat::P010Ubwc
        )
    }

    pub fn y_stride(self, width: u32) -> u32 {
        match self {
            VenusFormat::Nv12 | VenusFormat::Nv21 | VenusFormat::Nv12Ubwc => align(width, 128),
            VenusFormat::Nv12Bpp10Ubwc => align(align(width, 192) * 4 / 3, 256),
            VenusFormat::P010Ubwc => align(width * 2, 256),
        }
    }

    pub fn uv_stride(self, width: u32) -> u32 {
        self.y_stride(width)
    }

    pub fn y_scanlines(self, height: u32) -> u32 {
        match self {
            VenusFormat::Nv12 | VenusFormat::Nv21 | VenusFormat::Nv12Ubwc => align(height, 32),
            VenusFormat::Nv12Bpp10Ubwc | VenusFormat::P010Ubwc => align(height, 16),
        }
    }

    pub fn uv_scanlines(self, height: u32) -> u32 {
        let half = (height + 1) >> 1;
        match self {
            VenusFormat::Nv12Ubwc => align(half, 32),
            _ => align(half, 16),
        }
    }

    /// Width in luma tiles of one compression metadata block, and its height in lines.
    fn meta_tile(self) -> Option<(u32, u32)> {
        match self {
            VenusFormat::Nv12 | VenusFormat::Nv21 => None,
            VenusFormat::Nv12Ubwc => Some((32, 8)),
            VenusFormat::Nv12Bpp10Ubwc => Some((48, 4)),
            VenusFormat::P010Ubwc => Some((32, 4)),
        }
    }

    pub fn y_meta_stride(self, width: u32) -> u32 {
        match self.meta_tile() {
            Some((tile_w, _)) => align(div_ceil(width, tile_w), 64),
            None => 0,
        }
    }

    pub fn y_meta_scanlines(self, height: u32) -> u32 {
        match self.meta_tile() {
            Some((_, tile_h)) => align(div_ceil(height, tile_h), 16),
            None => 0,
        }
    }

    pub fn uv_meta_stride(self, width: u32) -> u32 {
        match self.meta_tile() {
            Some((tile_w, _)) => align(div_ceil((width + 1) >> 1, tile_w / 2), 64),
            None => 0,
        }
    }

    pub fn uv_meta_scanlines(self, height: u32) -> u32 {
        match self.meta_tile() {
            Some((_, tile_h)) => align(div_ceil((height + 1) >> 1, tile_h), 16),
            None => 0,
        }
    }

    /// Sizes of the four UBWC planes in memory order: Y meta, Y, UV meta, UV.
    pub fn ubwc_plane_sizes(self, width: u32, height: u32) -> [u32; 4] {
        let plane = |stride: u32, lines: u32| align(stride * lines, UBWC_PLANE_ALIGN);
        [
            plane(self.y_meta_stride(width), self.y_meta_scanlines(height)),
            plane(self.y_stride(width), self.y_scanlines(height)),
            plane(self.uv_meta_stride(width), self.uv_meta_scanlines(height)),
            plane(self.uv_stride(width), self.uv_scanlines(height)),
        ]
    }

    /// Total allocation size for a `width` x `height` frame.
    pub fn buffer_size(self, width: u32, height: u32) -> u32 {
        if width == 0 || height == 0 {
            return 0;
        }

        if self.is_ubwc() {
            let total: u32 = self.ubwc_plane_sizes(width, height).iter().sum();
            return align(total, UBWC_PLANE_ALIGN);
        }

        let y_plane = self.y_stride(width) * self.y_scanlines(height);
        let uv_plane = self.uv_stride(width) * self.uv_scanlines(height);
        align(y_plane + uv_plane + 4096, 4096)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_linear() {
        let f = VenusFormat::Nv12;
        assert_eq!(f.y_stride(1920), 1920);
        assert_eq!(f.y_scanlines(1080), 1088);
        assert_eq!(f.uv_scanlines(1080), 544);
        assert_eq!(
            f.buffer_size(1920, 1080),
            align(1920 * 1088 + 1920 * 544 + 4096, 4096)
        );
        assert_eq!(f.y_meta_stride(1920), 0);
    }

    #[test]
    fn nv12_ubwc_meta_planes() {
        let f = VenusFormat::Nv12Ubwc;
        assert_eq!(f.y_meta_stride(1920), 64);
        assert_eq!(f.y_meta_scanlines(1080), 144);
        assert_eq!(f.uv_meta_stride(1920), 64);
        assert_eq!(f.uv_meta_scanlines(1080), 80);
        let planes = f.ubwc_plane_sizes(1920, 1080);
        assert!(planes.iter().all(|p| p % 4096 == 0));
        assert_eq!(f.buffer_size(1920, 1080), planes.iter().sum::<u32>());
    }

    #[test]
    fn ten_bit_strides() {
        assert_eq!(VenusFormat::Nv12Bpp10Ubwc.y_stride(1920), 2560);
        assert_eq!(VenusFormat::P010Ubwc.y_stride(1920), 3840);
        assert_eq!(VenusFormat::P010Ubwc.buffer_size(0, 1080), 0);
    }
}
