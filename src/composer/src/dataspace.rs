// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! dataspace: Decoding of client dataspace values into buffer color descriptions.
//!
//! A dataspace packs a color standard, a transfer function and a range into one integer. Legacy
//! values occupy the low 16 bits and are mapped to their packed equivalents first.

use gralloc::ColorMetaData;
use gralloc::ColorPrimaries;
use gralloc::ColorRange;
use gralloc::GammaTransfer;
use log::trace;
use log::warn;

pub type Dataspace = i32;

pub const DATASPACE_UNKNOWN: Dataspace = 0;

const STANDARD_SHIFT: i32 = 16;
const TRANSFER_SHIFT: i32 = 22;
const RANGE_SHIFT: i32 = 27;

pub const STANDARD_MASK: Dataspace = 63 << STANDARD_SHIFT;
pub const STANDARD_BT709: Dataspace = 1 << STANDARD_SHIFT;
pub const STANDARD_BT601_625: Dataspace = 2 << STANDARD_SHIFT;
pub const STANDARD_BT601_625_UNADJUSTED: Dataspace = 3 << STANDARD_SHIFT;
pub const STANDARD_BT601_525: Dataspace = 4 << STANDARD_SHIFT;
pub const STANDARD_BT601_525_UNADJUSTED: Dataspace = 5 << STANDARD_SHIFT;
pub const STANDARD_BT2020: Dataspace = 6 << STANDARD_SHIFT;
pub const STANDARD_DCI_P3: Dataspace = 10 << STANDARD_SHIFT;

pub const TRANSFER_MASK: Dataspace = 31 << TRANSFER_SHIFT;
pub const TRANSFER_LINEAR: Dataspace = 1 << TRANSFER_SHIFT;
pub const TRANSFER_SRGB: Dataspace = 2 << TRANSFER_SHIFT;
pub const TRANSFER_SMPTE_170M: Dataspace = 3 << TRANSFER_SHIFT;
pub const TRANSFER_GAMMA2_2: Dataspace = 4 << TRANSFER_SHIFT;
pub const TRANSFER_ST2084: Dataspace = 7 << TRANSFER_SHIFT;
pub const TRANSFER_HLG: Dataspace = 8 << TRANSFER_SHIFT;

pub const RANGE_MASK: Dataspace = 7 << RANGE_SHIFT;
pub const RANGE_FULL: Dataspace = 1 << RANGE_SHIFT;
pub const RANGE_LIMITED: Dataspace = 2 << RANGE_SHIFT;

const LEGACY_SRGB_LINEAR: Dataspace = 0x200;
const LEGACY_SRGB: Dataspace = 0x201;
const LEGACY_JFIF: Dataspace = 0x101;
const LEGACY_BT601_625: Dataspace = 0x102;
const LEGACY_BT601_525: Dataspace = 0x103;
const LEGACY_BT709: Dataspace = 0x104;

pub const V0_SRGB_LINEAR: Dataspace = STANDARD_BT709 | TRANSFER_LINEAR | RANGE_FULL;
pub const V0_SRGB: Dataspace = STANDARD_BT709 | TRANSFER_SRGB | RANGE_FULL;
pub const V0_JFIF: Dataspace = STANDARD_BT601_625 | TRANSFER_SMPTE_170M | RANGE_FULL;
pub const V0_BT601_625: Dataspace = STANDARD_BT601_625 | TRANSFER_SMPTE_170M | RANGE_LIMITED;
pub const V0_BT601_525: Dataspace = STANDARD_BT601_525 | TRANSFER_SMPTE_170M | RANGE_LIMITED;
pub const V0_BT709: Dataspace = STANDARD_BT709 | TRANSFER_SMPTE_170M | RANGE_LIMITED;
pub const BT2020_PQ: Dataspace = STANDARD_BT2020 | TRANSFER_ST2084 | RANGE_FULL;
pub const BT2020_HLG: Dataspace = STANDARD_BT2020 | TRANSFER_HLG | RANGE_FULL;

/// Maps a legacy dataspace to its packed form. Packed values are returned unchanged.
pub fn normalize(dataspace: Dataspace) -> Dataspace {
    let legacy = dataspace & 0xffff;
    if legacy == 0 {
        return dataspace;
    }
    match legacy {
        LEGACY_SRGB => V0_SRGB,
        LEGACY_JFIF => V0_JFIF,
        LEGACY_SRGB_LINEAR => V0_SRGB_LINEAR,
        LEGACY_BT601_625 => V0_BT601_625,
        LEGACY_BT601_525 => V0_BT601_525,
        LEGACY_BT709 => V0_BT709,
        _ => {
            warn!("unsupported legacy dataspace 0x{:x}", dataspace);
            dataspace
        }
    }
}

pub fn color_primaries(dataspace: Dataspace) -> Option<ColorPrimaries> {
    match dataspace & STANDARD_MASK {
        STANDARD_BT709 => Some(ColorPrimaries::Bt709_5),
        STANDARD_BT601_525 | STANDARD_BT601_525_UNADJUSTED => Some(ColorPrimaries::Bt601_6_525),
        STANDARD_BT601_625 | STANDARD_BT601_625_UNADJUSTED => Some(ColorPrimaries::Bt601_6_625),
        STANDARD_DCI_P3 => Some(ColorPrimaries::DciP3),
        STANDARD_BT2020 => Some(ColorPrimaries::Bt2020),
        standard => {
            trace!("unsupported standard 0x{:x}", standard);
            None
        }
    }
}

pub fn gamma_transfer(dataspace: Dataspace) -> Option<GammaTransfer> {
    match dataspace & TRANSFER_MASK {
        TRANSFER_SRGB => Some(GammaTransfer::Srgb),
        TRANSFER_SMPTE_170M => Some(GammaTransfer::Smpte170M),
        TRANSFER_ST2084 => Some(GammaTransfer::SmpteSt2084),
        TRANSFER_HLG => Some(GammaTransfer::Hlg),
        TRANSFER_LINEAR => Some(GammaTransfer::Linear),
        TRANSFER_GAMMA2_2 => Some(GammaTransfer::Gamma2_2),
        transfer => {
            trace!("unsupported transfer 0x{:x}", transfer);
            None
        }
    }
}

pub fn color_range(dataspace: Dataspace) -> Option<ColorRange> {
    match dataspace & RANGE_MASK {
        RANGE_FULL => Some(ColorRange::Full),
        RANGE_LIMITED => Some(ColorRange::Limited),
        _ => None,
    }
}

/// Overwrites primaries, transfer and (when present) range of `color` from `dataspace`.
///
/// Returns false, leaving `color` untouched, when the standard or transfer is not supported.
pub fn apply_to_color(dataspace: Dataspace, color: &mut ColorMetaData) -> bool {
    let (primaries, transfer) = match (color_primaries(dataspace), gamma_transfer(dataspace)) {
        (Some(p), Some(t)) => (p, t),
        _ => return false,
    };
    color.color_primaries = primaries.into();
    color.transfer = transfer.into();
    if let Some(range) = color_range(dataspace) {
        color.range = range.into();
    }
    true
}
