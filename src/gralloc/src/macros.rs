// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Macros for gralloc.

/// Performs a checked arithmetic operation on two identifiers, yielding a
/// `GrallocResult` that names both operands on overflow.
#[macro_export]
macro_rules! checked_arithmetic {
    ($x:ident $op:ident $y:ident $op_name:expr) => {
        $x.$op($y)
            .ok_or_else(|| $crate::GrallocError::CheckedArithmetic {
                field1: (stringify!($x), $x as usize),
                field2: (stringify!($y), $y as usize),
                op: $op_name,
            })
    };
    ($x:ident + $y:ident) => {
        checked_arithmetic!($x checked_add $y "+")
    };
    ($x:ident - $y:ident) => {
        checked_arithmetic!($x checked_sub $y "-")
    };
    ($x:ident * $y:ident) => {
        checked_arithmetic!($x checked_mul $y "*")
    };
    ($x:ident / $y:ident) => {
        checked_arithmetic!($x checked_div $y "/")
    };
}

/// Rounds `$v` up to the next multiple of `$align`. `$align` need not be a power of two.
#[macro_export]
macro_rules! align_up {
    ($v:expr, $align:expr) => {
        (($v) + ($align) - 1) / ($align) * ($align)
    };
}
