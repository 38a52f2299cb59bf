// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

/// An integer rectangle as supplied by the client for display frames and regions.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct IntRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl IntRect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> IntRect {
        IntRect {
            left,
            top,
            right,
            bottom,
        }
    }
}

/// A fractional rectangle, used for source crops.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FloatRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl FloatRect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> FloatRect {
        FloatRect {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn is_integral(&self) -> bool {
        [self.left, self.top, self.right, self.bottom]
            .iter()
            .all(|v| *v == v.round())
    }
}

/// A rectangle in the layer stack's coordinate space.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl Rect {
    pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Rect {
        Rect {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// A rect is valid when it encloses a non-empty area.
    pub fn is_valid(&self) -> bool {
        self.left < self.right && self.top < self.bottom
    }

    /// Smallest rect covering both. Invalid rects do not contribute.
    pub fn union(&self, other: &Rect) -> Rect {
        if !self.is_valid() {
            return *other;
        }
        if !other.is_valid() {
            return *self;
        }
        Rect {
            left: self.left.min(other.left),
            top: self.top.min(other.top),
            right: self.right.max(other.right),
            bottom: self.bottom.max(other.bottom),
        }
    }
}

impl From<IntRect> for Rect {
    fn from(r: IntRect) -> Rect {
        Rect::new(r.left as f32, r.top as f32, r.right as f32, r.bottom as f32)
    }
}

/// Source crops round inwards so the crop never samples outside the requested area.
impl From<FloatRect> for Rect {
    fn from(r: FloatRect) -> Rect {
        Rect::new(r.left.ceil(), r.top.ceil(), r.right.floor(), r.bottom.floor())
    }
}

impl From<Rect> for IntRect {
    fn from(r: Rect) -> IntRect {
        IntRect::new(r.left as i32, r.top as i32, r.right as i32, r.bottom as i32)
    }
}
