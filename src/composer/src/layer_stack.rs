// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use bitflags::bitflags;
use gralloc::Fence;

use crate::layer::Layer;
use crate::layer::LayerComposition;
use crate::layer::LayerFlags;

bitflags! {
    /// Summary of what a frame contains.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct StackFlags: u32 {
        const GEOMETRY_CHANGED = 0x001;
        const SKIP_PRESENT = 0x002;
        const VIDEO_PRESENT = 0x004;
        const SECURE_PRESENT = 0x008;
        const CURSOR_PRESENT = 0x010;
        const HDR_PRESENT = 0x020;
        const ANIMATING = 0x040;
        /// The client target holds a valid buffer.
        const FBT_VALID = 0x080;
    }
}

/// One frame worth of layers in z order, with the client target last.
#[derive(Debug, Default)]
pub struct LayerStack {
    pub layers: Vec<Layer>,
    pub flags: StackFlags,
    /// Signals when this frame replaced the previous one on screen.
    pub retire_fence: Option<Fence>,
}

impl LayerStack {
    pub fn new() -> LayerStack {
        Default::default()
    }

    pub fn client_target_index(&self) -> Option<usize> {
        self.layers
            .iter()
            .rposition(|l| l.composition == LayerComposition::GpuTarget)
    }

    /// Layers supplied by the client, excluding the client target.
    pub fn app_layers(&self) -> &[Layer] {
        match self.client_target_index() {
            Some(index) => &self.layers[..index],
            None => &self.layers,
        }
    }

    pub fn app_layers_mut(&mut self) -> &mut [Layer] {
        match self.client_target_index() {
            Some(index) => &mut self.layers[..index],
            None => &mut self.layers,
        }
    }

    pub fn client_target(&self) -> Option<&Layer> {
        self.client_target_index().map(|i| &self.layers[i])
    }

    pub fn updating_count(&self) -> usize {
        self.app_layers()
            .iter()
            .filter(|l| l.flags.contains(LayerFlags::UPDATING))
            .count()
    }

    pub fn count(&self, composition: LayerComposition) -> usize {
        self.layers
            .iter()
            .filter(|l| l.composition == composition)
            .count()
    }
}
