// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! strategy: Decides how each layer of a frame is composed.

use gralloc::PixelFormat;
use log::debug;

use crate::composer_utils::DisplayError;
use crate::layer::BufferFlags;
use crate::layer::LayerComposition;
use crate::layer::LayerFlags;
use crate::layer::LayerRequest;
use crate::layer_stack::LayerStack;
use crate::layer_stack::StackFlags;

pub const DEFAULT_MAX_DEVICE_LAYERS: u32 = 4;

/// Result of classifying a frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct StrategyOutcome {
    /// The accepted composition differs from the previous frame's.
    pub geometry_changed: bool,
}

/// A composition decision engine.
///
/// `prepare` sets `composition` (and optionally `request`) on every application layer. The
/// client target is the last layer and stays `GpuTarget`.
pub trait CompositionStrategy: Send {
    fn prepare(&mut self, stack: &mut LayerStack) -> Result<StrategyOutcome, DisplayError>;

    fn dump(&self) -> String {
        String::new()
    }
}

/// Places layers on hardware pipes while they last, falling back to full client composition.
pub struct DefaultStrategy {
    max_device_layers: u32,
    tone_map_hdr: bool,
    last: Vec<LayerComposition>,
}

impl DefaultStrategy {
    pub fn new(max_device_layers: u32, tone_map_hdr: bool) -> DefaultStrategy {
        DefaultStrategy {
            max_device_layers,
            tone_map_hdr,
            last: Vec::new(),
        }
    }
}

impl Default for DefaultStrategy {
    fn default() -> DefaultStrategy {
        DefaultStrategy::new(DEFAULT_MAX_DEVICE_LAYERS, true)
    }
}

impl CompositionStrategy for DefaultStrategy {
    fn prepare(&mut self, stack: &mut LayerStack) -> Result<StrategyOutcome, DisplayError> {
        let stack_geometry_changed = stack.flags.contains(StackFlags::GEOMETRY_CHANGED);
        let layers = stack.app_layers_mut();

        // Client composed layers must be contiguous in z, so everything between the lowest and
        // highest skip layer goes to the client as well.
        let skip = |l: &crate::layer::Layer| l.flags.contains(LayerFlags::SKIP);
        let first_skip = layers.iter().position(skip);
        let last_skip = layers.iter().rposition(skip);
        let cursor = layers
            .iter()
            .rposition(|l| l.flags.contains(LayerFlags::CURSOR))
            .filter(|i| Some(*i) == layers.len().checked_sub(1));

        for (i, layer) in layers.iter_mut().enumerate() {
            layer.request = LayerRequest::default();
            layer.composition = match (first_skip, last_skip) {
                (Some(lo), Some(hi)) if i >= lo && i <= hi => LayerComposition::Gpu,
                _ if Some(i) == cursor => LayerComposition::Cursor,
                _ => LayerComposition::Device,
            };
        }

        let device_needed = layers
            .iter()
            .filter(|l| l.composition == LayerComposition::Device)
            .count() as u32;
        let mut gpu_present = layers
            .iter()
            .any(|l| l.composition == LayerComposition::Gpu);
        let available = self.max_device_layers.saturating_sub(gpu_present as u32);
        if device_needed > available {
            debug!(
                "{} device layers exceed {} pipes, composing on the client",
                device_needed, available
            );
            for layer in layers.iter_mut() {
                if layer.composition == LayerComposition::Device {
                    layer.composition = LayerComposition::Gpu;
                }
            }
            gpu_present = true;
        }

        if self.tone_map_hdr {
            for layer in layers.iter_mut() {
                if layer.composition == LayerComposition::Device
                    && layer.input.flags.contains(BufferFlags::HDR)
                {
                    layer.request = LayerRequest {
                        tone_map: true,
                        width: layer.src_rect.width() as u32,
                        height: layer.src_rect.height() as u32,
                        format: PixelFormat::RGBA_8888,
                        secure: layer.input.flags.contains(BufferFlags::SECURE),
                    };
                }
            }
        }

        let current: Vec<LayerComposition> = layers.iter().map(|l| l.composition).collect();
        let geometry_changed = stack_geometry_changed || current != self.last;
        self.last = current;
        debug!(
            "classified {} layers, client composition {}",
            self.last.len(),
            gpu_present
        );
        Ok(StrategyOutcome { geometry_changed })
    }

    fn dump(&self) -> String {
        format!(
            "DefaultStrategy: max device layers {}, tone map hdr {}, last {:?}\n",
            self.max_device_layers, self.tone_map_hdr, self.last
        )
    }
}
