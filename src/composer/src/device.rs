// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! device: The seam between the composition pipeline and the display hardware.

use gralloc::ColorMetaData;
use gralloc::Fence;
use gralloc::PixelFormat;
use log::debug;
use log::error;

use crate::composer_utils::DisplayError;
use crate::layer::LayerComposition;
use crate::layer_stack::LayerStack;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum PowerMode {
    #[default]
    Off,
    On,
    Doze,
    DozeSuspend,
}

/// One mode a display can run in.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DisplayConfig {
    pub width: u32,
    pub height: u32,
    pub vsync_period_ns: u32,
    pub x_dpi: f32,
    pub y_dpi: f32,
}

impl DisplayConfig {
    pub fn fps(&self) -> u32 {
        if self.vsync_period_ns == 0 {
            return 0;
        }
        (1_000_000_000u64 / self.vsync_period_ns as u64) as u32
    }
}

impl Default for DisplayConfig {
    fn default() -> DisplayConfig {
        DisplayConfig {
            width: 1920,
            height: 1080,
            vsync_period_ns: 16_666_666,
            x_dpi: 160.0,
            y_dpi: 160.0,
        }
    }
}

/// Properties of a panel that do not change while it is connected.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FixedInfo {
    /// The panel only updates on explicit commits.
    pub is_cmdmode: bool,
    pub hdr_supported: bool,
    pub max_luminance: f32,
    pub average_luminance: f32,
    pub min_luminance: f32,
}

/// Hardware backend for one display.
///
/// `commit` must fill `release_fence` on every layer read by the hardware and
/// `retire_fence` on the stack.
pub trait DisplayDevice: Send {
    /// Checks a classified stack against hardware limits.
    fn prepare(&mut self, _stack: &mut LayerStack) -> Result<(), DisplayError> {
        Ok(())
    }

    fn commit(&mut self, stack: &mut LayerStack) -> Result<(), DisplayError>;

    /// Drops any frame queued in hardware.
    fn flush(&mut self, _secure_transition: bool) -> Result<(), DisplayError> {
        Ok(())
    }

    fn set_display_state(&mut self, state: PowerMode) -> Result<(), DisplayError>;

    fn set_vsync_state(&mut self, _enable: bool) -> Result<(), DisplayError> {
        Ok(())
    }

    /// Supported refresh rates as (min, max).
    fn refresh_rate_range(&self) -> (u32, u32);

    fn set_refresh_rate(&mut self, _rate: u32) -> Result<(), DisplayError> {
        Err(DisplayError::NotSupported)
    }

    fn set_idle_timeout_ms(&mut self, _timeout_ms: u32) {}

    fn configs(&self) -> Vec<DisplayConfig>;

    fn active_config(&self) -> u32;

    fn set_active_config(&mut self, index: u32) -> Result<(), DisplayError>;

    fn fixed_info(&self) -> FixedInfo {
        Default::default()
    }

    fn client_target_support(
        &self,
        _width: u32,
        _height: u32,
        _format: PixelFormat,
        _color: &ColorMetaData,
    ) -> Result<(), DisplayError> {
        Ok(())
    }

    fn set_cursor_position(&mut self, _x: i32, _y: i32) -> Result<(), DisplayError> {
        Err(DisplayError::NotSupported)
    }

    fn dump(&self) -> String {
        String::new()
    }
}

/// Gives each read layer an already signaled release fence.
fn signal_commit(stack: &mut LayerStack) -> Result<(), DisplayError> {
    let signaled = || {
        Fence::new_signaled().map_err(|e| {
            error!("failed to create fence: {}", e);
            DisplayError::Resources
        })
    };
    for layer in stack.layers.iter_mut() {
        if layer.composition != LayerComposition::Gpu {
            layer.release_fence = Some(signaled()?);
        }
    }
    stack.retire_fence = Some(signaled()?);
    Ok(())
}

/// A display that accepts every frame and completes it immediately.
pub struct NoopDisplayDevice {
    configs: Vec<DisplayConfig>,
    active: u32,
    state: PowerMode,
    refresh_rate: u32,
    vsync: bool,
    commits: u64,
}

impl NoopDisplayDevice {
    pub fn new(configs: Vec<DisplayConfig>) -> NoopDisplayDevice {
        let configs = if configs.is_empty() {
            vec![DisplayConfig::default()]
        } else {
            configs
        };
        let refresh_rate = configs[0].fps();
        NoopDisplayDevice {
            configs,
            active: 0,
            state: PowerMode::Off,
            refresh_rate,
            vsync: false,
            commits: 0,
        }
    }

    pub fn commits(&self) -> u64 {
        self.commits
    }
}

impl Default for NoopDisplayDevice {
    fn default() -> NoopDisplayDevice {
        NoopDisplayDevice::new(Vec::new())
    }
}

impl DisplayDevice for NoopDisplayDevice {
    fn commit(&mut self, stack: &mut LayerStack) -> Result<(), DisplayError> {
        signal_commit(stack)?;
        self.commits += 1;
        Ok(())
    }

    fn set_display_state(&mut self, state: PowerMode) -> Result<(), DisplayError> {
        debug!("noop display state {:?}", state);
        self.state = state;
        Ok(())
    }

    fn set_vsync_state(&mut self, enable: bool) -> Result<(), DisplayError> {
        self.vsync = enable;
        Ok(())
    }

    fn refresh_rate_range(&self) -> (u32, u32) {
        let rates = self.configs.iter().map(|c| c.fps());
        let min = rates.clone().min().unwrap_or(60);
        let max = rates.max().unwrap_or(60);
        (min, max)
    }

    fn set_refresh_rate(&mut self, rate: u32) -> Result<(), DisplayError> {
        self.refresh_rate = rate;
        Ok(())
    }

    fn configs(&self) -> Vec<DisplayConfig> {
        self.configs.clone()
    }

    fn active_config(&self) -> u32 {
        self.active
    }

    fn set_active_config(&mut self, index: u32) -> Result<(), DisplayError> {
        if index as usize >= self.configs.len() {
            return Err(DisplayError::Parameters);
        }
        self.active = index;
        Ok(())
    }

    fn dump(&self) -> String {
        format!(
            "NoopDisplayDevice: state {:?} config {} refresh {} vsync {} commits {}\n",
            self.state, self.active, self.refresh_rate, self.vsync, self.commits
        )
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::Layer;
    use crate::layer::LayerId;

    #[test]
    fn noop_commit_signals() {
        let mut device = NoopDisplayDevice::default();
        let mut stack = LayerStack::new();
        stack.layers.push(Layer::new(LayerId(1)));
        let mut target = Layer::new(LayerId(2));
        target.composition = LayerComposition::GpuTarget;
        stack.layers.push(target);

        device.commit(&mut stack).unwrap();
        assert!(stack.layers[0].release_fence.is_none());
        assert!(stack.layers[1].release_fence.as_ref().unwrap().is_signaled());
        assert!(stack.retire_fence.as_ref().unwrap().is_signaled());
        assert_eq!(device.commits(), 1);
    }

    #[test]
    fn noop_configs() {
        let mut device = NoopDisplayDevice::default();
        assert_eq!(device.configs().len(), 1);
        assert_eq!(device.refresh_rate_range(), (60, 60));
        assert_eq!(device.set_active_config(1), Err(DisplayError::Parameters));
        device.set_active_config(0).unwrap();
    }
}
