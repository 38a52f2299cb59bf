// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use gralloc::PropertyStore;

use crate::strategy::DEFAULT_MAX_DEVICE_LAYERS;

/// Display tunables read once at startup.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DisplayProperties {
    /// Treat HDR buffers as SDR.
    pub disable_hdr: bool,
    /// Ignore acquire fences and discard release and retire fences.
    pub swap_interval_zero: bool,
    /// Let buffer frame rate metadata drive the panel refresh rate.
    pub use_metadata_refresh_rate: bool,
    pub disable_skip_validate: bool,
    pub max_blending_layers: u32,
    pub enable_tone_mapping: bool,
}

impl Default for DisplayProperties {
    fn default() -> DisplayProperties {
        DisplayProperties {
            disable_hdr: false,
            swap_interval_zero: false,
            use_metadata_refresh_rate: true,
            disable_skip_validate: false,
            max_blending_layers: DEFAULT_MAX_DEVICE_LAYERS,
            enable_tone_mapping: true,
        }
    }
}

impl DisplayProperties {
    pub fn from_store(store: &dyn PropertyStore) -> DisplayProperties {
        let mut properties = DisplayProperties::default();
        properties.disable_hdr = store.get_bool("vendor.display.disable_hdr");
        properties.swap_interval_zero = store.get_bool("vendor.display.zero_swapinterval")
            || store.get_i32("debug.egl.swapinterval") == Some(0);
        if let Some(v) = store.get_i32("vendor.display.use_metadata_refresh_rate") {
            properties.use_metadata_refresh_rate = v != 0;
        }
        if store.get_bool("vendor.display.disable_metadata_dynamic_fps") {
            properties.use_metadata_refresh_rate = false;
        }
        properties.disable_skip_validate = store.get_bool("vendor.display.disable_skip_validate");
        if let Some(layers) = store.get_u32("vendor.display.max_blending_layers") {
            properties.max_blending_layers = layers;
        }
        if let Some(v) = store.get_i32("vendor.display.enable_tonemapping") {
            properties.enable_tone_mapping = v != 0;
        }
        properties
    }
}

#[cfg(test)]
mod tests {
    use gralloc::MapPropertyStore;

    use super::*;

    #[test]
    fn defaults_without_properties() {
        let properties = DisplayProperties::from_store(&MapPropertyStore::new());
        assert_eq!(properties, DisplayProperties::default());
    }

    #[test]
    fn reads_overrides() {
        let mut store = MapPropertyStore::new();
        store
            .set("vendor.display.disable_hdr", "1")
            .set("debug.egl.swapinterval", "0")
            .set("vendor.display.disable_metadata_dynamic_fps", "1")
            .set("vendor.display.max_blending_layers", "6")
            .set("vendor.display.enable_tonemapping", "0");
        let properties = DisplayProperties::from_store(&store);
        assert!(properties.disable_hdr);
        assert!(properties.swap_interval_zero);
        assert!(!properties.use_metadata_refresh_rate);
        assert!(!properties.disable_skip_validate);
        assert_eq!(properties.max_blending_layers, 6);
        assert!(!properties.enable_tone_mapping);
    }
}
