// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! display: The validate/present cycle of one display.
//!
//! Clients mutate layers, call `validate` to learn which layers they must compose themselves,
//! accept those changes and then `present`. Each present returns a retire fence and queues one
//! release fence per layer, handed back one frame later through `get_release_fences`.

use std::collections::BTreeMap as Map;
use std::fmt::Write;
use std::sync::Arc;

use gralloc::BufferHandle;
use gralloc::BufferManager;
use gralloc::ColorMetaData;
use gralloc::Fence;
use gralloc::PixelFormat;
use log::debug;
use log::error;
use log::info;
use log::trace;
use log::warn;

use crate::composer_utils::ComposerError;
use crate::composer_utils::ComposerResult;
use crate::composer_utils::DisplayError;
use crate::config::DisplayProperties;
use crate::dataspace;
use crate::dataspace::Dataspace;
use crate::device::DisplayDevice;
use crate::device::PowerMode;
use crate::geometry::FloatRect;
use crate::geometry::IntRect;
use crate::geometry::Rect;
use crate::layer::BufferFlags;
use crate::layer::Composition;
use crate::layer::HwcLayer;
use crate::layer::LayerComposition;
use crate::layer::LayerFlags;
use crate::layer::LayerId;
use crate::layer::LayerRequest;
use crate::layer::Lut3d;
use crate::layer_stack::LayerStack;
use crate::layer_stack::StackFlags;
use crate::strategy::CompositionStrategy;
use crate::tonemap::ToneMapKernelFactory;
use crate::tonemap::ToneMapper;

/// Above this many layers every layer is treated as updating.
const MAX_TRACKED_LAYERS: usize = 32;

/// Luminance is reported by panels in units of 0.0001 cd/m2.
const LUMINANCE_FACTOR: f32 = 10000.0;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DisplayStatus {
    Online,
    Offline,
    Pause,
    Resume,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Attribute {
    Width,
    Height,
    VsyncPeriod,
    DpiX,
    DpiY,
}

/// A request from the display to the client about one layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LayerDisplayRequest {
    /// The area under this device composed layer may be left uncleared in the client target.
    ClearClientTarget,
}

/// Counts returned by `validate`.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Validation {
    pub num_types: u32,
    pub num_requests: u32,
}

impl Validation {
    /// The client must fetch composition changes before presenting.
    pub fn has_changes(&self) -> bool {
        self.num_types > 0
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct HdrCapabilities {
    pub hdr10: bool,
    pub max_luminance: f32,
    pub max_average_luminance: f32,
    pub min_luminance: f32,
}

enum CommitStatus {
    Submitted,
    ShutDown,
}

fn is_10bit_format(format: PixelFormat) -> bool {
    matches!(
        format,
        PixelFormat::RGBA_1010102
            | PixelFormat::ARGB_2101010
            | PixelFormat::RGBX_1010102
            | PixelFormat::XRGB_2101010
            | PixelFormat::BGRA_1010102
            | PixelFormat::ABGR_2101010
            | PixelFormat::BGRX_1010102
            | PixelFormat::XBGR_2101010
            | PixelFormat::YCBCR_420_P010
            | PixelFormat::YCBCR_420_P010_UBWC
            | PixelFormat::YCBCR_420_TP10_UBWC
    )
}

/// Raises a rate below `min` to the smallest multiple of it within range, and caps it at `max`.
fn sanitize_refresh_rate(min: u32, max: u32, requested: u32) -> u32 {
    let mut rate = requested;
    if rate > 0 && rate < min {
        rate = ((min + rate - 1) / rate) * rate;
    }
    rate.min(max)
}

/// No damage means the whole layer changed.
fn is_surface_updated(dirty_regions: &[Rect]) -> bool {
    dirty_regions.is_empty() || dirty_regions.iter().any(|r| r.is_valid())
}

pub struct HwcDisplay {
    id: u64,
    buffers: Arc<BufferManager>,
    device: Box<dyn DisplayDevice>,
    strategy: Box<dyn CompositionStrategy>,
    tone_mapper: Option<ToneMapper>,
    properties: DisplayProperties,

    layers: Map<LayerId, HwcLayer>,
    z_order: Vec<LayerId>,
    client_target: HwcLayer,
    layer_stack: LayerStack,
    /// Layer ids in `layer_stack.layers` order.
    stack_ids: Vec<LayerId>,
    layer_changes: Map<LayerId, Composition>,
    layer_requests: Map<LayerId, LayerDisplayRequest>,
    hdr_lut: Option<Arc<Lut3d>>,
    display_rect: Rect,

    validated: bool,
    skip_validate: bool,
    skip_prepare: bool,
    flush: bool,
    flush_on_error: bool,
    shutdown_pending: bool,
    secure_display_active: bool,
    secure_display_transition: bool,
    display_paused: bool,
    fbt_valid: bool,
    power_mode: PowerMode,
    last_power_mode: PowerMode,

    min_refresh_rate: u32,
    max_refresh_rate: u32,
    current_refresh_rate: u32,
    metadata_refresh_rate: u32,
    force_refresh_rate: u32,
    handle_idle_timeout: bool,
    frames: u64,
}

impl HwcDisplay {
    pub fn new(
        id: u64,
        buffers: Arc<BufferManager>,
        device: Box<dyn DisplayDevice>,
        strategy: Box<dyn CompositionStrategy>,
        tone_map_factory: Option<Arc<dyn ToneMapKernelFactory>>,
        properties: DisplayProperties,
    ) -> HwcDisplay {
        let (min_refresh_rate, max_refresh_rate) = device.refresh_rate_range();
        let tone_mapper = match tone_map_factory {
            Some(factory) if properties.enable_tone_mapping => {
                Some(ToneMapper::new(buffers.clone(), factory))
            }
            _ => None,
        };
        let mut display = HwcDisplay {
            id,
            buffers,
            device,
            strategy,
            tone_mapper,
            properties,
            layers: Map::new(),
            z_order: Vec::new(),
            client_target: HwcLayer::new(),
            layer_stack: LayerStack::new(),
            stack_ids: Vec::new(),
            layer_changes: Map::new(),
            layer_requests: Map::new(),
            hdr_lut: None,
            display_rect: Rect::default(),
            validated: false,
            skip_validate: false,
            skip_prepare: false,
            flush: false,
            flush_on_error: false,
            shutdown_pending: false,
            secure_display_active: false,
            secure_display_transition: false,
            display_paused: false,
            fbt_valid: false,
            power_mode: PowerMode::Off,
            last_power_mode: PowerMode::Off,
            min_refresh_rate,
            max_refresh_rate,
            current_refresh_rate: max_refresh_rate,
            metadata_refresh_rate: 0,
            force_refresh_rate: 0,
            handle_idle_timeout: false,
            frames: 0,
        };
        display.update_client_target_geometry();
        info!(
            "display {} created, refresh {}..{}",
            id, min_refresh_rate, max_refresh_rate
        );
        display
    }

    fn update_client_target_geometry(&mut self) {
        let active = self.device.active_config();
        if let Some(config) = self.device.configs().get(active as usize) {
            let (w, h) = (config.width as i32, config.height as i32);
            self.client_target
                .set_display_frame(IntRect::new(0, 0, w, h));
            self.client_target
                .set_source_crop(FloatRect::new(0.0, 0.0, w as f32, h as f32));
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn power_mode(&self) -> PowerMode {
        self.power_mode
    }

    pub fn last_power_mode(&self) -> PowerMode {
        self.last_power_mode
    }

    pub fn current_refresh_rate(&self) -> u32 {
        self.current_refresh_rate
    }

    pub fn tone_mapper(&self) -> Option<&ToneMapper> {
        self.tone_mapper.as_ref()
    }

    pub fn layer_ids(&self) -> Vec<LayerId> {
        self.z_order.clone()
    }

    pub fn create_layer(&mut self) -> LayerId {
        let layer = HwcLayer::new();
        let id = layer.id();
        self.layers.insert(id, layer);
        self.insert_in_z_order(id, 0);
        self.validated = false;
        debug!("display {}: created layer {}", self.id, id);
        id
    }

    pub fn destroy_layer(&mut self, id: LayerId) -> ComposerResult<()> {
        if self.layers.remove(&id).is_none() {
            return Err(ComposerError::BadLayer);
        }
        self.z_order.retain(|l| *l != id);
        self.layer_changes.remove(&id);
        self.layer_requests.remove(&id);
        self.validated = false;
        debug!("display {}: destroyed layer {}", self.id, id);
        Ok(())
    }

    pub fn layer(&self, id: LayerId) -> ComposerResult<&HwcLayer> {
        self.layers.get(&id).ok_or(ComposerError::BadLayer)
    }

    pub fn layer_mut(&mut self, id: LayerId) -> ComposerResult<&mut HwcLayer> {
        self.layers.get_mut(&id).ok_or(ComposerError::BadLayer)
    }

    pub fn set_layer_buffer(
        &mut self,
        id: LayerId,
        handle: Option<Arc<BufferHandle>>,
        acquire_fence: Option<Fence>,
    ) -> ComposerResult<()> {
        let layer = self.layers.get_mut(&id).ok_or(ComposerError::BadLayer)?;
        layer.set_buffer(&self.buffers, handle, acquire_fence)
    }

    fn insert_in_z_order(&mut self, id: LayerId, z: u32) {
        let layers = &self.layers;
        let at = self
            .z_order
            .partition_point(|l| layers.get(l).map(|l| l.z() <= z).unwrap_or(true));
        self.z_order.insert(at, id);
    }

    pub fn set_layer_z_order(&mut self, id: LayerId, z: u32) -> ComposerResult<()> {
        let layer = self.layers.get_mut(&id).ok_or(ComposerError::BadLayer)?;
        if layer.z() == z {
            return Ok(());
        }
        layer.set_z_order(z);
        self.z_order.retain(|l| *l != id);
        self.insert_in_z_order(id, z);
        Ok(())
    }

    pub fn set_hdr_lut(&mut self, lut: Option<Arc<Lut3d>>) {
        self.hdr_lut = lut;
    }

    pub fn set_client_target(
        &mut self,
        handle: Option<Arc<BufferHandle>>,
        acquire_fence: Option<Fence>,
        dataspace: Dataspace,
        damage: &[IntRect],
    ) -> ComposerResult<()> {
        // A missing target keeps the previous one for fully device composed frames.
        if handle.is_none() {
            trace!("display {}: reusing cached client target", self.id);
            return Ok(());
        }
        self.client_target
            .set_buffer(&self.buffers, handle, acquire_fence)?;
        self.client_target.set_surface_damage(damage);
        let dataspace = dataspace::normalize(dataspace);
        if self.client_target.dataspace() != dataspace {
            self.client_target.set_dataspace(dataspace);
            dataspace::apply_to_color(dataspace, &mut self.client_target.layer_mut().input.color);
        }
        self.fbt_valid = true;
        Ok(())
    }

    pub fn get_client_target_support(
        &self,
        width: u32,
        height: u32,
        format: PixelFormat,
        dataspace: Dataspace,
    ) -> ComposerResult<()> {
        let mut color = ColorMetaData::default();
        if dataspace != dataspace::DATASPACE_UNKNOWN {
            dataspace::apply_to_color(dataspace::normalize(dataspace), &mut color);
        }
        self.device
            .client_target_support(width, height, format, &color)
            .map_err(|_| ComposerError::Unsupported)
    }

    pub fn get_display_configs(&self) -> Vec<u32> {
        (0..self.device.configs().len() as u32).collect()
    }

    pub fn get_display_attribute(&self, config: u32, attribute: Attribute) -> ComposerResult<i32> {
        let configs = self.device.configs();
        let config = configs
            .get(config as usize)
            .ok_or(ComposerError::BadConfig)?;
        Ok(match attribute {
            Attribute::Width => config.width as i32,
            Attribute::Height => config.height as i32,
            Attribute::VsyncPeriod => config.vsync_period_ns as i32,
            Attribute::DpiX => (config.x_dpi * 1000.0) as i32,
            Attribute::DpiY => (config.y_dpi * 1000.0) as i32,
        })
    }

    pub fn get_active_config(&self) -> u32 {
        self.device.active_config()
    }

    pub fn set_active_config(&mut self, config: u32) -> ComposerResult<()> {
        self.device
            .set_active_config(config)
            .map_err(|_| ComposerError::BadConfig)?;
        self.update_client_target_geometry();
        self.validated = false;
        Ok(())
    }

    pub fn get_hdr_capabilities(&self) -> HdrCapabilities {
        let info = self.device.fixed_info();
        if !info.hdr_supported {
            return HdrCapabilities::default();
        }
        HdrCapabilities {
            hdr10: true,
            max_luminance: info.max_luminance / LUMINANCE_FACTOR,
            max_average_luminance: info.average_luminance / LUMINANCE_FACTOR,
            min_luminance: info.min_luminance / LUMINANCE_FACTOR,
        }
    }

    pub fn get_visible_display_rect(&self) -> ComposerResult<IntRect> {
        if !self.display_rect.is_valid() {
            return Err(ComposerError::BadDisplay);
        }
        Ok(IntRect::from(self.display_rect))
    }

    pub fn set_vsync_enabled(&mut self, enable: bool) -> ComposerResult<()> {
        if self.shutdown_pending {
            return Ok(());
        }
        match self.device.set_vsync_state(enable) {
            Ok(()) => Ok(()),
            Err(DisplayError::ShutDown) => {
                self.shutdown_pending = true;
                Ok(())
            }
            Err(e) => {
                error!("display {}: vsync state {} failed: {}", self.id, enable, e);
                Err(ComposerError::BadParameter("vsync state"))
            }
        }
    }

    pub fn set_power_mode(&mut self, mode: PowerMode) -> ComposerResult<()> {
        if self.shutdown_pending {
            return Ok(());
        }
        let mut flush_on_error = self.flush_on_error;
        match mode {
            PowerMode::Off => {
                // Buffers are all released; no flush until a frame is submitted again.
                flush_on_error = false;
                if let Some(tone_mapper) = self.tone_mapper.as_mut() {
                    tone_mapper.terminate();
                }
            }
            mode => self.last_power_mode = mode,
        }

        let result = self.device.set_display_state(mode);
        self.validated = false;
        match result {
            Ok(()) => {
                self.flush_on_error = flush_on_error;
                self.power_mode = mode;
                info!("display {}: power mode {:?}", self.id, mode);
                Ok(())
            }
            Err(DisplayError::ShutDown) => {
                self.shutdown_pending = true;
                Ok(())
            }
            Err(e) => {
                error!("display {}: set state {:?} failed: {}", self.id, mode, e);
                Err(ComposerError::BadParameter("power mode"))
            }
        }
    }

    pub fn set_display_status(&mut self, status: DisplayStatus) -> ComposerResult<()> {
        let result = match status {
            DisplayStatus::Resume => {
                self.display_paused = false;
                self.fbt_valid = false;
                self.set_power_mode(PowerMode::On)
            }
            DisplayStatus::Online => self.set_power_mode(PowerMode::On),
            DisplayStatus::Pause => {
                self.display_paused = true;
                self.set_power_mode(PowerMode::Off)
            }
            DisplayStatus::Offline => self.set_power_mode(PowerMode::Off),
        };
        if matches!(status, DisplayStatus::Resume | DisplayStatus::Pause) {
            self.validated = false;
        }
        result
    }

    pub fn toggle_screen_updates(&mut self, enable: bool) {
        self.display_paused = !enable;
        self.validated = false;
    }

    pub fn set_idle_timeout_ms(&mut self, timeout_ms: u32) {
        self.device.set_idle_timeout_ms(timeout_ms);
    }

    /// The panel went idle; the next validate drops to the minimum refresh rate.
    pub fn on_idle_timeout(&mut self) {
        self.handle_idle_timeout = true;
    }

    pub fn on_thermal_event(&mut self, level: i32) {
        info!("display {}: thermal level {}", self.id, level);
        self.validated = false;
    }

    /// Pins the refresh rate. Zero returns to the automatic policy. Rates outside the panel
    /// range are ignored.
    pub fn force_refresh_rate(&mut self, rate: u32) {
        if (rate != 0 && (rate < self.min_refresh_rate || rate > self.max_refresh_rate))
            || self.force_refresh_rate == rate
        {
            warn!("display {}: ignoring forced refresh rate {}", self.id, rate);
            return;
        }
        self.force_refresh_rate = rate;
        self.validated = false;
    }

    pub fn set_cursor_position(&mut self, id: LayerId, x: i32, y: i32) -> ComposerResult<()> {
        if self.shutdown_pending {
            return Ok(());
        }
        if !self.layer_stack.flags.contains(StackFlags::CURSOR_PRESENT) {
            warn!("display {}: no cursor layer", self.id);
            return Err(ComposerError::BadLayer);
        }
        let layer = self.layers.get_mut(&id).ok_or(ComposerError::BadLayer)?;
        if layer.device_selected() != Composition::Cursor {
            return Ok(());
        }
        if !self.skip_validate && self.validated {
            // Between validate and present.
            return Err(ComposerError::NotValidated);
        }
        if self.power_mode != PowerMode::On {
            return Ok(());
        }
        if let Err(e) = self.device.set_cursor_position(x, y) {
            debug!("display {}: cursor position rejected: {}", self.id, e);
            return Err(ComposerError::BadLayer);
        }
        layer.set_cursor_position(x, y);
        Ok(())
    }

    /// Whether a present may reuse the previous validation.
    pub fn can_skip_validate(&self) -> bool {
        if self.properties.disable_skip_validate {
            return false;
        }
        if self.layer_stack.flags.contains(StackFlags::HDR_PRESENT)
            && self.tone_mapper.as_ref().map(|t| t.is_active()).unwrap_or(false)
        {
            trace!("display {}: tone mapping needs validation", self.id);
            return false;
        }
        if self.client_target.needs_validation() {
            return false;
        }
        self.layers.values().all(|l| {
            !l.needs_validation() && l.device_selected() != Composition::Client
        })
    }

    pub fn validate(&mut self) -> ComposerResult<Validation> {
        self.layer_changes.clear();
        self.layer_requests.clear();

        if self.shutdown_pending {
            return Ok(Validation::default());
        }

        if self.display_paused {
            self.mark_layers_for_device_bypass();
            self.validated = true;
            return Ok(Validation::default());
        }

        if self.power_mode == PowerMode::Off {
            trace!("display {}: validate while off", self.id);
            return Ok(Validation::default());
        }

        self.build_layer_stack();
        self.update_refresh_rate();

        if self.layers.is_empty() {
            let info = self.device.fixed_info();
            // Command mode panels keep showing their last frame.
            self.flush = !(info.is_cmdmode && self.secure_display_active);
            self.validated = true;
            return Ok(Validation::default());
        }

        self.prepare_layer_stack()
    }

    fn mark_layers_for_device_bypass(&mut self) {
        for layer in self.layer_stack.app_layers_mut() {
            layer.composition = LayerComposition::Device;
        }
        for layer in self.layers.values_mut() {
            layer.layer_mut().composition = LayerComposition::Device;
        }
    }

    fn mark_layers_for_client_composition(&mut self) {
        for layer in self.layer_stack.app_layers_mut() {
            layer.flags |= LayerFlags::SKIP;
        }
        self.layer_stack.flags |= StackFlags::SKIP_PRESENT;
    }

    fn build_layer_stack(&mut self) {
        self.layer_stack = LayerStack::new();
        self.stack_ids.clear();
        self.display_rect = Rect::default();
        self.metadata_refresh_rate = 0;

        let mut secure_display_active = false;
        let mut geometry_changes = crate::layer::GeometryChanges::empty();
        let top = self.z_order.last().copied();
        let track_updates = self.layers.len() <= MAX_TRACKED_LAYERS;

        for id in &self.z_order {
            let hwc = match self.layers.get_mut(id) {
                Some(hwc) => hwc,
                None => continue,
            };
            let requested = hwc.client_requested();
            let csc_ok = hwc.validate_and_set_csc(&self.buffers);
            let single_buffer = hwc.is_single_buffer();
            let non_integral = hwc.is_non_integral_source_crop();
            geometry_changes |= hwc.geometry_changes();

            let layer = hwc.layer_mut();
            layer.flags = LayerFlags::empty();
            layer.composition = LayerComposition::Gpu;
            layer.request = LayerRequest::default();
            match requested {
                Composition::Client => layer.flags |= LayerFlags::SKIP,
                Composition::SolidColor => layer.flags |= LayerFlags::SOLID_FILL,
                _ => {}
            }
            if !csc_ok {
                layer.flags |= LayerFlags::SKIP;
            }
            if single_buffer {
                layer.flags |= LayerFlags::SINGLE_BUFFER;
            }

            let mut is_secure = false;
            if let Some(handle) = &layer.input.handle {
                if layer.input.is_video() {
                    self.layer_stack.flags |= StackFlags::VIDEO_PRESENT;
                }
                if handle.is_secure() {
                    self.layer_stack.flags |= StackFlags::SECURE_PRESENT;
                    is_secure = true;
                }
            }
            if layer.input.flags.contains(BufferFlags::SECURE_DISPLAY) {
                secure_display_active = true;
                is_secure = true;
            }

            if requested == Composition::Cursor && top == Some(*id) {
                layer.flags |= LayerFlags::CURSOR;
                self.layer_stack.flags |= StackFlags::CURSOR_PRESENT;
            }

            let hdr_layer = layer.input.color.is_hdr() && !self.properties.disable_hdr;
            layer.input.flags.set(BufferFlags::HDR, hdr_layer);
            if hdr_layer {
                self.layer_stack.flags |= StackFlags::HDR_PRESENT;
            }

            if non_integral
                && !is_secure
                && !hdr_layer
                && !layer.flags.contains(LayerFlags::SINGLE_BUFFER)
                && !layer.flags.contains(LayerFlags::SOLID_FILL)
            {
                layer.flags |= LayerFlags::SKIP;
            }
            if layer.flags.contains(LayerFlags::SKIP) {
                self.layer_stack.flags |= StackFlags::SKIP_PRESENT;
            }

            if layer.flags.contains(LayerFlags::SOLID_FILL) {
                let dst = layer.dst_rect;
                layer.input.width = dst.width() as u32;
                layer.input.height = dst.height() as u32;
                layer.src_rect = Rect::new(0.0, 0.0, dst.width(), dst.height());
            }

            if layer.frame_rate > self.metadata_refresh_rate {
                self.metadata_refresh_rate = sanitize_refresh_rate(
                    self.min_refresh_rate,
                    self.max_refresh_rate,
                    layer.frame_rate,
                );
            } else {
                layer.frame_rate = self.current_refresh_rate;
            }
            self.display_rect = self.display_rect.union(&layer.dst_rect);

            let updating = !track_updates
                || layer.flags.contains(LayerFlags::SINGLE_BUFFER)
                || is_surface_updated(&layer.dirty_regions)
                || !geometry_changes.is_empty();
            layer.flags.set(LayerFlags::UPDATING, updating);
            layer.lut_3d = self.hdr_lut.clone();

            self.layer_stack.layers.push(layer.snapshot());
            self.stack_ids.push(*id);
        }

        if self.fbt_valid {
            self.layer_stack.flags |= StackFlags::FBT_VALID;
        }
        if !geometry_changes.is_empty() {
            self.layer_stack.flags |= StackFlags::GEOMETRY_CHANGED;
        }

        let target = self.client_target.layer_mut();
        target.composition = LayerComposition::GpuTarget;
        let target_format = target.input.format;
        self.layer_stack.layers.push(target.snapshot());
        self.stack_ids.push(self.client_target.id());

        if is_10bit_format(target_format) {
            self.mark_layers_for_client_composition();
        }

        self.set_secure_display(secure_display_active);
    }

    fn set_secure_display(&mut self, active: bool) {
        if self.secure_display_active != active {
            info!(
                "display {}: secure display {} -> {}, flushing",
                self.id, self.secure_display_active, active
            );
            self.secure_display_active = active;
            self.secure_display_transition = true;
            self.skip_prepare = true;
        }
    }

    fn optimal_refresh_rate(&self, one_updating_layer: bool) -> u32 {
        if self.force_refresh_rate != 0 {
            self.force_refresh_rate
        } else if self.handle_idle_timeout {
            self.min_refresh_rate
        } else if self.properties.use_metadata_refresh_rate
            && one_updating_layer
            && self.metadata_refresh_rate != 0
        {
            self.metadata_refresh_rate
        } else {
            self.max_refresh_rate
        }
    }

    fn update_refresh_rate(&mut self) {
        let one_updating_layer = self.layer_stack.updating_count() == 1;
        let rate = self.optimal_refresh_rate(one_updating_layer);
        if self.current_refresh_rate != rate || self.handle_idle_timeout {
            match self.device.set_refresh_rate(rate) {
                Ok(()) => {
                    debug!("display {}: refresh rate {}", self.id, rate);
                    self.current_refresh_rate = rate;
                }
                Err(e) => trace!("display {}: refresh rate {} not applied: {}", self.id, rate, e),
            }
        }
        self.handle_idle_timeout = false;
    }

    fn prepare_layer_stack(&mut self) -> ComposerResult<Validation> {
        if !self.skip_prepare {
            let result = self
                .strategy
                .prepare(&mut self.layer_stack)
                .and_then(|outcome| {
                    if outcome.geometry_changed {
                        self.layer_stack.flags |= StackFlags::GEOMETRY_CHANGED;
                    }
                    self.device.prepare(&mut self.layer_stack)
                });
            if let Err(e) = result {
                match e {
                    DisplayError::ShutDown => {
                        info!("display {}: shutdown pending", self.id);
                        self.shutdown_pending = true;
                    }
                    DisplayError::Permission => {}
                    e => {
                        error!("display {}: prepare failed: {}", self.id, e);
                        self.flush = true;
                    }
                }
                return Err(ComposerError::BadDisplay);
            }
            self.validated = true;
        } else {
            self.mark_layers_for_device_bypass();
            self.skip_prepare = false;
            info!("display {}: secure transition, skipping prepare", self.id);
            self.flush = true;
        }

        let mut validation = Validation::default();
        for (i, id) in self.stack_ids.iter().enumerate() {
            let hwc = match self.layers.get_mut(id) {
                Some(hwc) => hwc,
                None => continue,
            };
            let stacked = &self.layer_stack.layers[i];
            let composition = stacked.composition;
            if composition == LayerComposition::Device {
                self.layer_requests
                    .insert(*id, LayerDisplayRequest::ClearClientTarget);
            }
            let requested = hwc.client_requested();
            let layer = hwc.layer_mut();
            layer.composition = composition;
            layer.request = stacked.request.clone();
            hwc.set_composition(composition);
            let selected = hwc.device_selected();
            if requested != selected {
                self.layer_changes.insert(*id, selected);
            }
            hwc.reset_validation();
        }
        self.client_target.reset_validation();
        self.skip_validate = false;

        validation.num_types = self.layer_changes.len() as u32;
        validation.num_requests = self.layer_requests.len() as u32;
        debug!(
            "display {}: validated, {} changes {} requests",
            self.id, validation.num_types, validation.num_requests
        );
        Ok(validation)
    }

    pub fn accept_display_changes(&mut self) -> ComposerResult<()> {
        if self.layers.is_empty() {
            return Ok(());
        }
        if !self.validated {
            return Err(ComposerError::NotValidated);
        }
        for (id, composition) in &self.layer_changes {
            match self.layers.get_mut(id) {
                Some(layer) => layer.update_client_composition_type(*composition),
                None => warn!("display {}: change for unknown layer {}", self.id, id),
            }
        }
        Ok(())
    }

    pub fn get_changed_composition_types(&self) -> ComposerResult<Vec<(LayerId, Composition)>> {
        if self.layers.is_empty() {
            return Ok(Vec::new());
        }
        if !self.validated {
            return Err(ComposerError::NotValidated);
        }
        Ok(self.layer_changes.iter().map(|(k, v)| (*k, *v)).collect())
    }

    pub fn get_display_requests(
        &self,
    ) -> ComposerResult<Vec<(LayerId, LayerDisplayRequest)>> {
        if self.layers.is_empty() {
            return Ok(Vec::new());
        }
        if !self.validated {
            return Err(ComposerError::NotValidated);
        }
        Ok(self.layer_requests.iter().map(|(k, v)| (*k, *v)).collect())
    }

    /// Commits the validated frame and returns its retire fence.
    pub fn present(&mut self) -> ComposerResult<Option<Fence>> {
        if self.shutdown_pending {
            self.close_acquire_fences();
            return Ok(None);
        }

        let result = if self.display_paused {
            if let Err(e) = self.device.flush(false) {
                error!("display {}: flush while paused failed: {}", self.id, e);
            }
            Ok(None)
        } else if self.power_mode == PowerMode::Off {
            Ok(None)
        } else {
            match self.commit_layer_stack() {
                Ok(CommitStatus::Submitted) => Ok(self.post_commit_layer_stack()),
                Ok(CommitStatus::ShutDown) => Ok(None),
                Err(e) => Err(e),
            }
        };
        self.close_acquire_fences();
        result
    }

    /// Copies buffers and acquire fences set since validation into the stack.
    fn sync_stack_inputs(&mut self) {
        let target_id = self.client_target.id();
        for (i, id) in self.stack_ids.iter().enumerate() {
            let source = if *id == target_id {
                &mut self.client_target
            } else {
                match self.layers.get_mut(id) {
                    Some(layer) => layer,
                    None => continue,
                }
            };
            let source = source.layer_mut();
            let stacked = &mut self.layer_stack.layers[i];
            stacked.input = source.input.clone();
            stacked.dirty_regions = source.dirty_regions.clone();
            stacked.acquire_fence = source.acquire_fence.take();
            if self.properties.swap_interval_zero {
                stacked.acquire_fence = None;
            }
        }
    }

    fn commit_layer_stack(&mut self) -> ComposerResult<CommitStatus> {
        if self.flush {
            return Ok(CommitStatus::Submitted);
        }

        if self.skip_validate && !self.can_skip_validate() {
            self.validated = false;
        }
        if !self.validated {
            debug!("display {}: not validated", self.id);
            return Err(ComposerError::NotValidated);
        }
        if self.layers.is_empty() {
            return Ok(CommitStatus::Submitted);
        }

        self.sync_stack_inputs();

        if let Some(tone_mapper) = self.tone_mapper.as_mut() {
            if self.layer_stack.flags.contains(StackFlags::HDR_PRESENT) {
                if let Err(e) = tone_mapper.handle_tone_map(&mut self.layer_stack) {
                    error!("display {}: tone mapping failed: {}", self.id, e);
                }
            } else {
                tone_mapper.terminate();
            }
        }

        match self.device.commit(&mut self.layer_stack) {
            Ok(()) => self.flush_on_error = true,
            Err(DisplayError::ShutDown) => {
                info!("display {}: shutdown pending", self.id);
                self.shutdown_pending = true;
                return Ok(CommitStatus::ShutDown);
            }
            Err(DisplayError::NotValidated) => {
                self.validated = false;
                return Err(ComposerError::NotValidated);
            }
            Err(DisplayError::Permission) => {}
            Err(e) => {
                error!("display {}: commit failed: {}", self.id, e);
                self.flush = true;
            }
        }

        self.skip_validate = true;
        Ok(CommitStatus::Submitted)
    }

    fn post_commit_layer_stack(&mut self) -> Option<Fence> {
        if self.flush && self.flush_on_error {
            if let Err(e) = self.device.flush(self.secure_display_transition) {
                error!("display {}: flush failed: {}", self.id, e);
            }
            self.secure_display_transition = false;
            self.validated = false;
            self.flush_on_error = false;
        }

        if let Some(tone_mapper) = self.tone_mapper.as_mut() {
            if tone_mapper.is_active() {
                tone_mapper.post_commit(&mut self.layer_stack);
            }
        }

        if let Some(target) = self.layer_stack.layers.last_mut() {
            target.release_fence = None;
            target.request = LayerRequest::default();
        }
        self.client_target.reset_geometry_changes();

        let positions: Map<LayerId, usize> = self
            .stack_ids
            .iter()
            .enumerate()
            .map(|(i, id)| (*id, i))
            .collect();
        for id in &self.z_order {
            let hwc = match self.layers.get_mut(id) {
                Some(hwc) => hwc,
                None => continue,
            };
            hwc.reset_geometry_changes();
            let stacked = match positions.get(id) {
                Some(i) => self.layer_stack.layers.get_mut(*i),
                None => None,
            };
            let (release, composition, single_buffer) = match stacked {
                Some(layer) => {
                    layer.acquire_fence = None;
                    layer.request = LayerRequest::default();
                    (
                        layer.release_fence.take(),
                        layer.composition,
                        layer.flags.contains(LayerFlags::SINGLE_BUFFER),
                    )
                }
                None => (None, LayerComposition::Gpu, false),
            };

            if self.flush {
                // The client still pops one fence per layer after a flushed frame.
                hwc.push_release_fence(None);
            } else if self.properties.swap_interval_zero || single_buffer {
                drop(release);
            } else if composition != LayerComposition::Gpu {
                hwc.push_release_fence(release);
            } else {
                hwc.push_release_fence(None);
            }
        }

        let retire = self.layer_stack.retire_fence.take();
        let retire = if self.flush || self.properties.swap_interval_zero {
            None
        } else {
            retire
        };

        self.flush = false;
        self.frames += 1;
        retire
    }

    fn close_acquire_fences(&mut self) {
        for layer in self.layer_stack.layers.iter_mut() {
            layer.acquire_fence = None;
        }
        for layer in self.layers.values_mut() {
            layer.layer_mut().acquire_fence = None;
        }
        self.client_target.layer_mut().acquire_fence = None;
    }

    /// Pops one release fence per layer, in z order.
    pub fn get_release_fences(&mut self) -> Vec<(LayerId, Option<Fence>)> {
        let mut fences = Vec::with_capacity(self.z_order.len());
        for id in &self.z_order {
            if let Some(layer) = self.layers.get_mut(id) {
                fences.push((*id, layer.pop_release_fence()));
            }
        }
        fences
    }

    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "display {}: power {:?} validated {} paused {} shutdown {} frames {}",
            self.id,
            self.power_mode,
            self.validated,
            self.display_paused,
            self.shutdown_pending,
            self.frames
        );
        let _ = writeln!(
            out,
            "  refresh rate {} (min {} max {} metadata {} forced {})",
            self.current_refresh_rate,
            self.min_refresh_rate,
            self.max_refresh_rate,
            self.metadata_refresh_rate,
            self.force_refresh_rate
        );
        for id in &self.z_order {
            if let Some(layer) = self.layers.get(id) {
                let l = layer.layer();
                let _ = writeln!(
                    out,
                    "  layer {} z {} requested {:?} selected {:?} {:?} {}x{} {:?} flags {:?}",
                    id,
                    layer.z(),
                    layer.client_requested(),
                    layer.device_selected(),
                    l.composition,
                    l.input.width,
                    l.input.height,
                    l.input.format,
                    l.flags
                );
            }
        }
        out.push_str(&self.strategy.dump());
        out.push_str(&self.device.dump());
        if let Some(tone_mapper) = &self.tone_mapper {
            out.push_str(&tone_mapper.dump());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use gralloc::BufferDescriptor;
    use gralloc::ColorPrimaries;
    use gralloc::ColorRange;
    use gralloc::ConsumerUsage;
    use gralloc::GammaTransfer;
    use gralloc::GrallocConfig;
    use gralloc::MatrixCoefficients;
    use gralloc::MetadataField;
    use gralloc::MetadataValue;
    use gralloc::ProducerUsage;
    use gralloc::SystemAllocator;
    use gralloc::Usage;

    use super::*;
    use crate::device::test_device::Script;
    use crate::device::test_device::ScriptedDisplayDevice;
    use crate::strategy::DefaultStrategy;
    use crate::tonemap::test_kernel::identity_lut;
    use crate::tonemap::test_kernel::RecordingFactory;
    use std::sync::Mutex;

    fn test_manager() -> Arc<BufferManager> {
        let allocator = SystemAllocator::init().unwrap();
        Arc::new(BufferManager::new(allocator, GrallocConfig::default()))
    }

    fn test_display(
        properties: DisplayProperties,
    ) -> (HwcDisplay, Arc<BufferManager>, Arc<Mutex<Script>>) {
        let buffers = test_manager();
        let (device, script) = ScriptedDisplayDevice::new();
        let display = HwcDisplay::new(
            0,
            buffers.clone(),
            Box::new(device),
            Box::new(DefaultStrategy::new(properties.max_blending_layers, true)),
            Some(Arc::new(RecordingFactory::default())),
            properties,
        );
        (display, buffers, script)
    }

    fn buffer(buffers: &BufferManager) -> Arc<BufferHandle> {
        let usage = Usage::new(ProducerUsage::GPU_RENDER_TARGET, ConsumerUsage::HWCOMPOSER);
        let descriptor = BufferDescriptor::with_params(64, 64, PixelFormat::RGBA_8888, usage);
        buffers.allocate_buffer(&descriptor, 0).unwrap()
    }

    fn add_layer(display: &mut HwcDisplay, buffers: &BufferManager, z: u32) -> LayerId {
        let id = display.create_layer();
        display.set_layer_z_order(id, z).unwrap();
        display
            .set_layer_buffer(id, Some(buffer(buffers)), None)
            .unwrap();
        let layer = display.layer_mut(id).unwrap();
        layer.set_display_frame(IntRect::new(0, 0, 64, 64));
        layer.set_source_crop(FloatRect::new(0.0, 0.0, 64.0, 64.0));
        id
    }

    fn powered_display(
        properties: DisplayProperties,
    ) -> (HwcDisplay, Arc<BufferManager>, Arc<Mutex<Script>>) {
        let (mut display, buffers, script) = test_display(properties);
        display.set_power_mode(PowerMode::On).unwrap();
        (display, buffers, script)
    }

    #[test]
    fn present_requires_validate() {
        let (mut display, buffers, _script) = powered_display(Default::default());
        add_layer(&mut display, &buffers, 0);
        assert!(matches!(display.present(), Err(ComposerError::NotValidated)));
        assert!(matches!(
            display.get_changed_composition_types(),
            Err(ComposerError::NotValidated)
        ));
    }

    #[test]
    fn release_fences_lag_one_frame() {
        let (mut display, buffers, script) = powered_display(Default::default());
        let a = add_layer(&mut display, &buffers, 0);
        let b = add_layer(&mut display, &buffers, 1);

        let validation = display.validate().unwrap();
        assert!(!validation.has_changes());
        assert_eq!(validation.num_requests, 2);
        let retire = display.present().unwrap();
        assert!(retire.is_some());
        let fences = display.get_release_fences();
        assert_eq!(fences.iter().map(|f| f.0).collect::<Vec<_>>(), vec![a, b]);
        assert!(fences.iter().all(|f| f.1.is_none()));

        display.validate().unwrap();
        display.present().unwrap();
        let fences = display.get_release_fences();
        assert!(fences.iter().all(|f| f.1.is_some()));
        assert_eq!(script.lock().unwrap().commits, 2);
    }

    #[test]
    fn z_order_sorts_layers() {
        let (mut display, buffers, _script) = powered_display(Default::default());
        let top = add_layer(&mut display, &buffers, 5);
        let bottom = add_layer(&mut display, &buffers, 1);
        let middle = add_layer(&mut display, &buffers, 3);
        assert_eq!(display.layer_ids(), vec![bottom, middle, top]);
        display.set_layer_z_order(bottom, 9).unwrap();
        assert_eq!(display.layer_ids(), vec![middle, top, bottom]);
        assert!(matches!(
            display.set_layer_z_order(LayerId(u64::MAX), 0),
            Err(ComposerError::BadLayer)
        ));
    }

    #[test]
    fn off_display_is_a_no_op() {
        let (mut display, buffers, script) = test_display(Default::default());
        add_layer(&mut display, &buffers, 0);
        assert_eq!(display.validate().unwrap(), Validation::default());
        assert!(display.present().unwrap().is_none());
        let script = script.lock().unwrap();
        assert_eq!(script.prepares, 0);
        assert_eq!(script.commits, 0);
    }

    #[test]
    fn overflow_reports_client_changes() {
        let properties = DisplayProperties {
            max_blending_layers: 2,
            ..Default::default()
        };
        let (mut display, buffers, _script) = powered_display(properties);
        for z in 0..3 {
            add_layer(&mut display, &buffers, z);
        }
        let validation = display.validate().unwrap();
        assert_eq!(validation.num_types, 3);
        let changes = display.get_changed_composition_types().unwrap();
        assert!(changes.iter().all(|c| c.1 == Composition::Client));
        display.accept_display_changes().unwrap();

        let validation = display.validate().unwrap();
        assert_eq!(validation.num_types, 0);
        assert!(display.present().unwrap().is_some());
    }

    #[test]
    fn prepare_failure_flushes() {
        let (mut display, buffers, script) = powered_display(Default::default());
        let id = add_layer(&mut display, &buffers, 0);
        display.validate().unwrap();
        display.present().unwrap();
        display.get_release_fences();

        script.lock().unwrap().fail_prepare = Some(DisplayError::Resources);
        assert!(matches!(display.validate(), Err(ComposerError::BadDisplay)));
        assert!(display.present().unwrap().is_none());
        let script = script.lock().unwrap();
        assert_eq!(script.commits, 1);
        assert_eq!(script.flushes, 1);
        drop(script);

        // Frame one's fence, then the flushed frame's empty slot.
        let fences = display.get_release_fences();
        assert_eq!(fences[0].0, id);
        assert!(fences[0].1.is_some());
        assert!(display.get_release_fences()[0].1.is_none());
        assert!(!display.is_validated());
    }

    #[test]
    fn shutdown_latches() {
        let (mut display, buffers, script) = powered_display(Default::default());
        add_layer(&mut display, &buffers, 0);
        display.validate().unwrap();
        script.lock().unwrap().fail_commit = Some(DisplayError::ShutDown);
        assert!(display.present().unwrap().is_none());

        display.validate().unwrap();
        display.present().unwrap();
        assert!(display.set_power_mode(PowerMode::Off).is_ok());
        let script = script.lock().unwrap();
        assert_eq!(script.prepares, 1);
        assert_eq!(script.commits, 1);
        assert_eq!(script.states, vec![PowerMode::On]);
    }

    #[test]
    fn present_skips_validate_for_buffer_updates() {
        let (mut display, buffers, script) = powered_display(Default::default());
        let id = add_layer(&mut display, &buffers, 0);
        display.validate().unwrap();
        display.present().unwrap();

        display
            .set_layer_buffer(id, Some(buffer(&buffers)), None)
            .unwrap();
        display.present().unwrap();
        assert_eq!(script.lock().unwrap().commits, 2);

        display
            .layer_mut(id)
            .unwrap()
            .set_display_frame(IntRect::new(0, 0, 32, 32));
        assert!(matches!(display.present(), Err(ComposerError::NotValidated)));
    }

    #[test]
    fn skip_validate_can_be_disabled() {
        let properties = DisplayProperties {
            disable_skip_validate: true,
            ..Default::default()
        };
        let (mut display, buffers, _script) = powered_display(properties);
        add_layer(&mut display, &buffers, 0);
        display.validate().unwrap();
        display.present().unwrap();
        assert!(!display.can_skip_validate());
        assert!(matches!(display.present(), Err(ComposerError::NotValidated)));
    }

    #[test]
    fn empty_display_flushes_after_a_frame() {
        let (mut display, buffers, script) = powered_display(Default::default());
        let id = add_layer(&mut display, &buffers, 0);
        display.validate().unwrap();
        display.present().unwrap();
        display.destroy_layer(id).unwrap();

        assert_eq!(display.validate().unwrap(), Validation::default());
        assert!(display.present().unwrap().is_none());
        assert_eq!(script.lock().unwrap().flushes, 1);
    }

    #[test]
    fn refresh_rate_policy() {
        let (mut display, buffers, script) = powered_display(Default::default());
        let id = add_layer(&mut display, &buffers, 0);
        let handle = display.layer(id).unwrap().layer().input.handle.clone().unwrap();
        buffers
            .set_metadata(
                &handle,
                MetadataField::RefreshRate,
                Some(&MetadataValue::RefreshRate(24.0)),
            )
            .unwrap();
        display.set_layer_buffer(id, Some(handle), None).unwrap();
        assert_eq!(display.layer(id).unwrap().layer().frame_rate, 24);

        display.validate().unwrap();
        assert_eq!(display.current_refresh_rate(), 48);

        display.on_idle_timeout();
        display.validate().unwrap();
        assert_eq!(display.current_refresh_rate(), 30);

        display.force_refresh_rate(60);
        display.validate().unwrap();
        assert_eq!(display.current_refresh_rate(), 60);
        display.force_refresh_rate(120);
        display.validate().unwrap();
        assert_eq!(display.current_refresh_rate(), 60);
        assert_eq!(script.lock().unwrap().refresh_rates, vec![48, 30, 60]);
    }

    #[test]
    fn pause_bypasses_strategy() {
        let (mut display, buffers, script) = powered_display(Default::default());
        add_layer(&mut display, &buffers, 0);
        display.set_display_status(DisplayStatus::Pause).unwrap();
        assert_eq!(display.power_mode(), PowerMode::Off);
        assert_eq!(display.last_power_mode(), PowerMode::On);
        display.validate().unwrap();
        assert!(display.is_validated());
        assert!(display.present().unwrap().is_none());
        {
            let script = script.lock().unwrap();
            assert_eq!(script.prepares, 0);
            assert_eq!(script.flushes, 1);
        }

        display.set_display_status(DisplayStatus::Resume).unwrap();
        assert!(!display.is_validated());
        display.validate().unwrap();
        assert!(display.present().unwrap().is_some());
    }

    #[test]
    fn hdr_layers_are_tone_mapped() {
        let (mut display, buffers, script) = powered_display(Default::default());
        display.set_hdr_lut(Some(identity_lut()));
        let id = add_layer(&mut display, &buffers, 0);
        let handle = display.layer(id).unwrap().layer().input.handle.clone().unwrap();
        let hdr = ColorMetaData::new(
            ColorPrimaries::Bt2020,
            ColorRange::Full,
            GammaTransfer::SmpteSt2084,
            MatrixCoefficients::Bt2020,
        );
        buffers
            .set_metadata(
                &handle,
                MetadataField::ColorMetadata,
                Some(&MetadataValue::ColorMetadata(Box::new(hdr))),
            )
            .unwrap();

        display.validate().unwrap();
        display.present().unwrap();
        assert_eq!(display.tone_mapper().unwrap().session_count(), 1);
        assert_eq!(
            script.lock().unwrap().last_compositions[0],
            LayerComposition::Device
        );
        assert!(!display.can_skip_validate());

        display.destroy_layer(id).unwrap();
        add_layer(&mut display, &buffers, 0);
        display.validate().unwrap();
        display.present().unwrap();
        assert!(!display.tone_mapper().unwrap().is_active());
    }

    #[test]
    fn attributes_and_configs() {
        let (mut display, _buffers, _script) = test_display(Default::default());
        assert_eq!(display.get_display_configs(), vec![0, 1]);
        assert_eq!(display.get_display_attribute(1, Attribute::Width).unwrap(), 1280);
        assert_eq!(display.get_display_attribute(0, Attribute::DpiX).unwrap(), 160_000);
        assert!(matches!(
            display.get_display_attribute(2, Attribute::Width),
            Err(ComposerError::BadConfig)
        ));
        display.set_active_config(1).unwrap();
        assert_eq!(display.get_active_config(), 1);
        assert!(matches!(
            display.set_active_config(5),
            Err(ComposerError::BadConfig)
        ));
        assert!(!display.get_hdr_capabilities().hdr10);
    }

    #[test]
    fn destroy_unknown_layer() {
        let (mut display, _buffers, _script) = test_display(Default::default());
        assert!(matches!(
            display.destroy_layer(LayerId(u64::MAX)),
            Err(ComposerError::BadLayer)
        ));
        assert!(display.dump().contains("display 0"));
    }
}
