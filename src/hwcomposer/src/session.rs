// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! session: Owns the buffer manager and every display, and routes client calls to them.
//!
//! Each display sits behind its own lock so that frames on different displays never contend.
//! The display table lock is only held long enough to find a display.

use std::collections::BTreeMap as Map;
use std::fmt::Write;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;

use composer::ComposerError;
use composer::ComposerResult;
use composer::CompositionStrategy;
use composer::DefaultStrategy;
use composer::DisplayDevice;
use composer::DisplayProperties;
use composer::HwcDisplay;
use composer::LayerId;
use composer::PowerMode;
use composer::ToneMapKernelFactory;
use composer::Validation;
use gralloc::AllocationOutcome;
use gralloc::BufferHandle;
use gralloc::BufferManager;
use gralloc::BufferMapping;
use gralloc::Fence;
use gralloc::GrallocConfig;
use gralloc::PerformCommand;
use gralloc::PerformResult;
use gralloc::PlatformAllocator;
use gralloc::PropertyStore;
use gralloc::Usage;
use log::info;

pub type DisplayId = u64;

/// The outcome of presenting one frame.
#[derive(Default)]
pub struct PresentResult {
    pub retire_fence: Option<Fence>,
    /// One entry per layer, bottom to top.
    pub release_fences: Vec<(LayerId, Option<Fence>)>,
}

pub struct HwcSession {
    buffers: Arc<BufferManager>,
    properties: DisplayProperties,
    displays: Mutex<Map<DisplayId, Arc<Mutex<HwcDisplay>>>>,
    next_display: AtomicU64,
}

impl HwcSession {
    pub fn new(allocator: Box<dyn PlatformAllocator>, properties: &dyn PropertyStore) -> HwcSession {
        let config = GrallocConfig::from_store(properties);
        let properties = DisplayProperties::from_store(properties);
        info!("hwc session created: {:?}", properties);
        HwcSession {
            buffers: Arc::new(BufferManager::new(allocator, config)),
            properties,
            displays: Mutex::new(Map::new()),
            next_display: AtomicU64::new(0),
        }
    }

    pub fn buffer_manager(&self) -> &Arc<BufferManager> {
        &self.buffers
    }

    pub fn properties(&self) -> &DisplayProperties {
        &self.properties
    }

    /// Adds a display driven by `device`. Without a `strategy` the default one is used, sized by
    /// the session properties. Without a `kernel_factory` HDR layers are never tone mapped.
    pub fn create_display(
        &self,
        device: Box<dyn DisplayDevice>,
        strategy: Option<Box<dyn CompositionStrategy>>,
        kernel_factory: Option<Arc<dyn ToneMapKernelFactory>>,
    ) -> DisplayId {
        let id = self.next_display.fetch_add(1, Ordering::SeqCst);
        let strategy = strategy.unwrap_or_else(|| {
            Box::new(DefaultStrategy::new(
                self.properties.max_blending_layers,
                self.properties.enable_tone_mapping,
            ))
        });
        let display = HwcDisplay::new(
            id,
            self.buffers.clone(),
            device,
            strategy,
            kernel_factory,
            self.properties,
        );
        self.displays
            .lock()
            .unwrap()
            .insert(id, Arc::new(Mutex::new(display)));
        info!("display {} created", id);
        id
    }

    /// Powers the display off and forgets it.
    pub fn destroy_display(&self, id: DisplayId) -> ComposerResult<()> {
        let display = self
            .displays
            .lock()
            .unwrap()
            .remove(&id)
            .ok_or(ComposerError::BadDisplay)?;
        let mut display = display.lock().unwrap();
        if display.power_mode() != PowerMode::Off {
            display.set_power_mode(PowerMode::Off)?;
        }
        info!("display {} destroyed", id);
        Ok(())
    }

    pub fn display_ids(&self) -> Vec<DisplayId> {
        self.displays.lock().unwrap().keys().copied().collect()
    }

    /// Runs `f` on display `id` under its lock.
    pub fn with_display<F, R>(&self, id: DisplayId, f: F) -> ComposerResult<R>
    where
        F: FnOnce(&mut HwcDisplay) -> ComposerResult<R>,
    {
        let display = self
            .displays
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(ComposerError::BadDisplay)?;
        let mut display = display.lock().unwrap();
        f(&mut display)
    }

    pub fn create_layer(&self, display: DisplayId) -> ComposerResult<LayerId> {
        self.with_display(display, |d| Ok(d.create_layer()))
    }

    pub fn destroy_layer(&self, display: DisplayId, layer: LayerId) -> ComposerResult<()> {
        self.with_display(display, |d| d.destroy_layer(layer))
    }

    pub fn set_layer_buffer(
        &self,
        display: DisplayId,
        layer: LayerId,
        handle: Option<Arc<BufferHandle>>,
        acquire_fence: Option<Fence>,
    ) -> ComposerResult<()> {
        self.with_display(display, |d| d.set_layer_buffer(layer, handle, acquire_fence))
    }

    pub fn set_layer_z_order(
        &self,
        display: DisplayId,
        layer: LayerId,
        z: u32,
    ) -> ComposerResult<()> {
        self.with_display(display, |d| d.set_layer_z_order(layer, z))
    }

    pub fn set_power_mode(&self, display: DisplayId, mode: PowerMode) -> ComposerResult<()> {
        self.with_display(display, |d| d.set_power_mode(mode))
    }

    pub fn set_vsync_enabled(&self, display: DisplayId, enable: bool) -> ComposerResult<()> {
        self.with_display(display, |d| d.set_vsync_enabled(enable))
    }

    pub fn validate_display(&self, display: DisplayId) -> ComposerResult<Validation> {
        self.with_display(display, |d| d.validate())
    }

    pub fn accept_display_changes(&self, display: DisplayId) -> ComposerResult<()> {
        self.with_display(display, |d| d.accept_display_changes())
    }

    /// Presents the validated frame and collects the release fences of the previous one.
    pub fn present_display(&self, display: DisplayId) -> ComposerResult<PresentResult> {
        self.with_display(display, |d| {
            let retire_fence = d.present()?;
            Ok(PresentResult {
                retire_fence,
                release_fences: d.get_release_fences(),
            })
        })
    }

    pub fn create_descriptor(&self) -> u64 {
        self.buffers.create_descriptor()
    }

    pub fn destroy_descriptor(&self, id: u64) -> ComposerResult<()> {
        Ok(self.buffers.destroy_descriptor(id)?)
    }

    pub fn allocate_buffers(
        &self,
        descriptors: &[u64],
        out: Option<&mut Vec<Arc<BufferHandle>>>,
    ) -> ComposerResult<AllocationOutcome> {
        Ok(self.buffers.allocate_buffers(descriptors, out)?)
    }

    pub fn retain(&self, handle: &Arc<BufferHandle>) -> ComposerResult<()> {
        Ok(self.buffers.retain(handle)?)
    }

    pub fn release(&self, handle: &BufferHandle) -> ComposerResult<()> {
        Ok(self.buffers.release(handle)?)
    }

    pub fn lock(
        &self,
        handle: &BufferHandle,
        usage: Usage,
        acquire_fence: Option<Fence>,
    ) -> ComposerResult<BufferMapping> {
        Ok(self.buffers.lock(handle, usage, acquire_fence)?)
    }

    pub fn unlock(&self, handle: &BufferHandle) -> ComposerResult<Option<Fence>> {
        Ok(self.buffers.unlock(handle)?)
    }

    pub fn perform(&self, command: PerformCommand) -> ComposerResult<PerformResult> {
        Ok(self.buffers.perform(command)?)
    }

    pub fn dump(&self) -> String {
        let mut out = self.buffers.dump();
        let displays: Vec<Arc<Mutex<HwcDisplay>>> =
            self.displays.lock().unwrap().values().cloned().collect();
        let _ = writeln!(out, "displays: {}", displays.len());
        for display in displays {
            out.push_str(&display.lock().unwrap().dump());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use composer::Composition;
    use composer::FloatRect;
    use composer::IntRect;
    use composer::NoopDisplayDevice;
    use gralloc::ConsumerUsage;
    use gralloc::MapPropertyStore;
    use gralloc::PixelFormat;
    use gralloc::ProducerUsage;
    use gralloc::SystemAllocator;

    use super::*;

    fn test_session(store: &MapPropertyStore) -> HwcSession {
        HwcSession::new(SystemAllocator::init().unwrap(), store)
    }

    fn descriptor(session: &HwcSession, width: u32, height: u32, usage: Usage) -> u64 {
        let buffers = session.buffer_manager();
        let id = session.create_descriptor();
        buffers.set_dimensions(id, width, height).unwrap();
        buffers.set_format(id, PixelFormat::RGBX_8888).unwrap();
        buffers.set_producer_usage(id, usage.producer).unwrap();
        buffers.set_consumer_usage(id, usage.consumer).unwrap();
        id
    }

    fn allocate(session: &HwcSession, id: u64) -> Arc<BufferHandle> {
        let mut out = Vec::new();
        session.allocate_buffers(&[id], Some(&mut out)).unwrap();
        out.pop().unwrap()
    }

    fn add_layer(
        session: &HwcSession,
        display: DisplayId,
        handle: Arc<BufferHandle>,
        z: u32,
    ) -> LayerId {
        let layer = session.create_layer(display).unwrap();
        session.set_layer_z_order(display, layer, z).unwrap();
        let (width, height) = (handle.info.width, handle.info.height);
        session
            .set_layer_buffer(display, layer, Some(handle), None)
            .unwrap();
        session
            .with_display(display, |d| {
                let l = d.layer_mut(layer)?;
                l.set_composition_type(Composition::Device)?;
                l.set_display_frame(IntRect::new(0, 0, width as i32, height as i32));
                l.set_source_crop(FloatRect::new(0.0, 0.0, width as f32, height as f32));
                Ok(())
            })
            .unwrap();
        layer
    }

    #[test]
    fn single_frame_end_to_end() {
        let session = test_session(&MapPropertyStore::new());
        let baseline = session.buffer_manager().buffer_count();
        let usage = Usage::new(ProducerUsage::CPU_WRITE, ConsumerUsage::HWCOMPOSER);
        let handle = allocate(&session, descriptor(&session, 256, 256, usage));

        session.lock(&handle, usage, None).unwrap();
        session
            .buffer_manager()
            .access(&handle, |bytes| {
                for (i, b) in bytes.iter_mut().enumerate() {
                    *b = i as u8;
                }
            })
            .unwrap();
        assert!(session.unlock(&handle).unwrap().is_none());

        let display = session.create_display(Box::new(NoopDisplayDevice::default()), None, None);
        session.set_power_mode(display, PowerMode::On).unwrap();
        let layer = add_layer(&session, display, handle.clone(), 0);

        session.validate_display(display).unwrap();
        session
            .with_display(display, |d| {
                let changes = d.get_changed_composition_types()?;
                assert!(changes
                    .iter()
                    .all(|c| matches!(c.1, Composition::Device | Composition::Client)));
                Ok(())
            })
            .unwrap();
        session.accept_display_changes(display).unwrap();
        let result = session.present_display(display).unwrap();
        assert!(result.retire_fence.is_some());
        assert_eq!(result.release_fences.len(), 1);
        assert_eq!(result.release_fences[0].0, layer);

        session.release(&handle).unwrap();
        assert_eq!(session.buffer_manager().ref_count(&handle), None);
        assert_eq!(session.buffer_manager().buffer_count(), baseline);
    }

    #[test]
    fn validate_twice_gives_same_classification() {
        let mut store = MapPropertyStore::new();
        store.set("vendor.display.max_blending_layers", "2");
        let session = test_session(&store);
        let usage = Usage::new(ProducerUsage::GPU_RENDER_TARGET, ConsumerUsage::HWCOMPOSER);
        let display = session.create_display(Box::new(NoopDisplayDevice::default()), None, None);
        session.set_power_mode(display, PowerMode::On).unwrap();
        for z in 0..3 {
            let handle = allocate(&session, descriptor(&session, 64, 64, usage));
            add_layer(&session, display, handle, z);
        }

        let first = session.validate_display(display).unwrap();
        let first_changes = session
            .with_display(display, |d| d.get_changed_composition_types())
            .unwrap();
        let second = session.validate_display(display).unwrap();
        let second_changes = session
            .with_display(display, |d| d.get_changed_composition_types())
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first_changes, second_changes);
        assert!(!first_changes.is_empty());

        session.accept_display_changes(display).unwrap();
        assert!(session
            .present_display(display)
            .unwrap()
            .retire_fence
            .is_some());
    }

    #[test]
    fn unknown_display() {
        let session = test_session(&MapPropertyStore::new());
        assert!(matches!(
            session.validate_display(7),
            Err(ComposerError::BadDisplay)
        ));
        assert!(matches!(
            session.destroy_display(7),
            Err(ComposerError::BadDisplay)
        ));
    }

    #[test]
    fn destroy_display_powers_off() {
        let session = test_session(&MapPropertyStore::new());
        let a = session.create_display(Box::new(NoopDisplayDevice::default()), None, None);
        let b = session.create_display(Box::new(NoopDisplayDevice::default()), None, None);
        assert_ne!(a, b);
        session.set_power_mode(a, PowerMode::On).unwrap();
        assert_eq!(session.display_ids(), vec![a, b]);
        session.destroy_display(a).unwrap();
        assert_eq!(session.display_ids(), vec![b]);
        assert!(matches!(
            session.create_layer(a),
            Err(ComposerError::BadDisplay)
        ));
    }

    #[test]
    fn properties_reach_displays() {
        let mut store = MapPropertyStore::new();
        store.set("vendor.display.disable_skip_validate", "1");
        let session = test_session(&store);
        assert!(session.properties().disable_skip_validate);
        let display = session.create_display(Box::new(NoopDisplayDevice::default()), None, None);
        let skip = session
            .with_display(display, |d| Ok(d.can_skip_validate()))
            .unwrap();
        assert!(!skip);
    }

    #[test]
    fn dump_covers_buffers_and_displays() {
        let session = test_session(&MapPropertyStore::new());
        session.create_display(Box::new(NoopDisplayDevice::default()), None, None);
        let usage = Usage::new(ProducerUsage::CPU_WRITE, ConsumerUsage::HWCOMPOSER);
        let handle = allocate(&session, descriptor(&session, 32, 32, usage));
        let dump = session.dump();
        assert!(dump.contains("buffers: 1"));
        assert!(dump.contains("displays: 1"));
        assert!(dump.contains("display 0:"));
        session.release(&handle).unwrap();
    }
}
