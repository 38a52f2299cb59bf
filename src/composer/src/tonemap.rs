// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! tonemap: Converts HDR layers to SDR through pooled GPU sessions before the device sees them.
//!
//! A session owns a tone mapping kernel and a small ring of intermediate buffers. Sessions are
//! matched to layers by their tone mapping parameters and live only as long as some layer uses
//! them each frame.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use gralloc::BufferDescriptor;
use gralloc::BufferHandle;
use gralloc::BufferManager;
use gralloc::ConsumerUsage;
use gralloc::Fence;
use gralloc::PixelFormat;
use gralloc::ProducerUsage;
use gralloc::Usage;
use log::debug;
use log::error;
use log::info;

use crate::composer_utils::ComposerError;
use crate::composer_utils::ComposerResult;
use crate::layer::Layer;
use crate::layer::LayerComposition;
use crate::layer::Lut3d;
use crate::layer_stack::LayerStack;

pub const NUM_INTERMEDIATE_BUFFERS: usize = 2;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ToneMapDirection {
    /// HDR to SDR.
    Forward,
    /// SDR to HDR.
    Inverse,
}

/// The parameters that identify a reusable session.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ToneMapConfig {
    pub direction: ToneMapDirection,
    pub primaries: u32,
    pub transfer: u32,
    pub secure: bool,
    pub format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl ToneMapConfig {
    pub fn for_layer(layer: &Layer) -> ToneMapConfig {
        let direction = if layer.input.color.is_hdr() {
            ToneMapDirection::Forward
        } else {
            ToneMapDirection::Inverse
        };
        ToneMapConfig {
            direction,
            primaries: layer.input.color.color_primaries,
            transfer: layer.input.color.transfer,
            secure: layer.request.secure,
            format: layer.request.format,
            width: layer.request.width,
            height: layer.request.height,
        }
    }
}

/// A GPU program that renders `src` into `dst` through a 3D LUT.
pub trait ToneMapKernel: Send {
    /// Starts the blit once `wait` signals. Returns a fence signaled when `dst` is written.
    fn blit(
        &mut self,
        dst: &BufferHandle,
        src: &BufferHandle,
        wait: Option<Fence>,
    ) -> ComposerResult<Option<Fence>>;
}

pub trait ToneMapKernelFactory: Send + Sync {
    fn create(&self, config: &ToneMapConfig, lut: &Lut3d)
        -> ComposerResult<Box<dyn ToneMapKernel>>;
}

struct ToneMapSession {
    id: u64,
    config: ToneMapConfig,
    kernel: Box<dyn ToneMapKernel>,
    buffers: Arc<BufferManager>,
    intermediates: Vec<Arc<BufferHandle>>,
    release_fences: [Option<Fence>; NUM_INTERMEDIATE_BUFFERS],
    current: usize,
    acquired: bool,
    layer_index: usize,
}

impl ToneMapSession {
    fn allocate_intermediates(&mut self) -> ComposerResult<()> {
        let mut producer = ProducerUsage::GPU_RENDER_TARGET;
        if self.config.secure {
            producer |= ProducerUsage::PROTECTED;
        }
        let usage = Usage::new(producer, ConsumerUsage::GPU_TEXTURE | ConsumerUsage::HWCOMPOSER);
        let descriptor = BufferDescriptor::with_params(
            self.config.width,
            self.config.height,
            self.config.format,
            usage,
        );
        for _ in 0..NUM_INTERMEDIATE_BUFFERS {
            let handle = self.buffers.allocate_buffer(&descriptor, 0)?;
            self.intermediates.push(handle);
        }
        Ok(())
    }

    fn current_buffer(&self) -> ComposerResult<Arc<BufferHandle>> {
        self.intermediates
            .get(self.current)
            .cloned()
            .ok_or(ComposerError::NoResources)
    }

    fn advance(&mut self) {
        self.current = (self.current + 1) % NUM_INTERMEDIATE_BUFFERS;
    }

    /// Points `layer` at the current intermediate buffer.
    fn update_buffer(&self, layer: &mut Layer, acquire_fence: Option<Fence>) -> ComposerResult<()> {
        let buffer = self.current_buffer()?;
        layer.input.size = buffer.info.size;
        layer.input.handle = Some(buffer);
        layer.acquire_fence = acquire_fence;
        Ok(())
    }

    fn tone_map(&mut self, layer: &mut Layer) -> ComposerResult<()> {
        let src = layer
            .input
            .handle
            .clone()
            .ok_or(ComposerError::BadParameter("tone map layer has no buffer"))?;
        let dst = self.current_buffer()?;
        let release = self.release_fences[self.current].take();
        let acquire = layer.acquire_fence.take();
        let wait = Fence::merge_optional("tone_map", release.as_ref(), acquire.as_ref())?;
        let done = self.kernel.blit(&dst, &src, wait)?;
        self.update_buffer(layer, done)
    }

    fn set_release_fence(&mut self, fence: Option<&Fence>) {
        self.release_fences[self.current] = match Fence::try_clone_optional(fence) {
            Ok(fence) => fence,
            Err(e) => {
                error!("tone map session {}: failed to keep release fence: {}", self.id, e);
                None
            }
        };
    }
}

impl Drop for ToneMapSession {
    fn drop(&mut self) {
        for handle in self.intermediates.drain(..) {
            if let Err(e) = self.buffers.release(&handle) {
                error!("failed to free tone map buffer {:?}: {}", handle.id, e);
            }
        }
    }
}

/// The pool of tone mapping sessions of one display.
pub struct ToneMapper {
    buffers: Arc<BufferManager>,
    factory: Arc<dyn ToneMapKernelFactory>,
    sessions: Vec<ToneMapSession>,
    fb_session: Option<usize>,
}

impl ToneMapper {
    pub fn new(buffers: Arc<BufferManager>, factory: Arc<dyn ToneMapKernelFactory>) -> ToneMapper {
        ToneMapper {
            buffers,
            factory,
            sessions: Vec::new(),
            fb_session: None,
        }
    }

    pub fn is_active(&self) -> bool {
        !self.sessions.is_empty()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn session_ids(&self) -> Vec<u64> {
        self.sessions.iter().map(|s| s.id).collect()
    }

    /// Tone maps every layer that requested it, replacing its buffer with the result.
    ///
    /// If nothing is client composed this frame, the client target reuses the output of the
    /// session that last tone mapped it, as long as the target still asks for the same mapping.
    pub fn handle_tone_map(&mut self, stack: &mut LayerStack) -> ComposerResult<()> {
        let mut gpu_count = 0;
        for i in 0..stack.layers.len() {
            let layer = &mut stack.layers[i];
            if layer.composition == LayerComposition::Gpu {
                gpu_count += 1;
            }
            if layer.composition == LayerComposition::GpuTarget {
                if gpu_count == 0 && layer.request.tone_map {
                    let config = ToneMapConfig::for_layer(layer);
                    if let Some(index) = self
                        .fb_session
                        .filter(|&fb| !self.sessions[fb].acquired && self.sessions[fb].config == config)
                    {
                        let session = &mut self.sessions[index];
                        session.update_buffer(layer, None)?;
                        session.layer_index = i;
                        session.acquired = true;
                        return Ok(());
                    }
                }
                if !layer.request.tone_map {
                    continue;
                }
                let index = self.acquire_session(layer)?;
                self.fb_session = Some(index);
                self.run_session(index, i, layer)?;
            } else if layer.request.tone_map {
                let index = self.acquire_session(layer)?;
                self.run_session(index, i, layer)?;
            }
        }
        Ok(())
    }

    fn run_session(&mut self, index: usize, layer_index: usize, layer: &mut Layer) -> ComposerResult<()> {
        let session = &mut self.sessions[index];
        session.layer_index = layer_index;
        session.tone_map(layer)
    }

    fn acquire_session(&mut self, layer: &Layer) -> ComposerResult<usize> {
        let lut = match &layer.lut_3d {
            Some(lut) if lut.is_valid() => lut.clone(),
            _ => return Err(ComposerError::BadParameter("tone map without a 3D LUT")),
        };
        let config = ToneMapConfig::for_layer(layer);

        if let Some(index) = self
            .sessions
            .iter()
            .position(|s| !s.acquired && s.config == config)
        {
            let session = &mut self.sessions[index];
            session.advance();
            session.acquired = true;
            return Ok(index);
        }

        let kernel = self.factory.create(&config, &lut)?;
        let mut session = ToneMapSession {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            config,
            kernel,
            buffers: self.buffers.clone(),
            intermediates: Vec::with_capacity(NUM_INTERMEDIATE_BUFFERS),
            release_fences: Default::default(),
            current: 0,
            acquired: true,
            layer_index: 0,
        };
        session.allocate_intermediates()?;
        info!(
            "tone map session {} created for {}x{} {:?}",
            session.id, config.width, config.height, config.direction
        );
        self.sessions.push(session);
        Ok(self.sessions.len() - 1)
    }

    /// Keeps each used session's release fence and destroys sessions unused this frame.
    pub fn post_commit(&mut self, stack: &mut LayerStack) {
        let mut i = 0;
        while i < self.sessions.len() {
            let session = &mut self.sessions[i];
            if session.acquired {
                if let Some(layer) = stack.layers.get_mut(session.layer_index) {
                    layer.acquire_fence = None;
                    session.set_release_fence(layer.release_fence.as_ref());
                }
                session.acquired = false;
                i += 1;
                continue;
            }

            debug!("tone map session {} unused, destroying", session.id);
            self.sessions.remove(i);
            self.fb_session = match self.fb_session {
                Some(fb) if fb == i => None,
                Some(fb) if fb > i => Some(fb - 1),
                fb => fb,
            };
        }
    }

    pub fn terminate(&mut self) {
        if !self.sessions.is_empty() {
            info!("terminating {} tone map sessions", self.sessions.len());
        }
        self.sessions.clear();
        self.fb_session = None;
    }

    pub fn dump(&self) -> String {
        let mut out = format!("ToneMapper: {} sessions\n", self.sessions.len());
        for s in &self.sessions {
            out.push_str(&format!(
                "  session {}: {:?} {}x{} current {} acquired {}\n",
                s.id, s.config.direction, s.config.width, s.config.height, s.current, s.acquired
            ));
        }
        out
    }
}


#[cfg(test)]
mod tests {
    use gralloc::ColorPrimaries;
    use gralloc::GammaTransfer;
    use gralloc::GrallocConfig;

    use super::test_kernel::*;
    use super::*;
    use crate::layer::LayerId;
    use crate::layer::LayerRequest;

    fn test_manager() -> Arc<BufferManager> {
        let allocator = gralloc::SystemAllocator::init().unwrap();
        Arc::new(BufferManager::new(allocator, GrallocConfig::default()))
    }

    fn hdr_layer(buffers: &BufferManager, id: u64, width: u32) -> Layer {
        let usage = Usage::new(ProducerUsage::GPU_RENDER_TARGET, ConsumerUsage::HWCOMPOSER);
        let descriptor = BufferDescriptor::with_params(width, 64, PixelFormat::RGBA_1010102, usage);
        let mut layer = Layer::new(LayerId(id));
        layer.input.handle = Some(buffers.allocate_buffer(&descriptor, 0).unwrap());
        layer.input.color.color_primaries = ColorPrimaries::Bt2020.into();
        layer.input.color.transfer = GammaTransfer::SmpteSt2084.into();
        layer.composition = LayerComposition::Device;
        layer.request = LayerRequest {
            tone_map: true,
            width,
            height: 64,
            format: PixelFormat::RGBA_8888,
            secure: false,
        };
        layer.lut_3d = Some(identity_lut());
        layer
    }

    fn stack_with(layers: Vec<Layer>) -> LayerStack {
        let mut stack = LayerStack::new();
        stack.layers = layers;
        let mut target = Layer::new(LayerId(1000));
        target.composition = LayerComposition::GpuTarget;
        stack.layers.push(target);
        stack
    }

    fn release_all(stack: &mut LayerStack) {
        for layer in stack.layers.iter_mut() {
            layer.release_fence = Some(Fence::new_signaled().unwrap());
        }
    }

    #[test]
    fn sessions_are_reused_across_frames() {
        let buffers = test_manager();
        let factory = Arc::new(RecordingFactory::default());
        let mut mapper = ToneMapper::new(buffers.clone(), factory.clone());
        let baseline = buffers.buffer_count();

        let mut stack = stack_with(vec![hdr_layer(&buffers, 1, 128)]);
        let source = stack.layers[0].input.handle.clone().unwrap();
        mapper.handle_tone_map(&mut stack).unwrap();
        assert!(mapper.is_active());
        assert_eq!(buffers.buffer_count(), baseline + NUM_INTERMEDIATE_BUFFERS);
        let first_target = stack.layers[0].input.handle.clone().unwrap();
        assert_ne!(first_target.id, source.id);
        release_all(&mut stack);
        mapper.post_commit(&mut stack);
        let ids = mapper.session_ids();

        let mut stack = stack_with(vec![hdr_layer(&buffers, 1, 128)]);
        mapper.handle_tone_map(&mut stack).unwrap();
        assert_eq!(mapper.session_ids(), ids);
        assert_eq!(*factory.created.lock().unwrap(), 1);
        assert_eq!(*factory.blits.lock().unwrap(), 2);
        let second_target = stack.layers[0].input.handle.clone().unwrap();
        assert_ne!(second_target.id, first_target.id);
        release_all(&mut stack);
        mapper.post_commit(&mut stack);
    }

    #[test]
    fn unused_sessions_are_destroyed() {
        let buffers = test_manager();
        let factory = Arc::new(RecordingFactory::default());
        let mut mapper = ToneMapper::new(buffers.clone(), factory);
        let mut stack = stack_with(vec![hdr_layer(&buffers, 1, 128), hdr_layer(&buffers, 2, 256)]);
        let with_sources = buffers.buffer_count();
        mapper.handle_tone_map(&mut stack).unwrap();
        assert_eq!(mapper.session_count(), 2);
        release_all(&mut stack);
        mapper.post_commit(&mut stack);

        let mut stack = stack_with(vec![hdr_layer(&buffers, 1, 128)]);
        mapper.handle_tone_map(&mut stack).unwrap();
        release_all(&mut stack);
        mapper.post_commit(&mut stack);
        assert_eq!(mapper.session_count(), 1);

        mapper.terminate();
        assert!(!mapper.is_active());
        assert_eq!(buffers.buffer_count(), with_sources + 1);
    }

    #[test]
    fn missing_lut_is_rejected() {
        let buffers = test_manager();
        let mut mapper = ToneMapper::new(buffers.clone(), Arc::new(RecordingFactory::default()));
        let mut layer = hdr_layer(&buffers, 1, 128);
        layer.lut_3d = None;
        let mut stack = stack_with(vec![layer]);
        assert!(matches!(
            mapper.handle_tone_map(&mut stack),
            Err(ComposerError::BadParameter(_))
        ));
        assert!(!mapper.is_active());
    }

    #[test]
    fn config_follows_layer() {
        let buffers = test_manager();
        let layer = hdr_layer(&buffers, 1, 128);
        let config = ToneMapConfig::for_layer(&layer);
        assert_eq!(config.direction, ToneMapDirection::Forward);
        assert_eq!((config.width, config.height), (128, 64));
        assert!(!config.secure);
    }

    fn run_frame(mapper: &mut ToneMapper, layers: Vec<Layer>) -> LayerStack {
        let mut stack = stack_with(layers);
        mapper.handle_tone_map(&mut stack).unwrap();
        release_all(&mut stack);
        mapper.post_commit(&mut stack);
        stack
    }

    /// Runs two frames of one tone mapped layer and returns the session ids left after each.
    fn ids_across_change(
        base: impl Fn(&mut Layer),
        change: impl FnOnce(&mut Layer),
    ) -> (Vec<u64>, Vec<u64>) {
        let buffers = test_manager();
        let mut mapper = ToneMapper::new(buffers.clone(), Arc::new(RecordingFactory::default()));

        let mut layer = hdr_layer(&buffers, 1, 128);
        base(&mut layer);
        run_frame(&mut mapper, vec![layer]);
        let first = mapper.session_ids();

        let mut layer = hdr_layer(&buffers, 1, 128);
        base(&mut layer);
        change(&mut layer);
        run_frame(&mut mapper, vec![layer]);
        (first, mapper.session_ids())
    }

    fn sdr(layer: &mut Layer) {
        layer.input.color.color_primaries = ColorPrimaries::Bt709_5.into();
        layer.input.color.transfer = GammaTransfer::Srgb.into();
    }

    fn assert_replaced(first: &[u64], second: &[u64]) {
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_ne!(first[0], second[0]);
    }

    #[test]
    fn unchanged_layer_keeps_session() {
        let (first, second) = ids_across_change(|_| (), |_| ());
        assert_eq!(first.len(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn secure_change_needs_new_session() {
        let (first, second) = ids_across_change(|_| (), |layer| layer.request.secure = true);
        assert_replaced(&first, &second);
    }

    #[test]
    fn primaries_change_needs_new_session() {
        let buffers = test_manager();
        let mut before = hdr_layer(&buffers, 1, 128);
        sdr(&mut before);
        let mut after = hdr_layer(&buffers, 1, 128);
        sdr(&mut after);
        after.input.color.color_primaries = ColorPrimaries::DciP3.into();
        let (a, b) = (ToneMapConfig::for_layer(&before), ToneMapConfig::for_layer(&after));
        assert_eq!(a.direction, b.direction);
        assert_ne!(a.primaries, b.primaries);

        let (first, second) = ids_across_change(sdr, |layer| {
            layer.input.color.color_primaries = ColorPrimaries::DciP3.into();
        });
        assert_replaced(&first, &second);
    }

    #[test]
    fn transfer_change_needs_new_session() {
        let buffers = test_manager();
        let mut hlg = hdr_layer(&buffers, 1, 128);
        hlg.input.color.transfer = GammaTransfer::Hlg.into();
        assert_eq!(ToneMapConfig::for_layer(&hlg).direction, ToneMapDirection::Forward);

        let (first, second) = ids_across_change(|_| (), |layer| {
            layer.input.color.transfer = GammaTransfer::Hlg.into();
        });
        assert_replaced(&first, &second);
    }

    #[test]
    fn direction_change_needs_new_session() {
        let buffers = test_manager();
        let mut layer = hdr_layer(&buffers, 1, 128);
        assert_eq!(ToneMapConfig::for_layer(&layer).direction, ToneMapDirection::Forward);
        sdr(&mut layer);
        assert_eq!(ToneMapConfig::for_layer(&layer).direction, ToneMapDirection::Inverse);

        let (first, second) = ids_across_change(|_| (), sdr);
        assert_replaced(&first, &second);
    }

    fn target_layer(buffers: &BufferManager, width: u32) -> Layer {
        let mut target = hdr_layer(buffers, 1000, width);
        target.composition = LayerComposition::GpuTarget;
        target
    }

    fn target_frame(mapper: &mut ToneMapper, target: Layer) -> LayerStack {
        let mut stack = LayerStack::new();
        stack.layers.push(target);
        mapper.handle_tone_map(&mut stack).unwrap();
        release_all(&mut stack);
        mapper.post_commit(&mut stack);
        stack
    }

    #[test]
    fn client_target_reuses_matching_session() {
        let buffers = test_manager();
        let factory = Arc::new(RecordingFactory::default());
        let mut mapper = ToneMapper::new(buffers.clone(), factory.clone());

        let stack = target_frame(&mut mapper, target_layer(&buffers, 128));
        let mapped = stack.layers[0].input.handle.clone().unwrap();
        let ids = mapper.session_ids();
        assert_eq!(*factory.blits.lock().unwrap(), 1);

        let stack = target_frame(&mut mapper, target_layer(&buffers, 128));
        assert_eq!(mapper.session_ids(), ids);
        assert_eq!(*factory.blits.lock().unwrap(), 1);
        assert_eq!(stack.layers[0].input.handle.as_ref().unwrap().id, mapped.id);
    }

    #[test]
    fn client_target_with_new_config_is_mapped_again() {
        let buffers = test_manager();
        let factory = Arc::new(RecordingFactory::default());
        let mut mapper = ToneMapper::new(buffers.clone(), factory.clone());

        let stack = target_frame(&mut mapper, target_layer(&buffers, 128));
        let mapped = stack.layers[0].input.handle.clone().unwrap();
        let ids = mapper.session_ids();

        let stack = target_frame(&mut mapper, target_layer(&buffers, 256));
        assert_eq!(*factory.created.lock().unwrap(), 2);
        assert_eq!(*factory.blits.lock().unwrap(), 2);
        assert_eq!(mapper.session_count(), 1);
        assert_ne!(mapper.session_ids(), ids);
        assert_ne!(stack.layers[0].input.handle.as_ref().unwrap().id, mapped.id);
    }

    #[test]
    fn client_target_without_request_is_left_alone() {
        let buffers = test_manager();
        let factory = Arc::new(RecordingFactory::default());
        let mut mapper = ToneMapper::new(buffers.clone(), factory.clone());
        target_frame(&mut mapper, target_layer(&buffers, 128));

        let mut target = target_layer(&buffers, 128);
        target.request.tone_map = false;
        let source = target.input.handle.clone().unwrap();
        let stack = target_frame(&mut mapper, target);
        assert_eq!(stack.layers[0].input.handle.as_ref().unwrap().id, source.id);
        assert_eq!(*factory.blits.lock().unwrap(), 1);
        assert!(!mapper.is_active());
    }
}
