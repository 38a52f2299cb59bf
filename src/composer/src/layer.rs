// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! layer: Client-facing layers and the per-frame state handed to the composition strategy.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use bitflags::bitflags;
use gralloc::BufferHandle;
use gralloc::BufferManager;
use gralloc::BufferType;
use gralloc::ColorMetaData;
use gralloc::ColorPrimaries;
use gralloc::Fence;
use gralloc::GrallocError;
use gralloc::MetadataField;
use gralloc::MetadataValue;
use gralloc::PixelFormat;
use log::debug;
use log::trace;

use crate::composer_utils::ComposerError;
use crate::composer_utils::ComposerResult;
use crate::dataspace;
use crate::dataspace::Dataspace;
use crate::dataspace::DATASPACE_UNKNOWN;
use crate::geometry::FloatRect;
use crate::geometry::IntRect;
use crate::geometry::Rect;

/// Frame rates that buffer metadata is snapped to.
const STANDARD_FPS: [u32; 4] = [24, 30, 48, 60];

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a layer across all displays of a process.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LayerId(pub u64);

impl LayerId {
    fn next() -> LayerId {
        LayerId(NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Composition type as requested by the client or selected by the display.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Composition {
    #[default]
    Invalid,
    Client,
    Device,
    SolidColor,
    Cursor,
    Sideband,
}

/// How the composition strategy decided to compose a layer.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum LayerComposition {
    /// Blended by the client into the client target.
    #[default]
    Gpu,
    /// Scanned out directly by the display hardware.
    Device,
    Cursor,
    /// The client target itself.
    GpuTarget,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BlendMode {
    Invalid,
    None,
    Premultiplied,
    Coverage,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Blending {
    Opaque,
    #[default]
    Premultiplied,
    Coverage,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transform {
    None,
    FlipH,
    FlipV,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipHRotate90,
    FlipVRotate90,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct LayerTransform {
    pub rotation: f32,
    pub flip_horizontal: bool,
    pub flip_vertical: bool,
}

impl From<Transform> for LayerTransform {
    fn from(transform: Transform) -> LayerTransform {
        let (rotation, flip_horizontal, flip_vertical) = match transform {
            Transform::None => (0.0, false, false),
            Transform::FlipH => (0.0, true, false),
            Transform::FlipV => (0.0, false, true),
            Transform::Rotate90 => (90.0, false, false),
            Transform::Rotate180 => (0.0, true, true),
            Transform::Rotate270 => (90.0, true, true),
            Transform::FlipHRotate90 => (90.0, true, false),
            Transform::FlipVRotate90 => (90.0, false, true),
        };
        LayerTransform {
            rotation,
            flip_horizontal,
            flip_vertical,
        }
    }
}

/// An RGBA color for solid color layers.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    /// Packs as 0xAARRGGBB.
    pub fn to_argb(self) -> u32 {
        (self.a as u32) << 24 | (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }
}

bitflags! {
    /// Attributes that changed since the last presented frame.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct GeometryChanges: u32 {
        const BLEND_MODE = 0x001;
        const DATASPACE = 0x002;
        const DISPLAY_FRAME = 0x004;
        const PLANE_ALPHA = 0x008;
        const SOURCE_CROP = 0x010;
        const TRANSFORM = 0x020;
        const Z_ORDER = 0x040;
        const ADDED = 0x080;
        const REMOVED = 0x100;
        const BUFFER_GEOMETRY = 0x200;
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct LayerFlags: u32 {
        /// Must be composed by the client.
        const SKIP = 0x01;
        const SOLID_FILL = 0x02;
        const CURSOR = 0x04;
        /// The buffer content changed this frame.
        const UPDATING = 0x08;
        const SINGLE_BUFFER = 0x10;
    }
}

bitflags! {
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct BufferFlags: u32 {
        const VIDEO = 0x01;
        const SECURE = 0x02;
        const SECURE_CAMERA = 0x04;
        const SECURE_DISPLAY = 0x08;
        const INTERLACE = 0x10;
        const HDR = 0x20;
    }
}

/// Work the strategy asks the pipeline to do on a layer before the device sees it.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LayerRequest {
    pub tone_map: bool,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub secure: bool,
}

/// A 3D lookup table used for tone mapping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Lut3d {
    /// Points along each axis.
    pub dim: u32,
    pub entries: Vec<[u16; 3]>,
}

impl Lut3d {
    pub fn is_valid(&self) -> bool {
        self.dim > 0 && self.entries.len() == (self.dim * self.dim * self.dim) as usize
    }
}

/// The buffer attached to a layer and the attributes derived from it.
#[derive(Clone, Debug, Default)]
pub struct LayerBuffer {
    pub handle: Option<Arc<BufferHandle>>,
    pub width: u32,
    pub height: u32,
    pub unaligned_width: u32,
    pub unaligned_height: u32,
    pub format: PixelFormat,
    pub flags: BufferFlags,
    pub color: ColorMetaData,
    pub s3d_format: u32,
    pub size: u32,
}

impl LayerBuffer {
    pub fn is_video(&self) -> bool {
        self.flags.contains(BufferFlags::VIDEO)
    }
}

/// A layer as seen by the composition strategy and display device.
#[derive(Debug)]
pub struct Layer {
    pub id: LayerId,
    pub input: LayerBuffer,
    pub acquire_fence: Option<Fence>,
    /// Written by the device on commit.
    pub release_fence: Option<Fence>,
    pub src_rect: Rect,
    pub dst_rect: Rect,
    pub visible_regions: Vec<Rect>,
    pub dirty_regions: Vec<Rect>,
    pub blending: Blending,
    pub transform: LayerTransform,
    pub plane_alpha: u8,
    pub solid_fill_color: u32,
    pub frame_rate: u32,
    pub composition: LayerComposition,
    pub flags: LayerFlags,
    pub request: LayerRequest,
    pub lut_3d: Option<Arc<Lut3d>>,
}

impl Layer {
    pub fn new(id: LayerId) -> Layer {
        Layer {
            id,
            input: Default::default(),
            acquire_fence: None,
            release_fence: None,
            src_rect: Default::default(),
            dst_rect: Default::default(),
            visible_regions: Vec::new(),
            dirty_regions: Vec::new(),
            blending: Default::default(),
            transform: Default::default(),
            plane_alpha: 0xff,
            solid_fill_color: 0,
            frame_rate: 0,
            composition: Default::default(),
            flags: Default::default(),
            request: Default::default(),
            lut_3d: None,
        }
    }

    /// Copies everything but the fences.
    pub(crate) fn snapshot(&self) -> Layer {
        Layer {
            id: self.id,
            input: self.input.clone(),
            acquire_fence: None,
            release_fence: None,
            src_rect: self.src_rect,
            dst_rect: self.dst_rect,
            visible_regions: self.visible_regions.clone(),
            dirty_regions: self.dirty_regions.clone(),
            blending: self.blending,
            transform: self.transform,
            plane_alpha: self.plane_alpha,
            solid_fill_color: self.solid_fill_color,
            frame_rate: self.frame_rate,
            composition: self.composition,
            flags: self.flags,
            request: self.request.clone(),
            lut_3d: self.lut_3d.clone(),
        }
    }
}

/// Snaps a buffer frame rate to the nearest standard rate at or just above it.
pub fn round_to_standard_fps(fps: f32) -> u32 {
    let frame_rate = fps as u32;
    for standard in STANDARD_FPS {
        if frame_rate <= standard && standard - frame_rate < 2 {
            return standard;
        }
    }
    frame_rate
}

fn read_metadata(
    buffers: &BufferManager,
    handle: &BufferHandle,
    field: MetadataField,
) -> Option<MetadataValue> {
    match buffers.get_metadata(handle, field) {
        Ok(value) => Some(value),
        Err(GrallocError::NotFound) => None,
        Err(e) => {
            trace!("metadata {:?} unavailable on {:?}: {}", field, handle.id, e);
            None
        }
    }
}

/// A layer as the client sees it: its current attributes plus validation bookkeeping.
pub struct HwcLayer {
    layer: Layer,
    z: u32,
    release_fences: VecDeque<Option<Fence>>,
    dataspace: Dataspace,
    needs_validate: bool,
    non_integral_source_crop: bool,
    single_buffer: bool,
    client_requested: Composition,
    device_selected: Composition,
    geometry_changes: GeometryChanges,
}

impl Default for HwcLayer {
    fn default() -> HwcLayer {
        HwcLayer::new()
    }
}

impl HwcLayer {
    pub fn new() -> HwcLayer {
        let mut release_fences = VecDeque::new();
        release_fences.push_back(None);
        HwcLayer {
            layer: Layer::new(LayerId::next()),
            z: 0,
            release_fences,
            dataspace: DATASPACE_UNKNOWN,
            needs_validate: true,
            non_integral_source_crop: false,
            single_buffer: false,
            client_requested: Composition::Device,
            device_selected: Composition::Device,
            geometry_changes: GeometryChanges::ADDED,
        }
    }

    pub fn id(&self) -> LayerId {
        self.layer.id
    }

    pub fn z(&self) -> u32 {
        self.z
    }

    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    pub(crate) fn layer_mut(&mut self) -> &mut Layer {
        &mut self.layer
    }

    pub fn dataspace(&self) -> Dataspace {
        self.dataspace
    }

    pub fn client_requested(&self) -> Composition {
        self.client_requested
    }

    pub fn device_selected(&self) -> Composition {
        self.device_selected
    }

    pub fn geometry_changes(&self) -> GeometryChanges {
        self.geometry_changes
    }

    pub fn reset_geometry_changes(&mut self) {
        self.geometry_changes = GeometryChanges::empty();
    }

    pub fn needs_validation(&self) -> bool {
        self.needs_validate || !self.geometry_changes.is_empty()
    }

    pub fn reset_validation(&mut self) {
        self.needs_validate = false;
    }

    pub fn is_non_integral_source_crop(&self) -> bool {
        self.non_integral_source_crop
    }

    pub fn is_single_buffer(&self) -> bool {
        self.single_buffer
    }

    /// Attaches `handle`, reading frame rate, interlacing, linear format, stereo format and
    /// single buffer mode from its metadata.
    pub fn set_buffer(
        &mut self,
        buffers: &BufferManager,
        handle: Option<Arc<BufferHandle>>,
        acquire_fence: Option<Fence>,
    ) -> ComposerResult<()> {
        let handle = handle.ok_or(ComposerError::BadParameter("null buffer"))?;
        handle
            .validate()
            .map_err(|_| ComposerError::BadParameter("invalid buffer handle"))?;

        let info = &handle.info;
        let input = &mut self.layer.input;
        if input.format != info.format || input.width != info.width || input.height != info.height
        {
            self.geometry_changes |= GeometryChanges::BUFFER_GEOMETRY;
        }
        input.width = info.width;
        input.height = info.height;
        input.unaligned_width = info.unaligned_width;
        input.unaligned_height = info.unaligned_height;
        input.format = info.format;
        input.size = info.size;
        input.flags.set(BufferFlags::VIDEO, info.buffer_type == BufferType::Video);

        let flags = handle.flags();
        let secure = flags.contains(gralloc::PrivateFlags::SECURE_BUFFER);
        let secure_camera = secure && flags.contains(gralloc::PrivateFlags::CAMERA_WRITE);
        let secure_display = flags.contains(gralloc::PrivateFlags::SECURE_DISPLAY);
        if input.flags.contains(BufferFlags::SECURE) != secure
            || input.flags.contains(BufferFlags::SECURE_DISPLAY) != secure_display
        {
            self.needs_validate = true;
        }
        input.flags.set(BufferFlags::SECURE, secure);
        input.flags.set(BufferFlags::SECURE_CAMERA, secure_camera);
        input.flags.set(BufferFlags::SECURE_DISPLAY, secure_display);

        self.layer.acquire_fence = acquire_fence;
        self.apply_buffer_metadata(buffers, &handle);
        self.layer.input.handle = Some(handle);
        Ok(())
    }

    fn apply_buffer_metadata(&mut self, buffers: &BufferManager, handle: &BufferHandle) {
        if let Some(MetadataValue::RefreshRate(fps)) =
            read_metadata(buffers, handle, MetadataField::RefreshRate)
        {
            let frame_rate = round_to_standard_fps(fps);
            if self.layer.frame_rate != frame_rate {
                self.needs_validate = true;
            }
            self.layer.frame_rate = frame_rate;
        }

        let interlaced = matches!(
            read_metadata(buffers, handle, MetadataField::Interlaced),
            Some(MetadataValue::Interlaced(v)) if v != 0
        );
        let input = &mut self.layer.input;
        if input.flags.contains(BufferFlags::INTERLACE) != interlaced {
            self.needs_validate = true;
        }
        input.flags.set(BufferFlags::INTERLACE, interlaced);

        if let Some(MetadataValue::LinearFormat(format)) =
            read_metadata(buffers, handle, MetadataField::LinearFormat)
        {
            let format = PixelFormat(format);
            if input.format != format {
                input.format = format;
                self.needs_validate = true;
            }
        }

        if let Some(MetadataValue::S3dFormat(s3d)) =
            read_metadata(buffers, handle, MetadataField::S3dFormat)
        {
            if input.s3d_format != s3d {
                input.s3d_format = s3d;
                self.needs_validate = true;
            }
        }

        let single_buffer = matches!(
            read_metadata(buffers, handle, MetadataField::SingleBufferMode),
            Some(MetadataValue::SingleBufferMode(v)) if v != 0
        );
        if self.single_buffer != single_buffer {
            self.needs_validate = true;
        }
        self.single_buffer = single_buffer;
    }

    pub fn set_surface_damage(&mut self, damage: &[IntRect]) {
        self.layer.dirty_regions = damage.iter().map(|r| Rect::from(*r)).collect();
    }

    pub fn set_visible_region(&mut self, visible: &[IntRect]) {
        self.layer.visible_regions = visible.iter().map(|r| Rect::from(*r)).collect();
    }

    pub fn set_blend_mode(&mut self, mode: BlendMode) -> ComposerResult<()> {
        let blending = match mode {
            BlendMode::Coverage => Blending::Coverage,
            BlendMode::Premultiplied => Blending::Premultiplied,
            BlendMode::None => Blending::Opaque,
            BlendMode::Invalid => return Err(ComposerError::BadParameter("blend mode")),
        };
        if self.layer.blending != blending {
            self.geometry_changes |= GeometryChanges::BLEND_MODE;
            self.layer.blending = blending;
        }
        Ok(())
    }

    pub fn set_color(&mut self, color: Color) {
        self.layer.solid_fill_color = color.to_argb();
        self.layer.input.format = PixelFormat::ARGB_2101010;
        trace!(
            "layer {} solid fill 0x{:08x}",
            self.id(),
            self.layer.solid_fill_color
        );
    }

    pub fn set_composition_type(&mut self, composition: Composition) -> ComposerResult<()> {
        match composition {
            Composition::Invalid => Err(ComposerError::BadParameter("composition type")),
            Composition::Sideband => Err(ComposerError::Unsupported),
            composition => {
                self.client_requested = composition;
                Ok(())
            }
        }
    }

    pub fn set_dataspace(&mut self, dataspace: Dataspace) {
        let dataspace = dataspace::normalize(dataspace);
        if self.dataspace != dataspace {
            self.geometry_changes |= GeometryChanges::DATASPACE;
            self.dataspace = dataspace;
        }
    }

    pub fn set_display_frame(&mut self, frame: IntRect) {
        let dst = Rect::from(frame);
        if self.layer.dst_rect != dst {
            self.geometry_changes |= GeometryChanges::DISPLAY_FRAME;
            self.layer.dst_rect = dst;
        }
    }

    /// Moves the display frame to (`x`, `y`), keeping its size.
    pub fn set_cursor_position(&mut self, x: i32, y: i32) {
        let dst = self.layer.dst_rect;
        let frame = IntRect::new(
            x,
            y,
            x + dst.width() as i32,
            y + dst.height() as i32,
        );
        self.set_display_frame(frame);
    }

    pub fn set_plane_alpha(&mut self, alpha: f32) {
        let plane_alpha = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
        if self.layer.plane_alpha != plane_alpha {
            self.geometry_changes |= GeometryChanges::PLANE_ALPHA;
            self.layer.plane_alpha = plane_alpha;
        }
    }

    pub fn set_source_crop(&mut self, crop: FloatRect) {
        self.non_integral_source_crop = !crop.is_integral();
        let src = Rect::from(crop);
        if self.layer.src_rect != src {
            self.geometry_changes |= GeometryChanges::SOURCE_CROP;
            self.layer.src_rect = src;
        }
    }

    pub fn set_transform(&mut self, transform: Transform) {
        let transform = LayerTransform::from(transform);
        if self.layer.transform != transform {
            self.geometry_changes |= GeometryChanges::TRANSFORM;
            self.layer.transform = transform;
        }
    }

    pub(crate) fn set_z_order(&mut self, z: u32) {
        if self.z != z {
            self.geometry_changes |= GeometryChanges::Z_ORDER;
            self.z = z;
        }
    }

    /// Records the strategy's decision as the composition type reported to the client.
    pub(crate) fn set_composition(&mut self, composition: LayerComposition) {
        let selected = match composition {
            LayerComposition::Gpu => Composition::Client,
            LayerComposition::Cursor => Composition::Cursor,
            LayerComposition::Device | LayerComposition::GpuTarget => {
                if self.layer.flags.contains(LayerFlags::SOLID_FILL) {
                    Composition::SolidColor
                } else {
                    Composition::Device
                }
            }
        };
        self.device_selected = selected;
    }

    /// Accepts the display's selection as the new client request.
    pub(crate) fn update_client_composition_type(&mut self, composition: Composition) {
        self.client_requested = composition;
    }

    pub fn push_release_fence(&mut self, fence: Option<Fence>) {
        self.release_fences.push_back(fence);
    }

    /// Returns the oldest pending release fence, or no fence if none is queued.
    pub fn pop_release_fence(&mut self) -> Option<Fence> {
        self.release_fences.pop_front().flatten()
    }

    pub fn pending_release_fences(&self) -> usize {
        self.release_fences.len()
    }

    /// Resolves the layer color description for device composition.
    ///
    /// The dataspace wins when known, except that BT.2020 content takes its full description
    /// (including HDR metadata) from the buffer. Returns false when neither source is usable.
    pub(crate) fn validate_and_set_csc(&mut self, buffers: &BufferManager) -> bool {
        if !matches!(
            self.client_requested,
            Composition::Device | Composition::Cursor
        ) {
            return true;
        }

        let mut use_color_metadata = true;
        if self.dataspace != DATASPACE_UNKNOWN {
            use_color_metadata = false;
            let mut csc = ColorMetaData::default();
            if !dataspace::apply_to_color(self.dataspace, &mut csc) {
                return false;
            }
            let color = &mut self.layer.input.color;
            color.transfer = csc.transfer;
            color.color_primaries = csc.color_primaries;
            color.range = csc.range;
            if color.color_primaries == u32::from(ColorPrimaries::Bt2020) {
                use_color_metadata = true;
            }
        }

        if use_color_metadata {
            let handle = match &self.layer.input.handle {
                Some(handle) => handle.clone(),
                None => return false,
            };
            return self.set_csc(buffers, &handle);
        }
        true
    }

    fn set_csc(&mut self, buffers: &BufferManager, handle: &BufferHandle) -> bool {
        match read_metadata(buffers, handle, MetadataField::ColorMetadata) {
            Some(MetadataValue::ColorMetadata(color)) => {
                self.layer.input.color = *color;
                true
            }
            _ => match read_metadata(buffers, handle, MetadataField::ColorSpace) {
                Some(MetadataValue::ColorSpace(space)) => {
                    let color = &mut self.layer.input.color;
                    let derived = ColorMetaData::from_color_space(space);
                    color.color_primaries = derived.color_primaries;
                    color.range = derived.range;
                    color.matrix_coefficients = derived.matrix_coefficients;
                    true
                }
                _ => {
                    debug!("layer {}: buffer carries no color description", self.id());
                    false
                }
            },
        }
    }
}
