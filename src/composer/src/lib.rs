// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A crate for composing layers onto displays: per-display validate/present, release and retire
//! fence bookkeeping, and HDR tone mapping of layers before they reach the display hardware.

mod composer_utils;
mod config;
pub mod dataspace;
mod device;
mod display;
mod geometry;
mod layer;
mod layer_stack;
mod strategy;
mod tonemap;

pub use gralloc::PropertyStore;

pub use crate::composer_utils::ComposerError;
pub use crate::composer_utils::ComposerResult;
pub use crate::composer_utils::DisplayError;
pub use crate::config::DisplayProperties;
pub use crate::dataspace::Dataspace;
pub use crate::device::DisplayConfig;
pub use crate::device::DisplayDevice;
pub use crate::device::FixedInfo;
pub use crate::device::NoopDisplayDevice;
pub use crate::device::PowerMode;
pub use crate::display::Attribute;
pub use crate::display::DisplayStatus;
pub use crate::display::HdrCapabilities;
pub use crate::display::HwcDisplay;
pub use crate::display::LayerDisplayRequest;
pub use crate::display::Validation;
pub use crate::geometry::FloatRect;
pub use crate::geometry::IntRect;
pub use crate::geometry::Rect;
pub use crate::layer::BlendMode;
pub use crate::layer::Blending;
pub use crate::layer::BufferFlags;
pub use crate::layer::Color;
pub use crate::layer::Composition;
pub use crate::layer::GeometryChanges;
pub use crate::layer::HwcLayer;
pub use crate::layer::Layer;
pub use crate::layer::LayerBuffer;
pub use crate::layer::LayerComposition;
pub use crate::layer::LayerFlags;
pub use crate::layer::LayerId;
pub use crate::layer::LayerRequest;
pub use crate::layer::LayerTransform;
pub use crate::layer::Lut3d;
pub use crate::layer::Transform;
pub use crate::layer_stack::LayerStack;
pub use crate::layer_stack::StackFlags;
pub use crate::strategy::CompositionStrategy;
pub use crate::strategy::DefaultStrategy;
pub use crate::strategy::StrategyOutcome;
pub use crate::strategy::DEFAULT_MAX_DEVICE_LAYERS;
pub use crate::tonemap::ToneMapConfig;
pub use crate::tonemap::ToneMapDirection;
pub use crate::tonemap::ToneMapKernel;
pub use crate::tonemap::ToneMapKernelFactory;
pub use crate::tonemap::ToneMapper;
pub use crate::tonemap::NUM_INTERMEDIATE_BUFFERS;
