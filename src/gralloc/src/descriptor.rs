// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use crate::formats::PixelFormat;
use crate::layout::BufferInfo;
use crate::usage::ConsumerUsage;
use crate::usage::ProducerUsage;
use crate::usage::Usage;

static NEXT_DESCRIPTOR_ID: AtomicU64 = AtomicU64::new(1);

/// A request template for a buffer. Filled in by the client, then frozen once handed to
/// `BufferManager::allocate_buffers`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BufferDescriptor {
    id: u64,
    width: u32,
    height: u32,
    format: PixelFormat,
    usage: Usage,
    layer_count: u32,
    reserved_size: u64,
}

impl Default for BufferDescriptor {
    fn default() -> BufferDescriptor {
        BufferDescriptor {
            id: NEXT_DESCRIPTOR_ID.fetch_add(1, Ordering::Relaxed),
            width: 0,
            height: 0,
            format: PixelFormat::default(),
            usage: Usage::default(),
            layer_count: 1,
            reserved_size: 0,
        }
    }
}

impl BufferDescriptor {
    pub fn new() -> BufferDescriptor {
        Default::default()
    }

    pub fn with_params(
        width: u32,
        height: u32,
        format: PixelFormat,
        usage: Usage,
    ) -> BufferDescriptor {
        BufferDescriptor {
            width,
            height,
            format,
            usage,
            ..Default::default()
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn layer_count(&self) -> u32 {
        self.layer_count
    }

    /// Extra bytes requested after the metadata block.
    pub fn reserved_size(&self) -> u64 {
        self.reserved_size
    }

    pub fn set_dimensions(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn set_format(&mut self, format: PixelFormat) {
        self.format = format;
    }

    pub fn set_producer_usage(&mut self, producer: ProducerUsage) {
        self.usage.producer = producer;
    }

    pub fn set_consumer_usage(&mut self, consumer: ConsumerUsage) {
        self.usage.consumer = consumer;
    }

    pub fn set_layer_count(&mut self, layer_count: u32) {
        self.layer_count = layer_count;
    }

    pub fn set_reserved_size(&mut self, reserved_size: u64) {
        self.reserved_size = reserved_size;
    }

    pub fn buffer_info(&self) -> BufferInfo {
        BufferInfo {
            width: self.width,
            height: self.height,
            format: self.format,
            usage: self.usage,
            layer_count: self.layer_count,
        }
    }
}
