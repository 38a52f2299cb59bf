// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Producer and consumer usage bits, as declared by the client when describing a buffer.

use bitflags::bitflags;

bitflags! {
    /// How the producer of a buffer intends to write it.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ProducerUsage: u64 {
        const CPU_READ = 1 << 1;
        const CPU_READ_OFTEN = (1 << 2) | Self::CPU_READ.bits();
        const CPU_WRITE = 1 << 5;
        const CPU_WRITE_OFTEN = (1 << 6) | Self::CPU_WRITE.bits();
        const GPU_RENDER_TARGET = 1 << 9;
        const PROTECTED = 1 << 14;
        const CAMERA = 1 << 17;
        const VIDEO_DECODER = 1 << 22;
        const SENSOR_DIRECT_DATA = 1 << 23;
        const GPU_CUBE_MAP = 1 << 25;
        const GPU_MIPMAP_COMPLETE = 1 << 26;

        const PRIVATE_ALLOC_UBWC = 1 << 28;
        const PRIVATE_UNCACHED = 1 << 29;
        const PRIVATE_CAMERA_HEAP = 1 << 30;
        const PRIVATE_ADSP_HEAP = 1 << 31;
        const PRIVATE_MM_HEAP = 1 << 48;
    }
}

bitflags! {
    /// How the consumers of a buffer intend to read it.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct ConsumerUsage: u64 {
        const CPU_READ = 1 << 1;
        const CPU_READ_OFTEN = (1 << 2) | Self::CPU_READ.bits();
        const GPU_TEXTURE = 1 << 8;
        const HWCOMPOSER = 1 << 11;
        const CLIENT_TARGET = 1 << 12;
        const CURSOR = 1 << 15;
        const VIDEO_ENCODER = 1 << 16;
        const CAMERA = 1 << 18;
        const RENDERSCRIPT = 1 << 20;
        const GPU_DATA_BUFFER = 1 << 23;

        const PRIVATE_INTERNAL_ONLY = 1 << 26;
        const PRIVATE_EXTERNAL_ONLY = 1 << 27;
        const PRIVATE_SECURE_DISPLAY = 1 << 28;
    }
}

/// The producer and consumer halves of a buffer's usage.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct Usage {
    pub producer: ProducerUsage,
    pub consumer: ConsumerUsage,
}

impl Usage {
    pub fn new(producer: ProducerUsage, consumer: ConsumerUsage) -> Usage {
        Usage { producer, consumer }
    }

    pub fn cpu_can_read(&self) -> bool {
        self.producer.contains(ProducerUsage::CPU_READ)
            || self.consumer.contains(ConsumerUsage::CPU_READ)
    }

    pub fn cpu_can_write(&self) -> bool {
        self.producer.contains(ProducerUsage::CPU_WRITE)
    }

    pub fn cpu_can_access(&self) -> bool {
        self.cpu_can_read() || self.cpu_can_write()
    }

    /// True when the consumer reads the buffer with the CPU.
    pub fn consumer_cpu_read(&self) -> bool {
        self.consumer.intersects(ConsumerUsage::CPU_READ_OFTEN)
    }

    pub fn protected(&self) -> bool {
        self.producer.contains(ProducerUsage::PROTECTED)
    }

    pub fn gpu_usage(&self) -> bool {
        self.producer.contains(ProducerUsage::GPU_RENDER_TARGET)
            || self.consumer.contains(ConsumerUsage::GPU_TEXTURE)
    }

    /// Raw bits of both halves ORed together, as printed by buffer dumps.
    pub fn combined_bits(&self) -> u64 {
        self.producer.bits() | self.consumer.bits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn often_implies_rarely() {
        assert!(ProducerUsage::CPU_READ_OFTEN.contains(ProducerUsage::CPU_READ));
        assert!(ProducerUsage::CPU_WRITE_OFTEN.contains(ProducerUsage::CPU_WRITE));
        assert!(ConsumerUsage::CPU_READ_OFTEN.contains(ConsumerUsage::CPU_READ));
    }

    #[test]
    fn cpu_access() {
        let none = Usage::default();
        assert!(!none.cpu_can_access());

        let read = Usage::new(ProducerUsage::empty(), ConsumerUsage::CPU_READ_OFTEN);
        assert!(read.cpu_can_read());
        assert!(!read.cpu_can_write());
        assert!(read.consumer_cpu_read());

        let write = Usage::new(ProducerUsage::CPU_WRITE, ConsumerUsage::empty());
        assert!(write.cpu_can_write());
        assert!(write.cpu_can_access());
        assert!(!write.consumer_cpu_read());
    }
}
