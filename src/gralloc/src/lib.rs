// Copyright 2021 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! A crate for allocating, importing, locking and describing graphics buffers, and for carrying
//! per-buffer metadata between the processes that share them.

#[macro_use]
mod macros;
mod allocator;
mod buffer_manager;
mod color;
mod descriptor;
mod formats;
mod gralloc_os;
mod gralloc_utils;
mod handle;
mod layout;
mod media_layout;
mod metadata;
mod perform;
mod properties;
mod system_allocator;
mod usage;

pub use crate::allocator::AllocData;
pub use crate::allocator::AllocationPolicy;
pub use crate::allocator::CacheOp;
pub use crate::allocator::HeapFlags;
pub use crate::allocator::HeapInfo;
pub use crate::allocator::HeapMask;
pub use crate::allocator::PlatformAllocator;
pub use crate::buffer_manager::AllocationOutcome;
pub use crate::buffer_manager::BufferManager;
pub use crate::buffer_manager::BufferMapping;
pub use crate::buffer_manager::LOCK_FENCE_TIMEOUT;
pub use crate::color::*;
pub use crate::descriptor::BufferDescriptor;
pub use crate::formats::BufferType;
pub use crate::formats::PixelFormat;
pub use crate::gralloc_os::page_size;
pub use crate::gralloc_os::round_up_to_page_size;
pub use crate::gralloc_os::AsRawDescriptor;
pub use crate::gralloc_os::Fence;
pub use crate::gralloc_os::FenceSignaler;
pub use crate::gralloc_os::FromRawDescriptor;
pub use crate::gralloc_os::IntoRawDescriptor;
pub use crate::gralloc_os::MappedRegion;
pub use crate::gralloc_os::MemoryMapping;
pub use crate::gralloc_os::RawDescriptor;
pub use crate::gralloc_os::SafeDescriptor;
pub use crate::gralloc_os::SharedMemory;
pub use crate::gralloc_utils::*;
pub use crate::handle::BufferHandle;
pub use crate::handle::BufferId;
pub use crate::handle::HandleInfo;
pub use crate::handle::PrivateFlags;
pub use crate::handle::HANDLE_MAGIC;
pub use crate::layout::*;
pub use crate::metadata::*;
pub use crate::perform::PerformCommand;
pub use crate::perform::PerformResult;
pub use crate::properties::EnvPropertyStore;
pub use crate::properties::MapPropertyStore;
pub use crate::properties::PropertyStore;
pub use crate::system_allocator::SystemAllocator;
pub use crate::usage::ConsumerUsage;
pub use crate::usage::ProducerUsage;
pub use crate::usage::Usage;
