// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Move-only ownership of sync fences.

use std::fmt;
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use std::time::Instant;

use libc::c_char;
use log::debug;
use nix::errno::Errno;
use nix::poll::poll;
use nix::poll::PollFd;
use nix::poll::PollFlags;
use nix::unistd::dup;
use vmm_sys_util::eventfd::EventFd;
use vmm_sys_util::eventfd::EFD_CLOEXEC;

use crate::gralloc_os::AsRawDescriptor;
use crate::gralloc_os::FromRawDescriptor;
use crate::gralloc_os::IntoRawDescriptor;
use crate::gralloc_os::RawDescriptor;
use crate::gralloc_os::SafeDescriptor;
use crate::gralloc_utils::GrallocError;
use crate::gralloc_utils::GrallocResult;

#[repr(C)]
pub struct SyncMergeData {
    name: [c_char; 32],
    fd2: i32,
    fence: i32,
    flags: u32,
    pad: u32,
}

nix::ioctl_readwrite!(sync_ioc_merge, b'>', 3, SyncMergeData);

/// Bound applied to the first fence when two fences that are not sync files get merged.
const MERGE_FALLBACK_TIMEOUT: Duration = Duration::from_millis(1000);

/// A synchronization fence. The descriptor is closed exactly once, when the fence is dropped,
/// unless ownership is handed out with `detach`.
pub struct Fence {
    descriptor: SafeDescriptor,
}

impl Fence {
    pub fn new(descriptor: SafeDescriptor) -> Fence {
        Fence { descriptor }
    }

    /// Takes ownership of a raw fence descriptor received from a client. Negative values mean "no
    /// fence".
    ///
    /// # Safety
    /// `raw` must be an open descriptor that nothing else will close.
    pub unsafe fn from_raw(raw: RawDescriptor) -> Option<Fence> {
        if raw < 0 {
            None
        } else {
            Some(Fence::new(SafeDescriptor::from_raw_descriptor(raw)))
        }
    }

    /// Returns an already signalled fence.
    pub fn new_signaled() -> GrallocResult<Fence> {
        let (fence, signaler) = Fence::new_pending()?;
        signaler.signal()?;
        Ok(fence)
    }

    /// Returns a fence that signals once the paired `FenceSignaler` is triggered.
    pub fn new_pending() -> GrallocResult<(Fence, FenceSignaler)> {
        let event = EventFd::new(EFD_CLOEXEC)?;
        let raw = dup(event.as_raw_fd())?;
        // Safe because dup returned a descriptor we exclusively own.
        let descriptor = unsafe { SafeDescriptor::from_raw_descriptor(raw) };
        Ok((Fence::new(descriptor), FenceSignaler { event }))
    }

    pub fn try_clone(&self) -> GrallocResult<Fence> {
        Ok(Fence::new(self.descriptor.try_clone()?))
    }

    /// Duplicates an optional fence, keeping `None` as `None`.
    pub fn try_clone_optional(fence: Option<&Fence>) -> GrallocResult<Option<Fence>> {
        fence.map(Fence::try_clone).transpose()
    }

    /// Blocks until the fence signals. Expiry of `timeout` is reported as `Timeout`.
    pub fn wait(&self, timeout: Duration) -> GrallocResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let millis = i32::try_from(remaining.as_millis()).unwrap_or(i32::MAX);
            let mut fds = [PollFd::new(self.descriptor.as_raw_descriptor(), PollFlags::POLLIN)];
            match poll(&mut fds, millis) {
                Ok(0) => return Err(GrallocError::Timeout),
                Ok(_) => {
                    let revents = fds[0].revents().unwrap_or_else(PollFlags::empty);
                    if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
                        return Err(GrallocError::BadValue("fence in error state"));
                    }
                    return Ok(());
                }
                Err(Errno::EINTR) | Err(Errno::EAGAIN) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.wait(Duration::ZERO).is_ok()
    }

    /// Gives up ownership of the descriptor, e.g. when returning it to a client.
    pub fn detach(self) -> RawDescriptor {
        self.descriptor.into_raw_descriptor()
    }

    /// Returns a fence that signals once both `first` and `second` signal.
    ///
    /// Sync files are merged by the kernel. Other descriptors cannot be merged; for those the
    /// first fence is waited on here and a duplicate of the second is returned.
    pub fn merge(name: &str, first: &Fence, second: &Fence) -> GrallocResult<Fence> {
        let mut data = SyncMergeData {
            name: [0; 32],
            fd2: second.descriptor.as_raw_descriptor(),
            fence: -1,
            flags: 0,
            pad: 0,
        };
        for (dst, src) in data.name.iter_mut().zip(name.bytes().take(31)) {
            *dst = src as c_char;
        }

        // Safe because data is a properly initialized struct that outlives the call.
        let ret = unsafe { sync_ioc_merge(first.descriptor.as_raw_descriptor(), &mut data) };
        match ret {
            Ok(_) => {
                // Safe because the kernel handed us a new descriptor.
                let merged = unsafe { SafeDescriptor::from_raw_descriptor(data.fence) };
                Ok(Fence::new(merged))
            }
            Err(Errno::ENOTTY) | Err(Errno::EINVAL) => {
                debug!("{}: fences are not sync files, merging by waiting", name);
                first.wait(MERGE_FALLBACK_TIMEOUT)?;
                second.try_clone()
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Like `merge`, but either side may be absent.
    pub fn merge_optional(
        name: &str,
        first: Option<&Fence>,
        second: Option<&Fence>,
    ) -> GrallocResult<Option<Fence>> {
        match (first, second) {
            (Some(a), Some(b)) => Ok(Some(Fence::merge(name, a, b)?)),
            (Some(a), None) => Ok(Some(a.try_clone()?)),
            (None, Some(b)) => Ok(Some(b.try_clone()?)),
            (None, None) => Ok(None),
        }
    }
}

impl AsRawDescriptor for Fence {
    fn as_raw_descriptor(&self) -> RawDescriptor {
        self.descriptor.as_raw_descriptor()
    }
}

impl From<SafeDescriptor> for Fence {
    fn from(descriptor: SafeDescriptor) -> Fence {
        Fence::new(descriptor)
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fence({})", self.descriptor.as_raw_descriptor())
    }
}

/// Software timeline point backing a fence from `Fence::new_pending`.
pub struct FenceSignaler {
    event: EventFd,
}

impl FenceSignaler {
    pub fn signal(&self) -> GrallocResult<()> {
        self.event.write(1)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signaled_fence_does_not_block() {
        let fence = Fence::new_signaled().unwrap();
        fence.wait(Duration::from_millis(100)).unwrap();
        assert!(fence.is_signaled());
    }

    #[test]
    fn pending_fence_times_out() {
        let (fence, signaler) = Fence::new_pending().unwrap();
        assert!(matches!(
            fence.wait(Duration::from_millis(10)),
            Err(GrallocError::Timeout)
        ));

        signaler.signal().unwrap();
        fence.wait(Duration::from_millis(10)).unwrap();
    }

    #[test]
    fn clone_shares_state() {
        let (fence, signaler) = Fence::new_pending().unwrap();
        let clone = fence.try_clone().unwrap();
        assert_ne!(fence.as_raw_descriptor(), clone.as_raw_descriptor());

        signaler.signal().unwrap();
        assert!(clone.is_signaled());
    }

    #[test]
    fn merge_non_sync_files() {
        let a = Fence::new_signaled().unwrap();
        let (b, signal_b) = Fence::new_pending().unwrap();

        let merged = Fence::merge("test", &a, &b).unwrap();
        assert!(!merged.is_signaled());
        signal_b.signal().unwrap();
        assert!(merged.is_signaled());

        assert!(Fence::merge_optional("none", None, None).unwrap().is_none());
        assert!(Fence::merge_optional("one", Some(&a), None).unwrap().is_some());
    }

    #[test]
    fn negative_raw_is_no_fence() {
        assert!(unsafe { Fence::from_raw(-1) }.is_none());
    }
}
