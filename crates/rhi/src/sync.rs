//! Semaphores and fences for the frame loop.
//!
//! Semaphores order acquire, submit and present on the device. Fences tell
//! the host that a frame slot (or a one-shot submission) is done, so its
//! command buffer and parameter buffer may be touched again.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use horizon_rhi::device::Device;
//! use horizon_rhi::sync::FrameSync;
//!
//! # fn example(device: Arc<Device>) -> Result<(), horizon_rhi::RhiError> {
//! let sync = FrameSync::new(device)?;
//! // First wait returns at once: the fence starts signaled
//! sync.in_flight().wait()?;
//! sync.in_flight().reset()?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;

use crate::device::Device;
use crate::error::RhiResult;

/// Binary semaphore, created unsignaled.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// # Errors
    ///
    /// Returns the Vulkan error if creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Host-visible completion signal.
///
/// Frame slots start with theirs signaled so the first wait returns at
/// once. The init pass starts with an unsignaled one and resets it before
/// every submit.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// # Errors
    ///
    /// Returns the Vulkan error if creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };
        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until signaled, without timeout.
    ///
    /// # Errors
    ///
    /// A hung device surfaces as the error `vkWaitForFences` returns,
    /// typically `ERROR_DEVICE_LOST`.
    pub fn wait(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .wait_for_fences(&[self.fence], true, u64::MAX)?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Returns the Vulkan error if the reset fails.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe {
            self.device.handle().reset_fences(&[self.fence])?;
        }
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

/// Synchronization owned by one frame slot.
///
/// - `image_available` is signaled by acquire and waited on by submit.
/// - `in_flight` is signaled when the slot's submission completes; the
///   host waits on it before reusing the slot.
///
/// Render-finished semaphores are per swapchain image, since presentation
/// may still hold one after the slot's fence signals. The swapchain owns
/// those.
pub struct FrameSync {
    image_available: Semaphore,
    in_flight: Fence,
}

impl FrameSync {
    /// Creates the pair; the fence starts signaled.
    ///
    /// # Errors
    ///
    /// Returns an error if creating either object fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        Ok(Self {
            image_available: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device, true)?,
        })
    }

    #[inline]
    pub fn image_available(&self) -> &Semaphore {
        &self.image_available
    }

    #[inline]
    pub fn in_flight(&self) -> &Fence {
        &self.in_flight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
        assert_send_sync::<Fence>();
        assert_send_sync::<FrameSync>();
    }
}
