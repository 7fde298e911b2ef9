//! Host-written buffers.
//!
//! Each frame slot owns a uniform buffer holding its frame parameter
//! snapshot; staging buffers feed [`Device::copy_buffer_to_image`]. Both
//! live in persistently mapped `CpuToGpu` memory from gpu-allocator.
//!
//! [`Device::copy_buffer_to_image`]: crate::device::Device::copy_buffer_to_image
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use horizon_rhi::device::Device;
//! use horizon_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>) -> Result<(), horizon_rhi::RhiError> {
//! let params = Buffer::new(device, BufferUsage::Uniform, 256)?;
//! params.write(&[1.0f32, 2.0, 3.0, 4.0])?;
//! let _info = params.descriptor_info();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// What a buffer is read as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Shader uniform data, rewritten every frame.
    Uniform,
    /// Transfer source for uploads.
    Staging,
}

impl BufferUsage {
    fn flags(self) -> vk::BufferUsageFlags {
        match self {
            Self::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            Self::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Uniform => "uniform",
            Self::Staging => "staging",
        }
    }
}

/// Fails unless `len` bytes at `offset` fit in `size`.
fn check_write_range(size: vk::DeviceSize, offset: vk::DeviceSize, len: usize) -> RhiResult<()> {
    match offset.checked_add(len as vk::DeviceSize) {
        Some(end) if end <= size => Ok(()),
        _ => Err(RhiError::InvalidHandle(format!(
            "write of {} bytes at offset {} overflows a {} byte buffer",
            len, offset, size
        ))),
    }
}

/// A mapped buffer and its allocation.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a mapped buffer of `size` bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if `size` is zero, or creation, allocation or
    /// binding fails.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidHandle(
                "buffer size must be non-zero".to_string(),
            ));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.flags())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.lock_allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: usage.label(),
                    requirements,
                    location: MemoryLocation::CpuToGpu,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let (memory, offset) = (unsafe { allocation.memory() }, allocation.offset());
        // Drop releases both the buffer and the allocation from here on
        let created = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        };
        unsafe {
            created
                .device
                .handle()
                .bind_buffer_memory(buffer, memory, offset)?;
        }

        debug!("Created {} byte {} buffer", size, usage.label());
        Ok(created)
    }

    /// Writes `value` at offset 0.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not fit or the memory is not
    /// mapped.
    pub fn write<T: bytemuck::Pod>(&self, value: &T) -> RhiResult<()> {
        self.write_bytes(0, bytemuck::bytes_of(value))
    }

    /// Writes `data` at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range overflows the buffer or the memory is
    /// not mapped.
    pub fn write_bytes(&self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        check_write_range(self.size, offset, data.len())?;

        let mapped = self
            .allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .ok_or_else(|| RhiError::InvalidHandle("buffer memory is not mapped".to_string()))?;

        unsafe {
            let dst = mapped.as_ptr().cast::<u8>().add(offset as usize);
            std::ptr::copy_nonoverlapping(data.as_ptr(), dst, data.len());
        }
        Ok(())
    }

    /// Whole-buffer descriptor info.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo::default()
            .buffer(self.buffer)
            .offset(0)
            .range(self.size)
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free {} buffer memory: {:?}", self.usage.label(), e);
                    }
                }
                Err(e) => error!("Leaking {} buffer memory: {}", self.usage.label(), e),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_flags() {
        assert_eq!(
            BufferUsage::Uniform.flags(),
            vk::BufferUsageFlags::UNIFORM_BUFFER
        );
        assert_eq!(
            BufferUsage::Staging.flags(),
            vk::BufferUsageFlags::TRANSFER_SRC
        );
    }

    #[test]
    fn test_check_write_range() {
        assert!(check_write_range(64, 0, 64).is_ok());
        assert!(check_write_range(64, 32, 32).is_ok());
        assert!(check_write_range(64, 32, 33).is_err());
        assert!(check_write_range(64, u64::MAX, 1).is_err());
    }
}
