//! Vulkan logical device and queue management.
//!
//! This module handles VkDevice creation, queue retrieval, gpu-allocator
//! initialization and the one-shot command helpers used for setup work.
//!
//! # Overview
//!
//! The [`Device`] struct provides a safe abstraction over the Vulkan logical device,
//! including:
//! - Logical device creation with required extensions and features
//! - Queue retrieval for graphics and presentation
//! - Memory allocation via gpu-allocator
//! - One-shot command recording (`begin_single_time_commands` /
//!   `end_single_time_commands`) backed by a device-owned transient pool
//! - Image layout transitions and buffer-to-image copies built on top of it
//!
//! # Example
//!
//! ```no_run
//! use horizon_rhi::instance::Instance;
//! use horizon_rhi::physical_device::select_physical_device;
//! use horizon_rhi::device::Device;
//! use ash::vk;
//!
//! # fn example() -> Result<(), horizon_rhi::RhiError> {
//! let instance = Instance::new(false)?;
//! let surface: vk::SurfaceKHR = vk::SurfaceKHR::null(); // placeholder
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//!
//! let physical_device_info = select_physical_device(instance.handle(), surface, &surface_loader)?;
//! let device = Device::new(&instance, &physical_device_info)?;
//!
//! let cmd = device.begin_single_time_commands()?;
//! // ... record setup work ...
//! device.end_single_time_commands(cmd, None)?;
//! # Ok(())
//! # }
//! ```

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{PhysicalDeviceInfo, QueueFamilyIndices};

/// Required device extensions.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] =
    &[ash::khr::swapchain::NAME, ash::khr::dynamic_rendering::NAME];

/// Vulkan logical device wrapper.
///
/// This struct manages the lifetime of the Vulkan logical device and its associated
/// resources including queues, the memory allocator and the one-shot command pool.
///
/// # Thread Safety
///
/// The [`Device`] is designed to be shared across threads using `Arc`. The internal
/// allocator and the one-shot command pool are each protected by a `Mutex`.
pub struct Device {
    /// Vulkan logical device handle.
    device: ash::Device,
    /// Physical device handle.
    physical_device: vk::PhysicalDevice,
    /// Memory properties of the physical device, used by `find_memory_type`.
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// GPU memory allocator. Dropped explicitly before the device.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    /// Transient pool for one-shot command buffers on the graphics family.
    one_shot_pool: Mutex<vk::CommandPool>,
    /// Graphics queue handle.
    graphics_queue: vk::Queue,
    /// Presentation queue handle.
    present_queue: vk::Queue,
    /// Queue family indices.
    queue_families: QueueFamilyIndices,
    /// Resolved graphics family index.
    graphics_family: u32,
}

impl Device {
    /// Creates a new logical device.
    ///
    /// This function creates a Vulkan logical device with:
    /// - Required extensions (swapchain, dynamic rendering)
    /// - Vulkan 1.3 features (dynamic rendering, synchronization2)
    /// - Base features (sampler anisotropy)
    ///
    /// It also initializes the gpu-allocator and the one-shot command pool.
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `physical_device_info` - Information about the selected physical device
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The graphics or present queue family is missing
    /// - Device creation fails
    /// - Allocator initialization fails
    /// - The one-shot command pool cannot be created
    pub fn new(
        instance: &Instance,
        physical_device_info: &PhysicalDeviceInfo,
    ) -> RhiResult<Arc<Self>> {
        let queue_families = &physical_device_info.queue_families;
        let graphics_family = queue_families
            .graphics_family
            .ok_or(RhiError::NoSuitableGpu)?;
        let present_family = queue_families
            .present_family
            .ok_or(RhiError::NoSuitableGpu)?;

        // Create queue create infos for unique queue families
        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];

        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!(
            "Creating {} queue(s) for families: {:?}",
            queue_create_infos.len(),
            unique_families
        );

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true);

        let extension_names: Vec<*const i8> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        info!(
            "Logical device created with {} extension(s)",
            DEVICE_EXTENSIONS.len()
        );

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        debug!("Graphics queue retrieved from family {}", graphics_family);

        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!("Present queue retrieved from family {}", present_family);

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        info!("GPU memory allocator initialized");

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::TRANSIENT)
            .queue_family_index(graphics_family);
        let one_shot_pool = unsafe { device.create_command_pool(&pool_info, None)? };

        debug!("One-shot command pool created for family {}", graphics_family);

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            memory_properties: physical_device_info.memory_properties,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            one_shot_pool: Mutex::new(one_shot_pool),
            graphics_queue,
            present_queue,
            queue_families: physical_device_info.queue_families,
            graphics_family,
        }))
    }

    /// Returns the Vulkan logical device handle.
    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    /// Returns the physical device handle.
    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Returns the graphics queue handle.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Returns the presentation queue handle.
    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    /// Returns the graphics queue family index.
    #[inline]
    pub fn graphics_family(&self) -> u32 {
        self.graphics_family
    }

    /// Returns the queue family indices.
    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    /// Locks the allocator, mapping a poisoned mutex to an error.
    pub fn lock_allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator
            .lock()
            .map_err(|_| RhiError::InvalidHandle("allocator mutex poisoned".to_string()))
    }

    /// Waits for the device to become idle.
    ///
    /// This function blocks until all outstanding operations on all queues
    /// have completed. Used before destroying resources that may still be
    /// referenced by in-flight work.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Finds a memory type index satisfying both the type filter and the
    /// requested property flags.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::InvalidHandle`] when no memory type matches.
    pub fn find_memory_type(
        &self,
        type_filter: u32,
        properties: vk::MemoryPropertyFlags,
    ) -> RhiResult<u32> {
        find_memory_type_index(&self.memory_properties, type_filter, properties).ok_or_else(|| {
            RhiError::InvalidHandle(format!(
                "no memory type matches filter {:#b} with {:?}",
                type_filter, properties
            ))
        })
    }

    /// Submits command buffers to the graphics queue.
    ///
    /// # Safety
    ///
    /// The caller must ensure:
    /// - All command buffers are valid and recorded
    /// - Synchronization is properly handled
    /// - The fence (if not null) is unsignaled and not in use
    ///
    /// # Errors
    ///
    /// Returns an error if the submission fails.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }

    /// Allocates a primary command buffer from the one-shot pool and begins
    /// recording with `ONE_TIME_SUBMIT`.
    ///
    /// Pair every call with [`Device::end_single_time_commands`].
    ///
    /// # Errors
    ///
    /// Returns an error if allocation or `vkBeginCommandBuffer` fails.
    pub fn begin_single_time_commands(&self) -> RhiResult<vk::CommandBuffer> {
        let pool = self.lock_one_shot_pool()?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(*pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info)? };
        let cmd = buffers
            .first()
            .copied()
            .ok_or_else(|| RhiError::InvalidHandle("no one-shot command buffer".to_string()))?;

        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        if let Err(e) = unsafe { self.device.begin_command_buffer(cmd, &begin_info) } {
            unsafe { self.device.free_command_buffers(*pool, &[cmd]) };
            return Err(e.into());
        }

        Ok(cmd)
    }

    /// Returns a one-shot command buffer to the pool without submitting it.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool mutex is poisoned.
    pub fn free_single_time_commands(&self, cmd: vk::CommandBuffer) -> RhiResult<()> {
        let pool = self.lock_one_shot_pool()?;
        unsafe { self.device.free_command_buffers(*pool, &[cmd]) };
        Ok(())
    }

    /// Ends a one-shot command buffer, submits it to the graphics queue and
    /// blocks until it has completed.
    ///
    /// When `fence` is given, the submission signals it and completion is
    /// awaited on that fence (the caller must have reset it). Otherwise the
    /// graphics queue is drained. The command buffer is freed afterwards.
    ///
    /// # Errors
    ///
    /// Returns an error if ending, submitting or waiting fails.
    pub fn end_single_time_commands(
        &self,
        cmd: vk::CommandBuffer,
        fence: Option<vk::Fence>,
    ) -> RhiResult<()> {
        let result = self.submit_and_wait(cmd, fence);
        self.free_single_time_commands(cmd)?;
        result
    }

    fn submit_and_wait(&self, cmd: vk::CommandBuffer, fence: Option<vk::Fence>) -> RhiResult<()> {
        unsafe { self.device.end_command_buffer(cmd)? };

        let command_buffers = [cmd];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);

        let signal = fence.unwrap_or(vk::Fence::null());
        unsafe { self.submit_graphics(&[submit_info], signal)? };

        match fence {
            Some(fence) => unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX)? },
            None => unsafe { self.device.queue_wait_idle(self.graphics_queue)? },
        }

        Ok(())
    }

    /// Transitions an image between layouts using a one-shot command buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the one-shot submission fails.
    pub fn transition_image_layout(
        &self,
        image: vk::Image,
        aspect: vk::ImageAspectFlags,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
    ) -> RhiResult<()> {
        let cmd = self.begin_single_time_commands()?;
        let barrier = layout_transition_barrier(image, aspect, old_layout, new_layout);
        unsafe {
            self.device.cmd_pipeline_barrier(
                cmd,
                vk::PipelineStageFlags::TOP_OF_PIPE,
                vk::PipelineStageFlags::ALL_COMMANDS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[barrier],
            );
        }
        self.end_single_time_commands(cmd, None)
    }

    /// Copies a tightly packed buffer into mip level 0 of a color image
    /// that is in `TRANSFER_DST_OPTIMAL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the one-shot submission fails.
    pub fn copy_buffer_to_image(
        &self,
        buffer: vk::Buffer,
        image: vk::Image,
        extent: vk::Extent2D,
    ) -> RhiResult<()> {
        let cmd = self.begin_single_time_commands()?;
        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_offset(vk::Offset3D::default())
            .image_extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        unsafe {
            self.device.cmd_copy_buffer_to_image(
                cmd,
                buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
        self.end_single_time_commands(cmd, None)
    }

    fn lock_one_shot_pool(&self) -> RhiResult<MutexGuard<'_, vk::CommandPool>> {
        self.one_shot_pool
            .lock()
            .map_err(|_| RhiError::InvalidHandle("one-shot pool mutex poisoned".to_string()))
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }

            let pool = match self.one_shot_pool.get_mut() {
                Ok(pool) => *pool,
                Err(poisoned) => *poisoned.into_inner(),
            };
            self.device.destroy_command_pool(pool, None);

            // The allocator frees its memory blocks through the device handle
            ManuallyDrop::drop(&mut self.allocator);

            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// Safety: ash::Device is Send+Sync, handles are Copy, and the allocator and
// one-shot pool are behind mutexes.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

/// Searches the memory properties for a type in `type_filter` that has all
/// of `properties`.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        (type_filter & (1 << i)) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties)
    })
}

/// Builds an image memory barrier with access masks derived from the
/// layouts.
pub fn layout_transition_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> vk::ImageMemoryBarrier<'static> {
    vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(aspect)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        )
        .src_access_mask(access_mask_for(old_layout))
        .dst_access_mask(access_mask_for(new_layout))
}

fn access_mask_for(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::UNDEFINED | vk::ImageLayout::PRESENT_SRC_KHR => vk::AccessFlags::empty(),
        vk::ImageLayout::GENERAL => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::COLOR_ATTACHMENT_READ | vk::AccessFlags::COLOR_ATTACHMENT_WRITE
        }
        _ => vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(!DEVICE_EXTENSIONS.is_empty());
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::dynamic_rendering::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }

    fn memory_properties_with(
        flags: &[vk::MemoryPropertyFlags],
    ) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = *f;
        }
        props
    }

    #[test]
    fn test_find_memory_type_respects_filter() {
        let props = memory_properties_with(&[
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL | vk::MemoryPropertyFlags::HOST_VISIBLE,
        ]);

        assert_eq!(
            find_memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(1)
        );
        assert_eq!(
            find_memory_type_index(&props, 0b100, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(2)
        );
        assert_eq!(
            find_memory_type_index(&props, 0b001, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            None
        );
    }

    #[test]
    fn test_transition_barrier_access_masks() {
        let barrier = layout_transition_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::GENERAL,
        );
        assert_eq!(barrier.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(barrier.new_layout, vk::ImageLayout::GENERAL);
        assert_eq!(barrier.src_access_mask, vk::AccessFlags::empty());
        assert!(barrier.dst_access_mask.contains(vk::AccessFlags::SHADER_WRITE));
    }
}
