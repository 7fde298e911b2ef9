//! Storage images written by compute and sampled by the quad pass.
//!
//! A [`StorageImage`] is a single-mip 2D color image with GPU-only memory,
//! kept in `GENERAL` layout for its whole life so compute can write it and
//! fragment shaders can sample it without further transitions.
//!
//! Resizing recreates the image and bumps [`StorageImage::generation`];
//! descriptor sets that captured the old view must be rewritten before the
//! next dispatch.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Default storage format: 32-bit float RGBA.
pub const DEFAULT_STORAGE_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

/// Maps a short format name to a storage-capable color format.
///
/// Accepts `rgba32f`, `rgba16f` and `rgba8`.
pub fn storage_format_from_name(name: &str) -> Option<vk::Format> {
    match name.to_ascii_lowercase().as_str() {
        "rgba32f" => Some(vk::Format::R32G32B32A32_SFLOAT),
        "rgba16f" => Some(vk::Format::R16G16B16A16_SFLOAT),
        "rgba8" => Some(vk::Format::R8G8B8A8_UNORM),
        _ => None,
    }
}

/// Usage flags every storage image is created with.
pub fn storage_image_usage() -> vk::ImageUsageFlags {
    vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST
}

/// Image + view + allocation for one storage target.
struct ImageParts {
    image: vk::Image,
    view: vk::ImageView,
    allocation: Allocation,
}

/// A 2D storage image in `GENERAL` layout.
pub struct StorageImage {
    device: Arc<Device>,
    parts: Option<ImageParts>,
    format: vk::Format,
    extent: vk::Extent2D,
    generation: u64,
}

impl StorageImage {
    /// Creates a storage image and transitions it to `GENERAL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the extent is empty, or image creation, memory
    /// allocation, view creation or the layout transition fails.
    pub fn new(device: Arc<Device>, extent: vk::Extent2D, format: vk::Format) -> RhiResult<Self> {
        let parts = create_parts(&device, extent, format)?;
        info!(
            "Created storage image: {}x{} ({:?})",
            extent.width, extent.height, format
        );
        Ok(Self {
            device,
            parts: Some(parts),
            format,
            extent,
            generation: 0,
        })
    }

    /// Recreates the image at `extent`. Does nothing if the size is unchanged.
    ///
    /// The caller must ensure the device no longer uses the old image.
    ///
    /// # Errors
    ///
    /// Returns an error if the new image cannot be created; the old image
    /// has already been released at that point.
    pub fn resize(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        if extent == self.extent && self.parts.is_some() {
            return Ok(());
        }

        if let Some(parts) = self.parts.take() {
            destroy_parts(&self.device, parts);
        }

        let parts = create_parts(&self.device, extent, self.format)?;
        self.parts = Some(parts);
        self.extent = extent;
        self.generation += 1;

        debug!(
            "Resized storage image to {}x{} (generation {})",
            extent.width, extent.height, self.generation
        );
        Ok(())
    }

    /// Returns the Vulkan image handle, or null after a failed resize.
    #[inline]
    pub fn image(&self) -> vk::Image {
        self.parts.as_ref().map_or(vk::Image::null(), |p| p.image)
    }

    /// Returns the image view handle, or null after a failed resize.
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.parts.as_ref().map_or(vk::ImageView::null(), |p| p.view)
    }

    /// Returns the image format.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    /// Returns the current extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// How many times the image has been recreated.
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Descriptor info for binding as a storage image (no sampler).
    pub fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .sampler(vk::Sampler::null())
            .image_view(self.view())
            .image_layout(vk::ImageLayout::GENERAL)
    }

    /// Descriptor info for sampling through `sampler`.
    pub fn sampled_descriptor_info(&self, sampler: vk::Sampler) -> vk::DescriptorImageInfo {
        self.descriptor_info().sampler(sampler)
    }
}

impl Drop for StorageImage {
    fn drop(&mut self) {
        if let Some(parts) = self.parts.take() {
            destroy_parts(&self.device, parts);
        }
        debug!(
            "Destroyed storage image: {}x{}",
            self.extent.width, self.extent.height
        );
    }
}

fn create_parts(
    device: &Arc<Device>,
    extent: vk::Extent2D,
    format: vk::Format,
) -> RhiResult<ImageParts> {
    if extent.width == 0 || extent.height == 0 {
        return Err(RhiError::InvalidHandle(
            "Storage image dimensions must be greater than 0".to_string(),
        ));
    }

    let image_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(storage_image_usage())
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = unsafe { device.handle().create_image(&image_info, None)? };
    let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

    let allocation = device.lock_allocator().and_then(|mut allocator| {
        allocator
            .allocate(&AllocationCreateDesc {
                name: "storage_image",
                requirements,
                location: MemoryLocation::GpuOnly,
                linear: false,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(RhiError::from)
    });
    let allocation = match allocation {
        Ok(allocation) => allocation,
        Err(e) => {
            unsafe { device.handle().destroy_image(image, None) };
            return Err(e);
        }
    };

    let parts = ImageParts {
        image,
        view: vk::ImageView::null(),
        allocation,
    };

    let bind = unsafe {
        device
            .handle()
            .bind_image_memory(image, parts.allocation.memory(), parts.allocation.offset())
    };
    if let Err(e) = bind {
        destroy_parts(device, parts);
        return Err(e.into());
    }

    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .base_mip_level(0)
                .level_count(1)
                .base_array_layer(0)
                .layer_count(1),
        );

    let view = match unsafe { device.handle().create_image_view(&view_info, None) } {
        Ok(view) => view,
        Err(e) => {
            destroy_parts(device, parts);
            return Err(e.into());
        }
    };
    let parts = ImageParts { view, ..parts };

    if let Err(e) = device.transition_image_layout(
        parts.image,
        vk::ImageAspectFlags::COLOR,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::GENERAL,
    ) {
        destroy_parts(device, parts);
        return Err(e);
    }

    Ok(parts)
}

fn destroy_parts(device: &Device, parts: ImageParts) {
    unsafe {
        if parts.view != vk::ImageView::null() {
            device.handle().destroy_image_view(parts.view, None);
        }
        device.handle().destroy_image(parts.image, None);
    }

    match device.lock_allocator() {
        Ok(mut allocator) => {
            if let Err(e) = allocator.free(parts.allocation) {
                error!("Failed to free storage image allocation: {:?}", e);
            }
        }
        Err(e) => error!("Leaking storage image allocation: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_storage_format() {
        assert_eq!(DEFAULT_STORAGE_FORMAT, vk::Format::R32G32B32A32_SFLOAT);
        assert_eq!(
            storage_format_from_name("rgba32f"),
            Some(DEFAULT_STORAGE_FORMAT)
        );
    }

    #[test]
    fn test_storage_format_from_name() {
        assert_eq!(
            storage_format_from_name("RGBA16F"),
            Some(vk::Format::R16G16B16A16_SFLOAT)
        );
        assert_eq!(
            storage_format_from_name("rgba8"),
            Some(vk::Format::R8G8B8A8_UNORM)
        );
        assert_eq!(storage_format_from_name("d32"), None);
    }

    #[test]
    fn test_storage_image_usage() {
        let usage = storage_image_usage();
        assert!(usage.contains(vk::ImageUsageFlags::STORAGE));
        assert!(usage.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(usage.contains(vk::ImageUsageFlags::TRANSFER_DST));
        assert!(!usage.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }

    #[test]
    fn test_storage_image_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<StorageImage>();
    }
}
