//! Presentation chain.
//!
//! [`Swapchain`] owns the presentable images and everything that belongs to
//! a single image rather than to a frame slot:
//!
//! - the image view rendered into,
//! - the render-finished semaphore presentation waits on,
//! - the fence of the slot that last submitted work targeting the image.
//!
//! A rebuild replaces all of them together, so nothing per image can
//! outlive the chain it was created for.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use horizon_rhi::device::Device;
//! use horizon_rhi::instance::Instance;
//! use horizon_rhi::swapchain::Swapchain;
//! use horizon_rhi::sync::FrameSync;
//! use ash::vk;
//!
//! # fn example(instance: &Instance, device: Arc<Device>, surface: vk::SurfaceKHR, sync: &FrameSync) -> Result<(), horizon_rhi::RhiError> {
//! let mut swapchain = Swapchain::new(instance, device.clone(), surface, 800, 600)?;
//!
//! let (image_index, _) = swapchain.acquire_next_image(sync.image_available().handle())?;
//! swapchain.guard_image(image_index, sync.in_flight().handle())?;
//! // ... submit work signalling swapchain.render_finished(image_index) ...
//! swapchain.present(device.present_queue(), image_index)?;
//!
//! swapchain.recreate(instance, surface, 1024, 768)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::sync::Semaphore;

// =============================================================================
// Surface negotiation
// =============================================================================

/// What the surface offers for this device.
#[derive(Debug, Clone)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    /// Queries capabilities, formats and present modes.
    ///
    /// # Errors
    ///
    /// Returns the Vulkan error of the first failing query.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        unsafe {
            Ok(Self {
                capabilities: surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)?,
                formats: surface_loader
                    .get_physical_device_surface_formats(physical_device, surface)?,
                present_modes: surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            })
        }
    }

    /// Picks the chain settings for a window of `width` x `height`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] if the surface offers no format
    /// or no present mode.
    pub fn choose(&self, width: u32, height: u32) -> RhiResult<ChainSettings> {
        let surface_format = choose_surface_format(&self.formats).ok_or_else(|| {
            RhiError::SwapchainError("surface reports no formats".to_string())
        })?;
        if self.present_modes.is_empty() {
            return Err(RhiError::SwapchainError(
                "surface reports no present modes".to_string(),
            ));
        }

        let caps = &self.capabilities;
        Ok(ChainSettings {
            surface_format,
            present_mode: choose_present_mode(&self.present_modes),
            extent: choose_extent(caps, width, height),
            image_count: determine_image_count(caps),
            min_image_count: caps.min_image_count,
            pre_transform: caps.current_transform,
        })
    }
}

/// Everything decided before the chain is created.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChainSettings {
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    /// Images requested from the driver; it may create more.
    pub image_count: u32,
    pub min_image_count: u32,
    pub pre_transform: vk::SurfaceTransformFlagsKHR,
}

impl ChainSettings {
    /// A rebuilt chain must keep the format pipelines were built against.
    pub fn is_compatible_with(&self, other: &ChainSettings) -> bool {
        self.surface_format == other.surface_format
    }
}

// =============================================================================
// Per-image submission guard
// =============================================================================

/// Fence of the frame slot whose submission last targeted each image.
///
/// With more images than slots (or out-of-order acquires) an image can
/// come back while another slot's work on it is still pending; the frame
/// that acquires it must wait on that slot's fence first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageFences {
    owners: Vec<Option<vk::Fence>>,
}

impl ImageFences {
    /// No image has an owner yet.
    pub fn new(image_count: usize) -> Self {
        Self {
            owners: vec![None; image_count],
        }
    }

    /// Makes `fence` the owner of `image_index` and returns the previous
    /// owner if the caller has to wait on it. A slot that re-acquires its
    /// own image gets `None`: it already waited on its fence.
    ///
    /// # Panics
    ///
    /// Panics if `image_index` is out of range.
    pub fn claim(&mut self, image_index: u32, fence: vk::Fence) -> Option<vk::Fence> {
        let previous = self.owners[image_index as usize].replace(fence);
        previous.filter(|&owner| owner != fence)
    }

    /// Current owner of `image_index`.
    pub fn owner(&self, image_index: u32) -> Option<vk::Fence> {
        self.owners.get(image_index as usize).copied().flatten()
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

// =============================================================================
// Swapchain
// =============================================================================

/// One presentable image and the objects tied to it.
struct PresentImage {
    image: vk::Image,
    view: vk::ImageView,
    render_finished: Semaphore,
}

/// The presentation chain: images, views, per-image semaphores and fences.
///
/// Not thread-safe; the frame loop drives it from one thread.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<PresentImage>,
    image_fences: ImageFences,
    settings: ChainSettings,
}

impl Swapchain {
    /// Creates the chain for a window of `width` x `height`.
    ///
    /// Prefers B8G8R8A8_SRGB and MAILBOX, falling back to FIFO.
    ///
    /// # Errors
    ///
    /// Returns an error if surface queries, chain creation, view creation
    /// or semaphore creation fail.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let settings = query_settings(instance, &device, surface, width, height)?;
        let swapchain =
            create_handle(&loader, &device, surface, &settings, vk::SwapchainKHR::null())?;

        let images = match create_images(&device, &loader, swapchain, settings.surface_format.format)
        {
            Ok(images) => images,
            Err(e) => {
                unsafe { loader.destroy_swapchain(swapchain, None) };
                return Err(e);
            }
        };

        info!(
            "Swapchain created: {}x{}, {:?}, {:?}, {} images",
            settings.extent.width,
            settings.extent.height,
            settings.surface_format.format,
            settings.present_mode,
            images.len()
        );

        Ok(Self {
            image_fences: ImageFences::new(images.len()),
            device,
            loader,
            swapchain,
            images,
            settings,
        })
    }

    /// Rebuilds the chain at `width` x `height`, handing the current chain
    /// to the driver as `old_swapchain`. Views, semaphores and image fences
    /// are recreated for the new images.
    ///
    /// Waits for the device to idle first.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::SwapchainError`] if the format or color space
    /// changed ("swapchain image format or color space has changed"), or
    /// the Vulkan error from creation. On a format change `self` still
    /// holds the old chain.
    pub fn recreate(
        &mut self,
        instance: &Instance,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        self.device.wait_idle()?;

        let settings = query_settings(instance, &self.device, surface, width, height)?;
        if !self.settings.is_compatible_with(&settings) {
            return Err(RhiError::SwapchainError(
                "swapchain image format or color space has changed".to_string(),
            ));
        }

        let swapchain =
            create_handle(&self.loader, &self.device, surface, &settings, self.swapchain)?;

        // The old chain is retired once passed as old_swapchain
        self.release_images();
        unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
        self.swapchain = swapchain;
        self.settings = settings;

        self.images = create_images(
            &self.device,
            &self.loader,
            swapchain,
            settings.surface_format.format,
        )?;
        self.image_fences = ImageFences::new(self.images.len());

        debug!(
            "Swapchain rebuilt: {}x{}, {} images",
            settings.extent.width,
            settings.extent.height,
            self.images.len()
        );
        Ok(())
    }

    /// Acquires the next image, signalling `semaphore` when it is ready.
    ///
    /// Returns `(image_index, suboptimal)`. Out-of-date is returned as
    /// `Err(ERROR_OUT_OF_DATE_KHR)` for the caller to classify.
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        }
    }

    /// Waits until no other slot's submission targets `image_index`, then
    /// records `fence` as its owner.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn guard_image(&mut self, image_index: u32, fence: vk::Fence) -> RhiResult<()> {
        if let Some(previous) = self.image_fences.claim(image_index, fence) {
            unsafe {
                self.device
                    .handle()
                    .wait_for_fences(&[previous], true, u64::MAX)?;
            }
        }
        Ok(())
    }

    /// Semaphore the submission rendering into `image_index` must signal.
    ///
    /// # Panics
    ///
    /// Panics if `image_index` is out of range.
    #[inline]
    pub fn render_finished(&self, image_index: u32) -> vk::Semaphore {
        self.images[image_index as usize].render_finished.handle()
    }

    /// Presents `image_index` once its render-finished semaphore signals.
    ///
    /// Returns `true` when the chain is suboptimal.
    pub fn present(&self, queue: vk::Queue, image_index: u32) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [self.render_finished(image_index)];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.settings.surface_format.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.settings.extent
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.settings.extent.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.settings.extent.height
    }

    /// Minimum image count the surface requires.
    #[inline]
    pub fn min_image_count(&self) -> u32 {
        self.settings.min_image_count
    }

    /// Images actually created by the driver.
    #[inline]
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[inline]
    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index].image
    }

    /// # Panics
    ///
    /// Panics if `index` is out of range.
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.images[index].view
    }

    /// Destroys views; semaphores go with the `PresentImage`s.
    fn release_images(&mut self) {
        for image in self.images.drain(..) {
            unsafe { self.device.handle().destroy_image_view(image.view, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        let count = self.images.len();
        self.release_images();
        unsafe { self.loader.destroy_swapchain(self.swapchain, None) };
        info!("Swapchain destroyed ({} images)", count);
    }
}

fn query_settings(
    instance: &Instance,
    device: &Device,
    surface: vk::SurfaceKHR,
    width: u32,
    height: u32,
) -> RhiResult<ChainSettings> {
    let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
    SurfaceSupport::query(device.physical_device(), surface, &surface_loader)?.choose(width, height)
}

fn create_handle(
    loader: &ash::khr::swapchain::Device,
    device: &Device,
    surface: vk::SurfaceKHR,
    settings: &ChainSettings,
    old_swapchain: vk::SwapchainKHR,
) -> RhiResult<vk::SwapchainKHR> {
    let families = device.queue_families();
    let (Some(graphics), Some(present)) = (families.graphics_family, families.present_family)
    else {
        return Err(RhiError::SwapchainError(
            "device has no graphics or present queue family".to_string(),
        ));
    };
    let family_indices = [graphics, present];

    let create_info = vk::SwapchainCreateInfoKHR::default()
        .surface(surface)
        .min_image_count(settings.image_count)
        .image_format(settings.surface_format.format)
        .image_color_space(settings.surface_format.color_space)
        .image_extent(settings.extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .pre_transform(settings.pre_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(settings.present_mode)
        .clipped(true)
        .old_swapchain(old_swapchain);

    let create_info = if graphics == present {
        create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
    } else {
        create_info
            .image_sharing_mode(vk::SharingMode::CONCURRENT)
            .queue_family_indices(&family_indices)
    };

    Ok(unsafe { loader.create_swapchain(&create_info, None)? })
}

/// Views and render-finished semaphores for every image of `swapchain`.
/// Everything created so far is released if a later step fails.
fn create_images(
    device: &Arc<Device>,
    loader: &ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
) -> RhiResult<Vec<PresentImage>> {
    let raw_images = unsafe { loader.get_swapchain_images(swapchain)? };
    let mut images: Vec<PresentImage> = Vec::with_capacity(raw_images.len());

    for image in raw_images {
        match create_present_image(device, image, format) {
            Ok(present_image) => images.push(present_image),
            Err(e) => {
                for created in images {
                    unsafe { device.handle().destroy_image_view(created.view, None) };
                }
                return Err(e);
            }
        }
    }
    Ok(images)
}

fn create_present_image(
    device: &Arc<Device>,
    image: vk::Image,
    format: vk::Format,
) -> RhiResult<PresentImage> {
    let create_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .subresource_range(
            vk::ImageSubresourceRange::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .level_count(1)
                .layer_count(1),
        );
    let view = unsafe { device.handle().create_image_view(&create_info, None)? };

    match Semaphore::new(device.clone()) {
        Ok(render_finished) => Ok(PresentImage {
            image,
            view,
            render_finished,
        }),
        Err(e) => {
            unsafe { device.handle().destroy_image_view(view, None) };
            Err(e)
        }
    }
}

/// B8G8R8A8_SRGB, then B8G8R8A8_UNORM (both sRGB nonlinear), then whatever
/// comes first.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let srgb_nonlinear = |format: vk::Format| {
        formats.iter().copied().find(|f| {
            f.format == format && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
    };

    if let Some(format) = srgb_nonlinear(vk::Format::B8G8R8A8_SRGB) {
        return Some(format);
    }
    let fallback = srgb_nonlinear(vk::Format::B8G8R8A8_UNORM).or_else(|| formats.first().copied());
    if let Some(format) = fallback {
        warn!("Preferred surface format unavailable, using {:?}", format.format);
    }
    fallback
}

/// MAILBOX when offered, otherwise FIFO which every surface supports.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, or the window size clamped to the
/// surface limits when the surface leaves it to the swapchain.
fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One image above the minimum, capped by the maximum (0 means unbounded).
fn determine_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        preferred.min(caps.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn surface_format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    fn support(current: vk::Extent2D) -> SurfaceSupport {
        SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 3,
                current_extent: current,
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                ..Default::default()
            },
            formats: vec![
                surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
                surface_format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        }
    }

    #[test]
    fn test_choose_settings() {
        let settings = support(vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        })
        .choose(1280, 720)
        .unwrap();

        assert_eq!(settings.surface_format.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(settings.present_mode, vk::PresentModeKHR::MAILBOX);
        assert_eq!(settings.extent, vk::Extent2D { width: 1280, height: 720 });
        assert_eq!(settings.image_count, 3);
        assert_eq!(settings.min_image_count, 2);
    }

    #[test]
    fn test_surface_extent_wins_over_window() {
        let current = vk::Extent2D {
            width: 1920,
            height: 1080,
        };
        let settings = support(current).choose(800, 600).unwrap();
        assert_eq!(settings.extent, current);
    }

    #[test]
    fn test_window_size_clamped_to_surface_limits() {
        let mut caps = support(vk::Extent2D::default()).capabilities;
        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        caps.min_image_extent = vk::Extent2D {
            width: 100,
            height: 100,
        };
        caps.max_image_extent = vk::Extent2D {
            width: 2000,
            height: 2000,
        };
        assert_eq!(
            choose_extent(&caps, 3000, 50),
            vk::Extent2D {
                width: 2000,
                height: 100
            }
        );
    }

    #[test]
    fn test_inadequate_surface_rejected() {
        let mut no_formats = support(vk::Extent2D::default());
        no_formats.formats.clear();
        assert!(matches!(
            no_formats.choose(800, 600),
            Err(RhiError::SwapchainError(_))
        ));

        let mut no_modes = support(vk::Extent2D::default());
        no_modes.present_modes.clear();
        assert!(matches!(
            no_modes.choose(800, 600),
            Err(RhiError::SwapchainError(_))
        ));
    }

    #[test]
    fn test_surface_format_fallbacks() {
        let unorm = [
            surface_format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            surface_format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(
            choose_surface_format(&unorm).map(|f| f.format),
            Some(vk::Format::B8G8R8A8_UNORM)
        );

        let other = [surface_format(
            vk::Format::R16G16B16A16_SFLOAT,
            vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        )];
        assert_eq!(choose_surface_format(&other), Some(other[0]));
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn test_fifo_when_mailbox_missing() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_image_count_respects_max() {
        let mut caps = vk::SurfaceCapabilitiesKHR {
            min_image_count: 3,
            max_image_count: 3,
            ..Default::default()
        };
        assert_eq!(determine_image_count(&caps), 3);
        caps.max_image_count = 0;
        assert_eq!(determine_image_count(&caps), 4);
    }

    #[test]
    fn test_rebuild_compatibility() {
        let base = support(vk::Extent2D {
            width: 800,
            height: 600,
        })
        .choose(800, 600)
        .unwrap();

        let mut resized = base;
        resized.extent = vk::Extent2D {
            width: 1024,
            height: 768,
        };
        assert!(base.is_compatible_with(&resized));

        let mut hdr = base;
        hdr.surface_format.color_space = vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT;
        assert!(!base.is_compatible_with(&hdr));

        let mut unorm = base;
        unorm.surface_format.format = vk::Format::B8G8R8A8_UNORM;
        assert!(!base.is_compatible_with(&unorm));
    }

    #[test]
    fn test_image_fences_wait_only_on_other_slots() {
        let slot_a = vk::Fence::from_raw(1);
        let slot_b = vk::Fence::from_raw(2);
        let mut fences = ImageFences::new(3);

        // First use of an image: nothing to wait for
        assert_eq!(fences.claim(0, slot_a), None);
        assert_eq!(fences.owner(0), Some(slot_a));

        // Same slot again: its own fence was already waited on
        assert_eq!(fences.claim(0, slot_a), None);

        // Another slot takes the image: it must wait on the previous owner
        assert_eq!(fences.claim(0, slot_b), Some(slot_a));
        assert_eq!(fences.owner(0), Some(slot_b));

        assert_eq!(fences.owner(2), None);
        assert_eq!(fences.owner(7), None);
        assert_eq!(fences.len(), 3);
    }

    #[test]
    fn test_rebuilt_image_fences_start_unowned() {
        let mut fences = ImageFences::new(2);
        fences.claim(1, vk::Fence::from_raw(9));
        let rebuilt = ImageFences::new(4);
        assert!((0..4).all(|i| rebuilt.owner(i).is_none()));
        assert!(!rebuilt.is_empty());
    }
}
