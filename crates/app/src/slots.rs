//! Per-slot GPU resources and the descriptor sets that reference them.
//!
//! Each frame slot owns a storage image, a parameter buffer and three
//! descriptor sets (init, compute, render). The sets are allocated once
//! from a pool sized for exactly `3 * frames_in_flight` sets; after a
//! resize they are overwritten in place, never reallocated.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use horizon_renderer::{FrameParameters, ImageBinding, PerFrame, SizedSlot, resize_slot};
use horizon_rhi::buffer::{Buffer, BufferUsage};
use horizon_rhi::descriptor::{
    DescriptorPool, DescriptorPoolBuilder, DescriptorSet, DescriptorSetLayout,
    DescriptorSetLayoutBuilder, DescriptorWriter,
};
use horizon_rhi::device::Device;
use horizon_rhi::sampler::{Sampler, SamplerDesc};
use horizon_rhi::storage_image::StorageImage;
use horizon_rhi::{RhiError, RhiResult};

/// Descriptor sets each slot allocates.
const SETS_PER_SLOT: u32 = 3;

// Binding indices shared with the shaders.
const PARAMS_BINDING: u32 = 0;
const STORAGE_BINDING: u32 = 1;
const SAMPLED_BINDING: u32 = 0;

/// Resources owned by one frame slot.
pub struct Slot {
    pub storage_image: StorageImage,
    pub params: Buffer,
    pub init_set: DescriptorSet,
    pub compute_set: DescriptorSet,
    pub render_set: DescriptorSet,
    /// Image generation the sets currently reference.
    pub binding: ImageBinding,
}

/// Layouts, pool, sampler and every slot's resources.
pub struct SlotResources {
    // Sets are plain handles; the pool reclaims them when it is destroyed.
    slots: PerFrame<Slot>,
    pool: DescriptorPool,
    compute_layout: DescriptorSetLayout,
    render_layout: DescriptorSetLayout,
    sampler: Sampler,
}

impl SlotResources {
    /// Creates layouts, the pool and `frames_in_flight` slots at `extent`.
    ///
    /// # Errors
    ///
    /// Returns an error if any Vulkan object cannot be created, or the pool
    /// runs out of sets.
    pub fn new(
        device: Arc<Device>,
        frames_in_flight: usize,
        extent: vk::Extent2D,
        storage_format: vk::Format,
    ) -> RhiResult<Self> {
        // Init and compute share a layout: parameters + storage image
        let compute_layout = DescriptorSetLayoutBuilder::new(device.clone())
            .add_binding(
                PARAMS_BINDING,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::COMPUTE,
                1,
            )
            .add_binding(
                STORAGE_BINDING,
                vk::DescriptorType::STORAGE_IMAGE,
                vk::ShaderStageFlags::COMPUTE,
                1,
            )
            .build()?;

        let render_layout = DescriptorSetLayoutBuilder::new(device.clone())
            .add_binding(
                SAMPLED_BINDING,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
                1,
            )
            .build()?;

        let n = frames_in_flight as u32;
        let pool = DescriptorPoolBuilder::new(device.clone())
            .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, 2 * n)
            .add_pool_size(vk::DescriptorType::STORAGE_IMAGE, 2 * n)
            .add_pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, n)
            .set_max_sets(SETS_PER_SLOT * n)
            .build()?;

        let sampler = Sampler::new(device.clone(), SamplerDesc::default())?;

        let slots = PerFrame::try_new(frames_in_flight, |index| {
            let storage_image = StorageImage::new(device.clone(), extent, storage_format)?;
            let params = Buffer::new(
                device.clone(),
                BufferUsage::Uniform,
                std::mem::size_of::<FrameParameters>() as vk::DeviceSize,
            )?;

            let init_set = build_set(
                DescriptorWriter::new(&compute_layout, &pool)
                    .write_buffer(PARAMS_BINDING, params.descriptor_info())
                    .write_image(STORAGE_BINDING, storage_image.descriptor_info()),
            )?;
            let compute_set = build_set(
                DescriptorWriter::new(&compute_layout, &pool)
                    .write_buffer(PARAMS_BINDING, params.descriptor_info())
                    .write_image(STORAGE_BINDING, storage_image.descriptor_info()),
            )?;
            let render_set = build_set(
                DescriptorWriter::new(&render_layout, &pool).write_image(
                    SAMPLED_BINDING,
                    storage_image.sampled_descriptor_info(sampler.handle()),
                ),
            )?;

            debug!("Slot {} resources ready", index);
            Ok::<_, RhiError>(Slot {
                binding: ImageBinding::new(storage_image.generation()),
                storage_image,
                params,
                init_set,
                compute_set,
                render_set,
            })
        })?;

        info!(
            "Created {} frame slots ({}x{}, {:?})",
            frames_in_flight, extent.width, extent.height, storage_format
        );

        Ok(Self {
            slots,
            pool,
            compute_layout,
            render_layout,
            sampler,
        })
    }

    /// Resizes every slot's image, then points the slot's sets at the new
    /// view.
    ///
    /// The device must be idle.
    ///
    /// # Errors
    ///
    /// Returns an error if an image cannot be recreated or a write is
    /// rejected.
    pub fn resize(&mut self, extent: vk::Extent2D) -> RhiResult<()> {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            let mut rebind = SlotRebind {
                slot,
                pool: &self.pool,
                compute_layout: &self.compute_layout,
                render_layout: &self.render_layout,
                sampler: &self.sampler,
            };
            if resize_slot(&mut rebind, extent)? {
                debug!(
                    "Slot {} sets now reference the {}x{} image",
                    index, extent.width, extent.height
                );
            }
        }
        Ok(())
    }

    #[inline]
    pub fn slot(&self, frame_index: usize) -> &Slot {
        self.slots.get(frame_index)
    }

    /// Layout of the init and compute sets.
    pub fn compute_layout(&self) -> &DescriptorSetLayout {
        &self.compute_layout
    }

    pub fn render_layout(&self) -> &DescriptorSetLayout {
        &self.render_layout
    }
}

/// One slot plus what its sets are written against.
struct SlotRebind<'a> {
    slot: &'a mut Slot,
    pool: &'a DescriptorPool,
    compute_layout: &'a DescriptorSetLayout,
    render_layout: &'a DescriptorSetLayout,
    sampler: &'a Sampler,
}

impl SizedSlot for SlotRebind<'_> {
    fn resize_image(&mut self, extent: vk::Extent2D) -> RhiResult<u64> {
        self.slot.storage_image.resize(extent)?;
        Ok(self.slot.storage_image.generation())
    }

    // Only the image bindings change; the parameter buffer stays bound.
    fn overwrite_sets(&mut self) -> RhiResult<()> {
        let image = &self.slot.storage_image;
        DescriptorWriter::new(self.compute_layout, self.pool)
            .write_image(STORAGE_BINDING, image.descriptor_info())
            .overwrite(&mut self.slot.init_set)?;
        DescriptorWriter::new(self.compute_layout, self.pool)
            .write_image(STORAGE_BINDING, image.descriptor_info())
            .overwrite(&mut self.slot.compute_set)?;
        DescriptorWriter::new(self.render_layout, self.pool)
            .write_image(
                SAMPLED_BINDING,
                image.sampled_descriptor_info(self.sampler.handle()),
            )
            .overwrite(&mut self.slot.render_set)
    }

    fn binding_mut(&mut self) -> &mut ImageBinding {
        &mut self.slot.binding
    }
}

fn build_set(writer: DescriptorWriter<'_>) -> RhiResult<DescriptorSet> {
    writer.build()?.ok_or_else(|| {
        RhiError::DescriptorError("frame slot descriptor pool exhausted".to_string())
    })
}
