//! Graphics and compute pipeline management.
//!
//! - [`PipelineLayout`] wraps VkPipelineLayout (descriptor set layouts and
//!   push constant ranges)
//! - [`Pipeline`] wraps a graphics or compute VkPipeline
//! - [`GraphicsPipelineBuilder`] configures graphics pipelines for dynamic
//!   rendering
//!
//! Graphics pipelines here draw procedurally generated geometry (a
//! fullscreen triangle, overlay rectangles) into a single color
//! attachment. The builder therefore has no vertex input, culling or depth
//! state to configure.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::path::Path;
//! use horizon_rhi::device::Device;
//! use horizon_rhi::shader::Shader;
//! use horizon_rhi::pipeline::{GraphicsPipelineBuilder, Pipeline, PipelineLayout};
//! use ash::vk;
//!
//! # fn example(device: Arc<Device>, set_layout: vk::DescriptorSetLayout) -> Result<(), horizon_rhi::RhiError> {
//! let dir = Path::new("shaders");
//! let layout = PipelineLayout::new(device.clone(), &[set_layout], &[])?;
//!
//! let compute = Shader::load(device.clone(), dir, "schwarzschild.comp.spv")?;
//! let _compute_pipeline = Pipeline::create_compute(device.clone(), &compute, &layout)?;
//!
//! let vert = Shader::load(device.clone(), dir, "quad.vert.spv")?;
//! let frag = Shader::load(device.clone(), dir, "quad.frag.spv")?;
//! let _quad = GraphicsPipelineBuilder::new()
//!     .vertex_shader(&vert)
//!     .fragment_shader(&frag)
//!     .color_attachment_format(vk::Format::B8G8R8A8_SRGB)
//!     .build(device, &layout)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::shader::Shader;

/// Vulkan pipeline layout wrapper.
///
/// Immutable after creation.
pub struct PipelineLayout {
    device: Arc<Device>,
    layout: vk::PipelineLayout,
}

impl PipelineLayout {
    /// Creates a layout from set layouts, in set-index order, and push
    /// constant ranges.
    ///
    /// # Errors
    ///
    /// Returns the Vulkan error if creation fails.
    pub fn new(
        device: Arc<Device>,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> RhiResult<Self> {
        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.handle().create_pipeline_layout(&create_info, None)? };

        debug!(
            "Created pipeline layout with {} descriptor set layout(s) and {} push constant range(s)",
            descriptor_set_layouts.len(),
            push_constant_ranges.len()
        );

        Ok(Self { device, layout })
    }

    /// Returns the Vulkan pipeline layout handle.
    #[inline]
    pub fn handle(&self) -> vk::PipelineLayout {
        self.layout
    }
}

impl Drop for PipelineLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_pipeline_layout(self.layout, None);
        }
        debug!("Pipeline layout destroyed");
    }
}

/// Vulkan pipeline wrapper, graphics or compute.
pub struct Pipeline {
    device: Arc<Device>,
    pipeline: vk::Pipeline,
    bind_point: vk::PipelineBindPoint,
}

impl Pipeline {
    fn create_graphics_internal(
        device: Arc<Device>,
        create_info: &vk::GraphicsPipelineCreateInfo,
    ) -> RhiResult<Self> {
        let pipelines = unsafe {
            device
                .handle()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[*create_info], None)
                .map_err(|(_, result)| result)?
        };
        let pipeline = first_pipeline(pipelines)?;

        info!("Graphics pipeline created");

        Ok(Self {
            device,
            pipeline,
            bind_point: vk::PipelineBindPoint::GRAPHICS,
        })
    }

    /// Creates a compute pipeline from a single compute shader.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if `shader` is not a compute
    /// shader, or the Vulkan error if creation fails.
    pub fn create_compute(
        device: Arc<Device>,
        shader: &Shader,
        layout: &PipelineLayout,
    ) -> RhiResult<Self> {
        if !shader.stage().is_compute() {
            return Err(RhiError::PipelineError(format!(
                "compute pipeline needs a compute shader, got {:?}",
                shader.stage()
            )));
        }

        let create_info = vk::ComputePipelineCreateInfo::default()
            .stage(shader.stage_create_info())
            .layout(layout.handle());

        let pipelines = unsafe {
            device
                .handle()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, result)| result)?
        };
        let pipeline = first_pipeline(pipelines)?;

        info!("Compute pipeline created");

        Ok(Self {
            device,
            pipeline,
            bind_point: vk::PipelineBindPoint::COMPUTE,
        })
    }

    /// Returns the Vulkan pipeline handle.
    #[inline]
    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub(crate) fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_pipeline(self.pipeline, None);
        }
        debug!("{:?} pipeline destroyed", self.bind_point);
    }
}

fn first_pipeline(pipelines: Vec<vk::Pipeline>) -> RhiResult<vk::Pipeline> {
    pipelines
        .into_iter()
        .next()
        .ok_or_else(|| RhiError::PipelineError("driver returned no pipeline".to_string()))
}

/// Color blend state of the single color attachment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorBlendAttachment {
    pub blend_enable: bool,
    pub src_color_blend_factor: vk::BlendFactor,
    pub dst_color_blend_factor: vk::BlendFactor,
    pub src_alpha_blend_factor: vk::BlendFactor,
    pub dst_alpha_blend_factor: vk::BlendFactor,
}

impl Default for ColorBlendAttachment {
    /// Opaque: the fragment replaces the attachment.
    fn default() -> Self {
        Self {
            blend_enable: false,
            src_color_blend_factor: vk::BlendFactor::ONE,
            dst_color_blend_factor: vk::BlendFactor::ZERO,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        }
    }
}

impl ColorBlendAttachment {
    /// `src * src_alpha + dst * (1 - src_alpha)`, used by overlay panels.
    pub fn alpha_blend() -> Self {
        Self {
            blend_enable: true,
            src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
            dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
            src_alpha_blend_factor: vk::BlendFactor::ONE,
            dst_alpha_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        }
    }

    pub fn to_vk(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(self.blend_enable)
            .src_color_blend_factor(self.src_color_blend_factor)
            .dst_color_blend_factor(self.dst_color_blend_factor)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(self.src_alpha_blend_factor)
            .dst_alpha_blend_factor(self.dst_alpha_blend_factor)
            .alpha_blend_op(vk::BlendOp::ADD)
            .color_write_mask(vk::ColorComponentFlags::RGBA)
    }
}

/// Builder for vertex-input-free graphics pipelines rendering into one
/// color attachment with dynamic rendering.
///
/// Viewport and scissor are always dynamic; the orchestrator sets them at
/// the start of each render pass. Triangles are never culled and there is
/// no depth attachment.
pub struct GraphicsPipelineBuilder<'a> {
    vertex_shader: Option<&'a Shader>,
    fragment_shader: Option<&'a Shader>,
    topology: vk::PrimitiveTopology,
    color_blend: ColorBlendAttachment,
    color_format: Option<vk::Format>,
}

impl Default for GraphicsPipelineBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> GraphicsPipelineBuilder<'a> {
    /// Triangle list, opaque, no shaders or format yet.
    pub fn new() -> Self {
        Self {
            vertex_shader: None,
            fragment_shader: None,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            color_blend: ColorBlendAttachment::default(),
            color_format: None,
        }
    }

    /// Required.
    pub fn vertex_shader(mut self, shader: &'a Shader) -> Self {
        self.vertex_shader = Some(shader);
        self
    }

    /// Required.
    pub fn fragment_shader(mut self, shader: &'a Shader) -> Self {
        self.fragment_shader = Some(shader);
        self
    }

    pub fn topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    pub fn color_blend(mut self, attachment: ColorBlendAttachment) -> Self {
        self.color_blend = attachment;
        self
    }

    /// Format of the color attachment rendered into. Required.
    pub fn color_attachment_format(mut self, format: vk::Format) -> Self {
        self.color_format = Some(format);
        self
    }

    /// Shaders and attachment format, or the first missing one.
    fn required(&self) -> RhiResult<(&'a Shader, &'a Shader, vk::Format)> {
        let vertex = self
            .vertex_shader
            .ok_or_else(|| RhiError::PipelineError("vertex shader is required".to_string()))?;
        let fragment = self
            .fragment_shader
            .ok_or_else(|| RhiError::PipelineError("fragment shader is required".to_string()))?;
        let format = self.color_format.ok_or_else(|| {
            RhiError::PipelineError("color attachment format is required".to_string())
        })?;
        Ok((vertex, fragment, format))
    }

    /// Builds the pipeline against `layout`.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::PipelineError`] if a shader or the attachment
    /// format is missing, or the Vulkan error if creation fails.
    pub fn build(self, device: Arc<Device>, layout: &PipelineLayout) -> RhiResult<Pipeline> {
        let (vertex_shader, fragment_shader, color_format) = self.required()?;

        let shader_stages = [
            vertex_shader.stage_create_info(),
            fragment_shader.stage_create_info(),
        ];

        let vertex_input_state = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly_state =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(self.topology);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);
        let rasterization_state = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::NONE);
        let multisample_state = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let color_blend_attachments = [self.color_blend.to_vk()];
        let color_blend_state =
            vk::PipelineColorBlendStateCreateInfo::default().attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let color_formats = [color_format];
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(&color_formats);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_state)
            .input_assembly_state(&input_assembly_state)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization_state)
            .multisample_state(&multisample_state)
            .color_blend_state(&color_blend_state)
            .dynamic_state(&dynamic_state)
            .layout(layout.handle())
            .push_next(&mut rendering_info);

        Pipeline::create_graphics_internal(device, &pipeline_info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opaque_blend_by_default() {
        let state = ColorBlendAttachment::default().to_vk();
        assert_eq!(state.blend_enable, vk::FALSE);
        assert_eq!(state.color_write_mask, vk::ColorComponentFlags::RGBA);
    }

    #[test]
    fn test_alpha_blend() {
        let state = ColorBlendAttachment::alpha_blend().to_vk();
        assert_eq!(state.blend_enable, vk::TRUE);
        assert_eq!(state.src_color_blend_factor, vk::BlendFactor::SRC_ALPHA);
        assert_eq!(
            state.dst_color_blend_factor,
            vk::BlendFactor::ONE_MINUS_SRC_ALPHA
        );
        assert_eq!(state.color_blend_op, vk::BlendOp::ADD);
    }

    #[test]
    fn test_builder_requires_shaders_and_format() {
        let builder = GraphicsPipelineBuilder::new()
            .topology(vk::PrimitiveTopology::TRIANGLE_STRIP)
            .color_attachment_format(vk::Format::B8G8R8A8_SRGB);
        assert_eq!(builder.topology, vk::PrimitiveTopology::TRIANGLE_STRIP);

        let err = builder.required().err().expect("shaders are missing");
        assert!(err.to_string().contains("vertex shader"));

        let err = GraphicsPipelineBuilder::new().required().err();
        assert!(matches!(err, Some(RhiError::PipelineError(_))));
    }
}
