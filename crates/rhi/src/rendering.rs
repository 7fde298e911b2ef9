//! Dynamic rendering into a single color target (Vulkan 1.3).
//!
//! Frames render straight into swapchain images without VkRenderPass
//! objects. A [`ColorTarget`] clears the whole image on begin, keeps the
//! result for presentation and covers it with the dynamic viewport and
//! scissor.
//!
//! # Example
//!
//! ```no_run
//! use ash::vk;
//! use horizon_rhi::command::CommandBuffer;
//! use horizon_rhi::rendering::ColorTarget;
//!
//! # fn example(view: vk::ImageView, extent: vk::Extent2D, cmd: &CommandBuffer) {
//! let target = ColorTarget::new(view, extent, [0.01, 0.01, 0.01, 1.0]);
//! target.begin(cmd);
//! // ... draw commands ...
//! cmd.end_rendering();
//! # }
//! ```

use ash::vk;

use crate::command::CommandBuffer;

/// Color image rendered into by one pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ColorTarget {
    view: vk::ImageView,
    extent: vk::Extent2D,
    clear: [f32; 4],
}

impl ColorTarget {
    /// `view` must be in `COLOR_ATTACHMENT_OPTIMAL` when the pass begins.
    pub fn new(view: vk::ImageView, extent: vk::Extent2D, clear: [f32; 4]) -> Self {
        Self {
            view,
            extent,
            clear,
        }
    }

    /// The whole image.
    pub fn render_area(&self) -> vk::Rect2D {
        vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        }
    }

    /// Viewport covering the whole image, depth range 0..1.
    pub fn viewport(&self) -> vk::Viewport {
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }

    fn attachment(&self) -> vk::RenderingAttachmentInfo<'static> {
        vk::RenderingAttachmentInfo::default()
            .image_view(self.view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear,
                },
            })
    }

    /// Begins rendering and sets the dynamic viewport and scissor.
    pub fn begin(&self, cmd: &CommandBuffer) {
        let attachments = [self.attachment()];
        let info = vk::RenderingInfo::default()
            .render_area(self.render_area())
            .layer_count(1)
            .color_attachments(&attachments);

        cmd.begin_rendering(&info);
        cmd.set_viewport(&self.viewport());
        cmd.set_scissor(&self.render_area());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ColorTarget {
        ColorTarget::new(
            vk::ImageView::null(),
            vk::Extent2D {
                width: 1920,
                height: 1080,
            },
            [0.01, 0.01, 0.01, 1.0],
        )
    }

    #[test]
    fn test_attachment_clears_and_stores() {
        let info = target().attachment();
        assert_eq!(info.image_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(info.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(info.store_op, vk::AttachmentStoreOp::STORE);
        let color = unsafe { info.clear_value.color.float32 };
        assert_eq!(color, [0.01, 0.01, 0.01, 1.0]);
    }

    #[test]
    fn test_covers_whole_image() {
        let target = target();
        let area = target.render_area();
        assert_eq!((area.offset.x, area.offset.y), (0, 0));
        assert_eq!(area.extent.width, 1920);
        assert_eq!(area.extent.height, 1080);

        let viewport = target.viewport();
        assert_eq!(viewport.width, 1920.0);
        assert_eq!(viewport.height, 1080.0);
        assert_eq!((viewport.min_depth, viewport.max_depth), (0.0, 1.0));
    }
}
