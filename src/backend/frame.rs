// Frame driver - per-frame sequence for the point renderer
//
// Wait -> Acquire -> Reset -> Record -> Submit -> Present -> Advance.
// Two frames in flight, each with its own command buffer, acquire semaphore
// and fence; render-finished semaphores belong to the swapchain images.
// The swapchain image is moved into COLOR_ATTACHMENT_OPTIMAL for
// dynamic rendering and back to PRESENT_SRC_KHR before submit.

use anyhow::{Context, Result};
use ash::vk;

use super::context::RenderContext;
use super::{swapchain, RendererError, MAX_FRAMES_IN_FLIGHT};
use crate::point::PointRenderData;

const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Which frame-in-flight slot is being recorded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameIndex(usize);

impl FrameIndex {
    pub fn current(self) -> usize {
        self.0
    }

    pub fn advance(&mut self) {
        self.0 = (self.0 + 1) % MAX_FRAMES_IN_FLIGHT;
    }
}

/// Access masks and stages for one layout barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutTransition {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// The two transitions a frame needs; anything else is an error
pub fn layout_transition(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<LayoutTransition, RendererError> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) => Ok(LayoutTransition {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        }),
        (vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR) => Ok(LayoutTransition {
            src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags::empty(),
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        }),
        _ => Err(RendererError::UnsupportedLayoutTransition { old, new }),
    }
}

fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> Result<()> {
    let transition = layout_transition(old, new)?;

    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(swapchain::color_subresource_range())
        .src_access_mask(transition.src_access)
        .dst_access_mask(transition.dst_access)
        .build();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            transition.src_stage,
            transition.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier],
        );
    }
    Ok(())
}

/// Everything the recorder needs to draw into one swapchain image
#[derive(Debug, Clone, Copy)]
pub struct RenderTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
}

pub fn clear_color_attachment(view: vk::ImageView) -> vk::RenderingAttachmentInfo {
    vk::RenderingAttachmentInfo::builder()
        .image_view(view)
        .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .clear_value(vk::ClearValue {
            color: vk::ClearColorValue { float32: CLEAR_COLOR },
        })
        .build()
}

/// Record one point draw into `cmd`, which must be in the initial state
pub fn record_point_commands(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target: RenderTarget,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    point: &PointRenderData,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default();
    unsafe { device.begin_command_buffer(cmd, &begin_info) }
        .map_err(RendererError::vulkan("vkBeginCommandBuffer"))?;

    transition_image_layout(
        device,
        cmd,
        target.image,
        vk::ImageLayout::UNDEFINED,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    )?;

    let color_attachments = [clear_color_attachment(target.view)];
    let rendering_info = vk::RenderingInfo::builder()
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: target.extent,
        })
        .layer_count(1)
        .color_attachments(&color_attachments);

    unsafe {
        device.cmd_begin_rendering(cmd, &rendering_info);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);

        device.cmd_push_constants(cmd, layout, vk::ShaderStageFlags::VERTEX, 0, point.vertex_bytes());
        device.cmd_push_constants(
            cmd,
            layout,
            vk::ShaderStageFlags::FRAGMENT,
            PointRenderData::FRAGMENT_OFFSET,
            point.fragment_bytes(),
        );

        device.cmd_draw(cmd, 1, 1, 0, 0);
        device.cmd_end_rendering(cmd);
    }

    transition_image_layout(
        device,
        cmd,
        target.image,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        vk::ImageLayout::PRESENT_SRC_KHR,
    )?;

    unsafe { device.end_command_buffer(cmd) }.map_err(RendererError::vulkan("vkEndCommandBuffer"))?;
    Ok(())
}

/// Image, view and render-finished semaphore belonging to an acquired index.
/// The semaphore follows the image, not the frame slot, so present never
/// waits on a semaphore another frame is about to signal again.
pub fn acquired_image(
    images: &[vk::Image],
    views: &[vk::ImageView],
    render_finished: &[vk::Semaphore],
    image_index: u32,
) -> Option<(vk::Image, vk::ImageView, vk::Semaphore)> {
    let i = image_index as usize;
    Some((*images.get(i)?, *views.get(i)?, *render_finished.get(i)?))
}

/// Owns the render context and drives it one frame at a time
pub struct FrameDriver {
    context: RenderContext,
    frame: FrameIndex,
}

impl FrameDriver {
    pub fn new(context: RenderContext) -> Self {
        Self {
            context,
            frame: FrameIndex::default(),
        }
    }

    /// Render and present one frame. Any error is fatal to the loop.
    pub fn draw_frame(&mut self, point: &PointRenderData) -> Result<()> {
        let ctx = &self.context;
        let device = ctx.device()?;
        let swapchain_loader = ctx.swapchain_loader()?;

        let slot = self.frame.current();
        let sync = *ctx.frames.get(slot).ok_or(RendererError::NotInitialized)?;
        let cmd = *ctx.command_buffers.get(slot).ok_or(RendererError::NotInitialized)?;

        // Wait until the GPU has finished with this slot
        unsafe { device.wait_for_fences(&[sync.in_flight_fence], true, u64::MAX) }
            .map_err(RendererError::vulkan("vkWaitForFences"))?;

        let image_index = swapchain::acquire_next_image(swapchain_loader, ctx.swapchain, sync.image_available)
            .context("Failed to acquire swapchain image")?;

        // Only reset once we know work will be submitted against the fence
        unsafe {
            device
                .reset_fences(&[sync.in_flight_fence])
                .map_err(RendererError::vulkan("vkResetFences"))?;
            device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .map_err(RendererError::vulkan("vkResetCommandBuffer"))?;
        }

        let (image, view, render_finished) = acquired_image(
            &ctx.swapchain_images,
            &ctx.swapchain_image_views,
            &ctx.render_finished,
            image_index,
        )
        .with_context(|| format!("Acquired image index {} out of range", image_index))?;
        let target = RenderTarget {
            image,
            view,
            extent: ctx.swapchain_extent,
        };
        record_point_commands(device, cmd, target, ctx.pipeline, ctx.pipeline_layout, point)
            .context("Failed to record command buffer")?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [render_finished];
        let command_buffers = [cmd];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .build();

        unsafe { device.queue_submit(ctx.graphics_queue, &[submit_info], sync.in_flight_fence) }
            .map_err(RendererError::vulkan("vkQueueSubmit"))
            .context("Failed to submit draw command buffer")?;

        swapchain::present(
            swapchain_loader,
            ctx.swapchain,
            ctx.present_queue,
            image_index,
            render_finished,
        )
        .context("Failed to present swapchain image")?;

        self.frame.advance();
        Ok(())
    }

    /// Release every GPU resource; later calls do nothing
    pub fn dispose(&mut self) {
        self.context.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_index_wraps_after_two_frames() {
        let mut frame = FrameIndex::default();
        assert_eq!(frame.current(), 0);
        frame.advance();
        assert_eq!(frame.current(), 1);
        frame.advance();
        assert_eq!(frame.current(), 0);
    }

    #[test]
    fn frame_index_stays_in_range() {
        let mut frame = FrameIndex::default();
        for _ in 0..17 {
            frame.advance();
            assert!(frame.current() < MAX_FRAMES_IN_FLIGHT);
        }
    }

    #[test]
    fn render_finished_semaphore_follows_the_image() {
        use ash::vk::Handle;

        let images: Vec<_> = (1..=3).map(vk::Image::from_raw).collect();
        let views: Vec<_> = (11..=13).map(vk::ImageView::from_raw).collect();
        let semaphores: Vec<_> = (21..=23).map(vk::Semaphore::from_raw).collect();

        let (image, view, semaphore) = acquired_image(&images, &views, &semaphores, 2).unwrap();
        assert_eq!(image.as_raw(), 3);
        assert_eq!(view.as_raw(), 13);
        assert_eq!(semaphore.as_raw(), 23);

        // Three images, two frame slots: slot 0 twice in a row still gets distinct semaphores
        let first = acquired_image(&images, &views, &semaphores, 0).unwrap().2;
        let third = acquired_image(&images, &views, &semaphores, 2).unwrap().2;
        assert_ne!(first, third);
    }

    #[test]
    fn out_of_range_image_index_is_none() {
        let images = [vk::Image::null(); 2];
        let views = [vk::ImageView::null(); 2];
        let semaphores = [vk::Semaphore::null(); 1];
        assert!(acquired_image(&images, &views, &semaphores, 1).is_none());
        assert!(acquired_image(&images, &views, &semaphores, 5).is_none());
    }

    #[test]
    fn undefined_to_color_attachment() {
        let t = layout_transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::empty());
        assert_eq!(t.dst_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(t.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
    }

    #[test]
    fn color_attachment_to_present() {
        let t = layout_transition(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL, vk::ImageLayout::PRESENT_SRC_KHR).unwrap();
        assert_eq!(t.src_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
        assert_eq!(t.dst_access, vk::AccessFlags::empty());
        assert_eq!(t.src_stage, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(t.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn other_transitions_are_rejected() {
        let err = layout_transition(vk::ImageLayout::UNDEFINED, vk::ImageLayout::PRESENT_SRC_KHR).unwrap_err();
        assert!(matches!(
            err,
            RendererError::UnsupportedLayoutTransition {
                old: vk::ImageLayout::UNDEFINED,
                new: vk::ImageLayout::PRESENT_SRC_KHR,
            }
        ));

        assert!(layout_transition(vk::ImageLayout::PRESENT_SRC_KHR, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL).is_err());
    }

    #[test]
    fn attachment_clears_to_opaque_black_and_stores() {
        let attachment = clear_color_attachment(vk::ImageView::null());
        assert_eq!(attachment.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(attachment.store_op, vk::AttachmentStoreOp::STORE);
        assert_eq!(attachment.image_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(unsafe { attachment.clear_value.color.float32 }, CLEAR_COLOR);
    }
}
