// Per-image frame resources
//
// One framebuffer, one render-finished semaphore and one pre-recorded
// command buffer per swapchain image, index-aligned with the image array.
// The scene never changes, so recording happens once per swapchain
// generation and the buffers are resubmitted every frame (SIMULTANEOUS_USE).
//
// The render-finished semaphore is keyed by image rather than by frame slot:
// present waits on it, and an image is only handed out again once the
// presentation engine is done with its previous present.

use ash::vk;

use super::handles::{Factory, Releaser};
use crate::error::{Result, VkResultExt};

#[derive(Default)]
pub struct FrameResources {
    pub framebuffers: Vec<vk::Framebuffer>,
    pub render_finished: Vec<vk::Semaphore>,
    pub command_buffers: Vec<vk::CommandBuffer>,
}

/// What gets baked into every command buffer
pub struct DrawRecipe {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub vertex_buffer: vk::Buffer,
    pub vertex_count: u32,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

impl FrameResources {
    /// One framebuffer and one present semaphore per image view
    pub fn create_framebuffers(
        &mut self,
        device: &impl Factory,
        render_pass: vk::RenderPass,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<()> {
        for &image_view in image_views {
            let framebuffer = device.create_framebuffer(render_pass, image_view, extent)?;
            self.framebuffers.push(framebuffer);

            let semaphore = device.create_semaphore()?;
            self.render_finished.push(semaphore);
        }
        Ok(())
    }

    /// Allocate one primary buffer per framebuffer and record the draw into each
    pub fn record_command_buffers(
        &mut self,
        device: &impl Factory,
        command_pool: vk::CommandPool,
        recipe: &DrawRecipe,
    ) -> Result<()> {
        self.command_buffers =
            device.allocate_command_buffers(command_pool, self.framebuffers.len() as u32)?;

        for (&cmd, &framebuffer) in self.command_buffers.iter().zip(&self.framebuffers) {
            device.record_draw(cmd, framebuffer, recipe)?;
        }

        log::info!("Recorded {} command buffers", self.command_buffers.len());
        Ok(())
    }

    pub fn release_command_buffers(&mut self, releaser: &impl Releaser, pool: vk::CommandPool) {
        if !self.command_buffers.is_empty() {
            releaser.free_command_buffers(pool, &self.command_buffers);
            self.command_buffers.clear();
        }
    }

    pub fn release_framebuffers(&mut self, releaser: &impl Releaser) {
        for framebuffer in self.framebuffers.drain(..) {
            releaser.destroy_framebuffer(framebuffer);
        }
        for semaphore in self.render_finished.drain(..) {
            releaser.destroy_semaphore(semaphore);
        }
    }
}

pub(crate) fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    image_view: vk::ImageView,
    extent: vk::Extent2D,
) -> Result<vk::Framebuffer> {
    let attachments = &[image_view];
    let framebuffer_info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    unsafe { device.create_framebuffer(&framebuffer_info, None) }.creating("framebuffer")
}

pub(crate) fn allocate_command_buffers(
    device: &ash::Device,
    command_pool: vk::CommandPool,
    count: u32,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe { device.allocate_command_buffers(&alloc_info) }.creating("command buffers")
}

pub(crate) fn record_draw(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    framebuffer: vk::Framebuffer,
    recipe: &DrawRecipe,
) -> Result<()> {
    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: recipe.clear_color,
        },
    }];

    let begin_info = vk::CommandBufferBeginInfo::builder()
        .flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);

    let render_pass_begin = vk::RenderPassBeginInfo::builder()
        .render_pass(recipe.render_pass)
        .framebuffer(framebuffer)
        .render_area(vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: recipe.extent,
        })
        .clear_values(&clear_values);

    unsafe {
        device
            .begin_command_buffer(cmd, &begin_info)
            .recording("begin command buffer")?;

        device.cmd_begin_render_pass(cmd, &render_pass_begin, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, recipe.pipeline);
        device.cmd_bind_vertex_buffers(cmd, 0, &[recipe.vertex_buffer], &[0]);
        device.cmd_draw(cmd, recipe.vertex_count, 1, 0, 0);
        device.cmd_end_render_pass(cmd);

        device
            .end_command_buffer(cmd)
            .recording("end command buffer")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::handles::fake::FakeDevice;
    use ash::vk::Handle;

    fn recipe() -> DrawRecipe {
        DrawRecipe {
            render_pass: vk::RenderPass::from_raw(1),
            pipeline: vk::Pipeline::from_raw(2),
            vertex_buffer: vk::Buffer::from_raw(3),
            vertex_count: 3,
            extent: vk::Extent2D { width: 800, height: 600 },
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }

    #[test]
    fn one_of_each_per_image_view() {
        let device = FakeDevice::default();
        let views: Vec<_> = (21..=23).map(vk::ImageView::from_raw).collect();
        let mut frames = FrameResources::default();

        frames
            .create_framebuffers(&device, vk::RenderPass::from_raw(1), &views, recipe().extent)
            .unwrap();
        frames
            .record_command_buffers(&device, vk::CommandPool::from_raw(100), &recipe())
            .unwrap();

        assert_eq!(frames.framebuffers.len(), 3);
        assert_eq!(frames.render_finished.len(), 3);
        assert_eq!(frames.command_buffers.len(), 3);
    }

    #[test]
    fn failed_recording_leaves_buffers_for_release() {
        let device = FakeDevice::default();
        let pool = vk::CommandPool::from_raw(100);
        let views = [vk::ImageView::from_raw(21), vk::ImageView::from_raw(22)];
        let mut frames = FrameResources::default();
        frames
            .create_framebuffers(&device, vk::RenderPass::from_raw(1), &views, recipe().extent)
            .unwrap();

        device.fail_on.set(Some("recording"));
        assert!(frames.record_command_buffers(&device, pool, &recipe()).is_err());

        frames.release_command_buffers(&device, pool);
        frames.release_framebuffers(&device);
        device.assert_all_released();
    }

    #[test]
    fn release_empties_every_array_once() {
        let releaser = FakeDevice::default();
        let pool = vk::CommandPool::from_raw(100);
        let mut frames = FrameResources {
            framebuffers: (1..=3).map(vk::Framebuffer::from_raw).collect(),
            render_finished: (31..=33).map(vk::Semaphore::from_raw).collect(),
            command_buffers: (11..=13).map(vk::CommandBuffer::from_raw).collect(),
        };

        for _ in 0..2 {
            frames.release_command_buffers(&releaser, pool);
            frames.release_framebuffers(&releaser);
        }

        assert!(frames.framebuffers.is_empty());
        assert!(frames.render_finished.is_empty());
        assert!(frames.command_buffers.is_empty());
        assert_eq!(releaser.count(), 9);
        assert_eq!(&releaser.kinds()[..3], ["command buffer"; 3]);
    }
}
