// Handle creation and release bookkeeping
//
// Every explicitly destroyed handle is reset to VK_NULL_HANDLE, so running a
// teardown path twice only destroys things once.

use ash::vk::{self, Handle};

use super::frames::DrawRecipe;
use super::pipeline::PipelineResources;
use super::shader::ShaderCode;
use super::swapchain::SwapchainConfig;
use crate::error::Result;

/// Destruction calls used by the teardown paths.
///
/// Implemented by the device context; tests substitute a fake.
pub trait Releaser {
    fn destroy_image_view(&self, view: vk::ImageView);
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn free_command_buffers(&self, pool: vk::CommandPool, buffers: &[vk::CommandBuffer]);
    fn destroy_command_pool(&self, pool: vk::CommandPool);
    fn destroy_buffer(&self, buffer: vk::Buffer);
    fn free_memory(&self, memory: vk::DeviceMemory);
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn destroy_fence(&self, fence: vk::Fence);
}

/// Creation calls used by the build paths; the counterpart of `Releaser`.
///
/// Partial failures are cleaned up by the caller through `Releaser`.
pub trait Factory: Releaser {
    /// `previous` (possibly null) is only a hint; the caller destroys it
    fn create_swapchain(
        &self,
        config: &SwapchainConfig,
        previous: vk::SwapchainKHR,
    ) -> Result<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    fn create_image_view(&self, image: vk::Image, format: vk::Format) -> Result<vk::ImageView>;
    fn create_render_pass(&self, format: vk::Format) -> Result<vk::RenderPass>;
    fn create_pipeline(
        &self,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        shaders: &ShaderCode,
    ) -> Result<PipelineResources>;
    fn create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<vk::Framebuffer>;
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn allocate_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>>;
    fn record_draw(
        &self,
        cmd: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
        recipe: &DrawRecipe,
    ) -> Result<()>;
}

/// Take a live handle out of its slot, leaving null behind.
pub fn take<H: Handle + Copy>(slot: &mut H) -> Option<H> {
    if slot.as_raw() == 0 {
        return None;
    }
    let handle = *slot;
    *slot = H::from_raw(0);
    Some(handle)
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use crate::error::RenderError;
    use std::cell::{Cell, RefCell};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Op {
        Create,
        Release,
    }

    /// Hands out fresh raw handles and journals every create/release call.
    pub struct FakeDevice {
        pub journal: RefCell<Vec<(Op, &'static str, u64)>>,
        /// `old_swapchain` hint of every swapchain creation
        pub old_swapchains: RefCell<Vec<u64>>,
        /// Creation of this kind fails with ERROR_OUT_OF_DEVICE_MEMORY
        pub fail_on: Cell<Option<&'static str>>,
        next: Cell<u64>,
        image_count: Cell<u32>,
    }

    impl Default for FakeDevice {
        fn default() -> Self {
            Self {
                journal: RefCell::default(),
                old_swapchains: RefCell::default(),
                fail_on: Cell::new(None),
                next: Cell::new(1000),
                image_count: Cell::new(0),
            }
        }
    }

    impl FakeDevice {
        fn push(&self, op: Op, kind: &'static str, raw: u64) {
            assert_ne!(raw, 0, "{kind}: {op:?} with a null handle");
            self.journal.borrow_mut().push((op, kind, raw));
        }

        fn create(&self, kind: &'static str) -> Result<u64> {
            if self.fail_on.get() == Some(kind) {
                return Err(RenderError::ResourceCreationFailure {
                    resource: kind,
                    result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                });
            }
            let raw = self.next.get();
            self.next.set(raw + 1);
            self.push(Op::Create, kind, raw);
            Ok(raw)
        }

        fn released(&self) -> Vec<(&'static str, u64)> {
            self.journal
                .borrow()
                .iter()
                .filter(|(op, _, _)| *op == Op::Release)
                .map(|&(_, kind, raw)| (kind, raw))
                .collect()
        }

        /// Kinds of released handles, in release order
        pub fn kinds(&self) -> Vec<&'static str> {
            self.released().into_iter().map(|(kind, _)| kind).collect()
        }

        /// Number of released handles
        pub fn count(&self) -> usize {
            self.released().len()
        }

        /// Number of handles of `kind` created so far
        pub fn created(&self, kind: &str) -> usize {
            self.journal
                .borrow()
                .iter()
                .filter(|(op, k, _)| *op == Op::Create && *k == kind)
                .count()
        }

        /// Journal position of an event
        pub fn position(&self, op: Op, kind: &str, raw: u64) -> Option<usize> {
            self.journal
                .borrow()
                .iter()
                .position(|&(o, k, r)| o == op && k == kind && r == raw)
        }

        /// Every created handle has been released exactly once
        pub fn assert_all_released(&self) {
            self.assert_no_duplicates();
            let journal = self.journal.borrow();
            for (op, kind, raw) in journal.iter() {
                if *op == Op::Create && *kind != "image" {
                    assert!(
                        journal.contains(&(Op::Release, *kind, *raw)),
                        "{kind} {raw} leaked"
                    );
                }
            }
        }

        pub fn assert_no_duplicates(&self) {
            let released = self.released();
            for (i, entry) in released.iter().enumerate() {
                assert!(
                    !released[i + 1..].contains(entry),
                    "{:?} released twice",
                    entry
                );
            }
        }
    }

    impl Releaser for FakeDevice {
        fn destroy_image_view(&self, view: vk::ImageView) {
            self.push(Op::Release, "image view", view.as_raw());
        }
        fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
            self.push(Op::Release, "swapchain", swapchain.as_raw());
        }
        fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
            self.push(Op::Release, "render pass", render_pass.as_raw());
        }
        fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
            self.push(Op::Release, "pipeline", pipeline.as_raw());
        }
        fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
            self.push(Op::Release, "pipeline layout", layout.as_raw());
        }
        fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
            self.push(Op::Release, "framebuffer", framebuffer.as_raw());
        }
        fn free_command_buffers(&self, _pool: vk::CommandPool, buffers: &[vk::CommandBuffer]) {
            for buffer in buffers {
                self.push(Op::Release, "command buffer", buffer.as_raw());
            }
        }
        fn destroy_command_pool(&self, pool: vk::CommandPool) {
            self.push(Op::Release, "command pool", pool.as_raw());
        }
        fn destroy_buffer(&self, buffer: vk::Buffer) {
            self.push(Op::Release, "buffer", buffer.as_raw());
        }
        fn free_memory(&self, memory: vk::DeviceMemory) {
            self.push(Op::Release, "memory", memory.as_raw());
        }
        fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
            self.push(Op::Release, "semaphore", semaphore.as_raw());
        }
        fn destroy_fence(&self, fence: vk::Fence) {
            self.push(Op::Release, "fence", fence.as_raw());
        }
    }

    impl Factory for FakeDevice {
        fn create_swapchain(
            &self,
            config: &SwapchainConfig,
            previous: vk::SwapchainKHR,
        ) -> Result<vk::SwapchainKHR> {
            self.old_swapchains.borrow_mut().push(previous.as_raw());
            let raw = self.create("swapchain")?;
            self.image_count.set(config.image_count);
            Ok(vk::SwapchainKHR::from_raw(raw))
        }

        fn swapchain_images(&self, _swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
            (0..self.image_count.get())
                .map(|_| self.create("image").map(vk::Image::from_raw))
                .collect()
        }

        fn create_image_view(&self, _image: vk::Image, _format: vk::Format) -> Result<vk::ImageView> {
            self.create("image view").map(vk::ImageView::from_raw)
        }

        fn create_render_pass(&self, _format: vk::Format) -> Result<vk::RenderPass> {
            self.create("render pass").map(vk::RenderPass::from_raw)
        }

        fn create_pipeline(
            &self,
            _render_pass: vk::RenderPass,
            _extent: vk::Extent2D,
            _shaders: &ShaderCode,
        ) -> Result<PipelineResources> {
            let layout = self.create("pipeline layout")?;
            let pipeline = match self.create("pipeline") {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    self.destroy_pipeline_layout(vk::PipelineLayout::from_raw(layout));
                    return Err(e);
                }
            };
            Ok(PipelineResources {
                layout: vk::PipelineLayout::from_raw(layout),
                pipeline: vk::Pipeline::from_raw(pipeline),
            })
        }

        fn create_framebuffer(
            &self,
            _render_pass: vk::RenderPass,
            _view: vk::ImageView,
            _extent: vk::Extent2D,
        ) -> Result<vk::Framebuffer> {
            self.create("framebuffer").map(vk::Framebuffer::from_raw)
        }

        fn create_semaphore(&self) -> Result<vk::Semaphore> {
            self.create("semaphore").map(vk::Semaphore::from_raw)
        }

        fn create_fence(&self, _signaled: bool) -> Result<vk::Fence> {
            self.create("fence").map(vk::Fence::from_raw)
        }

        fn allocate_command_buffers(
            &self,
            _pool: vk::CommandPool,
            count: u32,
        ) -> Result<Vec<vk::CommandBuffer>> {
            (0..count)
                .map(|_| self.create("command buffer").map(vk::CommandBuffer::from_raw))
                .collect()
        }

        fn record_draw(
            &self,
            cmd: vk::CommandBuffer,
            _framebuffer: vk::Framebuffer,
            _recipe: &DrawRecipe,
        ) -> Result<()> {
            if self.fail_on.get() == Some("recording") {
                return Err(RenderError::RecordingFailure {
                    operation: "record draw",
                    result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
                });
            }
            assert_ne!(cmd.as_raw(), 0);
            Ok(())
        }
    }
}
