// =============================================================================
// FRAME RENDERER - session ownership + acquire/submit/present
// =============================================================================
//
// Ownership chain (destroyed bottom-up, device last):
//
//   DeviceContext             instance, surface, device, queues
//     └── SessionResources    vertex buffer, command pool, frame sync slots
//           └── RenderGeneration   swapchain → render pass → pipeline →
//                                  framebuffers (+ present semaphores) →
//                                  command buffers
//
// FRAME FLOW (one iteration):
// 1. Idle:       wait for this sync slot's fence
// 2. Acquiring:  acquire next image, signals image_available
// 3. Submitted:  submit the image's pre-recorded commands, waits on
//                image_available at COLOR_ATTACHMENT_OUTPUT, signals the
//                image's render_finished + the slot fence
// 4. Presenting: present on the present queue, waits on render_finished
//
// Any error mid-flow drops the state back to Idle.
//
// =============================================================================

use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use crate::backend::buffer::VertexBuffer;
use crate::backend::device::DeviceContext;
use crate::backend::generation::{GenerationInputs, RenderGeneration, Teardown};
use crate::backend::handles::{take, Releaser};
use crate::backend::shader::ShaderCode;
use crate::backend::swapchain::{SurfaceSupport, SwapchainConfig};
use crate::backend::sync::{FramePacer, FrameSync};
use crate::config::Config;
use crate::error::{RenderError, Result, VkResultExt};
use crate::resize::Rebuild;
use crate::scene::TRIANGLE;

/// Where the present loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Submitted,
    Presenting,
}

impl FrameState {
    pub fn next(self) -> Self {
        match self {
            FrameState::Idle => FrameState::Acquiring,
            FrameState::Acquiring => FrameState::Submitted,
            FrameState::Submitted => FrameState::Presenting,
            FrameState::Presenting => FrameState::Idle,
        }
    }
}

/// Tracks one pass through the present loop. Every pass starts from `Idle`
/// and ends there again, whether it presents or bails out with an error.
#[derive(Debug)]
struct FrameCycle {
    state: FrameState,
}

impl FrameCycle {
    fn new() -> Self {
        Self {
            state: FrameState::Idle,
        }
    }

    /// A new pass may only start once the previous one wound down
    fn begin(&self) {
        debug_assert_eq!(self.state, FrameState::Idle, "previous frame did not finish");
    }

    fn advance(&mut self) {
        self.state = self.state.next();
    }

    /// Pass `result` through, abandoning the pass on error
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.abandon();
        }
        result
    }

    fn abandon(&mut self) {
        self.state = FrameState::Idle;
    }

    /// Leave `Presenting` for `Idle`
    fn finish(&mut self) {
        debug_assert_eq!(self.state, FrameState::Presenting);
        self.advance();
    }
}

/// Result of one loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Nothing to draw into (minimized or no swapchain yet)
    Skipped,
    /// The swapchain no longer matches the surface and must be rebuilt
    SwapchainStale,
}

/// Objects created once per session, after the device
#[derive(Default)]
struct SessionResources {
    vertex_buffer: VertexBuffer,
    command_pool: vk::CommandPool,
    frame_sync: Vec<FrameSync>,
}

impl SessionResources {
    fn release(&mut self, releaser: &impl Releaser) {
        for sync in &mut self.frame_sync {
            sync.release(releaser);
        }
        self.frame_sync.clear();
        if let Some(pool) = take(&mut self.command_pool) {
            releaser.destroy_command_pool(pool);
        }
        self.vertex_buffer.release(releaser);
    }
}

/// Release everything above the device, in reverse creation order
fn teardown(generation: &mut RenderGeneration, session: &mut SessionResources, releaser: &impl Releaser) {
    generation.release(releaser, session.command_pool, Teardown::Full);
    session.release(releaser);
}

pub struct Renderer {
    generation: RenderGeneration,
    session: SessionResources,
    pacer: FramePacer,
    cycle: FrameCycle,
    shaders: ShaderCode,
    clear_color: [f32; 4],
    ctx: DeviceContext,
}

impl Renderer {
    /// Bring up the whole session for `window`.
    ///
    /// `window_size` is only consulted when the surface leaves the extent
    /// to the application.
    pub fn new<W>(window: &W, window_size: vk::Extent2D, config: &Config) -> Result<Self>
    where
        W: HasRawDisplayHandle + HasRawWindowHandle,
    {
        let ctx = DeviceContext::new(window, &config.window.title, config.validation_enabled())?;
        let shaders = ShaderCode::load(&config.shaders.vertex, &config.shaders.fragment)?;

        // From here on a failure drops `renderer`, which releases whatever
        // was already created.
        let mut renderer = Self {
            generation: RenderGeneration::default(),
            session: SessionResources::default(),
            pacer: FramePacer::new(config.frames_in_flight()),
            cycle: FrameCycle::new(),
            shaders,
            clear_color: config.graphics.clear_color,
            ctx,
        };

        renderer.session.vertex_buffer = VertexBuffer::new(&renderer.ctx, &TRIANGLE)?;
        renderer.session.command_pool = create_command_pool(&renderer.ctx)?;
        for _ in 0..config.frames_in_flight() {
            let sync = FrameSync::new(&renderer.ctx)?;
            renderer.session.frame_sync.push(sync);
        }

        renderer.build_generation(window_size)?;

        log::info!("Vulkan initialized successfully!");
        Ok(renderer)
    }

    fn build_generation(&mut self, window_size: vk::Extent2D) -> Result<()> {
        let support = SurfaceSupport::query(&self.ctx)?;
        let config = SwapchainConfig::negotiate(&support, self.ctx.queue_families, window_size)?;

        if config.is_degenerate() {
            log::info!("Surface has no area, deferring swapchain creation");
            return Ok(());
        }

        let inputs = GenerationInputs {
            device: &self.ctx,
            config,
            command_pool: self.session.command_pool,
            vertex_buffer: &self.session.vertex_buffer,
            shaders: &self.shaders,
            clear_color: self.clear_color,
        };
        self.generation.build(&inputs)?;
        self.pacer.reset_images(self.generation.image_count());
        Ok(())
    }

    /// Run one acquire → submit → present cycle.
    pub fn render_frame(&mut self) -> Result<FrameOutcome> {
        self.cycle.begin();

        if self.generation.image_count() == 0 {
            return Ok(FrameOutcome::Skipped);
        }

        let device = &self.ctx.device;
        let sync = &self.session.frame_sync[self.pacer.current()];

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until this slot's previous frame left the GPU
        // ─────────────────────────────────────────────────────────────────────
        unsafe { device.wait_for_fences(&[sync.in_flight_fence], true, u64::MAX) }
            .recording("wait for frame fence")?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image (no timeout)
        // ─────────────────────────────────────────────────────────────────────
        self.cycle.advance();
        let acquired = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                self.generation.swapchain.handle,
                u64::MAX,
                sync.image_available,
                vk::Fence::null(),
            )
        };

        let (image_index, suboptimal) = match acquired {
            Ok(acquired) => acquired,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.cycle.abandon();
                return Ok(FrameOutcome::SwapchainStale);
            }
            Err(result) => {
                return self.cycle.check(Err(RenderError::RecordingFailure {
                    operation: "acquire swapchain image",
                    result,
                }));
            }
        };
        let image = image_index as usize;

        // An image still owned by another slot's submission must retire first
        let previous = self.pacer.claim_image(image, sync.in_flight_fence);
        if previous != vk::Fence::null() && previous != sync.in_flight_fence {
            self.cycle.check(
                unsafe { device.wait_for_fences(&[previous], true, u64::MAX) }
                    .recording("wait for image fence"),
            )?;
        }

        // Only reset once we know work will be submitted against it
        self.cycle.check(
            unsafe { device.reset_fences(&[sync.in_flight_fence]) }.recording("reset frame fence"),
        )?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Submit the pre-recorded command buffer
        // ─────────────────────────────────────────────────────────────────────
        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.generation.frames.render_finished[image]];
        let command_buffers = [self.generation.frames.command_buffers[image]];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        self.cycle.check(
            unsafe {
                device.queue_submit(
                    self.ctx.graphics_queue,
                    &[submit_info.build()],
                    sync.in_flight_fence,
                )
            }
            .recording("submit draw commands"),
        )?;
        self.cycle.advance();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Present once rendering finished
        // ─────────────────────────────────────────────────────────────────────
        let swapchains = [self.generation.swapchain.handle];
        let image_indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        self.cycle.advance();
        let presented = unsafe {
            self.ctx
                .swapchain_loader
                .queue_present(self.ctx.present_queue, &present_info)
        };
        self.cycle.finish();
        self.pacer.advance();

        match presented {
            Ok(false) if !suboptimal => Ok(FrameOutcome::Presented),
            Ok(_) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(FrameOutcome::SwapchainStale),
            Err(result) => Err(RenderError::RecordingFailure {
                operation: "present swapchain image",
                result,
            }),
        }
    }

    /// Wait for the GPU, then release everything above the device.
    /// Idempotent; the device context itself goes when the renderer drops.
    pub fn destroy(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        if let Err(e) = self.ctx.wait_idle() {
            log::warn!("{}", e);
        }
        teardown(&mut self.generation, &mut self.session, &self.ctx);
    }
}

impl Rebuild for Renderer {
    fn rebuild(&mut self, extent: vk::Extent2D) -> Result<()> {
        // Nothing may be destroyed while the GPU still uses it
        self.ctx.wait_idle()?;
        self.generation
            .release(&self.ctx, self.session.command_pool, Teardown::Rebuild);
        self.build_generation(extent)
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn create_command_pool(ctx: &DeviceContext) -> Result<vk::CommandPool> {
    // Buffers are recorded once per generation and freed individually
    let pool_info =
        vk::CommandPoolCreateInfo::builder().queue_family_index(ctx.queue_families.graphics);

    unsafe { ctx.device.create_command_pool(&pool_info, None) }.creating("command pool")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::frames::FrameResources;
    use crate::backend::handles::fake::FakeDevice;
    use crate::backend::pipeline::PipelineResources;
    use crate::backend::swapchain::SwapchainResources;
    use ash::vk::Handle;

    #[test]
    fn frame_state_cycles_back_to_idle() {
        let mut state = FrameState::Idle;
        let mut visited = vec![state];
        for _ in 0..4 {
            state = state.next();
            visited.push(state);
        }
        assert_eq!(
            visited,
            [
                FrameState::Idle,
                FrameState::Acquiring,
                FrameState::Submitted,
                FrameState::Presenting,
                FrameState::Idle
            ]
        );
    }

    #[test]
    fn full_cycle_returns_to_idle() {
        let mut cycle = FrameCycle::new();
        for _ in 0..3 {
            cycle.advance();
        }
        assert_eq!(cycle.state, FrameState::Presenting);
        cycle.finish();
        assert_eq!(cycle.state, FrameState::Idle);
    }

    #[test]
    fn error_after_acquire_resets_to_idle() {
        let mut cycle = FrameCycle::new();
        cycle.advance();

        let failed: Result<()> = Err(RenderError::RecordingFailure {
            operation: "submit draw commands",
            result: vk::Result::ERROR_DEVICE_LOST,
        });
        assert!(cycle.check(failed).is_err());
        assert_eq!(cycle.state, FrameState::Idle);

        // Success passes through without touching the state
        cycle.advance();
        assert_eq!(cycle.check(Ok(7)).unwrap(), 7);
        assert_eq!(cycle.state, FrameState::Acquiring);
    }

    #[test]
    fn abandoned_pass_can_begin_again() {
        let mut cycle = FrameCycle::new();
        cycle.begin();
        cycle.advance();
        cycle.abandon();
        cycle.begin();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "previous frame did not finish")]
    fn stuck_pass_is_caught_on_next_begin() {
        let mut cycle = FrameCycle::new();
        cycle.advance();
        cycle.begin();
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn finishing_mid_cycle_is_caught() {
        let mut cycle = FrameCycle::new();
        cycle.advance();
        cycle.finish();
    }

    fn session() -> SessionResources {
        SessionResources {
            vertex_buffer: VertexBuffer {
                buffer: vk::Buffer::from_raw(70),
                memory: vk::DeviceMemory::from_raw(71),
                vertex_count: 3,
            },
            command_pool: vk::CommandPool::from_raw(80),
            frame_sync: (0..2)
                .map(|i| FrameSync {
                    image_available: vk::Semaphore::from_raw(90 + i),
                    in_flight_fence: vk::Fence::from_raw(99 + i),
                })
                .collect(),
        }
    }

    fn generation() -> RenderGeneration {
        RenderGeneration {
            swapchain: SwapchainResources {
                handle: vk::SwapchainKHR::from_raw(1),
                images: (10..13).map(vk::Image::from_raw).collect(),
                image_views: (20..23).map(vk::ImageView::from_raw).collect(),
                ..Default::default()
            },
            render_pass: vk::RenderPass::from_raw(30),
            pipeline: PipelineResources {
                layout: vk::PipelineLayout::from_raw(40),
                pipeline: vk::Pipeline::from_raw(41),
            },
            frames: FrameResources {
                framebuffers: (50..53).map(vk::Framebuffer::from_raw).collect(),
                render_finished: (55..58).map(vk::Semaphore::from_raw).collect(),
                command_buffers: (60..63).map(vk::CommandBuffer::from_raw).collect(),
            },
            ..Default::default()
        }
    }

    #[test]
    fn session_teardown_twice_is_harmless() {
        let releaser = FakeDevice::default();
        let mut generation = generation();
        let mut session = session();

        teardown(&mut generation, &mut session, &releaser);
        let first = releaser.count();
        teardown(&mut generation, &mut session, &releaser);

        assert_eq!(releaser.count(), first);
        releaser.assert_no_duplicates();

        let kinds = releaser.kinds();
        let pool = kinds.iter().position(|k| *k == "command pool").unwrap();
        let last_command_buffer = kinds.iter().rposition(|k| *k == "command buffer").unwrap();
        assert!(last_command_buffer < pool, "command buffers freed after their pool");
        assert_eq!(kinds.last(), Some(&"memory"));
    }
}
