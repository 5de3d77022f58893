// Rebuildable render targets
//
// Everything that depends on the swapchain extent/format forms one
// generation. The stages and their dependencies are declared once; startup
// and resize both build in `Stage::ORDER` and tear down in reverse.

use ash::vk;

use super::buffer::VertexBuffer;
use super::frames::{DrawRecipe, FrameResources};
use super::handles::{take, Factory, Releaser};
use super::pipeline::PipelineResources;
use super::shader::ShaderCode;
use super::swapchain::{SwapchainConfig, SwapchainResources};
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Swapchain,
    RenderPass,
    Pipeline,
    Framebuffers,
    CommandBuffers,
}

impl Stage {
    /// Dependency order; every stage comes after what it requires
    pub const ORDER: [Stage; 5] = [
        Stage::Swapchain,
        Stage::RenderPass,
        Stage::Pipeline,
        Stage::Framebuffers,
        Stage::CommandBuffers,
    ];

    pub const fn requires(self) -> &'static [Stage] {
        match self {
            Stage::Swapchain => &[],
            Stage::RenderPass => &[Stage::Swapchain],
            Stage::Pipeline => &[Stage::Swapchain, Stage::RenderPass],
            Stage::Framebuffers => &[Stage::Swapchain, Stage::RenderPass],
            Stage::CommandBuffers => &[Stage::Swapchain, Stage::Framebuffers, Stage::Pipeline],
        }
    }

    pub fn teardown_order() -> impl Iterator<Item = Stage> {
        Self::ORDER.into_iter().rev()
    }
}

/// How far a teardown goes with the swapchain handle itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// Keep the old chain alive as `old_swapchain` for the next build
    Rebuild,
    /// Destroy everything
    Full,
}

/// Session objects a generation is built from
pub struct GenerationInputs<'a, D> {
    pub device: &'a D,
    pub config: SwapchainConfig,
    pub command_pool: vk::CommandPool,
    pub vertex_buffer: &'a VertexBuffer,
    pub shaders: &'a ShaderCode,
    pub clear_color: [f32; 4],
}

#[derive(Default)]
pub struct RenderGeneration {
    pub swapchain: SwapchainResources,
    pub(crate) retired_swapchain: vk::SwapchainKHR,
    pub render_pass: vk::RenderPass,
    pub pipeline: PipelineResources,
    pub frames: FrameResources,
}

impl RenderGeneration {
    pub fn build<D: Factory>(&mut self, inputs: &GenerationInputs<D>) -> Result<()> {
        for stage in Stage::ORDER {
            debug_assert!(
                stage.requires().iter().all(|&dep| self.is_built(dep)),
                "{:?} built before its dependencies",
                stage
            );
            self.build_stage(stage, inputs)?;
        }

        debug_assert!(self.is_consistent());
        Ok(())
    }

    fn build_stage<D: Factory>(&mut self, stage: Stage, inputs: &GenerationInputs<D>) -> Result<()> {
        let device = inputs.device;
        match stage {
            Stage::Swapchain => {
                let previous = take(&mut self.retired_swapchain).unwrap_or_default();
                let created = SwapchainResources::create(device, &inputs.config, previous);
                // The old chain only served as a hint
                if previous != vk::SwapchainKHR::null() {
                    device.destroy_swapchain(previous);
                }
                self.swapchain = created?;
            }
            Stage::RenderPass => {
                self.render_pass = device.create_render_pass(self.swapchain.format)?;
            }
            Stage::Pipeline => {
                self.pipeline =
                    device.create_pipeline(self.render_pass, self.swapchain.extent, inputs.shaders)?;
            }
            Stage::Framebuffers => {
                self.frames.create_framebuffers(
                    device,
                    self.render_pass,
                    &self.swapchain.image_views,
                    self.swapchain.extent,
                )?;
            }
            Stage::CommandBuffers => {
                let recipe = DrawRecipe {
                    render_pass: self.render_pass,
                    pipeline: self.pipeline.pipeline,
                    vertex_buffer: inputs.vertex_buffer.buffer,
                    vertex_count: inputs.vertex_buffer.vertex_count,
                    extent: self.swapchain.extent,
                    clear_color: inputs.clear_color,
                };
                self.frames
                    .record_command_buffers(device, inputs.command_pool, &recipe)?;
            }
        }
        Ok(())
    }

    /// Release every stage in reverse dependency order. Safe to repeat.
    pub fn release(&mut self, releaser: &impl Releaser, command_pool: vk::CommandPool, mode: Teardown) {
        for stage in Stage::teardown_order() {
            self.release_stage(stage, releaser, command_pool, mode);
        }
    }

    fn release_stage(
        &mut self,
        stage: Stage,
        releaser: &impl Releaser,
        command_pool: vk::CommandPool,
        mode: Teardown,
    ) {
        match stage {
            Stage::CommandBuffers => self.frames.release_command_buffers(releaser, command_pool),
            Stage::Framebuffers => self.frames.release_framebuffers(releaser),
            Stage::Pipeline => self.pipeline.release(releaser),
            Stage::RenderPass => {
                if let Some(render_pass) = take(&mut self.render_pass) {
                    releaser.destroy_render_pass(render_pass);
                }
            }
            Stage::Swapchain => match mode {
                Teardown::Rebuild => {
                    let retired = self.swapchain.retire(releaser);
                    if let Some(stale) = take(&mut self.retired_swapchain) {
                        releaser.destroy_swapchain(stale);
                    }
                    self.retired_swapchain = retired;
                }
                Teardown::Full => {
                    self.swapchain.release(releaser);
                    if let Some(retired) = take(&mut self.retired_swapchain) {
                        releaser.destroy_swapchain(retired);
                    }
                }
            },
        }
    }

    fn is_built(&self, stage: Stage) -> bool {
        match stage {
            Stage::Swapchain => self.swapchain.handle != vk::SwapchainKHR::null(),
            Stage::RenderPass => self.render_pass != vk::RenderPass::null(),
            Stage::Pipeline => self.pipeline.pipeline != vk::Pipeline::null(),
            Stage::Framebuffers => !self.frames.framebuffers.is_empty(),
            Stage::CommandBuffers => !self.frames.command_buffers.is_empty(),
        }
    }

    /// Framebuffers, present semaphores and command buffers line up with
    /// swapchain images
    pub fn is_consistent(&self) -> bool {
        let images = self.swapchain.image_count();
        self.frames.framebuffers.len() == images
            && self.frames.render_finished.len() == images
            && self.frames.command_buffers.len() == images
    }

    pub fn image_count(&self) -> usize {
        self.swapchain.image_count()
    }
}
