// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash; every object family owns its own
// create/release pair and all releases go through `handles::Releaser`.

pub mod buffer;
pub mod device;
pub mod frames;
pub mod generation;
pub mod handles;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;
