// Vertex buffer
//
// Host-visible, host-coherent memory written once at setup and never touched
// again; lives for the whole session.

use ash::vk;
use bytemuck::Pod;

use super::device::DeviceContext;
use super::handles::{take, Releaser};
use crate::error::{RenderError, Result, VkResultExt};

#[derive(Default)]
pub struct VertexBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub vertex_count: u32,
}

impl VertexBuffer {
    pub fn new<T: Pod>(ctx: &DeviceContext, vertices: &[T]) -> Result<Self> {
        let (buffer, memory) = create_buffer_with_data(
            ctx,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            bytemuck::cast_slice(vertices),
        )?;

        log::debug!("Uploaded {} vertices", vertices.len());

        Ok(Self {
            buffer,
            memory,
            vertex_count: vertices.len() as u32,
        })
    }

    pub fn release(&mut self, releaser: &impl Releaser) {
        if let Some(buffer) = take(&mut self.buffer) {
            releaser.destroy_buffer(buffer);
        }
        if let Some(memory) = take(&mut self.memory) {
            releaser.free_memory(memory);
        }
    }
}

/// Helper to create a GPU buffer with specified usage and memory properties
pub fn create_buffer(
    ctx: &DeviceContext,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    memory_properties: vk::MemoryPropertyFlags,
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let device = &ctx.device;

    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);

    let buffer = unsafe { device.create_buffer(&buffer_info, None) }.creating("buffer")?;

    let mem_requirements = unsafe { device.get_buffer_memory_requirements(buffer) };

    let memory = find_memory_type(
        &ctx.memory_properties,
        mem_requirements.memory_type_bits,
        memory_properties,
    )
    .and_then(|memory_type_index| {
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(mem_requirements.size)
            .memory_type_index(memory_type_index);
        unsafe { device.allocate_memory(&alloc_info, None) }.creating("buffer memory")
    });

    let memory = match memory {
        Ok(memory) => memory,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    if let Err(result) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
        }
        return Err(RenderError::ResourceCreationFailure {
            resource: "buffer memory binding",
            result,
        });
    }

    Ok((buffer, memory))
}

/// Create a host-visible buffer and fill it with `data`
pub fn create_buffer_with_data(
    ctx: &DeviceContext,
    usage: vk::BufferUsageFlags,
    data: &[u8],
) -> Result<(vk::Buffer, vk::DeviceMemory)> {
    let size = data.len() as vk::DeviceSize;

    let (buffer, memory) = create_buffer(
        ctx,
        size,
        usage,
        vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
    )?;

    let mapped = unsafe {
        ctx.device
            .map_memory(memory, 0, size, vk::MemoryMapFlags::empty())
    };

    match mapped {
        Ok(ptr) => unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            ctx.device.unmap_memory(memory);
        },
        Err(result) => {
            unsafe {
                ctx.device.destroy_buffer(buffer, None);
                ctx.device.free_memory(memory, None);
            }
            return Err(RenderError::ResourceCreationFailure {
                resource: "buffer mapping",
                result,
            });
        }
    }

    Ok((buffer, memory))
}

/// Find a memory type allowed by `type_filter` that has all `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Result<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            let has_type = (type_filter & (1 << i)) != 0;
            let has_properties = memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties);
            has_type && has_properties
        })
        .ok_or(RenderError::ResourceCreationFailure {
            resource: "buffer memory (no suitable memory type)",
            result: vk::Result::ERROR_OUT_OF_DEVICE_MEMORY,
        })
}
