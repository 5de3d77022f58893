// Shader module loading
//
// SPIR-V blobs are read fully into memory once per session and kept as
// words; modules are created per pipeline build and destroyed right after.

use ash::vk;
use std::io::Cursor;
use std::path::Path;

use crate::error::{RenderError, Result, VkResultExt};

/// Vertex + fragment bytecode for the fixed pipeline
pub struct ShaderCode {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderCode {
    pub fn load(vertex: &Path, fragment: &Path) -> Result<Self> {
        Ok(Self {
            vertex: read_spirv_file(vertex)?,
            fragment: read_spirv_file(fragment)?,
        })
    }
}

pub fn read_spirv_file(path: &Path) -> Result<Vec<u32>> {
    let bytes = std::fs::read(path)
        .map_err(|e| RenderError::init("shader", format!("{}: {}", path.display(), e)))?;
    log::debug!("Read {} bytes of SPIR-V from {}", bytes.len(), path.display());
    parse_spirv(&bytes)
        .map_err(|e| RenderError::init("shader", format!("{}: {}", path.display(), e)))
}

/// Realign raw bytes into words; rejects blobs `read_spv` cannot decode
pub fn parse_spirv(bytes: &[u8]) -> std::io::Result<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes))
}

pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.create_shader_module(&create_info, None) }.creating("shader module")
}
