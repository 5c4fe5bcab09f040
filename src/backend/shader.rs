// Shader module creation
//
// The renderer only needs "bytes in, module out". Compilation happens in
// build.rs; loading the files is the caller's job.

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;

use super::RendererError;

/// Compiled vertex + fragment SPIR-V for the point pipeline
#[derive(Debug, Clone)]
pub struct ShaderBytes {
    pub vertex: Vec<u8>,
    pub fragment: Vec<u8>,
}

impl ShaderBytes {
    pub fn load(vertex: impl AsRef<std::path::Path>, fragment: impl AsRef<std::path::Path>) -> Result<Self> {
        let read = |path: &std::path::Path| {
            std::fs::read(path).with_context(|| format!("Failed to read shader: {:?}", path))
        };
        Ok(Self {
            vertex: read(vertex.as_ref())?,
            fragment: read(fragment.as_ref())?,
        })
    }
}

/// SPIR-V words from raw bytes; checks size and magic number
pub fn decode_spirv(code: &[u8]) -> Result<Vec<u32>, RendererError> {
    ash::util::read_spv(&mut Cursor::new(code)).map_err(|e| RendererError::InvalidShader(e.to_string()))
}

/// Load SPIR-V shader from bytes and create a shader module
pub fn create_shader_module(device: &ash::Device, code: &[u8]) -> Result<vk::ShaderModule> {
    let words = decode_spirv(code)?;
    let create_info = vk::ShaderModuleCreateInfo::builder().code(&words);

    unsafe { device.create_shader_module(&create_info, None) }
        .map_err(RendererError::vulkan("vkCreateShaderModule"))
        .context("Failed to create shader module")
}
