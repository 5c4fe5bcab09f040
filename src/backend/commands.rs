// Command pool and per-frame command buffers
//
// One pool on the graphics family with RESET_COMMAND_BUFFER so each frame
// re-records its own buffer in place. All buffers are allocated up front.

use anyhow::{Context, Result};
use ash::vk;

use super::RendererError;

pub fn command_pool_create_info(queue_family_index: u32) -> vk::CommandPoolCreateInfo {
    vk::CommandPoolCreateInfo::builder()
        .queue_family_index(queue_family_index)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
        .build()
}

pub fn create_command_pool(device: &ash::Device, queue_family_index: u32) -> Result<vk::CommandPool> {
    let pool_info = command_pool_create_info(queue_family_index);
    unsafe { device.create_command_pool(&pool_info, None) }
        .map_err(RendererError::vulkan("vkCreateCommandPool"))
        .context("Failed to create command pool")
}

/// Primary buffers, freed implicitly with the pool
pub fn allocate_command_buffers(
    device: &ash::Device,
    command_pool: vk::CommandPool,
    count: usize,
) -> Result<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(command_pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count as u32);

    unsafe { device.allocate_command_buffers(&alloc_info) }
        .map_err(RendererError::vulkan("vkAllocateCommandBuffers"))
        .context("Failed to allocate command buffers")
}
