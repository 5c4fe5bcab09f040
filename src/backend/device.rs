// Logical device + queues
//
// Responsibilities:
// - One queue per unique family (graphics and present may share)
// - Mirror the optional engine features the GPU actually has
// - Enable core 1.3 dynamic rendering
// - Report heap budgets (VK_EXT_memory_budget is a hard requirement)

use anyhow::{Context, Result};
use ash::vk;

use super::selector::{DeviceRequirements, SelectedDevice};
use super::RendererError;

/// Logical device with its two queue handles (queue index 0 in each family)
pub struct LogicalDevice {
    pub device: ash::Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
}

/// Engine features we would like, masked by what the GPU supports.
/// Never requests something `available` does not report.
pub fn enabled_features(available: &vk::PhysicalDeviceFeatures) -> vk::PhysicalDeviceFeatures {
    vk::PhysicalDeviceFeatures {
        sampler_anisotropy: available.sampler_anisotropy,
        fill_mode_non_solid: available.fill_mode_non_solid,
        wide_lines: available.wide_lines,
        geometry_shader: available.geometry_shader,
        tessellation_shader: available.tessellation_shader,
        multi_draw_indirect: available.multi_draw_indirect,
        shader_int64: available.shader_int64,
        ..Default::default()
    }
}

pub fn create_logical_device(
    instance: &ash::Instance,
    selected: &SelectedDevice,
    requirements: &DeviceRequirements,
) -> Result<LogicalDevice> {
    let indices = selected.queue_families;

    let queue_priorities = [1.0];
    let queue_create_infos: Vec<_> = indices
        .unique_families()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let features = enabled_features(&selected.candidate.features);
    let extensions = requirements.extension_pointers();

    // Core 1.3, selection already checked the feature bit
    let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::builder().dynamic_rendering(true);

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features)
        .push_next(&mut vulkan13);

    let device = unsafe { instance.create_device(selected.candidate.handle, &create_info, None) }
        .map_err(RendererError::vulkan("vkCreateDevice"))
        .context("Failed to create logical device")?;

    let graphics_queue = unsafe { device.get_device_queue(indices.graphics_family, 0) };
    let present_queue = unsafe { device.get_device_queue(indices.present_family, 0) };

    log::info!(
        "Created logical device with {} queue family(ies)",
        queue_create_infos.len()
    );

    Ok(LogicalDevice {
        device,
        graphics_queue,
        present_queue,
    })
}

/// Log size, budget and usage of every device-local heap
pub fn log_memory_budget(instance: &ash::Instance, physical_device: vk::PhysicalDevice) {
    let mut budget = vk::PhysicalDeviceMemoryBudgetPropertiesEXT::default();
    let memory = {
        let mut properties2 = vk::PhysicalDeviceMemoryProperties2::builder().push_next(&mut budget);
        unsafe { instance.get_physical_device_memory_properties2(physical_device, &mut properties2) };
        properties2.memory_properties
    };

    let heaps = &memory.memory_heaps[..memory.memory_heap_count as usize];
    for (i, heap) in heaps.iter().enumerate() {
        if !heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL) {
            continue;
        }
        log::info!(
            "Heap {}: {} MiB, budget {} MiB, in use {} MiB",
            i,
            heap.size >> 20,
            budget.heap_budget[i] >> 20,
            budget.heap_usage[i] >> 20
        );
    }
}
