// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync.
// One FrameSync per frame in flight. Render-finished semaphores are kept
// per swapchain image instead: present may still be waiting on one after
// the frame slot that signaled it has come around again.

use anyhow::{Context, Result};
use ash::vk;

use super::RendererError;

/// Frame synchronization - one per frame in flight
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameSync {
    /// Signaled by acquire, waited on before color output
    pub image_available: vk::Semaphore,
    /// Signaled when the GPU is done with this slot's command buffer
    pub in_flight_fence: vk::Fence,
}

pub fn fence_create_info() -> vk::FenceCreateInfo {
    // Start signaled so the first wait on each slot returns immediately
    vk::FenceCreateInfo::builder()
        .flags(vk::FenceCreateFlags::SIGNALED)
        .build()
}

impl FrameSync {
    /// All-or-nothing: whatever was created is destroyed if a later call fails
    pub fn new(device: &ash::Device) -> Result<Self> {
        let mut sync = Self::default();

        if let Err(result) = sync.create_handles(device) {
            sync.destroy(device);
            return Err(RendererError::Vulkan {
                operation: "vkCreateSemaphore/vkCreateFence",
                result,
            })
            .context("Failed to create frame sync objects");
        }

        Ok(sync)
    }

    fn create_handles(&mut self, device: &ash::Device) -> Result<(), vk::Result> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let fence_info = fence_create_info();

        unsafe {
            self.image_available = device.create_semaphore(&semaphore_info, None)?;
            self.in_flight_fence = device.create_fence(&fence_info, None)?;
        }
        Ok(())
    }

    /// Destroys the live handles and nulls them out; repeat calls are no-ops
    pub fn destroy(&mut self, device: &ash::Device) {
        unsafe {
            if self.in_flight_fence != vk::Fence::null() {
                device.destroy_fence(self.in_flight_fence, None);
            }
            if self.image_available != vk::Semaphore::null() {
                device.destroy_semaphore(self.image_available, None);
            }
        }
        *self = Self::default();
    }
}

/// One binary semaphore per swapchain image, signaled by submit and waited on by present.
/// All-or-nothing like `FrameSync::new`.
pub fn create_render_finished_semaphores(device: &ash::Device, count: usize) -> Result<Vec<vk::Semaphore>> {
    let semaphore_info = vk::SemaphoreCreateInfo::default();
    let mut semaphores = Vec::with_capacity(count);

    for _ in 0..count {
        match unsafe { device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphores.push(semaphore),
            Err(result) => {
                destroy_semaphores(device, &mut semaphores);
                return Err(RendererError::Vulkan {
                    operation: "vkCreateSemaphore",
                    result,
                })
                .context("Failed to create render-finished semaphores");
            }
        }
    }

    Ok(semaphores)
}

/// Destroys and empties `semaphores`
pub fn destroy_semaphores(device: &ash::Device, semaphores: &mut Vec<vk::Semaphore>) {
    for semaphore in semaphores.drain(..).rev() {
        if semaphore != vk::Semaphore::null() {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
    }
}
