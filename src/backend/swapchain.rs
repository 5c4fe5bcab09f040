// Swapchain - Window presentation
//
// Negotiates format, present mode, extent and image count with the surface,
// then creates the swapchain and one color view per image. The negotiation
// rules are plain functions over the queried surface data.

use anyhow::{Context, Result};
use ash::extensions::khr;
use ash::vk;

use super::selector::QueueFamilyIndices;
use super::RendererError;

/// Image sharing between the graphics and present families
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharingConfig {
    pub mode: vk::SharingMode,
    /// Empty for exclusive sharing
    pub queue_family_indices: Vec<u32>,
}

/// Prefer 8-bit BGRA sRGB in the sRGB non-linear color space, else take
/// whatever the driver listed first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

/// MAILBOX: No vsync, no tearing, triple buffered
/// FIFO: Vsync enabled, guaranteed available
pub fn choose_present_mode(modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Use the surface's fixed extent when it has one, otherwise clamp the
/// window size into the supported range per axis.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// One more than the minimum, capped by the maximum (0 means no cap)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        caps.max_image_count
    } else {
        image_count
    }
}

pub fn choose_sharing(indices: &QueueFamilyIndices) -> SharingConfig {
    if indices.are_same() {
        SharingConfig {
            mode: vk::SharingMode::EXCLUSIVE,
            queue_family_indices: Vec::new(),
        }
    } else {
        SharingConfig {
            mode: vk::SharingMode::CONCURRENT,
            queue_family_indices: vec![indices.graphics_family, indices.present_family],
        }
    }
}

/// Result of swapchain negotiation + creation
pub struct SwapchainBundle {
    pub swapchain: vk::SwapchainKHR,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
}

pub fn create_swapchain(
    physical_device: vk::PhysicalDevice,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
    swapchain_loader: &khr::Swapchain,
    indices: &QueueFamilyIndices,
    width: u32,
    height: u32,
) -> Result<SwapchainBundle> {
    let caps = unsafe { surface_loader.get_physical_device_surface_capabilities(physical_device, surface) }
        .map_err(RendererError::vulkan("vkGetPhysicalDeviceSurfaceCapabilitiesKHR"))?;
    let formats = unsafe { surface_loader.get_physical_device_surface_formats(physical_device, surface) }
        .map_err(RendererError::vulkan("vkGetPhysicalDeviceSurfaceFormatsKHR"))?;
    let present_modes =
        unsafe { surface_loader.get_physical_device_surface_present_modes(physical_device, surface) }
            .map_err(RendererError::vulkan("vkGetPhysicalDeviceSurfacePresentModesKHR"))?;

    let format = choose_surface_format(&formats).ok_or(RendererError::MissingSurfaceSupport)?;
    let present_mode = choose_present_mode(&present_modes);
    let extent = choose_extent(&caps, width, height);
    let image_count = choose_image_count(&caps);
    let sharing = choose_sharing(indices);

    log::info!(
        "Creating swapchain: {}x{}, {:?}/{:?}, {:?}, {} images, {:?}",
        extent.width,
        extent.height,
        format.format,
        format.color_space,
        present_mode,
        image_count,
        sharing.mode
    );

    let create_info = vk::SwapchainCreateInfoKHR::builder()
        .surface(surface)
        .min_image_count(image_count)
        .image_format(format.format)
        .image_color_space(format.color_space)
        .image_extent(extent)
        .image_array_layers(1)
        .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
        .image_sharing_mode(sharing.mode)
        .queue_family_indices(&sharing.queue_family_indices)
        .pre_transform(caps.current_transform)
        .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
        .present_mode(present_mode)
        .clipped(true);

    let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
        .map_err(RendererError::vulkan("vkCreateSwapchainKHR"))
        .context("Failed to create swapchain")?;

    Ok(SwapchainBundle {
        swapchain,
        format,
        extent,
    })
}

/// One 2D color view per swapchain image. On failure the views created so
/// far are destroyed before returning.
pub fn create_image_views(
    device: &ash::Device,
    images: &[vk::Image],
    format: vk::Format,
) -> Result<Vec<vk::ImageView>> {
    let mut views = Vec::with_capacity(images.len());

    for &image in images {
        let create_info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .components(vk::ComponentMapping {
                r: vk::ComponentSwizzle::IDENTITY,
                g: vk::ComponentSwizzle::IDENTITY,
                b: vk::ComponentSwizzle::IDENTITY,
                a: vk::ComponentSwizzle::IDENTITY,
            })
            .subresource_range(color_subresource_range());

        match unsafe { device.create_image_view(&create_info, None) } {
            Ok(view) => views.push(view),
            Err(result) => {
                for view in views {
                    unsafe { device.destroy_image_view(view, None) };
                }
                return Err(RendererError::Vulkan {
                    operation: "vkCreateImageView",
                    result,
                })
                .context("Failed to create image view");
            }
        }
    }

    Ok(views)
}

/// Whole color image: one mip, one layer
pub fn color_subresource_range() -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

/// Acquire next image for rendering. Only success continues; an out-of-date
/// swapchain is fatal because the renderer never recreates it.
pub fn acquire_next_image(
    swapchain_loader: &khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    semaphore: vk::Semaphore,
) -> Result<u32> {
    let (index, suboptimal) = unsafe {
        swapchain_loader.acquire_next_image(swapchain, u64::MAX, semaphore, vk::Fence::null())
    }
    .map_err(RendererError::vulkan("vkAcquireNextImageKHR"))?;

    if suboptimal {
        log::warn!("Swapchain is suboptimal for the surface");
    }

    Ok(index)
}

/// Present rendered image to screen
pub fn present(
    swapchain_loader: &khr::Swapchain,
    swapchain: vk::SwapchainKHR,
    queue: vk::Queue,
    image_index: u32,
    wait_semaphore: vk::Semaphore,
) -> Result<()> {
    let wait_semaphores = [wait_semaphore];
    let swapchains = [swapchain];
    let image_indices = [image_index];

    let present_info = vk::PresentInfoKHR::builder()
        .wait_semaphores(&wait_semaphores)
        .swapchains(&swapchains)
        .image_indices(&image_indices);

    let suboptimal = unsafe { swapchain_loader.queue_present(queue, &present_info) }
        .map_err(RendererError::vulkan("vkQueuePresentKHR"))?;

    if suboptimal {
        log::warn!("Presented to a suboptimal swapchain");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 100,
                height: 100,
            },
            max_image_extent: vk::Extent2D {
                width: 4000,
                height: 4000,
            },
            ..Default::default()
        }
    }

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    #[test]
    fn window_size_used_when_surface_defers() {
        let caps = caps((u32::MAX, u32::MAX));
        assert_eq!(
            choose_extent(&caps, 200, 150),
            vk::Extent2D {
                width: 200,
                height: 150
            }
        );
        assert_eq!(
            choose_extent(&caps, 10, 10),
            vk::Extent2D {
                width: 100,
                height: 100
            }
        );
        assert_eq!(
            choose_extent(&caps, 9000, 50),
            vk::Extent2D {
                width: 4000,
                height: 100
            }
        );
    }

    #[test]
    fn fixed_surface_extent_wins() {
        let caps = caps((800, 600));
        assert_eq!(
            choose_extent(&caps, 200, 150),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn image_count_is_min_plus_one_capped() {
        let mut caps = caps((800, 600));
        assert_eq!(choose_image_count(&caps), 3);

        caps.max_image_count = 2;
        assert_eq!(choose_image_count(&caps), 2);

        caps.max_image_count = 8;
        assert_eq!(choose_image_count(&caps), 3);
    }

    #[test]
    fn srgb_bgra_preferred_over_list_order() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_SRGB);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn first_format_when_no_preferred_pair() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
        ];
        let chosen = choose_surface_format(&formats).unwrap();
        assert_eq!(chosen.format, vk::Format::R8G8B8A8_UNORM);
        assert!(choose_surface_format(&[]).is_none());
    }

    #[test]
    fn mailbox_preferred_else_fifo() {
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX]),
            vk::PresentModeKHR::MAILBOX
        );
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED]),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn shared_family_is_exclusive_without_indices() {
        let sharing = choose_sharing(&QueueFamilyIndices {
            graphics_family: 2,
            present_family: 2,
        });
        assert_eq!(sharing.mode, vk::SharingMode::EXCLUSIVE);
        assert!(sharing.queue_family_indices.is_empty());
    }

    #[test]
    fn split_families_are_concurrent_with_both_indices() {
        let sharing = choose_sharing(&QueueFamilyIndices {
            graphics_family: 0,
            present_family: 1,
        });
        assert_eq!(sharing.mode, vk::SharingMode::CONCURRENT);
        assert_eq!(sharing.queue_family_indices, vec![0, 1]);
    }
}
