// Physical device selection
//
// Enumerates every GPU, snapshots what we need to know about it into a
// PhysicalDeviceCandidate, rejects the ones that cannot drive the renderer
// and keeps the highest scoring survivor. Scoring and eligibility are pure
// functions over the snapshot so they can be exercised without a GPU.

use anyhow::Result;
use ash::extensions::khr;
use ash::vk;
use std::ffi::{CStr, CString};
use thiserror::Error;

use super::RendererError;

// Score weights (additive, higher wins)
const DISCRETE_GPU_BONUS: u32 = 1000;
const VRAM_GIB_WEIGHT: u32 = 1;
const ANISOTROPY_BONUS: u32 = 100;
const GEOMETRY_SHADER_BONUS: u32 = 50;
const TESSELLATION_BONUS: u32 = 50;
const WIDE_LINES_BONUS: u32 = 20;
const FILL_MODE_BONUS: u32 = 20;
const MULTI_DRAW_BONUS: u32 = 30;
const SHADER_INT64_BONUS: u32 = 40;
const TIMELINE_SEMAPHORES_BONUS: u32 = 150;

const GIB: vk::DeviceSize = 1024 * 1024 * 1024;

/// Oldest API version we accept; dynamic rendering is used as core 1.3.
pub const MIN_API_VERSION: u32 = vk::API_VERSION_1_3;

/// Device extensions that must all be present on the chosen GPU
#[derive(Debug, Clone)]
pub struct DeviceRequirements {
    pub extensions: Vec<&'static CStr>,
}

impl DeviceRequirements {
    /// Swapchain + memory budget, optionally the extended feature set
    /// (timeline semaphores, descriptor indexing, dynamic rendering).
    pub fn new(extended: bool) -> Self {
        let mut extensions = vec![khr::Swapchain::name(), vk::ExtMemoryBudgetFn::name()];
        if extended {
            extensions.extend([
                khr::TimelineSemaphore::name(),
                vk::ExtDescriptorIndexingFn::name(),
                khr::DynamicRendering::name(),
            ]);
        }
        Self { extensions }
    }

    /// Pointers for `VkDeviceCreateInfo::ppEnabledExtensionNames`
    pub fn extension_pointers(&self) -> Vec<*const std::ffi::c_char> {
        self.extensions.iter().map(|name| name.as_ptr()).collect()
    }
}

/// Graphics/present family pair. Only built once both are known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: u32,
    pub present_family: u32,
}

impl QueueFamilyIndices {
    pub fn are_same(&self) -> bool {
        self.graphics_family == self.present_family
    }

    /// One entry per distinct family, graphics first
    pub fn unique_families(&self) -> Vec<u32> {
        if self.are_same() {
            vec![self.graphics_family]
        } else {
            vec![self.graphics_family, self.present_family]
        }
    }
}

/// Partially resolved queue families, filled while scanning a device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilySearch {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilySearch {
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    pub fn build(&self) -> Option<QueueFamilyIndices> {
        Some(QueueFamilyIndices {
            graphics_family: self.graphics_family?,
            present_family: self.present_family?,
        })
    }
}

/// Walk the queue families in order. Every graphics-capable family and
/// every present-capable family overwrites the previous pick until both are
/// known, so a later family that can do both wins over an earlier split.
/// Stops as soon as both are set; `supports_present` is not called after that.
pub fn resolve_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> Result<QueueFamilySearch>
where
    F: FnMut(u32) -> Result<bool>,
{
    let mut search = QueueFamilySearch::default();

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;

        if family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            search.graphics_family = Some(index);
        }

        if supports_present(index)? {
            search.present_family = Some(index);
        }

        if search.is_complete() {
            break;
        }
    }

    Ok(search)
}

/// Why a device was skipped
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Rejection {
    #[error("no queue family pair for graphics and present")]
    IncompleteQueueFamilies,
    #[error("missing device extension {0}")]
    MissingExtension(String),
    #[error("surface reports no formats")]
    NoSurfaceFormats,
    #[error("surface reports no present modes")]
    NoPresentModes,
    #[error("API version {0:#x} is older than 1.3")]
    ApiVersionTooOld(u32),
    #[error("dynamic rendering is not supported")]
    NoDynamicRendering,
}

/// Everything selection needs to know about one GPU, queried once.
#[derive(Debug, Clone)]
pub struct PhysicalDeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub features: vk::PhysicalDeviceFeatures,
    /// From the features2 chain, not the base feature struct
    pub timeline_semaphores: bool,
    pub dynamic_rendering: bool,
    /// Sizes of heaps flagged DEVICE_LOCAL
    pub device_local_heaps: Vec<vk::DeviceSize>,
    pub queue_families: QueueFamilySearch,
    pub extensions: Vec<CString>,
    pub surface_format_count: usize,
    pub present_mode_count: usize,
}

impl PhysicalDeviceCandidate {
    /// Snapshot a physical device against the given surface
    pub fn query(
        instance: &ash::Instance,
        surface_loader: &khr::Surface,
        surface: vk::SurfaceKHR,
        handle: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let features = unsafe { instance.get_physical_device_features(handle) };
        let memory = unsafe { instance.get_physical_device_memory_properties(handle) };

        let mut timeline = vk::PhysicalDeviceTimelineSemaphoreFeatures::default();
        let mut vulkan13 = vk::PhysicalDeviceVulkan13Features::default();
        {
            let mut features2 = vk::PhysicalDeviceFeatures2::builder()
                .push_next(&mut timeline)
                .push_next(&mut vulkan13);
            unsafe { instance.get_physical_device_features2(handle, &mut features2) };
        }

        let device_local_heaps = memory.memory_heaps[..memory.memory_heap_count as usize]
            .iter()
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .collect();

        let families = unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let queue_families = resolve_queue_families(&families, |index| {
            unsafe { surface_loader.get_physical_device_surface_support(handle, index, surface) }
                .map_err(RendererError::vulkan("vkGetPhysicalDeviceSurfaceSupportKHR"))
                .map_err(Into::into)
        })?;

        let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }
            .map_err(RendererError::vulkan("vkEnumerateDeviceExtensionProperties"))?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }.to_owned())
            .collect();

        let surface_format_count =
            unsafe { surface_loader.get_physical_device_surface_formats(handle, surface) }
                .map_err(RendererError::vulkan("vkGetPhysicalDeviceSurfaceFormatsKHR"))?
                .len();
        let present_mode_count =
            unsafe { surface_loader.get_physical_device_surface_present_modes(handle, surface) }
                .map_err(RendererError::vulkan("vkGetPhysicalDeviceSurfacePresentModesKHR"))?
                .len();

        Ok(Self {
            handle,
            name: unsafe { CStr::from_ptr(properties.device_name.as_ptr()) }
                .to_string_lossy()
                .into_owned(),
            device_type: properties.device_type,
            api_version: properties.api_version,
            features,
            timeline_semaphores: timeline.timeline_semaphore == vk::TRUE,
            dynamic_rendering: vulkan13.dynamic_rendering == vk::TRUE,
            device_local_heaps,
            queue_families,
            extensions,
            surface_format_count,
            present_mode_count,
        })
    }

    pub fn has_extension(&self, name: &CStr) -> bool {
        self.extensions.iter().any(|ext| ext.as_c_str() == name)
    }

    /// Resolved queue families if the device can drive the renderer
    pub fn check_eligibility(
        &self,
        requirements: &DeviceRequirements,
    ) -> Result<QueueFamilyIndices, Rejection> {
        let indices = self
            .queue_families
            .build()
            .ok_or(Rejection::IncompleteQueueFamilies)?;

        if let Some(missing) = requirements
            .extensions
            .iter()
            .find(|name| !self.has_extension(name))
        {
            return Err(Rejection::MissingExtension(missing.to_string_lossy().into_owned()));
        }

        if self.surface_format_count == 0 {
            return Err(Rejection::NoSurfaceFormats);
        }
        if self.present_mode_count == 0 {
            return Err(Rejection::NoPresentModes);
        }
        if self.api_version < MIN_API_VERSION {
            return Err(Rejection::ApiVersionTooOld(self.api_version));
        }
        if !self.dynamic_rendering {
            return Err(Rejection::NoDynamicRendering);
        }

        Ok(indices)
    }

    pub fn score(&self) -> u32 {
        let mut score = 0;

        if self.device_type == vk::PhysicalDeviceType::DISCRETE_GPU {
            score += DISCRETE_GPU_BONUS;
        }

        for &size in &self.device_local_heaps {
            score += (size / GIB) as u32 * VRAM_GIB_WEIGHT;
        }

        let f = &self.features;
        let bonuses = [
            (f.sampler_anisotropy, ANISOTROPY_BONUS),
            (f.geometry_shader, GEOMETRY_SHADER_BONUS),
            (f.tessellation_shader, TESSELLATION_BONUS),
            (f.wide_lines, WIDE_LINES_BONUS),
            (f.fill_mode_non_solid, FILL_MODE_BONUS),
            (f.multi_draw_indirect, MULTI_DRAW_BONUS),
            (f.shader_int64, SHADER_INT64_BONUS),
        ];
        score += bonuses
            .iter()
            .filter(|(supported, _)| *supported == vk::TRUE)
            .map(|(_, bonus)| bonus)
            .sum::<u32>();

        if self.timeline_semaphores {
            score += TIMELINE_SEMAPHORES_BONUS;
        }

        score
    }
}

/// The winning GPU
#[derive(Debug, Clone)]
pub struct SelectedDevice {
    pub candidate: PhysicalDeviceCandidate,
    pub queue_families: QueueFamilyIndices,
    pub score: u32,
}

/// Pick the eligible candidate with the strictly highest score.
/// Ties keep the device enumerated first.
pub fn select_best<I>(candidates: I, requirements: &DeviceRequirements) -> Result<SelectedDevice, RendererError>
where
    I: IntoIterator<Item = PhysicalDeviceCandidate>,
{
    let mut seen_any = false;
    let mut best: Option<SelectedDevice> = None;

    for candidate in candidates {
        seen_any = true;

        let queue_families = match candidate.check_eligibility(requirements) {
            Ok(indices) => indices,
            Err(reason) => {
                log::debug!("Skipping GPU {}: {}", candidate.name, reason);
                continue;
            }
        };

        let score = candidate.score();
        log::debug!("GPU {} scored {}", candidate.name, score);

        if best.as_ref().map_or(true, |b| score > b.score) {
            best = Some(SelectedDevice {
                candidate,
                queue_families,
                score,
            });
        }
    }

    if !seen_any {
        return Err(RendererError::NoDeviceFound);
    }
    best.ok_or(RendererError::NoSuitableDevice)
}

/// Devices whose snapshot succeeded. A failed query only rejects that device.
pub fn usable_candidates<I>(snapshots: I) -> Vec<PhysicalDeviceCandidate>
where
    I: IntoIterator<Item = (vk::PhysicalDevice, Result<PhysicalDeviceCandidate>)>,
{
    snapshots
        .into_iter()
        .filter_map(|(device, snapshot)| match snapshot {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                log::debug!("Skipping GPU {:?}: query failed: {:#}", device, e);
                None
            }
        })
        .collect()
}

/// Enumerate, snapshot and pick the best physical device for `surface`
pub fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &khr::Surface,
    surface: vk::SurfaceKHR,
    requirements: &DeviceRequirements,
) -> Result<SelectedDevice> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .map_err(RendererError::vulkan("vkEnumeratePhysicalDevices"))?;

    if devices.is_empty() {
        return Err(RendererError::NoDeviceFound.into());
    }

    let candidates = usable_candidates(devices.into_iter().map(|device| {
        (
            device,
            PhysicalDeviceCandidate::query(instance, surface_loader, surface, device),
        )
    }));
    if candidates.is_empty() {
        return Err(RendererError::NoSuitableDevice.into());
    }

    let selected = select_best(candidates, requirements)?;

    log::info!(
        "Selected GPU: {} ({:?}, score {})",
        selected.candidate.name,
        selected.candidate.device_type,
        selected.score
    );
    log::info!(
        "API Version: {}.{}.{}",
        vk::api_version_major(selected.candidate.api_version),
        vk::api_version_minor(selected.candidate.api_version),
        vk::api_version_patch(selected.candidate.api_version)
    );
    log::info!(
        "Queue families: graphics={}, present={}",
        selected.queue_families.graphics_family,
        selected.queue_families.present_family
    );

    Ok(selected)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    /// Eligible integrated GPU with no bonus features and no VRAM
    pub(crate) fn bare_candidate() -> PhysicalDeviceCandidate {
        let requirements = DeviceRequirements::new(true);
        PhysicalDeviceCandidate {
            handle: vk::PhysicalDevice::null(),
            name: "test gpu".to_string(),
            device_type: vk::PhysicalDeviceType::INTEGRATED_GPU,
            api_version: vk::API_VERSION_1_3,
            features: vk::PhysicalDeviceFeatures::default(),
            timeline_semaphores: false,
            dynamic_rendering: true,
            device_local_heaps: Vec::new(),
            queue_families: QueueFamilySearch {
                graphics_family: Some(0),
                present_family: Some(0),
            },
            extensions: requirements.extensions.iter().map(|e| (*e).to_owned()).collect(),
            surface_format_count: 1,
            present_mode_count: 1,
        }
    }

    #[test]
    fn split_graphics_and_present_families() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::TRANSFER)];
        let search = resolve_queue_families(&families, |index| Ok(index == 1)).unwrap();

        assert!(search.is_complete());
        let indices = search.build().unwrap();
        assert_eq!(indices.graphics_family, 0);
        assert_eq!(indices.present_family, 1);
        assert!(!indices.are_same());
        assert_eq!(indices.unique_families(), vec![0, 1]);
    }

    #[test]
    fn resolution_stops_once_complete() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS),
        ];
        let mut queried = Vec::new();
        let search = resolve_queue_families(&families, |index| {
            queried.push(index);
            Ok(true)
        })
        .unwrap();

        assert_eq!(queried, vec![0]);
        let indices = search.build().unwrap();
        assert!(indices.are_same());
        assert_eq!(indices.unique_families(), vec![0]);
    }

    #[test]
    fn later_family_serving_both_replaces_an_earlier_split() {
        let families = [family(vk::QueueFlags::GRAPHICS), family(vk::QueueFlags::GRAPHICS)];
        let mut queried = Vec::new();
        let search = resolve_queue_families(&families, |index| {
            queried.push(index);
            Ok(index == 1)
        })
        .unwrap();

        // Present is asked for every family visited
        assert_eq!(queried, vec![0, 1]);
        let indices = search.build().unwrap();
        assert_eq!((indices.graphics_family, indices.present_family), (1, 1));
        assert!(indices.are_same());
        assert_eq!(indices.unique_families(), vec![1]);
    }

    #[test]
    fn missing_present_support_leaves_search_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let search = resolve_queue_families(&families, |_| Ok(false)).unwrap();

        assert!(!search.is_complete());
        assert_eq!(search.build(), None);
    }

    #[test]
    fn present_query_errors_propagate() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let result = resolve_queue_families(&families, |_| {
            Err(RendererError::vulkan("surface support")(vk::Result::ERROR_SURFACE_LOST_KHR).into())
        });
        assert!(result.is_err());
    }

    #[test]
    fn failed_snapshot_skips_only_that_device() {
        use ash::vk::Handle;

        let mut healthy = bare_candidate();
        healthy.name = "healthy".to_string();
        let snapshots = vec![
            (
                vk::PhysicalDevice::from_raw(1),
                Err(RendererError::vulkan("vkGetPhysicalDeviceSurfaceFormatsKHR")(vk::Result::ERROR_SURFACE_LOST_KHR).into()),
            ),
            (vk::PhysicalDevice::from_raw(2), Ok(healthy)),
        ];

        let candidates = usable_candidates(snapshots);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "healthy");

        let selected = select_best(candidates, &DeviceRequirements::new(true)).unwrap();
        assert_eq!(selected.candidate.name, "healthy");
    }

    #[test]
    fn discrete_gpu_with_anisotropy_and_geometry_scores_1154() {
        let mut gpu = bare_candidate();
        gpu.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        gpu.device_local_heaps = vec![4 * GIB];
        gpu.features.sampler_anisotropy = vk::TRUE;
        gpu.features.geometry_shader = vk::TRUE;

        assert_eq!(gpu.score(), 1000 + 4 + 100 + 50);
    }

    #[test]
    fn every_bonus_adds_up() {
        let mut gpu = bare_candidate();
        gpu.features.sampler_anisotropy = vk::TRUE;
        gpu.features.geometry_shader = vk::TRUE;
        gpu.features.tessellation_shader = vk::TRUE;
        gpu.features.wide_lines = vk::TRUE;
        gpu.features.fill_mode_non_solid = vk::TRUE;
        gpu.features.multi_draw_indirect = vk::TRUE;
        gpu.features.shader_int64 = vk::TRUE;
        gpu.timeline_semaphores = true;
        // Partial GiB is truncated per heap
        gpu.device_local_heaps = vec![2 * GIB + GIB / 2, GIB];

        assert_eq!(gpu.score(), 100 + 50 + 50 + 20 + 20 + 30 + 40 + 150 + 2 + 1);
    }

    #[test]
    fn superset_profile_never_scores_lower() {
        let base = bare_candidate();
        let toggles: [fn(&mut PhysicalDeviceCandidate); 9] = [
            |c| c.device_type = vk::PhysicalDeviceType::DISCRETE_GPU,
            |c| c.device_local_heaps.push(8 * GIB),
            |c| c.features.sampler_anisotropy = vk::TRUE,
            |c| c.features.geometry_shader = vk::TRUE,
            |c| c.features.tessellation_shader = vk::TRUE,
            |c| c.features.wide_lines = vk::TRUE,
            |c| c.features.multi_draw_indirect = vk::TRUE,
            |c| c.features.shader_int64 = vk::TRUE,
            |c| c.timeline_semaphores = true,
        ];

        let mut accumulated = base.clone();
        for toggle in toggles {
            let before = accumulated.score();
            toggle(&mut accumulated);
            assert!(accumulated.score() > before);

            let mut single = base.clone();
            toggle(&mut single);
            assert!(single.score() > base.score());
        }
    }

    #[test]
    fn timeline_bonus_comes_from_extended_query_only() {
        let mut gpu = bare_candidate();
        let base = gpu.score();
        gpu.timeline_semaphores = true;
        assert_eq!(gpu.score(), base + 150);
    }

    #[test]
    fn ineligible_devices_are_rejected() {
        let requirements = DeviceRequirements::new(false);

        let mut no_present = bare_candidate();
        no_present.queue_families.present_family = None;
        assert_eq!(
            no_present.check_eligibility(&requirements),
            Err(Rejection::IncompleteQueueFamilies)
        );

        let mut no_swapchain = bare_candidate();
        no_swapchain.extensions.retain(|e| e.as_c_str() != khr::Swapchain::name());
        assert!(matches!(
            no_swapchain.check_eligibility(&requirements),
            Err(Rejection::MissingExtension(name)) if name == "VK_KHR_swapchain"
        ));

        let mut no_formats = bare_candidate();
        no_formats.surface_format_count = 0;
        assert_eq!(no_formats.check_eligibility(&requirements), Err(Rejection::NoSurfaceFormats));

        let mut no_modes = bare_candidate();
        no_modes.present_mode_count = 0;
        assert_eq!(no_modes.check_eligibility(&requirements), Err(Rejection::NoPresentModes));

        let mut old = bare_candidate();
        old.api_version = vk::API_VERSION_1_2;
        assert!(matches!(old.check_eligibility(&requirements), Err(Rejection::ApiVersionTooOld(_))));
    }

    #[test]
    fn extended_requirements_add_three_extensions() {
        assert_eq!(DeviceRequirements::new(false).extensions.len(), 2);

        let extended = DeviceRequirements::new(true);
        assert_eq!(extended.extensions.len(), 5);
        assert!(extended.extensions.contains(&khr::DynamicRendering::name()));

        let mut gpu = bare_candidate();
        gpu.extensions.retain(|e| e.as_c_str() != khr::TimelineSemaphore::name());
        assert!(gpu.check_eligibility(&DeviceRequirements::new(false)).is_ok());
        assert!(gpu.check_eligibility(&extended).is_err());
    }

    #[test]
    fn ineligible_device_never_wins_on_score() {
        let requirements = DeviceRequirements::new(false);

        let mut monster = bare_candidate();
        monster.name = "monster".into();
        monster.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;
        monster.device_local_heaps = vec![24 * GIB];
        monster.present_mode_count = 0;

        let mut modest = bare_candidate();
        modest.name = "modest".into();

        let selected = select_best(vec![monster, modest], &requirements).unwrap();
        assert_eq!(selected.candidate.name, "modest");
    }

    #[test]
    fn ties_keep_the_first_device() {
        let requirements = DeviceRequirements::new(false);
        let mut first = bare_candidate();
        first.name = "first".into();
        let mut second = bare_candidate();
        second.name = "second".into();

        let selected = select_best(vec![first, second], &requirements).unwrap();
        assert_eq!(selected.candidate.name, "first");
        assert_eq!(selected.score, 0);
    }

    #[test]
    fn higher_score_later_in_the_list_wins() {
        let requirements = DeviceRequirements::new(false);
        let first = bare_candidate();
        let mut second = bare_candidate();
        second.name = "discrete".into();
        second.device_type = vk::PhysicalDeviceType::DISCRETE_GPU;

        let selected = select_best(vec![first, second], &requirements).unwrap();
        assert_eq!(selected.candidate.name, "discrete");
        assert_eq!(selected.score, 1000);
    }

    #[test]
    fn empty_and_all_ineligible_fail_differently() {
        let requirements = DeviceRequirements::new(false);

        assert!(matches!(
            select_best(Vec::new(), &requirements),
            Err(RendererError::NoDeviceFound)
        ));

        let mut broken = bare_candidate();
        broken.surface_format_count = 0;
        assert!(matches!(
            select_best(vec![broken], &requirements),
            Err(RendererError::NoSuitableDevice)
        ));
    }
}
