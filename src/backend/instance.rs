// Vulkan instance creation
//
// Loads the Vulkan library and creates an API 1.3 instance with the
// surface extensions the window needs. Validation is optional and adds
// the Khronos layer, debug utils and best-practice/sync validation.

use anyhow::{Context, Result};
use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use raw_window_handle::RawDisplayHandle;
use std::ffi::{c_char, CStr, CString};

use super::RendererError;

const APP_NAME: &str = "Point Renderer";
const ENGINE_NAME: &str = "Point Engine";
const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

const VALIDATION_FEATURES: [vk::ValidationFeatureEnableEXT; 2] = [
    vk::ValidationFeatureEnableEXT::BEST_PRACTICES,
    vk::ValidationFeatureEnableEXT::SYNCHRONIZATION_VALIDATION,
];

pub fn load_entry() -> Result<Entry> {
    unsafe { Entry::load() }.context("Failed to load Vulkan library. Is Vulkan installed?")
}

/// True when the Khronos validation layer is installed
pub fn validation_layer_available(entry: &Entry) -> bool {
    match entry.enumerate_instance_layer_properties() {
        Ok(layers) => layers
            .iter()
            .any(|layer| unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) } == VALIDATION_LAYER),
        Err(e) => {
            log::warn!("Failed to enumerate instance layers: {:?}", e);
            false
        }
    }
}

/// Instance extensions: whatever the display needs, plus debug utils when validating
pub fn instance_extensions(window_extensions: &[*const c_char], enable_validation: bool) -> Vec<*const c_char> {
    let mut extensions = window_extensions.to_vec();
    if enable_validation {
        extensions.push(DebugUtils::name().as_ptr());
    }
    extensions
}

pub fn create_instance(
    entry: &Entry,
    display_handle: RawDisplayHandle,
    enable_validation: bool,
) -> Result<ash::Instance> {
    let app_name = CString::new(APP_NAME)?;
    let engine_name = CString::new(ENGINE_NAME)?;

    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(&engine_name)
        .engine_version(vk::make_api_version(0, 1, 0, 0))
        .api_version(vk::API_VERSION_1_3);

    let window_extensions = ash_window::enumerate_required_extensions(display_handle)
        .map_err(RendererError::vulkan("vkEnumerateInstanceExtensionProperties"))
        .context("Window system has no Vulkan surface support")?;
    let extensions = instance_extensions(window_extensions, enable_validation);

    let layer_names = if enable_validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    };

    let mut validation_features =
        vk::ValidationFeaturesEXT::builder().enabled_validation_features(&VALIDATION_FEATURES);

    let mut create_info = vk::InstanceCreateInfo::builder()
        .application_info(&app_info)
        .enabled_extension_names(&extensions)
        .enabled_layer_names(&layer_names);
    if enable_validation {
        create_info = create_info.push_next(&mut validation_features);
    }

    let instance = unsafe { entry.create_instance(&create_info, None) }
        .map_err(RendererError::vulkan("vkCreateInstance"))
        .context("Failed to create Vulkan instance")?;

    log::info!(
        "Created Vulkan instance ({} extensions, validation {})",
        extensions.len(),
        if enable_validation { "on" } else { "off" }
    );

    Ok(instance)
}
