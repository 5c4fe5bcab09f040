// Validation output and object names
//
// The messenger is the only process-wide debug state: one callback,
// registered right after instance creation, forwarding into `log`.

use anyhow::{Context, Result};
use ash::extensions::ext::DebugUtils;
use ash::vk::{self, Handle};
use std::ffi::{CStr, CString};

use super::RendererError;

pub fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

pub fn create_messenger(debug_utils: &DebugUtils) -> Result<vk::DebugUtilsMessengerEXT> {
    let create_info = messenger_create_info();
    unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .map_err(RendererError::vulkan("vkCreateDebugUtilsMessengerEXT"))
        .context("Failed to create debug messenger")
}

fn type_label(message_type: vk::DebugUtilsMessageTypeFlagsEXT) -> &'static str {
    if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE) {
        "PERF"
    } else if message_type.contains(vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION) {
        "VALID"
    } else {
        "GENERAL"
    }
}

fn level_for(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::Level::Error
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::Level::Warn
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        log::Level::Info
    } else {
        log::Level::Debug
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    log::log!(
        level_for(message_severity),
        "[Vulkan][{}] {}",
        type_label(message_type),
        message.to_string_lossy()
    );

    vk::FALSE
}

/// Attaches readable names to GPU objects for validation and capture tools.
/// A namer without debug utils does nothing.
pub struct DebugNamer<'a> {
    debug_utils: Option<&'a DebugUtils>,
    device: vk::Device,
}

impl<'a> DebugNamer<'a> {
    pub fn new(debug_utils: Option<&'a DebugUtils>, device: vk::Device) -> Self {
        Self { debug_utils, device }
    }

    pub fn name<H: Handle>(&self, handle: H, name: &str) {
        let Some(debug_utils) = self.debug_utils else {
            return;
        };
        let Ok(name) = CString::new(name) else {
            return;
        };

        let name_info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(H::TYPE)
            .object_handle(handle.as_raw())
            .object_name(&name);

        if let Err(e) = unsafe { debug_utils.set_debug_utils_object_name(self.device, &name_info) } {
            log::warn!("Failed to name {:?} {:?}: {:?}", H::TYPE, name, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_maps_to_log_level() {
        use vk::DebugUtilsMessageSeverityFlagsEXT as S;
        assert_eq!(level_for(S::ERROR), log::Level::Error);
        assert_eq!(level_for(S::WARNING), log::Level::Warn);
        assert_eq!(level_for(S::INFO), log::Level::Info);
        assert_eq!(level_for(S::VERBOSE), log::Level::Debug);
    }

    #[test]
    fn performance_label_wins_over_validation() {
        use vk::DebugUtilsMessageTypeFlagsEXT as T;
        assert_eq!(type_label(T::PERFORMANCE | T::VALIDATION), "PERF");
        assert_eq!(type_label(T::VALIDATION), "VALID");
        assert_eq!(type_label(T::GENERAL), "GENERAL");
    }

    #[test]
    fn messenger_listens_to_info_and_above() {
        let info = messenger_create_info();
        assert!(info
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO));
        assert!(!info
            .message_severity
            .contains(vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE));
        assert!(info.pfn_user_callback.is_some());
    }

    #[test]
    fn namer_without_debug_utils_is_a_no_op() {
        let namer = DebugNamer::new(None, vk::Device::null());
        namer.name(vk::Fence::null(), "InFlightFence_Frame0");
    }
}
