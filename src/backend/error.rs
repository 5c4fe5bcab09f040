// Renderer error taxonomy
//
// Every failure is fatal to the caller: bootstrap errors abort startup,
// steady-state errors end the frame loop. Functions return anyhow::Result
// and raise these so callers can downcast to the specific case.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RendererError {
    /// The instance enumerated zero physical devices
    #[error("No Vulkan-compatible GPU found on this system")]
    NoDeviceFound,

    /// Devices exist but none passed the eligibility checks
    #[error("No suitable GPU found for the point renderer")]
    NoSuitableDevice,

    /// The chosen queue family cannot present to the window surface
    #[error("GPU cannot present to the window surface")]
    MissingSurfaceSupport,

    /// The frame driver only knows two image layout transitions
    #[error("Unsupported image layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// A Vulkan call returned a non-success code
    #[error("Vulkan call `{operation}` failed: {result:?}")]
    Vulkan {
        operation: &'static str,
        result: vk::Result,
    },

    #[error("Shader bytecode is not valid SPIR-V: {0}")]
    InvalidShader(String),

    #[error("Renderer has not been initialized")]
    NotInitialized,

    #[error("Renderer is already initialized")]
    AlreadyInitialized,

    #[error("Renderer has been disposed")]
    Disposed,
}

impl RendererError {
    /// Adapter for `map_err` on raw ash results
    pub fn vulkan(operation: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { operation, result }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vulkan_adapter_keeps_operation_and_code() {
        let err = Err::<(), _>(vk::Result::ERROR_OUT_OF_DATE_KHR)
            .map_err(RendererError::vulkan("acquire"))
            .unwrap_err();

        match err {
            RendererError::Vulkan { operation, result } => {
                assert_eq!(operation, "acquire");
                assert_eq!(result, vk::Result::ERROR_OUT_OF_DATE_KHR);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn typed_errors_survive_anyhow() {
        let err: anyhow::Error = RendererError::NoSuitableDevice.into();
        let err = err.context("Failed to select physical device");

        assert!(matches!(
            err.downcast_ref::<RendererError>(),
            Some(RendererError::NoSuitableDevice)
        ));
    }
}
