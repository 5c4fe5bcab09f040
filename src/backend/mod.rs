// Backend module - Vulkan abstraction layer
//
// Thin wrappers around ash. Bootstrap lives in `context`, the per-frame
// sequence in `frame`; everything else is one builder per object kind.

pub mod commands;
pub mod context;
pub mod debug;
pub mod device;
pub mod error;
pub mod frame;
pub mod instance;
pub mod pipeline;
pub mod selector;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use context::{ContextOptions, PresentationTarget, RenderContext};
pub use error::RendererError;
pub use frame::FrameDriver;
pub use shader::ShaderBytes;

/// Frames the CPU may record ahead of the GPU
pub const MAX_FRAMES_IN_FLIGHT: usize = 2;
