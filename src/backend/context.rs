// Render context - every GPU handle the renderer owns
//
// Built by one linear bootstrap. Each step records what it created in a
// ledger; teardown walks the ledger backwards, so destruction is always the
// exact reverse of creation whether we are unwinding a failed startup or
// shutting down normally. Every release is guarded by a null check and
// nulls the handle afterwards, so teardown runs at most once per handle.

use anyhow::{Context, Result};
use ash::extensions::{ext::DebugUtils, khr};
use ash::{vk, Entry};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};

use super::debug::{self, DebugNamer};
use super::selector::{self, DeviceRequirements};
use super::shader::{self, ShaderBytes};
use super::sync::{self as frame_sync, FrameSync};
use super::{commands, device, instance, pipeline, swapchain, RendererError, MAX_FRAMES_IN_FLIGHT};

/// Window side of the renderer: native handles plus the drawable size in pixels
pub trait PresentationTarget: HasRawWindowHandle + HasRawDisplayHandle {
    fn drawable_size(&self) -> (u32, u32);
}

/// Startup switches for the optional bootstrap stages
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextOptions {
    /// Validation layer + debug messenger
    pub validation: bool,
    /// Debug names on GPU objects (needs validation for debug utils)
    pub object_names: bool,
    /// Require timeline semaphore, descriptor indexing and dynamic rendering extensions
    pub extended_features: bool,
}

/// Groups of handles in creation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Instance,
    DebugMessenger,
    Surface,
    Device,
    Swapchain,
    ImageViews,
    CommandPool,
    SyncObjects,
    ShaderModules,
    PipelineLayout,
    Pipeline,
}

/// What has been created so far, in order
#[derive(Debug, Default)]
pub struct ResourceLedger {
    created: Vec<ResourceKind>,
}

impl ResourceLedger {
    pub fn record(&mut self, kind: ResourceKind) {
        self.created.push(kind);
    }

    pub fn is_empty(&self) -> bool {
        self.created.is_empty()
    }

    /// Empties the ledger, newest first
    pub fn drain_reverse(&mut self) -> impl Iterator<Item = ResourceKind> {
        std::mem::take(&mut self.created).into_iter().rev()
    }
}

pub struct RenderContext {
    // Keeps the Vulkan library loaded for the lifetime of the handles
    _entry: Entry,
    ledger: ResourceLedger,

    pub instance: Option<ash::Instance>,
    pub debug_utils: Option<DebugUtils>,
    pub debug_messenger: vk::DebugUtilsMessengerEXT,

    pub surface_loader: Option<khr::Surface>,
    pub surface: vk::SurfaceKHR,

    pub physical_device: vk::PhysicalDevice,
    pub device: Option<ash::Device>,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    pub swapchain_loader: Option<khr::Swapchain>,
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_format: vk::SurfaceFormatKHR,
    pub swapchain_extent: vk::Extent2D,
    pub swapchain_images: Vec<vk::Image>,
    pub swapchain_image_views: Vec<vk::ImageView>,

    pub command_pool: vk::CommandPool,
    /// One per frame in flight
    pub command_buffers: Vec<vk::CommandBuffer>,
    /// One per frame in flight
    pub frames: Vec<FrameSync>,
    /// One per swapchain image, indexed by the acquired image index
    pub render_finished: Vec<vk::Semaphore>,

    pub vertex_shader: vk::ShaderModule,
    pub fragment_shader: vk::ShaderModule,
    pub pipeline_layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
}

impl RenderContext {
    /// Full bootstrap. On any failure everything created so far is
    /// destroyed before the error is returned.
    pub fn create<W: PresentationTarget>(
        target: &W,
        options: ContextOptions,
        shaders: &ShaderBytes,
    ) -> Result<Self> {
        let entry = instance::load_entry()?;
        let mut context = Self::empty(entry);

        if let Err(e) = context.build(target, options, shaders) {
            log::error!("Renderer bootstrap failed, releasing partial context");
            context.destroy();
            return Err(e);
        }

        log::info!("Vulkan initialized successfully!");
        Ok(context)
    }

    fn empty(entry: Entry) -> Self {
        Self {
            _entry: entry,
            ledger: ResourceLedger::default(),
            instance: None,
            debug_utils: None,
            debug_messenger: vk::DebugUtilsMessengerEXT::null(),
            surface_loader: None,
            surface: vk::SurfaceKHR::null(),
            physical_device: vk::PhysicalDevice::null(),
            device: None,
            graphics_queue: vk::Queue::null(),
            present_queue: vk::Queue::null(),
            swapchain_loader: None,
            swapchain: vk::SwapchainKHR::null(),
            swapchain_format: vk::SurfaceFormatKHR::default(),
            swapchain_extent: vk::Extent2D::default(),
            swapchain_images: Vec::new(),
            swapchain_image_views: Vec::new(),
            command_pool: vk::CommandPool::null(),
            command_buffers: Vec::new(),
            frames: Vec::new(),
            render_finished: Vec::new(),
            vertex_shader: vk::ShaderModule::null(),
            fragment_shader: vk::ShaderModule::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
        }
    }

    fn build<W: PresentationTarget>(
        &mut self,
        target: &W,
        options: ContextOptions,
        shaders: &ShaderBytes,
    ) -> Result<()> {
        // ─────────────────────────────────────────────────────────────────────
        // Instance + validation sink
        // ─────────────────────────────────────────────────────────────────────
        let validation = options.validation && instance::validation_layer_available(&self._entry);
        if options.validation && !validation {
            log::warn!("Validation requested but VK_LAYER_KHRONOS_validation is not installed");
        }

        let display_handle = target.raw_display_handle();
        let instance = instance::create_instance(&self._entry, display_handle, validation)?;
        self.surface_loader = Some(khr::Surface::new(&self._entry, &instance));
        self.instance = Some(instance);
        self.ledger.record(ResourceKind::Instance);
        let instance = self.instance()?.clone();

        if validation {
            let debug_utils = DebugUtils::new(&self._entry, &instance);
            self.debug_messenger = debug::create_messenger(&debug_utils)?;
            self.debug_utils = Some(debug_utils);
            self.ledger.record(ResourceKind::DebugMessenger);
        }

        // ─────────────────────────────────────────────────────────────────────
        // Surface
        // ─────────────────────────────────────────────────────────────────────
        self.surface = unsafe {
            ash_window::create_surface(
                &self._entry,
                &instance,
                display_handle,
                target.raw_window_handle(),
                None,
            )
        }
        .map_err(RendererError::vulkan("vkCreateSurfaceKHR"))
        .context("Failed to create window surface")?;
        self.ledger.record(ResourceKind::Surface);

        // ─────────────────────────────────────────────────────────────────────
        // Physical + logical device
        // ─────────────────────────────────────────────────────────────────────
        let requirements = DeviceRequirements::new(options.extended_features);
        let surface_loader = self.surface_loader()?.clone();
        let selected = selector::pick_physical_device(&instance, &surface_loader, self.surface, &requirements)?;
        device::log_memory_budget(&instance, selected.candidate.handle);

        let logical = device::create_logical_device(&instance, &selected, &requirements)?;
        self.physical_device = selected.candidate.handle;
        self.swapchain_loader = Some(khr::Swapchain::new(&instance, &logical.device));
        self.graphics_queue = logical.graphics_queue;
        self.present_queue = logical.present_queue;
        self.device = Some(logical.device);
        self.ledger.record(ResourceKind::Device);
        let device = self.device()?.clone();

        // ─────────────────────────────────────────────────────────────────────
        // Swapchain + views
        // ─────────────────────────────────────────────────────────────────────
        let (width, height) = target.drawable_size();
        let swapchain_loader = self.swapchain_loader()?.clone();
        let bundle = swapchain::create_swapchain(
            self.physical_device,
            &surface_loader,
            self.surface,
            &swapchain_loader,
            &selected.queue_families,
            width,
            height,
        )?;
        self.swapchain = bundle.swapchain;
        self.swapchain_format = bundle.format;
        self.swapchain_extent = bundle.extent;
        self.ledger.record(ResourceKind::Swapchain);

        self.swapchain_images = unsafe { swapchain_loader.get_swapchain_images(self.swapchain) }
            .map_err(RendererError::vulkan("vkGetSwapchainImagesKHR"))?;
        log::info!("Created swapchain with {} images", self.swapchain_images.len());

        self.swapchain_image_views =
            swapchain::create_image_views(&device, &self.swapchain_images, self.swapchain_format.format)?;
        self.ledger.record(ResourceKind::ImageViews);

        // ─────────────────────────────────────────────────────────────────────
        // Commands + synchronization
        // ─────────────────────────────────────────────────────────────────────
        self.command_pool = commands::create_command_pool(&device, selected.queue_families.graphics_family)?;
        self.ledger.record(ResourceKind::CommandPool);
        self.command_buffers = commands::allocate_command_buffers(&device, self.command_pool, MAX_FRAMES_IN_FLIGHT)?;

        self.ledger.record(ResourceKind::SyncObjects);
        for _ in 0..MAX_FRAMES_IN_FLIGHT {
            let frame = FrameSync::new(&device)?;
            self.frames.push(frame);
        }
        self.render_finished =
            frame_sync::create_render_finished_semaphores(&device, self.swapchain_images.len())?;

        // ─────────────────────────────────────────────────────────────────────
        // Shaders + pipeline
        // ─────────────────────────────────────────────────────────────────────
        self.ledger.record(ResourceKind::ShaderModules);
        self.vertex_shader =
            shader::create_shader_module(&device, &shaders.vertex).context("Vertex shader")?;
        self.fragment_shader =
            shader::create_shader_module(&device, &shaders.fragment).context("Fragment shader")?;

        self.pipeline_layout = pipeline::create_pipeline_layout(&device)?;
        self.ledger.record(ResourceKind::PipelineLayout);

        self.pipeline = pipeline::create_graphics_pipeline(
            &device,
            self.pipeline_layout,
            self.swapchain_extent,
            self.swapchain_format.format,
            self.vertex_shader,
            self.fragment_shader,
        )?;
        self.ledger.record(ResourceKind::Pipeline);

        if options.object_names {
            self.name_objects(&device);
        }

        Ok(())
    }

    fn name_objects(&self, device: &ash::Device) {
        if self.debug_utils.is_none() {
            log::debug!("Object names requested without debug utils, skipping");
            return;
        }
        let namer = DebugNamer::new(self.debug_utils.as_ref(), device.handle());

        namer.name(self.swapchain, "MainSwapchain");
        namer.name(self.command_pool, "GraphicsCommandPool");
        for (i, &cmd) in self.command_buffers.iter().enumerate() {
            namer.name(cmd, &format!("CommandBuffer_Frame{i}"));
        }
        for (i, frame) in self.frames.iter().enumerate() {
            namer.name(frame.image_available, &format!("ImageAvailable_Frame{i}"));
            namer.name(frame.in_flight_fence, &format!("InFlightFence_Frame{i}"));
        }
        for (i, &semaphore) in self.render_finished.iter().enumerate() {
            namer.name(semaphore, &format!("RenderFinished_Image{i}"));
        }
        for (i, &view) in self.swapchain_image_views.iter().enumerate() {
            namer.name(view, &format!("SwapchainImageView_{i}"));
        }
        namer.name(self.pipeline, "PointRenderingPipeline");
    }

    pub fn instance(&self) -> Result<&ash::Instance> {
        self.instance.as_ref().ok_or(RendererError::NotInitialized).map_err(Into::into)
    }

    pub fn device(&self) -> Result<&ash::Device> {
        self.device.as_ref().ok_or(RendererError::NotInitialized).map_err(Into::into)
    }

    pub fn surface_loader(&self) -> Result<&khr::Surface> {
        self.surface_loader.as_ref().ok_or(RendererError::NotInitialized).map_err(Into::into)
    }

    pub fn swapchain_loader(&self) -> Result<&khr::Swapchain> {
        self.swapchain_loader.as_ref().ok_or(RendererError::NotInitialized).map_err(Into::into)
    }

    /// Idle the device, then release everything newest first.
    /// Safe to call more than once.
    pub fn destroy(&mut self) {
        if self.ledger.is_empty() {
            return;
        }

        log::info!("Cleaning up Vulkan resources...");

        if let Some(device) = &self.device {
            // Nothing may still be in flight when handles go away
            if let Err(e) = unsafe { device.device_wait_idle() } {
                log::warn!("vkDeviceWaitIdle failed during teardown: {:?}", e);
            }
        }

        let order: Vec<_> = self.ledger.drain_reverse().collect();
        for kind in order {
            self.release(kind);
        }

        log::info!("Cleanup complete");
    }

    fn release(&mut self, kind: ResourceKind) {
        log::debug!("Releasing {:?}", kind);

        match kind {
            ResourceKind::Pipeline => {
                if let Some(device) = &self.device {
                    if self.pipeline != vk::Pipeline::null() {
                        unsafe { device.destroy_pipeline(self.pipeline, None) };
                    }
                }
                self.pipeline = vk::Pipeline::null();
            }
            ResourceKind::PipelineLayout => {
                if let Some(device) = &self.device {
                    if self.pipeline_layout != vk::PipelineLayout::null() {
                        unsafe { device.destroy_pipeline_layout(self.pipeline_layout, None) };
                    }
                }
                self.pipeline_layout = vk::PipelineLayout::null();
            }
            ResourceKind::ShaderModules => {
                if let Some(device) = &self.device {
                    for module in [self.fragment_shader, self.vertex_shader] {
                        if module != vk::ShaderModule::null() {
                            unsafe { device.destroy_shader_module(module, None) };
                        }
                    }
                }
                self.fragment_shader = vk::ShaderModule::null();
                self.vertex_shader = vk::ShaderModule::null();
            }
            ResourceKind::SyncObjects => {
                if let Some(device) = &self.device {
                    frame_sync::destroy_semaphores(device, &mut self.render_finished);
                    for frame in self.frames.iter_mut().rev() {
                        frame.destroy(device);
                    }
                }
                self.render_finished.clear();
                self.frames.clear();
            }
            ResourceKind::CommandPool => {
                if let Some(device) = &self.device {
                    // Also frees the command buffers
                    if self.command_pool != vk::CommandPool::null() {
                        unsafe { device.destroy_command_pool(self.command_pool, None) };
                    }
                }
                self.command_buffers.clear();
                self.command_pool = vk::CommandPool::null();
            }
            ResourceKind::ImageViews => {
                if let Some(device) = &self.device {
                    for &view in self.swapchain_image_views.iter().rev() {
                        unsafe { device.destroy_image_view(view, None) };
                    }
                }
                self.swapchain_image_views.clear();
            }
            ResourceKind::Swapchain => {
                if let Some(loader) = &self.swapchain_loader {
                    if self.swapchain != vk::SwapchainKHR::null() {
                        unsafe { loader.destroy_swapchain(self.swapchain, None) };
                    }
                }
                // Images belong to the swapchain
                self.swapchain_images.clear();
                self.swapchain = vk::SwapchainKHR::null();
                self.swapchain_format = vk::SurfaceFormatKHR::default();
                self.swapchain_extent = vk::Extent2D::default();
            }
            ResourceKind::Device => {
                self.swapchain_loader = None;
                self.graphics_queue = vk::Queue::null();
                self.present_queue = vk::Queue::null();
                self.physical_device = vk::PhysicalDevice::null();
                if let Some(device) = self.device.take() {
                    unsafe { device.destroy_device(None) };
                }
            }
            ResourceKind::Surface => {
                if let Some(loader) = &self.surface_loader {
                    if self.surface != vk::SurfaceKHR::null() {
                        unsafe { loader.destroy_surface(self.surface, None) };
                    }
                }
                self.surface = vk::SurfaceKHR::null();
            }
            ResourceKind::DebugMessenger => {
                if let Some(debug_utils) = self.debug_utils.take() {
                    if self.debug_messenger != vk::DebugUtilsMessengerEXT::null() {
                        unsafe { debug_utils.destroy_debug_utils_messenger(self.debug_messenger, None) };
                    }
                }
                self.debug_messenger = vk::DebugUtilsMessengerEXT::null();
            }
            ResourceKind::Instance => {
                self.surface_loader = None;
                if let Some(instance) = self.instance.take() {
                    unsafe { instance.destroy_instance(None) };
                }
            }
        }
    }
}

impl Drop for RenderContext {
    fn drop(&mut self) {
        self.destroy();
    }
}
