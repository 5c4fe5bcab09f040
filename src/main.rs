// =============================================================================
// POINT RENDERER - one point, two frames in flight, Vulkan 1.3
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit App (window, input, redraw loop)                         │
// │    └── Renderer (initialize / draw_frame / dispose)             │
// │          └── FrameDriver (per-frame state machine)              │
// │                └── RenderContext (every GPU handle, ledgered)   │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Wait for this slot's fence
// 2. Acquire swapchain image
// 3. Reset fence + command buffer
// 4. Record: barrier, clear, draw one point, barrier
// 5. Submit, then present
// 6. Advance to the other slot
//
// =============================================================================

mod backend;
mod config;
mod point;
mod renderer;

use anyhow::{Context, Result};
use backend::{PresentationTarget, ShaderBytes};
use config::Config;
use point::PointRenderData;
use renderer::Renderer;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes, WindowId},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting point renderer");
    log::info!("Window: {}x{}", config.window.width, config.window.height);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    if let Some(e) = app.failure.take() {
        return Err(e);
    }
    Ok(())
}

/// Initialize logging with optional file output for validation errors
fn init_logging(config: &Config) {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::from_default_env();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    builder.init();

    // Create/clear log file if enabled
    if config.debug.log_to_file {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
        {
            let _ = writeln!(file, "=== Point Renderer Log ===");
            let _ = writeln!(file, "Started: {:?}", std::time::SystemTime::now());
            let _ = writeln!(file);
        }
    }
}

impl PresentationTarget for Window {
    fn drawable_size(&self) -> (u32, u32) {
        let size = self.inner_size();
        (size.width, size.height)
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    point: PointRenderData,
    window: Option<Arc<Window>>,
    renderer: Renderer,
    /// First fatal error, returned from main after the loop exits
    failure: Option<anyhow::Error>,
}

impl App {
    fn new(config: Config) -> Self {
        let point = config.point.to_point();
        Self {
            config,
            point,
            window: None,
            renderer: Renderer::new(),
            failure: None,
        }
    }

    fn init_renderer(&mut self, window: &Window) -> Result<()> {
        log::info!("Initializing Vulkan...");

        let shaders = ShaderBytes::load(&self.config.shaders.vertex, &self.config.shaders.fragment)
            .context("Failed to load compiled shaders (is glslc installed?)")?;

        self.renderer
            .initialize(window, self.config.context_options(), &shaders)
            .context("Failed to initialize renderer")
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        self.renderer.dispose();
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:?}", error);
        if self.failure.is_none() {
            self.failure = Some(error);
        }
        self.shutdown(event_loop);
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_resizable(false)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        if let Err(e) = self.init_renderer(&window) {
            self.fail(event_loop, e);
            return;
        }

        self.window = Some(window);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::RedrawRequested => {
                if !self.renderer.is_initialized() {
                    return;
                }
                if let Err(e) = self.renderer.draw_frame(&self.point) {
                    self.fail(event_loop, e.context("Frame failed"));
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}

// =============================================================================
// CLEANUP
// =============================================================================

impl Drop for App {
    fn drop(&mut self) {
        // GPU resources go before the window they present to
        self.renderer.dispose();
        self.window = None;
    }
}
