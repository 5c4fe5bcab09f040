// Renderer - the capability surface the application talks to
//
// initialize -> draw_frame* -> dispose. Initialize is one-shot and leaves
// nothing behind on failure. Dispose idles the GPU, releases everything and
// may be called any number of times.

use anyhow::Result;

use crate::backend::{ContextOptions, FrameDriver, PresentationTarget, RenderContext, RendererError, ShaderBytes};
use crate::point::PointRenderData;

#[derive(Default)]
pub struct Renderer {
    driver: Option<FrameDriver>,
    disposed: bool,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.driver.is_some()
    }

    /// Full bootstrap against `target`. On error the renderer stays uninitialized.
    pub fn initialize<W: PresentationTarget>(
        &mut self,
        target: &W,
        options: ContextOptions,
        shaders: &ShaderBytes,
    ) -> Result<()> {
        if self.disposed {
            return Err(RendererError::Disposed.into());
        }
        if self.driver.is_some() {
            return Err(RendererError::AlreadyInitialized.into());
        }

        let context = RenderContext::create(target, options, shaders)?;
        self.driver = Some(FrameDriver::new(context));
        Ok(())
    }

    pub fn draw_frame(&mut self, point: &PointRenderData) -> Result<()> {
        if self.disposed {
            return Err(RendererError::Disposed.into());
        }
        match self.driver.as_mut() {
            Some(driver) => driver.draw_frame(point),
            None => Err(RendererError::NotInitialized.into()),
        }
    }

    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        if let Some(mut driver) = self.driver.take() {
            driver.dispose();
        }
        self.disposed = true;
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.dispose();
    }
}
