// =============================================================================
// FRAME PACER - Vulkan frame synchronization demo
// =============================================================================
//
// Renders a small animated scene through a fixed ring of swapchain images,
// keeping at most one frame in flight per image.
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (window, redraw requests)                     │
// │    └── Renderer (owns everything, tears down in reverse)        │
// │          ├── FrameSyncEngine (fences, semaphores, cursor)       │
// │          │     └── ScenePass (records one command buffer)       │
// │          └── Vulkan backend (device, swapchain, pipeline)       │
// └─────────────────────────────────────────────────────────────────┘
//
// FRAME FLOW:
// 1. Advance the animation
// 2. Acquire swapchain image (signals previous slot's semaphore)
// 3. Wait for the slot's last frame, then reset it
// 4. Record the scene
// 5. Submit, present, roll the cursor
//
// =============================================================================

mod backend;
mod config;
mod frame;
mod recording;
mod renderer;
mod scene;

use anyhow::Result;
use config::Config;
use frame::FrameStatus;
use renderer::Renderer;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let (config, source) = Config::load();

    // Initialize logging, then report how the config was found
    init_logging(&config);
    log::info!("Starting frame pacer");
    source.report();
    log::debug!("Config: {:?}", config);
    log::info!(
        "Window: {}x{} ({})",
        config.window.width,
        config.window.height,
        config.window.title
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    if app.failed {
        anyhow::bail!("Renderer stopped on a fatal error");
    }
    Ok(())
}

/// Initialize logging, RUST_LOG overrides the configured level
fn init_logging(config: &Config) {
    use env_logger::Builder;

    let mut builder = Builder::new();
    builder.filter_level(config.log_level());
    builder.parse_default_env();
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

struct App {
    config: Config,
    // Renderer before window: surfaces must go before the window they render to
    renderer: Option<Renderer>,
    window: Option<Window>,
    failed: bool,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            renderer: None,
            window: None,
            failed: false,
        }
    }

    /// Run one frame. Returns false once the loop should stop.
    fn render_frame(&mut self) -> bool {
        let Some(renderer) = self.renderer.as_mut() else {
            return false;
        };

        match renderer.render_frame() {
            Ok(FrameStatus::Presented) => {}
            Ok(FrameStatus::PresentedSuboptimal) => {
                log::debug!("Frame {} presented to a suboptimal surface", renderer.frame());
            }
            Err(e) if e.is_fatal() => {
                log::error!("Fatal frame error: {}", e);
                self.failed = true;
                return false;
            }
            Err(e) => {
                log::warn!("Frame {} skipped: {}", renderer.frame(), e);
            }
        }

        match self.config.debug.frame_limit {
            Some(limit) if renderer.frame() >= limit => {
                log::info!("Frame limit of {} reached", limit);
                false
            }
            _ => true,
        }
    }

    /// Drain the GPU and release everything, renderer first
    fn teardown(&mut self) {
        if let Some(mut renderer) = self.renderer.take() {
            log::info!("Cleaning up Vulkan resources...");
            renderer.shutdown();
            let stats = renderer.stats();
            drop(renderer);
            log::info!(
                "Cleanup complete ({} frames presented, {} skipped)",
                stats.presented,
                stats.skipped
            );
        }
        self.window = None;
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

        // Fixed-size window: the swapchain is never recreated
        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => w,
            Err(e) => {
                log::error!("Failed to create window: {:?}", e);
                self.failed = true;
                event_loop.exit();
                return;
            }
        };

        match Renderer::new(&window, &self.config) {
            Ok(renderer) => self.renderer = Some(renderer),
            Err(e) => {
                log::error!("Failed to initialize Vulkan: {:?}", e);
                self.failed = true;
                event_loop.exit();
                return;
            }
        }

        self.window = Some(window);
    }

    /// Handle window events.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                event_loop.exit();
            }

            WindowEvent::RedrawRequested => {
                if !self.render_frame() {
                    event_loop.exit();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed() && event.physical_key == PhysicalKey::Code(KeyCode::Escape) {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Keep redrawing as fast as presentation allows.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.teardown();
    }
}

impl Drop for App {
    fn drop(&mut self) {
        self.teardown();
    }
}
