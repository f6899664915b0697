// =============================================================================
// RENDERER - Wires the Vulkan backend into the frame engine
// =============================================================================
//
// Creation order: device -> surface -> swapchain -> render targets ->
// pipeline -> models -> scene pass -> frame engine.
// Teardown is the exact reverse; fields are declared in drop order.

use anyhow::{Context, Result};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use winit::window::Window;

use crate::backend::{GraphicsPipeline, ModelStore, RenderTargetSet, ShaderModule, Surface, Swapchain, VulkanDevice};
use crate::config::Config;
use crate::frame::{FrameError, FrameStats, FrameStatus, FrameSyncEngine};
use crate::recording::{PassTargets, ScenePass};
use crate::scene::{self, Scene};

type Engine = FrameSyncEngine<Arc<VulkanDevice>, Arc<Swapchain>>;

pub struct Renderer {
    // Drains the device when dropped, so it goes first
    engine: Engine,
    pass: ScenePass,
    _models: ModelStore,
    _pipeline: GraphicsPipeline,
    _targets: RenderTargetSet,
    _swapchain: Arc<Swapchain>,
    _surface: Surface,
    _device: Arc<VulkanDevice>,
}

impl Renderer {
    pub fn new(window: &Window, config: &Config) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let display = window.raw_display_handle();
        let size = window.inner_size();

        // STEP 1: Device, surface and swapchain
        let device = VulkanDevice::new(&config.window.title, config.debug.validation_layers, display)?;
        let surface = Surface::new(device.clone(), display, window.raw_window_handle())?;
        let swapchain = Arc::new(Swapchain::new(device.clone(), &surface, size.width, size.height)?);

        // STEP 2: One framebuffer per swapchain image
        let targets = RenderTargetSet::new(
            device.clone(),
            swapchain.format,
            &swapchain.image_views,
            swapchain.extent,
        )?;

        // STEP 3: Pipeline (shader modules only live until it is built)
        let pipeline = {
            let shader_dir = &config.graphics.shader_dir;
            let vert = ShaderModule::load(device.clone(), &shader_dir.join("shader.vert.spv"))?;
            let frag = ShaderModule::load(device.clone(), &shader_dir.join("shader.frag.spv"))?;
            GraphicsPipeline::new(
                device.clone(),
                targets.render_pass,
                swapchain.extent,
                vert.module,
                frag.module,
            )?
        };

        // STEP 4: Geometry and the pass that draws it
        let models = ModelStore::upload(&device, &scene::reference_meshes())?;
        let scene = Scene::new(scene::reference_transforms(), scene::spin(config.animation.step));
        let pass = ScenePass::new(
            PassTargets {
                render_pass: targets.render_pass,
                pipeline: pipeline.pipeline,
                layout: pipeline.layout,
                extent: swapchain.extent,
                clear_color: config.graphics.clear_color,
            },
            targets.framebuffers.clone(),
            models.models(),
            scene,
        );

        // STEP 5: Per-slot sync resources
        let engine = FrameSyncEngine::new(device.clone(), swapchain.clone(), config.timeouts())
            .context("Failed to create frame sync engine")?;

        log::info!("Vulkan initialized successfully!");

        Ok(Self {
            engine,
            pass,
            _models: models,
            _pipeline: pipeline,
            _targets: targets,
            _swapchain: swapchain,
            _surface: surface,
            _device: device,
        })
    }

    /// Advance the animation and run one frame through the engine
    pub fn render_frame(&mut self) -> Result<FrameStatus, FrameError> {
        self.pass.advance();
        self.engine.render_frame(&mut self.pass)
    }

    /// Frames rendered so far, including skipped ones
    pub fn frame(&self) -> u64 {
        self.pass.scene().frame()
    }

    pub fn stats(&self) -> FrameStats {
        self.engine.stats()
    }

    /// Drain the device and release the frame slots. Idempotent.
    pub fn shutdown(&mut self) {
        self.engine.shutdown();
    }
}
