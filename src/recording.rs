// Command recording
//
// Fills one slot's command buffer per frame: clear the slot's render target,
// then bind and draw every model with its own push transform.

use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use crate::frame::FrameRecorder;
use crate::scene::{Model, PushTransform, Scene};

/// The subset of command-buffer recording the scene pass needs.
pub trait CommandEncoder {
    fn begin(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;

    /// Inline-contents render pass over the full `extent`, clearing the single
    /// color attachment to `clear_color`.
    fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    );

    fn bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);

    /// Binding 0, offset 0.
    fn bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer);

    /// Offset 0, 32-bit indices.
    fn bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer);

    /// Vertex stage, offset 0.
    fn push_transform(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        transform: &PushTransform,
    );

    /// One instance, starting at index 0.
    fn draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32);

    fn end_render_pass(&self, command_buffer: vk::CommandBuffer);

    fn end(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;
}

impl<T: CommandEncoder + ?Sized> CommandEncoder for Arc<T> {
    fn begin(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        (**self).begin(command_buffer)
    }

    fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        (**self).begin_render_pass(command_buffer, render_pass, framebuffer, extent, clear_color)
    }

    fn bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        (**self).bind_pipeline(command_buffer, pipeline)
    }

    fn bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        (**self).bind_vertex_buffer(command_buffer, buffer)
    }

    fn bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        (**self).bind_index_buffer(command_buffer, buffer)
    }

    fn push_transform(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        transform: &PushTransform,
    ) {
        (**self).push_transform(command_buffer, layout, transform)
    }

    fn draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32) {
        (**self).draw_indexed(command_buffer, index_count)
    }

    fn end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        (**self).end_render_pass(command_buffer)
    }

    fn end(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        (**self).end(command_buffer)
    }
}

/// Pipeline state the pass binds. Handles are owned elsewhere.
#[derive(Debug, Clone, Copy)]
pub struct PassTargets {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

/// Records the scene into whichever slot the engine hands over.
pub struct ScenePass {
    targets: PassTargets,
    /// One framebuffer per image slot, indexed by slot.
    framebuffers: Vec<vk::Framebuffer>,
    models: Vec<Model>,
    scene: Scene,
}

impl ScenePass {
    pub fn new(
        targets: PassTargets,
        framebuffers: Vec<vk::Framebuffer>,
        models: Vec<Model>,
        scene: Scene,
    ) -> Self {
        if models.len() != scene.transforms().len() {
            log::warn!(
                "{} models but {} transforms; extra models will not be drawn",
                models.len(),
                scene.transforms().len()
            );
        }

        Self {
            targets,
            framebuffers,
            models,
            scene,
        }
    }

    /// Run the animation callback for the next frame.
    pub fn advance(&mut self) {
        self.scene.advance();
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }
}

impl<D: CommandEncoder + ?Sized> FrameRecorder<D> for ScenePass {
    fn record(&mut self, device: &D, command_buffer: vk::CommandBuffer, slot: usize) -> VkResult<()> {
        let framebuffer = *self
            .framebuffers
            .get(slot)
            .ok_or(vk::Result::ERROR_UNKNOWN)?;
        let targets = &self.targets;

        device.begin(command_buffer)?;
        device.begin_render_pass(
            command_buffer,
            targets.render_pass,
            framebuffer,
            targets.extent,
            targets.clear_color,
        );
        device.bind_pipeline(command_buffer, targets.pipeline);

        for (model, transform) in self.models.iter().zip(self.scene.transforms()) {
            device.bind_vertex_buffer(command_buffer, model.vertex_buffer);
            device.bind_index_buffer(command_buffer, model.index_buffer);
            device.push_transform(command_buffer, targets.layout, transform);
            device.draw_indexed(command_buffer, model.index_count);
        }

        device.end_render_pass(command_buffer);
        device.end(command_buffer)
    }
}
