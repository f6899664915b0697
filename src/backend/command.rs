// Command buffer recording
//
// Thin forwarding of the scene pass's commands onto the real device.

use ash::prelude::VkResult;
use ash::vk;

use super::VulkanDevice;
use crate::recording::CommandEncoder;
use crate::scene::PushTransform;

impl CommandEncoder for VulkanDevice {
    fn begin(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::builder();
        unsafe { self.device.begin_command_buffer(command_buffer, &begin_info) }
    }

    fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue { float32: clear_color },
        }];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);

        unsafe {
            self.device
                .cmd_begin_render_pass(command_buffer, &render_pass_info, vk::SubpassContents::INLINE);
        }
    }

    fn bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline);
        }
    }

    fn bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(command_buffer, 0, &[buffer], &[0]);
        }
    }

    fn bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        unsafe {
            self.device
                .cmd_bind_index_buffer(command_buffer, buffer, 0, vk::IndexType::UINT32);
        }
    }

    fn push_transform(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        transform: &PushTransform,
    ) {
        unsafe {
            self.device.cmd_push_constants(
                command_buffer,
                layout,
                vk::ShaderStageFlags::VERTEX,
                0,
                transform.as_bytes(),
            );
        }
    }

    fn draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32) {
        unsafe {
            self.device
                .cmd_draw_indexed(command_buffer, index_count, 1, 0, 0, 0);
        }
    }

    fn end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device.cmd_end_render_pass(command_buffer);
        }
    }

    fn end(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe { self.device.end_command_buffer(command_buffer) }
    }
}
