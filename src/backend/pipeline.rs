// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// One color attachment, no depth: models are flat and drawn in order, later
// ones blended over earlier ones.

use anyhow::{Context, Result};
use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::VulkanDevice;
use crate::scene::{PushTransform, Vertex};

const ENTRY_POINT: &CStr = c"main";

/// Create a render pass that clears the swapchain image and hands it to present
pub fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> Result<vk::RenderPass> {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    // The layout transition must wait for the acquire semaphore, which the
    // submission waits on at COLOR_ATTACHMENT_OUTPUT
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    unsafe {
        device
            .device
            .create_render_pass(&render_pass_info, None)
            .context("Failed to create render pass")
    }
}

/// Render pass plus one framebuffer per swapchain image, indexed by slot
pub struct RenderTargetSet {
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl RenderTargetSet {
    pub fn new(
        device: Arc<VulkanDevice>,
        format: vk::Format,
        image_views: &[vk::ImageView],
        extent: vk::Extent2D,
    ) -> Result<Self> {
        let render_pass = create_render_pass(&device, format)?;

        // Build the struct first so Drop cleans up on a failed framebuffer
        let mut this = Self {
            render_pass,
            framebuffers: Vec::with_capacity(image_views.len()),
            extent,
            device,
        };

        for &image_view in image_views {
            let attachments = &[image_view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            let framebuffer = unsafe { this.device.device.create_framebuffer(&framebuffer_info, None) }
                .context("Failed to create framebuffer")?;
            this.framebuffers.push(framebuffer);
        }

        log::debug!("Created {} framebuffers", this.framebuffers.len());
        Ok(this)
    }
}

impl Drop for RenderTargetSet {
    fn drop(&mut self) {
        unsafe {
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}

/// Vertex input description: a single tightly packed position
pub fn get_vertex_input_info() -> (
    Vec<vk::VertexInputBindingDescription>,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let binding = vk::VertexInputBindingDescription::builder()
        .binding(0)
        .stride(std::mem::size_of::<Vertex>() as u32)
        .input_rate(vk::VertexInputRate::VERTEX)
        .build();

    // Position attribute (location 0)
    let position_attr = vk::VertexInputAttributeDescription::builder()
        .binding(0)
        .location(0)
        .format(vk::Format::R32G32B32_SFLOAT)
        .offset(0)
        .build();

    (vec![binding], vec![position_attr])
}

/// Pipeline and its layout, destroyed together
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    device: Arc<VulkanDevice>,
}

impl GraphicsPipeline {
    pub fn new(
        device: Arc<VulkanDevice>,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
        vert_shader: vk::ShaderModule,
        frag_shader: vk::ShaderModule,
    ) -> Result<Self> {
        // Push constant: one PushTransform for the vertex stage
        let push_constant_range = vk::PushConstantRange::builder()
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .offset(0)
            .size(PushTransform::SIZE)
            .build();

        let push_constant_ranges = &[push_constant_range];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().push_constant_ranges(push_constant_ranges);

        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;

        let pipeline = match create_pipeline(&device, render_pass, layout, extent, vert_shader, frag_shader) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                unsafe { device.device.destroy_pipeline_layout(layout, None) };
                return Err(e);
            }
        };

        Ok(Self {
            pipeline,
            layout,
            device,
        })
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

fn create_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    extent: vk::Extent2D,
    vert_shader: vk::ShaderModule,
    frag_shader: vk::ShaderModule,
) -> Result<vk::Pipeline> {
    // Shader stages
    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_shader)
        .name(ENTRY_POINT)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag_shader)
        .name(ENTRY_POINT)
        .build();

    let shader_stages = &[vert_stage, frag_stage];

    // Vertex input
    let (bindings, attributes) = get_vertex_input_info();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    // Input assembly
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Viewport and scissor (fixed: the window never resizes)
    let viewport = vk::Viewport::builder()
        .x(0.0)
        .y(0.0)
        .width(extent.width as f32)
        .height(extent.height as f32)
        .min_depth(0.0)
        .max_depth(1.0)
        .build();

    let scissor = vk::Rect2D::builder()
        .offset(vk::Offset2D { x: 0, y: 0 })
        .extent(extent)
        .build();

    let viewports = &[viewport];
    let scissors = &[scissor];
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewports(viewports)
        .scissors(scissors);

    // Rasterization
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::BACK)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    // Multisampling (disabled)
    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    // Straight alpha blending
    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .blend_enable(true)
        .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(vk::BlendFactor::SRC_ALPHA)
        .dst_alpha_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| e)
            .context("Failed to create graphics pipeline")?
    };

    pipelines
        .first()
        .copied()
        .context("Driver returned no pipeline")
}
