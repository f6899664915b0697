// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with safety and ergonomics
// Every object owns an Arc<VulkanDevice>, so the device always outlives them

pub mod buffer;
pub mod command;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use buffer::ModelStore;
pub use device::VulkanDevice;
pub use pipeline::{GraphicsPipeline, RenderTargetSet};
pub use shader::ShaderModule;
pub use surface::Surface;
pub use swapchain::Swapchain;
