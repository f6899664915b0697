// Swapchain - Window presentation
//
// The fixed ring of presentable images the frame engine cycles through.
// Created once; resizing is not supported, so it lives as long as the window.

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use super::{Surface, VulkanDevice};
use crate::frame::PresentationSurface;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(device: Arc<VulkanDevice>, surface: &Surface, width: u32, height: u32) -> Result<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let surface_caps = surface.capabilities()?;
        let formats = surface.formats()?;

        // Choose surface format (prefer plain BGRA8 UNORM)
        let surface_format = formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
            .or_else(|| formats.first())
            .copied()
            .context("No suitable surface format")?;

        // FIFO: present at the display's refresh cadence, always available
        let present_mode = vk::PresentModeKHR::FIFO;

        // Choose extent
        let extent = if surface_caps.current_extent.width != u32::MAX {
            surface_caps.current_extent
        } else {
            vk::Extent2D {
                width: width.clamp(
                    surface_caps.min_image_extent.width,
                    surface_caps.max_image_extent.width,
                ),
                height: height.clamp(
                    surface_caps.min_image_extent.height,
                    surface_caps.max_image_extent.height,
                ),
            }
        };

        // At least double buffering
        let mut image_count = surface_caps.min_image_count.max(2);
        if surface_caps.max_image_count > 0 && image_count > surface_caps.max_image_count {
            image_count = surface_caps.max_image_count;
        }

        let swapchain_loader = ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface.handle)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e).context("Failed to get swapchain images");
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        // Build the struct first so Drop cleans up whatever views exist
        let mut this = Self {
            swapchain,
            swapchain_loader,
            images,
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            device,
        };

        for &image in &this.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { this.device.device.create_image_view(&create_info, None) }
                .context("Failed to create image view")?;
            this.image_views.push(view);
        }

        Ok(this)
    }
}

impl PresentationSurface for Swapchain {
    fn image_count(&self) -> usize {
        self.images.len()
    }

    fn acquire(&self, signal: vk::Semaphore, timeout: u64) -> VkResult<(u32, bool)> {
        unsafe {
            self.swapchain_loader
                .acquire_next_image(self.swapchain, timeout, signal, vk::Fence::null())
        }
    }

    fn present(&self, index: u32, wait: vk::Semaphore) -> VkResult<bool> {
        let wait_semaphores = [wait];
        let swapchains = [self.swapchain];
        let image_indices = [index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe {
            self.swapchain_loader
                .queue_present(self.device.graphics_queue, &present_info)
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}
