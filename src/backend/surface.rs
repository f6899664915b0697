// Window surface
//
// The platform connection the swapchain presents into. Created once from the
// window's raw handles and destroyed after the swapchain, before the device.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use std::sync::Arc;

use super::VulkanDevice;

pub struct Surface {
    pub loader: ash::extensions::khr::Surface,
    pub handle: vk::SurfaceKHR,
    device: Arc<VulkanDevice>,
}

impl Surface {
    pub fn new(
        device: Arc<VulkanDevice>,
        display: RawDisplayHandle,
        window: RawWindowHandle,
    ) -> Result<Self> {
        let loader = ash::extensions::khr::Surface::new(&device.entry, &device.instance);

        let handle = unsafe {
            ash_window::create_surface(&device.entry, &device.instance, display, window, None)
        }
        .context("Failed to create window surface")?;

        // Verify the GPU supports presenting to this surface
        let supported = match device.supports_surface(&loader, handle) {
            Ok(supported) => supported,
            Err(e) => {
                unsafe { loader.destroy_surface(handle, None) };
                return Err(e);
            }
        };
        if !supported {
            unsafe { loader.destroy_surface(handle, None) };
            anyhow::bail!("GPU doesn't support presenting to this surface");
        }

        Ok(Self {
            loader,
            handle,
            device,
        })
    }

    pub fn capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        let caps = unsafe {
            self.loader
                .get_physical_device_surface_capabilities(self.device.physical_device, self.handle)
        }?;
        Ok(caps)
    }

    pub fn formats(&self) -> Result<Vec<vk::SurfaceFormatKHR>> {
        let formats = unsafe {
            self.loader
                .get_physical_device_surface_formats(self.device.physical_device, self.handle)
        }?;
        Ok(formats)
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe {
            self.loader.destroy_surface(self.handle, None);
        }
    }
}
