// Shader module loading
//
// Vulkan uses SPIR-V bytecode for shaders. Compiled modules are read from the
// configured shader directory at startup (build.rs compiles them next to
// their GLSL sources).

use anyhow::{Context, Result};
use ash::vk;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use super::VulkanDevice;

/// Shader module that only needs to live until the pipeline is built
pub struct ShaderModule {
    pub module: vk::ShaderModule,
    device: Arc<VulkanDevice>,
}

impl ShaderModule {
    /// Load `path` as SPIR-V and create a module from it
    pub fn load(device: Arc<VulkanDevice>, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read shader {}", path.display()))?;
        let code = parse_spirv(&bytes).with_context(|| format!("Invalid SPIR-V in {}", path.display()))?;

        let create_info = vk::ShaderModuleCreateInfo::builder().code(&code);
        let module = unsafe { device.device.create_shader_module(&create_info, None) }
            .context("Failed to create shader module")?;

        log::debug!("Loaded shader {}", path.display());
        Ok(Self { module, device })
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_shader_module(self.module, None);
        }
    }
}

/// Convert raw bytes into aligned SPIR-V words
pub fn parse_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))?;
    Ok(words)
}
