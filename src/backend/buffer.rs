// Buffer management
//
// Vertex and index buffers backed by gpu-allocator. Geometry is uploaded once
// at startup into host-visible memory and never rewritten, so no staging copy
// or per-frame synchronization is needed.

use anyhow::{Context, Result};
use ash::vk;
use bytemuck::Pod;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

use super::VulkanDevice;
use crate::scene::{MeshData, Model};

/// A buffer and the allocation backing it
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub size: vk::DeviceSize,
    allocation: Allocation,
    device: Arc<VulkanDevice>,
}

impl GpuBuffer {
    /// Create a host-visible buffer filled with `data`
    pub fn with_data<T: Pod>(
        device: Arc<VulkanDevice>,
        name: &str,
        usage: vk::BufferUsageFlags,
        data: &[T],
    ) -> Result<Self> {
        let size = std::mem::size_of_val(data) as vk::DeviceSize;
        if size == 0 {
            anyhow::bail!("Buffer '{}' would be empty", name);
        }

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.device.create_buffer(&buffer_info, None) }
            .with_context(|| format!("Failed to create buffer '{}'", name))?;

        let requirements = unsafe { device.device.get_buffer_memory_requirements(buffer) };

        let allocation = device.allocator().lock().allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::CpuToGpu,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.device.destroy_buffer(buffer, None) };
                return Err(e).with_context(|| format!("Failed to allocate memory for '{}'", name));
            }
        };

        // From here on Drop releases both the buffer and its memory
        let mut this = Self {
            buffer,
            size,
            allocation,
            device,
        };

        unsafe {
            this.device
                .device
                .bind_buffer_memory(buffer, this.allocation.memory(), this.allocation.offset())
        }
        .context("Failed to bind buffer memory")?;

        let mapped = this
            .allocation
            .mapped_slice_mut()
            .context("Buffer memory is not host visible")?;

        let bytes: &[u8] = bytemuck::cast_slice(data);
        mapped[..bytes.len()].copy_from_slice(bytes);

        Ok(this)
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_buffer(self.buffer, None);
        }
        let allocation = std::mem::take(&mut self.allocation);
        if let Err(e) = self.device.allocator().lock().free(allocation) {
            log::error!("Failed to free buffer memory: {}", e);
        }
    }
}

/// Vertex/index buffer pair for one mesh
struct MeshBuffers {
    vertices: GpuBuffer,
    indices: GpuBuffer,
    index_count: u32,
}

/// Owns the GPU copy of every model in the scene
pub struct ModelStore {
    meshes: Vec<MeshBuffers>,
}

impl ModelStore {
    pub fn upload(device: &Arc<VulkanDevice>, meshes: &[MeshData]) -> Result<Self> {
        let mut uploaded = Vec::with_capacity(meshes.len());

        for (i, mesh) in meshes.iter().enumerate() {
            let vertices = GpuBuffer::with_data(
                device.clone(),
                &format!("model {} vertices", i),
                vk::BufferUsageFlags::VERTEX_BUFFER,
                &mesh.vertices,
            )?;
            let indices = GpuBuffer::with_data(
                device.clone(),
                &format!("model {} indices", i),
                vk::BufferUsageFlags::INDEX_BUFFER,
                &mesh.indices,
            )?;

            uploaded.push(MeshBuffers {
                vertices,
                indices,
                index_count: mesh.indices.len() as u32,
            });
        }

        log::info!("Uploaded {} models", uploaded.len());
        Ok(Self { meshes: uploaded })
    }

    /// Handles for recording. Valid as long as the store lives.
    pub fn models(&self) -> Vec<Model> {
        self.meshes
            .iter()
            .map(|mesh| Model {
                vertex_buffer: mesh.vertices.buffer,
                index_buffer: mesh.indices.buffer,
                index_count: mesh.index_count,
            })
            .collect()
    }
}
