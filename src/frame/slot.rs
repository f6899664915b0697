// Per-slot synchronization resources
//
// One record per presentable image: the fence the host waits on, the
// semaphore the device hands between acquire, submit and present, and the
// command buffer recorded for that image. Created and destroyed together.

use ash::prelude::VkResult;
use ash::vk;

use super::DeviceContext;

/// The synchronization bundle owned by one image slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotResources {
    /// Signals once the device has finished all work submitted for this slot.
    /// Created signaled so the first wait on a fresh slot returns at once.
    pub completion_fence: vk::Fence,
    /// Device-side "image ready" signal.
    pub image_ready: vk::Semaphore,
    pub command_buffer: vk::CommandBuffer,
}

impl SlotResources {
    /// Create one slot's resources, releasing the partial set on failure.
    pub fn create<D: DeviceContext + ?Sized>(device: &D) -> VkResult<Self> {
        let completion_fence = device.create_fence(true)?;

        let image_ready = match device.create_semaphore() {
            Ok(semaphore) => semaphore,
            Err(e) => {
                device.destroy_fence(completion_fence);
                return Err(e);
            }
        };

        let command_buffer = match device.allocate_command_buffer() {
            Ok(command_buffer) => command_buffer,
            Err(e) => {
                device.destroy_semaphore(image_ready);
                device.destroy_fence(completion_fence);
                return Err(e);
            }
        };

        Ok(Self {
            completion_fence,
            image_ready,
            command_buffer,
        })
    }

    /// Create `count` slots. Either all of them exist afterwards or none do.
    pub fn create_all<D: DeviceContext + ?Sized>(device: &D, count: usize) -> VkResult<Vec<Self>> {
        let mut slots = Vec::with_capacity(count);

        for index in 0..count {
            match Self::create(device) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    log::error!("Failed to create sync resources for slot {}: {}", index, e);
                    for slot in slots.drain(..).rev() {
                        slot.destroy(device);
                    }
                    return Err(e);
                }
            }
        }

        Ok(slots)
    }

    /// Destroy the bundle. The device must no longer reference any of it.
    pub fn destroy<D: DeviceContext + ?Sized>(self, device: &D) {
        device.destroy_semaphore(self.image_ready);
        device.destroy_fence(self.completion_fence);
        device.free_command_buffer(self.command_buffer);
    }
}
