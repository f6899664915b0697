// Synchronization primitives
//
// Fences, semaphores and the graphics queue, exposed to the frame engine.
// Fences gate the CPU on GPU completion; semaphores order acquire, render
// and present on the GPU timeline.

use ash::prelude::VkResult;
use ash::vk;

use super::VulkanDevice;
use crate::frame::DeviceContext;

impl DeviceContext for VulkanDevice {
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let fence_info = vk::FenceCreateInfo::builder().flags(flags);
        unsafe { self.device.create_fence(&fence_info, None) }
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        unsafe { self.device.create_semaphore(&semaphore_info, None) }
    }

    fn allocate_command_buffer(&self) -> VkResult<vk::CommandBuffer> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let buffers = unsafe { self.device.allocate_command_buffers(&alloc_info) }?;
        buffers
            .first()
            .copied()
            .ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, timeout) }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        unsafe { self.device.reset_fences(&[fence]) }
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        unsafe {
            self.device
                .reset_command_buffer(command_buffer, vk::CommandBufferResetFlags::RELEASE_RESOURCES)
        }
    }

    fn submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        wait_semaphores: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal_semaphores: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores)
            .build();

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, std::slice::from_ref(&submit_info), fence)
        }
    }

    fn wait_idle(&self) -> VkResult<()> {
        unsafe { self.device.device_wait_idle() }
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        unsafe {
            self.device
                .free_command_buffers(self.command_pool, &[command_buffer])
        }
    }
}
