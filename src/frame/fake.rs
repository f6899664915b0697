// In-memory device and surface for exercising the frame protocol
//
// Models binary semaphores, fences and a FIFO queue whose batches only
// retire when the host waits on them (or waits for idle). Semaphore ops are
// applied at submit time: the queue executes in order, so that is enough to
// catch double waits and double signals. Every call is logged.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use super::{DeviceContext, PresentationSurface};
use crate::recording::CommandEncoder;
use crate::scene::PushTransform;

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateFence { fence: vk::Fence, signaled: bool },
    CreateSemaphore(vk::Semaphore),
    AllocateCommandBuffer(vk::CommandBuffer),
    Acquire { signal: vk::Semaphore, result: Result<u32, vk::Result> },
    /// `retired` is how many queued batches the wait forced to completion.
    WaitFence { fence: vk::Fence, retired: usize },
    ResetFence(vk::Fence),
    ResetCommandBuffer(vk::CommandBuffer),
    Submit {
        command_buffers: Vec<vk::CommandBuffer>,
        waits: Vec<vk::Semaphore>,
        signals: Vec<vk::Semaphore>,
        fence: vk::Fence,
    },
    Present { index: u32, wait: vk::Semaphore },
    WaitIdle,
    DestroyFence(vk::Fence),
    DestroySemaphore(vk::Semaphore),
    FreeCommandBuffer(vk::CommandBuffer),
    Cmd(vk::CommandBuffer, Recorded),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Begin,
    BeginRenderPass { framebuffer: vk::Framebuffer, clear_color: [f32; 4] },
    BindPipeline(vk::Pipeline),
    BindVertexBuffer(vk::Buffer),
    BindIndexBuffer(vk::Buffer),
    PushTransform(PushTransform),
    DrawIndexed(u32),
    EndRenderPass,
    End,
}

/// Calls that can be told to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Acquire,
    WaitFence,
    ResetFence,
    ResetCommandBuffer,
    Submit,
    Present,
    Begin,
    CreateSemaphore,
}

#[derive(Debug)]
struct Batch {
    command_buffers: Vec<vk::CommandBuffer>,
    fence: vk::Fence,
}

#[derive(Debug, Default)]
struct State {
    next_handle: u64,
    fences: HashMap<vk::Fence, bool>,
    semaphores: HashMap<vk::Semaphore, bool>,
    queue: VecDeque<Batch>,
    next_image: u32,
    held_images: Vec<u32>,
    script: VecDeque<VkResult<u32>>,
    failures: HashMap<Op, vk::Result>,
    calls: Vec<Call>,
    violations: Vec<String>,
    max_in_flight: usize,
    hung: bool,
}

impl State {
    fn handle(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    fn injected(&mut self, op: Op) -> VkResult<()> {
        match self.failures.remove(&op) {
            Some(result) => Err(result),
            None => Ok(()),
        }
    }

    fn signal(&mut self, semaphore: vk::Semaphore, by: &str) {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if *signaled => self
                .violations
                .push(format!("{by} signaled {semaphore:?} which was already signaled")),
            Some(signaled) => *signaled = true,
            None => self.violations.push(format!("{by} signaled unknown {semaphore:?}")),
        }
    }

    fn wait(&mut self, semaphore: vk::Semaphore, by: &str) {
        match self.semaphores.get_mut(&semaphore) {
            Some(signaled) if *signaled => *signaled = false,
            Some(_) => self
                .violations
                .push(format!("{by} waited on {semaphore:?} with no pending signal")),
            None => self.violations.push(format!("{by} waited on unknown {semaphore:?}")),
        }
    }

    fn retire_front(&mut self) {
        if let Some(batch) = self.queue.pop_front() {
            if batch.fence != vk::Fence::null() {
                self.fences.insert(batch.fence, true);
            }
        }
    }

    fn in_flight(&self) -> usize {
        self.queue
            .iter()
            .filter(|batch| !batch.command_buffers.is_empty())
            .count()
    }

    fn references(&self, command_buffer: vk::CommandBuffer) -> bool {
        self.queue
            .iter()
            .any(|batch| batch.command_buffers.contains(&command_buffer))
    }
}

pub struct FakeGpu {
    image_count: u32,
    state: Mutex<State>,
}

impl FakeGpu {
    pub fn new(image_count: u32) -> Self {
        Self {
            image_count,
            state: Mutex::new(State::default()),
        }
    }

    /// Queue acquire results to hand out before falling back to round-robin.
    pub fn script_acquire(&self, results: impl IntoIterator<Item = VkResult<u32>>) {
        self.state.lock().script.extend(results);
    }

    pub fn fail_next(&self, op: Op, result: vk::Result) {
        self.state.lock().failures.insert(op, result);
    }

    /// Stop the device from ever completing queued work.
    pub fn hang(&self) {
        self.state.lock().hung = true;
    }

    pub fn resume(&self) {
        self.state.lock().hung = false;
    }

    /// Let the device finish everything queued so far.
    pub fn complete_all(&self) {
        let mut state = self.state.lock();
        while !state.queue.is_empty() {
            state.retire_front();
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().violations.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.state.lock().max_in_flight
    }

    pub fn queued(&self) -> usize {
        self.state.lock().queue.len()
    }

    pub fn fence_signaled(&self, fence: vk::Fence) -> Option<bool> {
        self.state.lock().fences.get(&fence).copied()
    }

    pub fn semaphore_signaled(&self, semaphore: vk::Semaphore) -> Option<bool> {
        self.state.lock().semaphores.get(&semaphore).copied()
    }

    /// Handles created and not yet destroyed.
    pub fn live_objects(&self) -> usize {
        let state = self.state.lock();
        state.fences.len() + state.semaphores.len()
    }

    fn record(&self, command_buffer: vk::CommandBuffer, recorded: Recorded) {
        self.state.lock().calls.push(Call::Cmd(command_buffer, recorded));
    }
}

impl DeviceContext for FakeGpu {
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        let fence = vk::Fence::from_raw(state.handle());
        state.fences.insert(fence, signaled);
        state.calls.push(Call::CreateFence { fence, signaled });
        Ok(fence)
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state.lock();
        state.injected(Op::CreateSemaphore)?;
        let semaphore = vk::Semaphore::from_raw(state.handle());
        state.semaphores.insert(semaphore, false);
        state.calls.push(Call::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn allocate_command_buffer(&self) -> VkResult<vk::CommandBuffer> {
        let mut state = self.state.lock();
        let command_buffer = vk::CommandBuffer::from_raw(state.handle());
        state.calls.push(Call::AllocateCommandBuffer(command_buffer));
        Ok(command_buffer)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        let mut state = self.state.lock();
        state.injected(Op::WaitFence)?;

        if state.fences.get(&fence).copied().unwrap_or(false) {
            state.calls.push(Call::WaitFence { fence, retired: 0 });
            return Ok(());
        }

        let position = state.queue.iter().position(|batch| batch.fence == fence);
        match position {
            Some(position) if !state.hung => {
                for _ in 0..=position {
                    state.retire_front();
                }
                state.calls.push(Call::WaitFence {
                    fence,
                    retired: position + 1,
                });
                Ok(())
            }
            _ => {
                if timeout == u64::MAX {
                    state
                        .violations
                        .push(format!("unbounded wait on {fence:?} would never return"));
                }
                state.calls.push(Call::WaitFence { fence, retired: 0 });
                Err(vk::Result::TIMEOUT)
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        let mut state = self.state.lock();
        state.injected(Op::ResetFence)?;
        if state.queue.iter().any(|batch| batch.fence == fence) {
            state
                .violations
                .push(format!("reset {fence:?} while a batch still references it"));
        }
        state.fences.insert(fence, false);
        state.calls.push(Call::ResetFence(fence));
        Ok(())
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        let mut state = self.state.lock();
        state.injected(Op::ResetCommandBuffer)?;
        if state.references(command_buffer) {
            state
                .violations
                .push(format!("reset {command_buffer:?} while it is in flight"));
        }
        state.calls.push(Call::ResetCommandBuffer(command_buffer));
        Ok(())
    }

    fn submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        wait_semaphores: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal_semaphores: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> VkResult<()> {
        let mut state = self.state.lock();
        state.injected(Op::Submit)?;

        if wait_semaphores.len() != wait_stages.len() {
            state.violations.push("wait semaphores and stages differ in length".into());
        }
        if fence != vk::Fence::null() && state.fences.get(&fence).copied().unwrap_or(false) {
            state.violations.push(format!("submitted with {fence:?} already signaled"));
        }
        for &semaphore in wait_semaphores {
            state.wait(semaphore, "submit");
        }
        for &semaphore in signal_semaphores {
            state.signal(semaphore, "submit");
        }

        state.queue.push_back(Batch {
            command_buffers: command_buffers.to_vec(),
            fence,
        });
        let in_flight = state.in_flight();
        state.max_in_flight = state.max_in_flight.max(in_flight);
        if in_flight > self.image_count as usize {
            state
                .violations
                .push(format!("{in_flight} frames in flight with {} slots", self.image_count));
        }

        state.calls.push(Call::Submit {
            command_buffers: command_buffers.to_vec(),
            waits: wait_semaphores.to_vec(),
            signals: signal_semaphores.to_vec(),
            fence,
        });
        Ok(())
    }

    fn wait_idle(&self) -> VkResult<()> {
        let mut state = self.state.lock();
        while !state.queue.is_empty() {
            state.retire_front();
        }
        state.calls.push(Call::WaitIdle);
        Ok(())
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.lock();
        if state.queue.iter().any(|batch| batch.fence == fence) {
            state.violations.push(format!("destroyed {fence:?} while in use"));
        }
        state.fences.remove(&fence);
        state.calls.push(Call::DestroyFence(fence));
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.lock();
        if !state.queue.is_empty() {
            state.violations.push(format!("destroyed {semaphore:?} with work queued"));
        }
        state.semaphores.remove(&semaphore);
        state.calls.push(Call::DestroySemaphore(semaphore));
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        let mut state = self.state.lock();
        if state.references(command_buffer) {
            state
                .violations
                .push(format!("freed {command_buffer:?} while in flight"));
        }
        state.calls.push(Call::FreeCommandBuffer(command_buffer));
    }
}

impl PresentationSurface for FakeGpu {
    fn image_count(&self) -> usize {
        self.image_count as usize
    }

    fn acquire(&self, signal: vk::Semaphore, timeout: u64) -> VkResult<(u32, bool)> {
        let mut state = self.state.lock();

        let result = match state.injected(Op::Acquire) {
            Err(e) => Err(e),
            Ok(()) => match state.script.pop_front() {
                Some(scripted) => scripted,
                None => {
                    // Round-robin over images the app is not holding
                    let start = state.next_image;
                    let free = (0..self.image_count)
                        .map(|offset| (start + offset) % self.image_count)
                        .find(|index| !state.held_images.contains(index));
                    match free {
                        Some(index) => {
                            state.next_image = (index + 1) % self.image_count;
                            Ok(index)
                        }
                        None => {
                            // Every image is held: only a timeout gets the caller back
                            if timeout == u64::MAX {
                                state
                                    .violations
                                    .push("unbounded acquire with every image held would never return".to_string());
                            }
                            Err(vk::Result::TIMEOUT)
                        }
                    }
                }
            },
        };

        state.calls.push(Call::Acquire { signal, result });
        let index = result?;

        if state.held_images.contains(&index) {
            state.violations.push(format!("image {index} acquired twice"));
        }
        state.held_images.push(index);
        state.signal(signal, "acquire");
        Ok((index, false))
    }

    fn present(&self, index: u32, wait: vk::Semaphore) -> VkResult<bool> {
        let mut state = self.state.lock();
        state.calls.push(Call::Present { index, wait });

        match state.held_images.iter().position(|&held| held == index) {
            Some(position) => {
                state.held_images.remove(position);
            }
            None => state.violations.push(format!("presented image {index} not held")),
        }
        state.wait(wait, "present");
        state.injected(Op::Present)?;
        Ok(false)
    }
}

impl CommandEncoder for FakeGpu {
    fn begin(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.state.lock().injected(Op::Begin)?;
        self.record(command_buffer, Recorded::Begin);
        Ok(())
    }

    fn begin_render_pass(
        &self,
        command_buffer: vk::CommandBuffer,
        _render_pass: vk::RenderPass,
        framebuffer: vk::Framebuffer,
        _extent: vk::Extent2D,
        clear_color: [f32; 4],
    ) {
        self.record(
            command_buffer,
            Recorded::BeginRenderPass {
                framebuffer,
                clear_color,
            },
        );
    }

    fn bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        self.record(command_buffer, Recorded::BindPipeline(pipeline));
    }

    fn bind_vertex_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        self.record(command_buffer, Recorded::BindVertexBuffer(buffer));
    }

    fn bind_index_buffer(&self, command_buffer: vk::CommandBuffer, buffer: vk::Buffer) {
        self.record(command_buffer, Recorded::BindIndexBuffer(buffer));
    }

    fn push_transform(
        &self,
        command_buffer: vk::CommandBuffer,
        _layout: vk::PipelineLayout,
        transform: &PushTransform,
    ) {
        self.record(command_buffer, Recorded::PushTransform(*transform));
    }

    fn draw_indexed(&self, command_buffer: vk::CommandBuffer, index_count: u32) {
        self.record(command_buffer, Recorded::DrawIndexed(index_count));
    }

    fn end_render_pass(&self, command_buffer: vk::CommandBuffer) {
        self.record(command_buffer, Recorded::EndRenderPass);
    }

    fn end(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        self.record(command_buffer, Recorded::End);
        Ok(())
    }
}
