// Frame synchronization engine
//
// Drives the acquire -> wait -> reset -> record -> submit -> present cycle
// over a fixed ring of image slots. The host only ever blocks on a slot's
// completion fence, which caps the frames in flight at the slot count.
//
// SEMAPHORE HAND-OFF:
// The image index is only known after acquire returns, so acquire signals
// the semaphore of the PREVIOUS iteration's slot. The submission that follows
// waits on that same semaphore and signals the semaphore of the slot it
// renders, which present then waits on. Every semaphore has exactly one
// pending signal and one waiter at a time.
//
//   iteration k:  acquire(sem[pre]) -> cur
//                 submit(wait sem[pre], signal sem[cur], fence[cur])
//                 present(cur, wait sem[cur])
//                 pre := cur

mod error;
mod slot;

#[cfg(test)]
pub(crate) mod fake;

pub use error::FrameError;
pub use slot::SlotResources;

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;
use std::time::Duration;

/// Stage at which a submission waits for its image to become available.
const WAIT_STAGES: [vk::PipelineStageFlags; 1] = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

// =============================================================================
// CAPABILITIES
// =============================================================================

/// Queue, command pool and sync-object factory the engine drives.
///
/// All calls come from the single thread running the frame loop, so
/// implementations may assume queue access is already serialized.
pub trait DeviceContext {
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn allocate_command_buffer(&self) -> VkResult<vk::CommandBuffer>;

    /// Block until `fence` signals. `vk::Result::TIMEOUT` when `timeout`
    /// nanoseconds pass first.
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()>;

    /// Submit one batch to the queue. `fence` may be null.
    fn submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        wait_semaphores: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal_semaphores: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> VkResult<()>;

    fn wait_idle(&self) -> VkResult<()>;

    fn destroy_fence(&self, fence: vk::Fence);
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer);
}

/// A fixed ring of presentable images.
pub trait PresentationSurface {
    fn image_count(&self) -> usize;

    /// Request the next image. `signal` is signaled once it is safe to render
    /// into. Returns the image index and whether the surface is suboptimal.
    fn acquire(&self, signal: vk::Semaphore, timeout: u64) -> VkResult<(u32, bool)>;

    /// Queue image `index` for display once `wait` is signaled.
    /// Returns whether the surface is suboptimal.
    fn present(&self, index: u32, wait: vk::Semaphore) -> VkResult<bool>;
}

/// Fills one slot's command buffer. Called with the buffer already reset.
pub trait FrameRecorder<D: ?Sized> {
    fn record(&mut self, device: &D, command_buffer: vk::CommandBuffer, slot: usize) -> VkResult<()>;
}

impl<T: DeviceContext + ?Sized> DeviceContext for Arc<T> {
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        (**self).create_fence(signaled)
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        (**self).create_semaphore()
    }

    fn allocate_command_buffer(&self) -> VkResult<vk::CommandBuffer> {
        (**self).allocate_command_buffer()
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        (**self).wait_for_fence(fence, timeout)
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        (**self).reset_fence(fence)
    }

    fn reset_command_buffer(&self, command_buffer: vk::CommandBuffer) -> VkResult<()> {
        (**self).reset_command_buffer(command_buffer)
    }

    fn submit(
        &self,
        command_buffers: &[vk::CommandBuffer],
        wait_semaphores: &[vk::Semaphore],
        wait_stages: &[vk::PipelineStageFlags],
        signal_semaphores: &[vk::Semaphore],
        fence: vk::Fence,
    ) -> VkResult<()> {
        (**self).submit(command_buffers, wait_semaphores, wait_stages, signal_semaphores, fence)
    }

    fn wait_idle(&self) -> VkResult<()> {
        (**self).wait_idle()
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        (**self).destroy_fence(fence)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        (**self).destroy_semaphore(semaphore)
    }

    fn free_command_buffer(&self, command_buffer: vk::CommandBuffer) {
        (**self).free_command_buffer(command_buffer)
    }
}

impl<T: PresentationSurface + ?Sized> PresentationSurface for Arc<T> {
    fn image_count(&self) -> usize {
        (**self).image_count()
    }

    fn acquire(&self, signal: vk::Semaphore, timeout: u64) -> VkResult<(u32, bool)> {
        (**self).acquire(signal, timeout)
    }

    fn present(&self, index: u32, wait: vk::Semaphore) -> VkResult<bool> {
        (**self).present(index, wait)
    }
}

// =============================================================================
// STATE
// =============================================================================

/// Host-side view of where a slot is in its cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    /// Fence signaled (or believed so), nothing pending.
    Idle,
    /// Image handed out by the surface, fence not yet waited on.
    Acquiring,
    /// Fence waited on and reset, command buffer being recorded.
    Recording,
    /// Submitted; fence unsignaled until the device finishes.
    InFlight,
}

/// The slot used by the previous iteration and the one just acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameCursor {
    /// Slot whose semaphore the next acquire will signal.
    pub pre_index: usize,
    /// Slot returned by the most recent successful acquire.
    pub cur_index: usize,
}

impl FrameCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roll forward once the current frame has been submitted.
    pub fn advance(&mut self) {
        self.pre_index = self.cur_index;
    }
}

/// Optional bounds on the two host-visible waits. `None` waits forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timeouts {
    pub acquire: Option<Duration>,
    pub fence: Option<Duration>,
}

impl Timeouts {
    pub const UNBOUNDED: Self = Self {
        acquire: None,
        fence: None,
    };

    fn acquire_nanos(&self) -> u64 {
        to_nanos(self.acquire)
    }

    fn fence_nanos(&self) -> u64 {
        to_nanos(self.fence)
    }
}

fn to_nanos(timeout: Option<Duration>) -> u64 {
    timeout.map_or(u64::MAX, |d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
}

/// Outcome of a frame that reached the queue and the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Presented, but the surface no longer matches exactly.
    PresentedSuboptimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct HeldImage {
    index: u32,
    suboptimal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    pub presented: u64,
    pub skipped: u64,
}

// =============================================================================
// ENGINE
// =============================================================================

/// Owns the per-slot sync resources and runs the per-frame protocol.
pub struct FrameSyncEngine<D: DeviceContext, S: PresentationSurface> {
    device: D,
    surface: S,
    slots: Vec<SlotResources>,
    phases: Vec<SlotPhase>,
    cursor: FrameCursor,
    timeouts: Timeouts,
    stats: FrameStats,
    /// Acquired image whose frame was abandoned after the acquire.
    held: Option<HeldImage>,
    retired: bool,
}

impl<D: DeviceContext, S: PresentationSurface> FrameSyncEngine<D, S> {
    /// Create one fence/semaphore/command-buffer bundle per surface image.
    pub fn new(device: D, surface: S, timeouts: Timeouts) -> Result<Self> {
        let count = surface.image_count();
        if count == 0 {
            anyhow::bail!("Presentation surface reports no images");
        }

        let slots = SlotResources::create_all(&device, count)
            .context("Failed to create frame synchronization resources")?;

        log::info!("Frame sync engine ready with {} slots", count);

        Ok(Self {
            device,
            surface,
            slots,
            phases: vec![SlotPhase::Idle; count],
            cursor: FrameCursor::new(),
            timeouts,
            stats: FrameStats::default(),
            held: None,
            retired: false,
        })
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&SlotResources> {
        self.slots.get(index)
    }

    pub fn slot_phase(&self, index: usize) -> Option<SlotPhase> {
        self.phases.get(index).copied()
    }

    pub fn cursor(&self) -> FrameCursor {
        self.cursor
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Image kept from an abandoned frame, rendered by the next call.
    pub fn held_image(&self) -> Option<u32> {
        self.held.map(|held| held.index)
    }

    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Run one iteration of the frame protocol.
    ///
    /// On error the frame is abandoned and the engine stays usable unless
    /// the error [is fatal](FrameError::is_fatal). The cursor only advances
    /// once a submission has been accepted by the queue. A frame abandoned
    /// after its acquire keeps the image, and the next call retries it.
    pub fn render_frame<R>(&mut self, recorder: &mut R) -> Result<FrameStatus, FrameError>
    where
        R: FrameRecorder<D> + ?Sized,
    {
        if self.retired {
            return Err(FrameError::Retired);
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Acquire, signaling the previous slot's semaphore
        // ─────────────────────────────────────────────────────────────────────
        let pre = self.cursor.pre_index;
        let handoff = self.slots[pre].image_ready;

        let held = match self.held.take() {
            // sem[pre] still carries that acquire's signal
            Some(held) => {
                log::debug!("Retrying held image {} (hand-off slot {})", held.index, pre);
                held
            }
            None => match self.surface.acquire(handoff, self.timeouts.acquire_nanos()) {
                Ok((index, suboptimal)) => HeldImage { index, suboptimal },
                Err(result) => {
                    // Nothing was signaled: no release needed, cursor stays put
                    self.stats.skipped += 1;
                    return Err(FrameError::from_acquire(result));
                }
            },
        };

        let image_index = held.index;
        let cur = image_index as usize;
        if cur >= self.slots.len() {
            self.release_handoff(pre);
            return Err(FrameError::InvalidImage {
                index: image_index,
                count: self.slots.len(),
            });
        }

        self.cursor.cur_index = cur;
        self.phases[cur] = SlotPhase::Acquiring;
        let slot = self.slots[cur];

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Wait for the last submission that used this slot
        // ─────────────────────────────────────────────────────────────────────
        // The only host-side block in the loop
        if let Err(result) = self
            .device
            .wait_for_fence(slot.completion_fence, self.timeouts.fence_nanos())
        {
            self.hold(held, vk::Fence::null());
            return Err(FrameError::from_wait(cur, result));
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Reset fence and command buffer, only after the wait
        // ─────────────────────────────────────────────────────────────────────
        if let Err(result) = self.device.reset_fence(slot.completion_fence) {
            // A failed reset leaves the fence signaled
            self.hold(held, vk::Fence::null());
            return Err(FrameError::device_or(result, |result| FrameError::Reset { slot: cur, result }));
        }

        if let Err(result) = self.device.reset_command_buffer(slot.command_buffer) {
            self.hold(held, slot.completion_fence);
            return Err(FrameError::device_or(result, |result| FrameError::Reset { slot: cur, result }));
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Record
        // ─────────────────────────────────────────────────────────────────────
        self.phases[cur] = SlotPhase::Recording;

        if let Err(result) = recorder.record(&self.device, slot.command_buffer, cur) {
            self.hold(held, slot.completion_fence);
            return Err(FrameError::device_or(result, |result| FrameError::Record { slot: cur, result }));
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Submit (wait pre's semaphore, signal cur's, arm cur's fence)
        // ─────────────────────────────────────────────────────────────────────
        let command_buffers = [slot.command_buffer];
        let wait_semaphores = [handoff];
        let signal_semaphores = [slot.image_ready];

        if let Err(result) = self.device.submit(
            &command_buffers,
            &wait_semaphores,
            &WAIT_STAGES,
            &signal_semaphores,
            slot.completion_fence,
        ) {
            self.hold(held, slot.completion_fence);
            return Err(FrameError::device_or(result, |result| FrameError::Submit { slot: cur, result }));
        }

        self.phases[cur] = SlotPhase::InFlight;
        log::debug!("Submitted slot {} (waits on slot {})", cur, pre);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Present, waiting on cur's semaphore
        // STEP 7: Roll the cursor
        // ─────────────────────────────────────────────────────────────────────
        let present = self.surface.present(image_index, slot.image_ready);
        self.cursor.advance();

        match present {
            Ok(present_suboptimal) => {
                self.stats.presented += 1;
                if held.suboptimal || present_suboptimal {
                    Ok(FrameStatus::PresentedSuboptimal)
                } else {
                    Ok(FrameStatus::Presented)
                }
            }
            Err(result) => {
                self.stats.skipped += 1;
                Err(FrameError::from_present(cur, result))
            }
        }
    }

    /// Keep an acquired image for the next iteration instead of dropping it.
    ///
    /// The image was never rendered, so it cannot be presented, and giving
    /// it up without presenting would leak it from the ring. The next call
    /// skips the acquire and renders into it, consuming the signal still
    /// pending on `pre`'s semaphore. A fence that was already reset is
    /// re-armed by an empty submission so the retry's wait returns.
    fn hold(&mut self, held: HeldImage, fence: vk::Fence) {
        self.stats.skipped += 1;
        self.phases[held.index as usize] = SlotPhase::Acquiring;

        if fence != vk::Fence::null() {
            if let Err(e) = self.device.submit(&[], &[], &[], &[], fence) {
                log::error!("Failed to re-arm fence of slot {}: {}", held.index, e);
            }
        }

        self.held = Some(held);
    }

    /// Consume the signal an acquire left on `pre`'s semaphore without
    /// rendering anything.
    fn release_handoff(&mut self, pre: usize) {
        self.stats.skipped += 1;

        let wait_semaphores = [self.slots[pre].image_ready];
        if let Err(e) = self.device.submit(&[], &wait_semaphores, &WAIT_STAGES, &[], vk::Fence::null()) {
            log::error!("Failed to release semaphore of slot {}: {}", pre, e);
        }
    }

    /// Stop rendering: drain the device, then destroy every slot's resources.
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn shutdown(&mut self) {
        if self.retired {
            return;
        }
        self.retired = true;

        log::info!("Draining device before releasing {} frame slots", self.slots.len());

        if let Some(held) = self.held.take() {
            log::debug!("Releasing held image {}", held.index);
            let wait_semaphores = [self.slots[self.cursor.pre_index].image_ready];
            if let Err(e) = self.device.submit(&[], &wait_semaphores, &WAIT_STAGES, &[], vk::Fence::null()) {
                log::error!("Failed to release held image {}: {}", held.index, e);
            }
        }

        // Destroying anything the device still references is undefined
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait idle failed during shutdown: {}", e);
        }

        for slot in self.slots.drain(..) {
            slot.destroy(&self.device);
        }
        for phase in &mut self.phases {
            *phase = SlotPhase::Idle;
        }

        log::info!(
            "Frame sync engine retired: {} frames presented, {} skipped",
            self.stats.presented,
            self.stats.skipped
        );
    }
}

impl<D: DeviceContext, S: PresentationSurface> Drop for FrameSyncEngine<D, S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
