// Frame errors
//
// Everything that can go wrong between acquiring an image and presenting it.
// Setup failures are not here: those are anyhow errors and abort startup.

use ash::vk;
use thiserror::Error;

/// A failure inside one iteration of the frame loop.
///
/// Most variants only cost the current frame. [`FrameError::is_fatal`]
/// tells the loop when to stop initiating frames and drain instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("timed out waiting for a presentable image")]
    AcquireTimeout,

    #[error("presentation surface is out of date")]
    SurfaceStale,

    #[error("presentation surface was lost")]
    SurfaceLost,

    #[error("device lost")]
    DeviceLost,

    #[error("acquire failed: {0}")]
    Acquire(vk::Result),

    #[error("surface returned image {index} but only {count} slots exist")]
    InvalidImage { index: u32, count: usize },

    #[error("timed out waiting for the fence of slot {slot}")]
    FenceTimeout { slot: usize },

    #[error("fence wait for slot {slot} failed: {result}")]
    Wait { slot: usize, result: vk::Result },

    #[error("resetting slot {slot} failed: {result}")]
    Reset { slot: usize, result: vk::Result },

    #[error("recording commands for slot {slot} failed: {result}")]
    Record { slot: usize, result: vk::Result },

    #[error("queue submission for slot {slot} failed: {result}")]
    Submit { slot: usize, result: vk::Result },

    #[error("presenting slot {slot} failed: {result}")]
    Present { slot: usize, result: vk::Result },

    #[error("frame engine has already been shut down")]
    Retired,
}

impl FrameError {
    /// True when no further frame can succeed and the loop should drain.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeviceLost | Self::SurfaceLost | Self::Retired)
    }

    pub(crate) fn from_acquire(result: vk::Result) -> Self {
        match result {
            vk::Result::TIMEOUT | vk::Result::NOT_READY => Self::AcquireTimeout,
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SurfaceStale,
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            other => Self::Acquire(other),
        }
    }

    pub(crate) fn from_wait(slot: usize, result: vk::Result) -> Self {
        match result {
            vk::Result::TIMEOUT => Self::FenceTimeout { slot },
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            result => Self::Wait { slot, result },
        }
    }

    pub(crate) fn from_present(slot: usize, result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SurfaceStale,
            vk::Result::ERROR_SURFACE_LOST_KHR => Self::SurfaceLost,
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            result => Self::Present { slot, result },
        }
    }

    /// Device loss wins over the per-step variant built by `step`.
    pub(crate) fn device_or(result: vk::Result, step: impl FnOnce(vk::Result) -> Self) -> Self {
        if result == vk::Result::ERROR_DEVICE_LOST {
            Self::DeviceLost
        } else {
            step(result)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_results_map_to_recoverable_and_fatal_kinds() {
        assert_eq!(FrameError::from_acquire(vk::Result::TIMEOUT), FrameError::AcquireTimeout);
        assert_eq!(FrameError::from_acquire(vk::Result::NOT_READY), FrameError::AcquireTimeout);
        assert_eq!(
            FrameError::from_acquire(vk::Result::ERROR_OUT_OF_DATE_KHR),
            FrameError::SurfaceStale
        );
        assert!(!FrameError::SurfaceStale.is_fatal());
        assert!(FrameError::from_acquire(vk::Result::ERROR_SURFACE_LOST_KHR).is_fatal());
        assert!(FrameError::from_acquire(vk::Result::ERROR_DEVICE_LOST).is_fatal());
    }

    #[test]
    fn fence_timeout_is_distinct_from_device_loss() {
        let timeout = FrameError::from_wait(1, vk::Result::TIMEOUT);
        assert_eq!(timeout, FrameError::FenceTimeout { slot: 1 });
        assert!(!timeout.is_fatal());
        assert_eq!(
            FrameError::from_wait(1, vk::Result::ERROR_DEVICE_LOST),
            FrameError::DeviceLost
        );
    }

    #[test]
    fn device_loss_overrides_step_error() {
        let err = FrameError::device_or(vk::Result::ERROR_DEVICE_LOST, |result| {
            FrameError::Submit { slot: 0, result }
        });
        assert_eq!(err, FrameError::DeviceLost);

        let err = FrameError::device_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY, |result| {
            FrameError::Submit { slot: 0, result }
        });
        assert!(matches!(err, FrameError::Submit { slot: 0, .. }));
    }
}
