// Error taxonomy for the frame core
//
// Recoverable surface conditions (out-of-date, suboptimal, minimized window)
// never show up here: the presentation controller resolves them itself.
// Everything in this file terminates the frame loop.

use ash::vk;
use thiserror::Error;

use crate::frame::FrameState;

/// Failures while allocating the per-slot synchronization primitives.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// A ring of zero slots cannot pace anything
    #[error("max_frames_in_flight must be at least 1")]
    NoFramesInFlight,

    /// Semaphore or fence creation failed at the platform level
    #[error("failed to create synchronization primitive: {0}")]
    Vulkan(#[from] vk::Result),
}

/// Unrecoverable frame-loop error.
#[derive(Error, Debug)]
pub enum PresentationError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    /// A platform call returned something outside success/suboptimal/out-of-date
    #[error("{operation} failed: {result}")]
    Fatal {
        operation: &'static str,
        result: vk::Result,
    },

    /// Frame operations were called out of sequence
    #[error("`{operation}` called while {actual:?}, expected {expected:?}")]
    InvalidState {
        operation: &'static str,
        expected: FrameState,
        actual: FrameState,
    },

    #[error("surface reports no supported formats")]
    NoSurfaceFormat,

    #[error("no supported depth attachment format")]
    NoDepthFormat,

    #[error("GPU memory allocation failed: {0}")]
    Allocation(#[from] gpu_allocator::AllocationError),
}

impl PresentationError {
    /// Maps a raw Vulkan result into a fatal error tagged with the failing call.
    ///
    /// Meant for `map_err`: `.map_err(PresentationError::fatal("vkQueueSubmit"))`
    pub fn fatal(operation: &'static str) -> impl Fn(vk::Result) -> Self {
        move |result| Self::Fatal { operation, result }
    }
}

pub type PresentationResult<T> = std::result::Result<T, PresentationError>;
