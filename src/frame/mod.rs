// Frame pacing core - platform independent
//
// Paces CPU frame recording against GPU execution and presentation:
//   slot fence wait -> acquire -> (caller records) -> submit -> present
// and funnels surface invalidation into a single rebuild path.
//
// The Vulkan backend implements the traits below; tests use in-memory mocks.

pub mod controller;
pub mod scheduler;
pub mod support;
#[cfg(test)]
pub(crate) mod testing;

use ash::prelude::VkResult;
use ash::vk;
use std::sync::Arc;

use crate::error::{PresentationError, PresentationResult};

pub use controller::{BeginFrame, FrameState, PresentOutcome, PresentationController};
pub use support::{FormatRequest, SwapchainConfig, SwapchainSupport};

/// Synchronization handles for one ring position.
///
/// All three are created and destroyed together by [`scheduler::SyncObjectPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSlot {
    pub index: usize,
    /// Signaled when the acquired image is safe to render into
    pub image_available: vk::Semaphore,
    /// Signaled when this slot's command buffer finished; present waits on it
    pub render_finished: vk::Semaphore,
    /// CPU waits here before reusing the slot
    pub in_flight_fence: vk::Fence,
}

/// One queue submission for a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSubmission {
    pub command_buffer: vk::CommandBuffer,
    pub wait_semaphore: vk::Semaphore,
    pub wait_stage: vk::PipelineStageFlags,
    pub signal_semaphore: vk::Semaphore,
    pub fence: vk::Fence,
}

/// Device operations the frame core needs.
pub trait GpuDevice {
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn destroy_fence(&self, fence: vk::Fence);

    /// Blocks until `fence` is signaled. Expiry comes back as `vk::Result::TIMEOUT`.
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn submit(&self, submission: &FrameSubmission) -> VkResult<()>;
    fn wait_idle(&self) -> VkResult<()>;
}

impl<T: GpuDevice + ?Sized> GpuDevice for Arc<T> {
    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        (**self).create_semaphore()
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        (**self).create_fence(signaled)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        (**self).destroy_semaphore(semaphore)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        (**self).destroy_fence(fence)
    }

    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()> {
        (**self).wait_for_fence(fence, timeout)
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        (**self).reset_fence(fence)
    }

    fn submit(&self, submission: &FrameSubmission) -> VkResult<()> {
        (**self).submit(submission)
    }

    fn wait_idle(&self) -> VkResult<()> {
        (**self).wait_idle()
    }
}

/// The presentable image chain as seen by the controller.
pub trait PresentChain {
    /// Raw acquire result: `(image_index, suboptimal)` or the platform error code.
    fn acquire_next_image(&mut self, signal: vk::Semaphore, timeout: u64) -> VkResult<(u32, bool)>;

    /// Raw present result: `Ok(true)` means suboptimal.
    fn queue_present(&mut self, image_index: u32, wait: vk::Semaphore) -> VkResult<bool>;

    /// Recreates the chain against the same surface with new dimensions.
    ///
    /// Returns `false`, leaving the chain untouched, while the surface has no
    /// area. Callers guarantee no in-flight work references the old images.
    fn rebuild(&mut self, preferred: vk::Extent2D) -> PresentationResult<bool>;

    fn config(&self) -> &SwapchainConfig;

    /// Number of images the platform actually handed out
    fn image_count(&self) -> usize;
}

/// Window-side source of framebuffer dimensions.
///
/// Polled once per rebuild attempt and never waited on: a zero axis defers the
/// rebuild to a later frame so the event loop keeps running.
pub trait FramebufferSize {
    fn framebuffer_size(&mut self) -> vk::Extent2D;
}

/// Notified after every swapchain rebuild.
///
/// Dependents recreate framebuffers and extent-sized attachments here.
pub trait SwapchainListener<S> {
    fn swapchain_recreated(&mut self, swapchain: &mut S) -> PresentationResult<()>;
}

impl<S> SwapchainListener<S> for () {
    fn swapchain_recreated(&mut self, _swapchain: &mut S) -> PresentationResult<()> {
        Ok(())
    }
}

/// Outcome of a successful-enough image acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    /// Image acquired; `suboptimal` asks for a rebuild once this frame is presented
    Ready { image_index: u32, suboptimal: bool },
    /// Nothing acquired, the chain must be rebuilt first
    SurfaceOutOfDate,
}

/// Outcome of a present request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentStatus {
    Optimal,
    Suboptimal,
    SurfaceOutOfDate,
}

/// Sorts a raw acquire result into the three recognized classes.
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> PresentationResult<AcquireStatus> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireStatus::Ready {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireStatus::SurfaceOutOfDate),
        Err(e) => Err(PresentationError::fatal("vkAcquireNextImageKHR")(e)),
    }
}

/// Sorts a raw present result into the three recognized classes.
pub fn classify_present(result: VkResult<bool>) -> PresentationResult<PresentStatus> {
    match result {
        Ok(false) => Ok(PresentStatus::Optimal),
        Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(PresentStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentStatus::SurfaceOutOfDate),
        Err(e) => Err(PresentationError::fatal("vkQueuePresentKHR")(e)),
    }
}
