// Presentation controller - the per-frame state machine
//
// FRAME FLOW:
//   Idle -> WaitingForSlot -> Acquiring -> Recording (caller) -> Submitting
//        -> Presenting -> Idle
//   Acquiring | Presenting -> Rebuilding -> Idle   (out-of-date, suboptimal,
//                                                   or a flagged resize)
//
// Out-of-date and suboptimal surfaces are handled here and never reach the
// caller as errors. Anything else the platform reports is fatal.
//
// A rebuild never blocks on the window. While the framebuffer or the surface
// has no area the rebuild stays pending and frames are skipped until a later
// begin_frame finds a drawable size.

use ash::vk;

use super::scheduler::{FrameScheduler, SyncObjectPool};
use super::{
    classify_acquire, classify_present, AcquireStatus, FrameSubmission, FramebufferSize,
    GpuDevice, PresentChain, PresentStatus, SwapchainListener, SyncSlot,
};
use crate::error::{PresentationError, PresentationResult};

/// Where the controller is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    WaitingForSlot,
    Acquiring,
    /// Image acquired, caller is recording commands
    Recording,
    Submitting,
    /// Submitted, waiting for `present_frame`
    Presenting,
    Rebuilding,
}

/// A frame the caller may record into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub slot: SyncSlot,
    pub image_index: u32,
    /// The image is usable, but the chain gets rebuilt after this frame presents
    pub suboptimal: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginFrame {
    Ready(Frame),
    /// The surface was out of date or has no area; skip this loop iteration
    RebuildRequested,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Presented, then rebuilt the swapchain for the next acquire
    Rebuilt,
    /// Presented, but the window has no area; the rebuild is retried by the
    /// next `begin_frame`
    Deferred,
}

/// Drives acquire -> submit -> present and owns the swapchain lifecycle.
///
/// The sync ring is created once and survives every rebuild; only the
/// swapchain is recreated.
pub struct PresentationController<D: GpuDevice + Clone, S: PresentChain> {
    device: D,
    scheduler: FrameScheduler<D>,
    swapchain: S,
    state: FrameState,
    resize_requested: bool,
    /// A rebuild was needed but the surface had no area
    rebuild_pending: bool,
    fence_timeout: u64,
    frames_presented: u64,
}

impl<D: GpuDevice + Clone, S: PresentChain> PresentationController<D, S> {
    pub fn new(
        device: D,
        swapchain: S,
        max_frames_in_flight: usize,
        fence_timeout: u64,
    ) -> PresentationResult<Self> {
        let pool = SyncObjectPool::new(device.clone(), max_frames_in_flight)?;

        log::info!(
            "Presentation controller ready: {} frames in flight, {} swapchain images",
            max_frames_in_flight,
            swapchain.image_count()
        );

        // A chain created against a minimized window has no images yet
        let rebuild_pending = swapchain.image_count() == 0;

        Ok(Self {
            device,
            scheduler: FrameScheduler::new(pool),
            swapchain,
            state: FrameState::Idle,
            resize_requested: false,
            rebuild_pending,
            fence_timeout,
            frames_presented: 0,
        })
    }

    /// Waits for the next slot and acquires an image for it.
    ///
    /// Blocks on the slot's fence, which the GPU signals when the frame that
    /// last used this slot completes. A pending rebuild is retried first; while
    /// it cannot run the frame is skipped without touching the ring.
    pub fn begin_frame<W, L>(&mut self, window: &mut W, listener: &mut L) -> PresentationResult<BeginFrame>
    where
        W: FramebufferSize,
        L: SwapchainListener<S>,
    {
        self.expect_state("begin_frame", FrameState::Idle)?;

        if self.rebuild_pending && !self.rebuild_swapchain(window, listener)? {
            return Ok(BeginFrame::RebuildRequested);
        }

        self.state = FrameState::WaitingForSlot;
        let slot = self.scheduler.next_sync_object();
        if let Err(e) = self.device.wait_for_fence(slot.in_flight_fence, self.fence_timeout) {
            // TIMEOUT lands here too: with an effectively infinite timeout it means a GPU fault
            self.state = FrameState::Idle;
            return Err(PresentationError::fatal("vkWaitForFences")(e));
        }

        self.state = FrameState::Acquiring;
        let acquired = classify_acquire(
            self.swapchain
                .acquire_next_image(slot.image_available, self.fence_timeout),
        );

        match acquired {
            Ok(AcquireStatus::Ready {
                image_index,
                suboptimal,
            }) => {
                // Reset only once work is guaranteed to follow, otherwise a
                // skipped frame would leave the fence unsignaled forever
                if let Err(e) = self.scheduler.reset_fence(slot.index) {
                    self.state = FrameState::Idle;
                    return Err(e);
                }
                if suboptimal {
                    log::debug!("Acquired suboptimal image {}, rebuilding after present", image_index);
                }
                self.state = FrameState::Recording;
                Ok(BeginFrame::Ready(Frame {
                    slot,
                    image_index,
                    suboptimal,
                }))
            }
            Ok(AcquireStatus::SurfaceOutOfDate) => {
                log::debug!("Swapchain out of date during acquire, skipping frame");
                self.rebuild_swapchain(window, listener)?;
                Ok(BeginFrame::RebuildRequested)
            }
            Err(e) => {
                self.state = FrameState::Idle;
                Err(e)
            }
        }
    }

    /// Submits the frame's commands.
    ///
    /// Waits on `image_available` at COLOR_ATTACHMENT_OUTPUT so earlier
    /// pipeline stages can run before the image is ready; signals
    /// `render_finished` and the slot fence on completion.
    pub fn submit(&mut self, frame: &Frame, command_buffer: vk::CommandBuffer) -> PresentationResult<()> {
        self.expect_state("submit", FrameState::Recording)?;
        self.state = FrameState::Submitting;

        let submission = FrameSubmission {
            command_buffer,
            wait_semaphore: frame.slot.image_available,
            wait_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            signal_semaphore: frame.slot.render_finished,
            fence: frame.slot.in_flight_fence,
        };

        if let Err(e) = self.device.submit(&submission) {
            self.state = FrameState::Idle;
            return Err(PresentationError::fatal("vkQueueSubmit")(e));
        }

        self.state = FrameState::Presenting;
        Ok(())
    }

    /// Presents the frame, then rebuilds if the surface changed.
    ///
    /// The submitted frame is still shown; only the next acquire needs the
    /// new swapchain.
    pub fn present_frame<W, L>(
        &mut self,
        frame: &Frame,
        window: &mut W,
        listener: &mut L,
    ) -> PresentationResult<PresentOutcome>
    where
        W: FramebufferSize,
        L: SwapchainListener<S>,
    {
        self.expect_state("present_frame", FrameState::Presenting)?;

        let status = match classify_present(
            self.swapchain
                .queue_present(frame.image_index, frame.slot.render_finished),
        ) {
            Ok(status) => status,
            Err(e) => {
                self.state = FrameState::Idle;
                return Err(e);
            }
        };
        self.frames_presented += 1;

        let needs_rebuild =
            status != PresentStatus::Optimal || frame.suboptimal || self.resize_requested;

        if needs_rebuild {
            log::debug!(
                "Rebuilding after present (status {:?}, acquired suboptimal: {}, resize flagged: {})",
                status,
                frame.suboptimal,
                self.resize_requested
            );
            if self.rebuild_swapchain(window, listener)? {
                Ok(PresentOutcome::Rebuilt)
            } else {
                Ok(PresentOutcome::Deferred)
            }
        } else {
            self.state = FrameState::Idle;
            Ok(PresentOutcome::Presented)
        }
    }

    /// Rebuilds the swapchain between frames.
    ///
    /// Returns `false` when the window or surface has no area; the rebuild is
    /// then retried by the next `begin_frame`.
    pub fn rebuild<W, L>(&mut self, window: &mut W, listener: &mut L) -> PresentationResult<bool>
    where
        W: FramebufferSize,
        L: SwapchainListener<S>,
    {
        self.expect_state("rebuild", FrameState::Idle)?;
        self.rebuild_swapchain(window, listener)
    }

    /// Drains the device, recreates the chain and notifies dependents. The
    /// sync ring is left untouched.
    fn rebuild_swapchain<W, L>(&mut self, window: &mut W, listener: &mut L) -> PresentationResult<bool>
    where
        W: FramebufferSize,
        L: SwapchainListener<S>,
    {
        self.state = FrameState::Rebuilding;
        let result = self.rebuild_inner(window, listener);
        self.state = FrameState::Idle;
        result
    }

    fn rebuild_inner<W, L>(&mut self, window: &mut W, listener: &mut L) -> PresentationResult<bool>
    where
        W: FramebufferSize,
        L: SwapchainListener<S>,
    {
        self.device
            .wait_idle()
            .map_err(PresentationError::fatal("vkDeviceWaitIdle"))?;

        let extent = window.framebuffer_size();
        if extent.width == 0 || extent.height == 0 {
            return Ok(self.defer_rebuild("framebuffer has no area"));
        }
        if !self.swapchain.rebuild(extent)? {
            return Ok(self.defer_rebuild("surface reports a zero extent"));
        }
        listener.swapchain_recreated(&mut self.swapchain)?;
        self.resize_requested = false;
        self.rebuild_pending = false;

        let config = self.swapchain.config();
        log::info!(
            "Swapchain rebuilt: {}x{}, {} images",
            config.extent.width,
            config.extent.height,
            self.swapchain.image_count()
        );
        Ok(true)
    }

    fn defer_rebuild(&mut self, reason: &str) -> bool {
        if !self.rebuild_pending {
            log::info!("Swapchain rebuild deferred: {}", reason);
        }
        self.rebuild_pending = true;
        false
    }

    /// Flags a window resize; the chain is rebuilt after the next present.
    pub fn request_resize(&mut self) {
        self.resize_requested = true;
    }

    #[inline]
    pub fn current_frame_index(&self) -> usize {
        self.scheduler.current_frame_index()
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.scheduler.frames_in_flight()
    }

    #[inline]
    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.config().extent
    }

    #[inline]
    pub fn swapchain_image_count(&self) -> usize {
        self.swapchain.image_count()
    }

    #[inline]
    pub fn swapchain(&self) -> &S {
        &self.swapchain
    }

    #[inline]
    pub fn swapchain_mut(&mut self) -> &mut S {
        &mut self.swapchain
    }

    #[inline]
    pub fn state(&self) -> FrameState {
        self.state
    }

    #[inline]
    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }

    fn expect_state(&self, operation: &'static str, expected: FrameState) -> PresentationResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(PresentationError::InvalidState {
                operation,
                expected,
                actual: self.state,
            })
        }
    }
}

impl<D: GpuDevice + Clone, S: PresentChain> Drop for PresentationController<D, S> {
    fn drop(&mut self) {
        // The sync ring and swapchain are released after this, with nothing in flight
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during teardown: {}", e);
        }
    }
}
