// In-memory platform used by the frame core tests.
//
// Every platform call lands in a shared, ordered call log so tests can assert
// sequencing across the device, the chain, the window and listeners.

use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::{FrameSubmission, FramebufferSize, GpuDevice, PresentChain, SwapchainConfig, SwapchainListener};
use crate::error::PresentationResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateSemaphore(vk::Semaphore),
    CreateFence { fence: vk::Fence, signaled: bool },
    DestroySemaphore(vk::Semaphore),
    DestroyFence(vk::Fence),
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    Submit(FrameSubmission),
    WaitIdle,
    Acquire(vk::Semaphore),
    Present { image_index: u32, wait: vk::Semaphore },
    Rebuild(vk::Extent2D),
    PollSize(vk::Extent2D),
    Recreated(vk::Extent2D),
    /// Test-side marker for "commands recorded for this slot"
    Record(usize),
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().clone()
    }

    pub fn clear(&self) {
        self.0.lock().clear();
    }

    pub fn position(&self, call: &Call) -> Option<usize> {
        self.0.lock().iter().position(|c| c == call)
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().iter().filter(|c| pred(c)).count()
    }
}

#[derive(Default)]
struct GpuState {
    next_handle: u64,
    fences: HashMap<vk::Fence, bool>,
    semaphores: HashSet<vk::Semaphore>,
    semaphores_before_failure: Option<usize>,
    submit_result: Option<vk::Result>,
}

/// A device whose GPU finishes every submission instantly.
///
/// Waiting on an unsignaled fence fails with `TIMEOUT`, since a real device
/// would block forever.
pub struct MockGpu {
    log: CallLog,
    state: Mutex<GpuState>,
}

impl MockGpu {
    pub fn new(log: &CallLog) -> Arc<Self> {
        Arc::new(Self {
            log: log.clone(),
            state: Mutex::new(GpuState {
                next_handle: 1,
                ..Default::default()
            }),
        })
    }

    /// The n-th semaphore creation (zero based) and all after it fail
    pub fn fail_semaphores_after(&self, n: usize) {
        self.state.lock().semaphores_before_failure = Some(n);
    }

    pub fn fail_submit_with(&self, result: vk::Result) {
        self.state.lock().submit_result = Some(result);
    }

    pub fn live_objects(&self) -> usize {
        let state = self.state.lock();
        state.fences.len() + state.semaphores.len()
    }

    pub fn is_signaled(&self, fence: vk::Fence) -> bool {
        self.state.lock().fences.get(&fence).copied().unwrap_or(false)
    }

    fn next_raw(state: &mut GpuState) -> u64 {
        let raw = state.next_handle;
        state.next_handle += 1;
        raw
    }
}

impl GpuDevice for MockGpu {
    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        let mut state = self.state.lock();
        if let Some(remaining) = state.semaphores_before_failure {
            if remaining == 0 {
                return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            state.semaphores_before_failure = Some(remaining - 1);
        }
        let semaphore = vk::Semaphore::from_raw(Self::next_raw(&mut state));
        state.semaphores.insert(semaphore);
        self.log.push(Call::CreateSemaphore(semaphore));
        Ok(semaphore)
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let mut state = self.state.lock();
        let fence = vk::Fence::from_raw(Self::next_raw(&mut state));
        state.fences.insert(fence, signaled);
        self.log.push(Call::CreateFence { fence, signaled });
        Ok(fence)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.state.lock().semaphores.remove(&semaphore);
        self.log.push(Call::DestroySemaphore(semaphore));
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.state.lock().fences.remove(&fence);
        self.log.push(Call::DestroyFence(fence));
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        self.log.push(Call::WaitFence(fence));
        match self.state.lock().fences.get(&fence) {
            Some(true) => Ok(()),
            Some(false) => Err(vk::Result::TIMEOUT),
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        self.log.push(Call::ResetFence(fence));
        match self.state.lock().fences.get_mut(&fence) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn submit(&self, submission: &FrameSubmission) -> VkResult<()> {
        self.log.push(Call::Submit(*submission));
        let mut state = self.state.lock();
        if let Some(result) = state.submit_result {
            return Err(result);
        }
        match state.fences.get_mut(&submission.fence) {
            // Submitting with a fence that is still signaled is a usage error
            Some(signaled) if !*signaled => {
                *signaled = true;
                Ok(())
            }
            _ => Err(vk::Result::ERROR_UNKNOWN),
        }
    }

    fn wait_idle(&self) -> VkResult<()> {
        self.log.push(Call::WaitIdle);
        Ok(())
    }
}

pub fn test_config(extent: vk::Extent2D) -> SwapchainConfig {
    SwapchainConfig {
        format: vk::Format::B8G8R8A8_SRGB,
        color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        present_mode: vk::PresentModeKHR::MAILBOX,
        extent,
        image_count: 3,
    }
}

/// A chain that replays scripted results, then succeeds.
pub struct MockSwapchain {
    log: CallLog,
    config: SwapchainConfig,
    images: u32,
    next_image: u32,
    pub acquire_results: VecDeque<VkResult<(u32, bool)>>,
    pub present_results: VecDeque<VkResult<bool>>,
    /// Fixed extent the surface dictates; `None` follows the window
    pub surface_extent: Option<vk::Extent2D>,
}

impl MockSwapchain {
    pub fn new(log: &CallLog, extent: vk::Extent2D) -> Self {
        let config = test_config(extent);
        Self {
            log: log.clone(),
            images: config.image_count,
            config,
            next_image: 0,
            acquire_results: VecDeque::new(),
            present_results: VecDeque::new(),
            surface_extent: None,
        }
    }

    /// A chain whose creation was deferred: no images until the first rebuild
    pub fn unbuilt(log: &CallLog) -> Self {
        Self {
            images: 0,
            ..Self::new(log, vk::Extent2D::default())
        }
    }
}

impl PresentChain for MockSwapchain {
    fn acquire_next_image(&mut self, signal: vk::Semaphore, _timeout: u64) -> VkResult<(u32, bool)> {
        self.log.push(Call::Acquire(signal));
        self.acquire_results.pop_front().unwrap_or_else(|| {
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.images;
            Ok((index, false))
        })
    }

    fn queue_present(&mut self, image_index: u32, wait: vk::Semaphore) -> VkResult<bool> {
        self.log.push(Call::Present { image_index, wait });
        self.present_results.pop_front().unwrap_or(Ok(false))
    }

    fn rebuild(&mut self, preferred: vk::Extent2D) -> PresentationResult<bool> {
        let extent = self.surface_extent.unwrap_or(preferred);
        if extent.width == 0 || extent.height == 0 {
            return Ok(false);
        }
        self.log.push(Call::Rebuild(extent));
        self.config.extent = extent;
        self.images = self.config.image_count;
        Ok(true)
    }

    fn config(&self) -> &SwapchainConfig {
        &self.config
    }

    fn image_count(&self) -> usize {
        self.images as usize
    }
}

/// A window whose size follows a scripted sequence of polls, then stays put.
pub struct MockWindow {
    log: CallLog,
    sizes: VecDeque<vk::Extent2D>,
    last: vk::Extent2D,
}

impl MockWindow {
    pub fn new(log: &CallLog, size: vk::Extent2D) -> Self {
        Self {
            log: log.clone(),
            sizes: VecDeque::new(),
            last: size,
        }
    }

    pub fn script(&mut self, sizes: &[(u32, u32)]) {
        self.sizes.extend(sizes.iter().map(|&(width, height)| vk::Extent2D { width, height }));
    }
}

impl FramebufferSize for MockWindow {
    fn framebuffer_size(&mut self) -> vk::Extent2D {
        if let Some(size) = self.sizes.pop_front() {
            self.last = size;
        }
        self.log.push(Call::PollSize(self.last));
        self.last
    }
}

pub struct RecordingListener {
    log: CallLog,
}

impl RecordingListener {
    pub fn new(log: &CallLog) -> Self {
        Self { log: log.clone() }
    }
}

impl<S: PresentChain> SwapchainListener<S> for RecordingListener {
    fn swapchain_recreated(&mut self, swapchain: &mut S) -> PresentationResult<()> {
        self.log.push(Call::Recreated(swapchain.config().extent));
        Ok(())
    }
}

pub fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}
