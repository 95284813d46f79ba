// Synchronization ring - fences and semaphores for frames in flight
//
// SyncObjectPool owns the primitives, FrameScheduler walks the ring.
// Neither is rebuilt on resize; only the swapchain is.

use ash::vk;

use super::{GpuDevice, SyncSlot};
use crate::error::{DeviceError, PresentationError, PresentationResult};

/// Fixed ring of `(image_available, render_finished, in_flight_fence)` triples.
///
/// Dropping the pool destroys every primitive, so the owner must make sure
/// the device is idle first.
pub struct SyncObjectPool<D: GpuDevice> {
    device: D,
    slots: Vec<SyncSlot>,
}

impl<D: GpuDevice> SyncObjectPool<D> {
    /// Allocates `max_frames_in_flight` slots.
    ///
    /// Fences start signaled so the first wait on each slot returns immediately.
    pub fn new(device: D, max_frames_in_flight: usize) -> Result<Self, DeviceError> {
        if max_frames_in_flight == 0 {
            return Err(DeviceError::NoFramesInFlight);
        }

        let mut pool = Self {
            device,
            slots: Vec::with_capacity(max_frames_in_flight),
        };

        // On error the partially filled pool drops and releases what it holds
        for index in 0..max_frames_in_flight {
            let slot = create_slot(&pool.device, index)?;
            pool.slots.push(slot);
        }

        log::debug!("Created {} synchronization slots", max_frames_in_flight);
        Ok(pool)
    }

    #[inline]
    pub fn slot(&self, index: usize) -> SyncSlot {
        self.slots[index]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn device(&self) -> &D {
        &self.device
    }
}

/// Creates one triple, releasing whatever was already created if a later step fails.
fn create_slot<D: GpuDevice>(device: &D, index: usize) -> Result<SyncSlot, DeviceError> {
    let image_available = device.create_semaphore()?;

    let render_finished = match device.create_semaphore() {
        Ok(semaphore) => semaphore,
        Err(e) => {
            device.destroy_semaphore(image_available);
            return Err(e.into());
        }
    };

    let in_flight_fence = match device.create_fence(true) {
        Ok(fence) => fence,
        Err(e) => {
            device.destroy_semaphore(render_finished);
            device.destroy_semaphore(image_available);
            return Err(e.into());
        }
    };

    Ok(SyncSlot {
        index,
        image_available,
        render_finished,
        in_flight_fence,
    })
}

impl<D: GpuDevice> Drop for SyncObjectPool<D> {
    fn drop(&mut self) {
        for slot in self.slots.drain(..) {
            self.device.destroy_semaphore(slot.image_available);
            self.device.destroy_semaphore(slot.render_finished);
            self.device.destroy_fence(slot.in_flight_fence);
        }
    }
}

/// Hands out ring slots in order: 0, 1, .., N-1, 0, 1, ..
///
/// Slot `i` comes around again only after N-1 other slots were issued,
/// which together with the fence wait in `begin_frame` keeps per-slot
/// submissions strictly ordered.
pub struct FrameScheduler<D: GpuDevice> {
    pool: SyncObjectPool<D>,
    current: usize,
    next: usize,
}

impl<D: GpuDevice> FrameScheduler<D> {
    pub fn new(pool: SyncObjectPool<D>) -> Self {
        Self {
            pool,
            current: 0,
            next: 0,
        }
    }

    /// Advances the ring and returns the slot for the upcoming frame.
    ///
    /// Does not wait or reset anything.
    pub fn next_sync_object(&mut self) -> SyncSlot {
        self.current = self.next;
        self.next = (self.current + 1) % self.pool.len();
        self.pool.slot(self.current)
    }

    /// Clears a slot's fence after the caller has waited on it.
    pub fn reset_fence(&self, slot_index: usize) -> PresentationResult<()> {
        let fence: vk::Fence = self.pool.slot(slot_index).in_flight_fence;
        self.pool
            .device()
            .reset_fence(fence)
            .map_err(PresentationError::fatal("vkResetFences"))
    }

    /// Index for per-frame resources sized to the ring (command buffers, uniforms).
    #[inline]
    pub fn current_frame_index(&self) -> usize {
        self.current
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.pool.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::testing::{Call, CallLog, MockGpu};

    #[test]
    fn test_zero_frames_in_flight_rejected() {
        let log = CallLog::default();
        let gpu = MockGpu::new(&log);
        let result = SyncObjectPool::new(gpu.clone(), 0);
        assert!(matches!(result, Err(DeviceError::NoFramesInFlight)));
        assert!(log.calls().is_empty());
    }

    #[test]
    fn test_fences_created_signaled() {
        let log = CallLog::default();
        let gpu = MockGpu::new(&log);
        let pool = SyncObjectPool::new(gpu.clone(), 3).unwrap();

        assert_eq!(pool.len(), 3);
        assert_eq!(gpu.live_objects(), 9);
        for i in 0..3 {
            assert!(gpu.is_signaled(pool.slot(i).in_flight_fence));
        }
        assert_eq!(
            log.count(|c| matches!(c, Call::CreateFence { signaled: true, .. })),
            3
        );
    }

    #[test]
    fn test_drop_releases_every_primitive() {
        let log = CallLog::default();
        let gpu = MockGpu::new(&log);
        let pool = SyncObjectPool::new(gpu.clone(), 2).unwrap();
        drop(pool);
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn test_partial_failure_releases_created_objects() {
        let log = CallLog::default();
        let gpu = MockGpu::new(&log);
        // Second slot fails on its render_finished semaphore
        gpu.fail_semaphores_after(3);

        let result = SyncObjectPool::new(gpu.clone(), 2);
        assert!(matches!(result, Err(DeviceError::Vulkan(_))));
        assert_eq!(gpu.live_objects(), 0);
    }

    #[test]
    fn test_ring_order() {
        let log = CallLog::default();
        let gpu = MockGpu::new(&log);
        let mut scheduler = FrameScheduler::new(SyncObjectPool::new(gpu, 3).unwrap());

        let indices: Vec<usize> = (0..10).map(|_| scheduler.next_sync_object().index).collect();
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(scheduler.current_frame_index(), 0);
    }

    #[test]
    fn test_no_repeat_when_more_than_one_slot() {
        let log = CallLog::default();
        let gpu = MockGpu::new(&log);
        let mut scheduler = FrameScheduler::new(SyncObjectPool::new(gpu, 2).unwrap());

        let mut previous = scheduler.next_sync_object().index;
        for _ in 0..7 {
            let index = scheduler.next_sync_object().index;
            assert_ne!(index, previous);
            previous = index;
        }
    }

    #[test]
    fn test_single_slot_ring() {
        let log = CallLog::default();
        let gpu = MockGpu::new(&log);
        let mut scheduler = FrameScheduler::new(SyncObjectPool::new(gpu, 1).unwrap());

        for _ in 0..4 {
            assert_eq!(scheduler.next_sync_object().index, 0);
        }
        assert_eq!(scheduler.frames_in_flight(), 1);
    }

    #[test]
    fn test_reset_fence_targets_slot() {
        let log = CallLog::default();
        let gpu = MockGpu::new(&log);
        let mut scheduler = FrameScheduler::new(SyncObjectPool::new(gpu.clone(), 2).unwrap());

        let slot = scheduler.next_sync_object();
        scheduler.reset_fence(slot.index).unwrap();
        assert!(!gpu.is_signaled(slot.in_flight_fence));
        assert_eq!(log.calls().last(), Some(&Call::ResetFence(slot.in_flight_fence)));
    }
}
